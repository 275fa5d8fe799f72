// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Public key types for trusted collection metadata.

use crate::schema::decoded::{Decoded, Hex, SpkiPem};
use crate::schema::error::{self, Result};
use crate::schema::spki;
use aws_lc_rs::signature::{self, UnparsedPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::ResultExt;
use std::collections::HashMap;

/// A public key in a trusted collection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "keytype")]
#[serde(rename_all = "lowercase")]
pub enum Key {
    /// An RSA key.
    Rsa {
        /// The RSA key.
        keyval: RsaKey,
        /// Denotes the key's signature scheme.
        scheme: RsaScheme,
        /// Any additional fields read during deserialization; will not be used.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
    /// An ECDSA key.
    Ecdsa {
        /// The ECDSA key.
        keyval: EcdsaKey,
        /// Denotes the key's signature scheme.
        scheme: EcdsaScheme,
        /// Any additional fields read during deserialization; will not be used.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
    /// An Ed25519 key.
    Ed25519 {
        /// The Ed25519 key.
        keyval: Ed25519Key,
        /// Denotes the key's signature scheme.
        scheme: Ed25519Scheme,
        /// Any additional fields read during deserialization; will not be used.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
}

/// Used to identify the RSA signature scheme in use.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum RsaScheme {
    /// `rsassa-pss-sha256`: RSA Probabilistic signature scheme with appendix.
    #[serde(rename = "rsassa-pss-sha256")]
    RsassaPssSha256,
}

forward_display_to_serde!(RsaScheme);
forward_from_str_to_serde!(RsaScheme);

/// Represents an RSA public key.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RsaKey {
    /// The public key, a PEM-framed SubjectPublicKeyInfo document.
    pub public: Decoded<SpkiPem>,

    /// Any additional fields read during deserialization; will not be used.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// Used to identify the ECDSA signature scheme in use.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum EcdsaScheme {
    /// `ecdsa-sha2-nistp256`: ECDSA on the P-256 curve with SHA-256.
    #[serde(rename = "ecdsa-sha2-nistp256")]
    EcdsaSha2Nistp256,
}

forward_display_to_serde!(EcdsaScheme);
forward_from_str_to_serde!(EcdsaScheme);

/// Represents an ECDSA public key.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EcdsaKey {
    /// The public key, a PEM-framed SubjectPublicKeyInfo document.
    pub public: Decoded<SpkiPem>,

    /// Any additional fields read during deserialization; will not be used.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// Used to identify the Ed25519 signature scheme in use.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum Ed25519Scheme {
    /// `ed25519`: Ed25519 signatures.
    #[serde(rename = "ed25519")]
    Ed25519,
}

forward_display_to_serde!(Ed25519Scheme);
forward_from_str_to_serde!(Ed25519Scheme);

/// Represents an Ed25519 public key.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Ed25519Key {
    /// The public key, hex-encoded.
    pub public: Decoded<Hex>,

    /// Any additional fields read during deserialization; will not be used.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Key {
    /// Calculate the key ID for this key: the SHA-256 digest of the key's
    /// canonical JSON form. A key's ID is uniquely determined by its public
    /// half.
    pub fn key_id(&self) -> Result<Decoded<Hex>> {
        let buf = crate::canonical::to_canonical_json(self).context(
            error::JsonSerializationSnafu {
                what: "key".to_owned(),
            },
        )?;
        let digest = aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, &buf);
        Ok(digest.as_ref().to_vec().into())
    }

    /// Verify a signature made by this key over `msg`.
    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> bool {
        let verified = match self {
            Key::Rsa {
                keyval,
                scheme: RsaScheme::RsassaPssSha256,
                ..
            } => spki::parse(keyval.public.as_ref())
                .ok()
                .filter(|(alg, _)| *alg == spki::Algorithm::Rsa)
                .map(|(_, pkcs1)| {
                    UnparsedPublicKey::new(&signature::RSA_PSS_2048_8192_SHA256, &pkcs1)
                        .verify(msg, signature)
                        .is_ok()
                }),
            Key::Ecdsa {
                keyval,
                scheme: EcdsaScheme::EcdsaSha2Nistp256,
                ..
            } => spki::parse(keyval.public.as_ref())
                .ok()
                .filter(|(alg, _)| *alg == spki::Algorithm::EcP256)
                .map(|(_, point)| {
                    UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_ASN1, &point)
                        .verify(msg, signature)
                        .is_ok()
                }),
            Key::Ed25519 {
                keyval,
                scheme: Ed25519Scheme::Ed25519,
                ..
            } => Some(
                UnparsedPublicKey::new(&signature::ED25519, keyval.public.as_ref())
                    .verify(msg, signature)
                    .is_ok(),
            ),
        };
        verified.unwrap_or(false)
    }
}
