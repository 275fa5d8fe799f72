// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provides the `Sign` trait which abstracts over the method of signing with
//! different key types.

use crate::error::{self, Result};
use crate::schema::decoded::Decoded;
use crate::schema::key::{
    EcdsaKey, EcdsaScheme, Ed25519Key, Ed25519Scheme, Key, RsaKey, RsaScheme,
};
use crate::schema::spki;
use aws_lc_rs::rand::SecureRandom;
use aws_lc_rs::signature::{
    EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING,
    RSA_PSS_SHA256,
};
use pkcs8::der::Decode;
use snafu::ResultExt;
use std::collections::HashMap;
use std::convert::TryFrom;
use zeroize::Zeroizing;

/// This trait must be implemented for each type of key with which you will
/// sign things.
pub trait Sign: Send + Sync {
    /// Returns the decoded key along with its scheme and other metadata.
    fn public_key(&self) -> Key;

    /// Signs the supplied message.
    fn sign(&self, msg: &[u8], rng: &dyn SecureRandom) -> Result<Vec<u8>>;
}

/// Keypair used for signing metadata.
#[allow(clippy::upper_case_acronyms)]
pub enum SignKeyPair {
    /// RSA key pair.
    RSA(RsaKeyPair),
    /// ED25519 key pair.
    ED25519(Ed25519KeyPair),
    /// ECDSA key pair.
    ECDSA(EcdsaKeyPair),
}

impl std::fmt::Debug for SignKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key pairs hold private material; never format it.
        match self {
            SignKeyPair::RSA(_) => f.write_str("SignKeyPair::RSA"),
            SignKeyPair::ED25519(_) => f.write_str("SignKeyPair::ED25519"),
            SignKeyPair::ECDSA(_) => f.write_str("SignKeyPair::ECDSA"),
        }
    }
}

impl Sign for SignKeyPair {
    fn public_key(&self) -> Key {
        match self {
            SignKeyPair::RSA(key) => Key::Rsa {
                keyval: RsaKey {
                    public: Decoded::from(spki::rsa_spki(key.public_key().as_ref())),
                    _extra: HashMap::new(),
                },
                scheme: RsaScheme::RsassaPssSha256,
                _extra: HashMap::new(),
            },
            SignKeyPair::ED25519(key) => Key::Ed25519 {
                keyval: Ed25519Key {
                    public: Decoded::from(key.public_key().as_ref().to_vec()),
                    _extra: HashMap::new(),
                },
                scheme: Ed25519Scheme::Ed25519,
                _extra: HashMap::new(),
            },
            SignKeyPair::ECDSA(key) => Key::Ecdsa {
                keyval: EcdsaKey {
                    public: Decoded::from(spki::p256_spki(key.public_key().as_ref())),
                    _extra: HashMap::new(),
                },
                scheme: EcdsaScheme::EcdsaSha2Nistp256,
                _extra: HashMap::new(),
            },
        }
    }

    fn sign(&self, msg: &[u8], rng: &dyn SecureRandom) -> Result<Vec<u8>> {
        match self {
            SignKeyPair::RSA(key) => {
                let mut signature = vec![0; key.public_modulus_len()];
                key.sign(&RSA_PSS_SHA256, rng, msg, &mut signature)
                    .context(error::SignSnafu)?;
                Ok(signature)
            }
            SignKeyPair::ED25519(key) => Ok(key.sign(msg).as_ref().to_vec()),
            SignKeyPair::ECDSA(key) => {
                let signature = key.sign(rng, msg).context(error::SignSnafu)?;
                Ok(signature.as_ref().to_vec())
            }
        }
    }
}

/// Decrypts a PKCS#8-encrypted private key in PEM format using the given
/// passphrase, returning the cleartext PKCS#8 DER document.
pub fn decrypt_key(encrypted_pem: &pem::Pem, password: &str) -> Result<Zeroizing<Vec<u8>>> {
    let encrypted = pkcs8::EncryptedPrivateKeyInfo::from_der(encrypted_pem.contents())
        .map_err(pkcs8::Error::from)
        .context(error::KeyDecryptSnafu)?;
    let decrypted = encrypted
        .decrypt(password.as_bytes())
        .context(error::KeyDecryptSnafu)?;
    Ok(Zeroizing::new(decrypted.as_bytes().to_vec()))
}

/// Encrypts a cleartext PKCS#8 DER document with the given passphrase and
/// returns it in PEM format.
pub fn encrypt_key(pkcs8_der: &[u8], password: &str) -> Result<String> {
    let info = pkcs8::PrivateKeyInfo::try_from(pkcs8_der).context(error::KeyEncryptSnafu)?;
    let encrypted = info
        .encrypt(rand::rngs::OsRng, password.as_bytes())
        .context(error::KeyEncryptSnafu)?;
    let pem = pem::Pem::new("ENCRYPTED PRIVATE KEY", encrypted.as_bytes().to_vec());
    Ok(pem::encode(&pem))
}

/// Wraps a cleartext PKCS#8 DER document in PEM format.
pub fn cleartext_pem(pkcs8_der: &[u8]) -> String {
    let pem = pem::Pem::new("PRIVATE KEY", pkcs8_der.to_vec());
    pem::encode(&pem)
}

/// Whether PEM-framed key material is passphrase-encrypted.
pub fn is_encrypted(pem: &pem::Pem) -> bool {
    pem.tag() == "ENCRYPTED PRIVATE KEY"
}

/// Parses a supplied keypair and if it is recognized, returns an object that
/// implements the `Sign` trait.
///
/// Accepted keys: ED25519 pkcs8, ECDSA pkcs8, RSA pkcs8 or PKCS#1.
pub fn parse_keypair(key: &[u8], password: Option<&str>) -> Result<SignKeyPair> {
    let pem = pem::parse(key).context(error::PemParseSnafu)?;
    let der: Zeroizing<Vec<u8>> = if is_encrypted(&pem) {
        match password {
            Some(password) => decrypt_key(&pem, password)?,
            None => return error::KeyUnrecognizedSnafu.fail(),
        }
    } else {
        Zeroizing::new(pem.contents().to_vec())
    };

    if let Ok(ed25519_key_pair) = Ed25519KeyPair::from_pkcs8(&der) {
        Ok(SignKeyPair::ED25519(ed25519_key_pair))
    } else if let Ok(ecdsa_key_pair) =
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &der)
    {
        Ok(SignKeyPair::ECDSA(ecdsa_key_pair))
    } else {
        match pem.tag() {
            "PRIVATE KEY" | "ENCRYPTED PRIVATE KEY" => {
                if let Ok(rsa_key_pair) = RsaKeyPair::from_pkcs8(&der) {
                    Ok(SignKeyPair::RSA(rsa_key_pair))
                } else {
                    error::KeyUnrecognizedSnafu.fail()
                }
            }
            "RSA PRIVATE KEY" => Ok(SignKeyPair::RSA(
                RsaKeyPair::from_der(&der).context(error::KeyRejectedSnafu)?,
            )),
            _ => error::KeyUnrecognizedSnafu.fail(),
        }
    }
}

/// Generates a new ECDSA P-256 key pair, returning its cleartext PKCS#8 DER
/// document.
pub fn generate_ecdsa_key(rng: &dyn SecureRandom) -> Result<Zeroizing<Vec<u8>>> {
    let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, rng)
        .context(error::SignSnafu)?;
    Ok(Zeroizing::new(document.as_ref().to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_lc_rs::rand::SystemRandom;

    #[test]
    fn generated_ecdsa_key_round_trips_through_pem() {
        let rng = SystemRandom::new();
        let der = generate_ecdsa_key(&rng).unwrap();
        let pem_text = cleartext_pem(&der);
        let pair = parse_keypair(pem_text.as_bytes(), None).unwrap();
        assert!(matches!(pair, SignKeyPair::ECDSA(_)));

        // Key IDs are uniquely determined by the public half.
        let first = pair.public_key().key_id().unwrap();
        let second = parse_keypair(pem_text.as_bytes(), None)
            .unwrap()
            .public_key()
            .key_id()
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn encrypted_key_requires_the_passphrase() {
        let rng = SystemRandom::new();
        let der = generate_ecdsa_key(&rng).unwrap();
        let encrypted = encrypt_key(&der, "opensesame").unwrap();

        assert!(parse_keypair(encrypted.as_bytes(), None).is_err());
        assert!(parse_keypair(encrypted.as_bytes(), Some("wrong")).is_err());
        let pair = parse_keypair(encrypted.as_bytes(), Some("opensesame")).unwrap();
        assert!(matches!(pair, SignKeyPair::ECDSA(_)));
    }

    #[test]
    fn signatures_verify_with_the_public_key() {
        let rng = SystemRandom::new();
        let der = generate_ecdsa_key(&rng).unwrap();
        let pair = parse_keypair(cleartext_pem(&der).as_bytes(), None).unwrap();

        let msg = b"canonical bytes";
        let sig = pair.sign(msg, &rng).unwrap();
        assert!(pair.public_key().verify(msg, &sig));
        assert!(!pair.public_key().verify(b"tampered", &sig));
    }
}
