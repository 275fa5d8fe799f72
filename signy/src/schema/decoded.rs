// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provides the `Decoded` wrapper, which pairs raw bytes with the string
//! encoding they arrived in. Serializing a `Decoded<T>` reproduces the
//! original string, which is required for stable key IDs and signatures.

use crate::schema::error::{self, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::ResultExt;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;

/// A string encoding scheme for byte data.
pub trait Encode {
    /// Encode bytes into their string form.
    fn encode(bytes: &[u8]) -> String;
}

/// The inverse of [`Encode`].
pub trait Decode {
    /// Decode a string into bytes.
    fn decode(s: &str) -> Result<Vec<u8>>;
}

/// Lowercase hexadecimal encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hex;

impl Encode for Hex {
    fn encode(bytes: &[u8]) -> String {
        hex::encode(bytes)
    }
}

impl Decode for Hex {
    fn decode(s: &str) -> Result<Vec<u8>> {
        hex::decode(s).context(error::HexDecodeSnafu)
    }
}

/// Standard base64 encoding with padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Base64;

impl Encode for Base64 {
    fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }
}

impl Decode for Base64 {
    fn decode(s: &str) -> Result<Vec<u8>> {
        STANDARD.decode(s).context(error::Base64DecodeSnafu)
    }
}

/// A PEM document framing a DER-encoded `SubjectPublicKeyInfo`. The decoded
/// bytes are the DER contents; the encoded form is the full PEM text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpkiPem;

impl Encode for SpkiPem {
    fn encode(bytes: &[u8]) -> String {
        let pem = pem::Pem::new("PUBLIC KEY", bytes.to_vec());
        // Trailing newline is stripped so the encoded form round-trips with
        // keys produced by other implementations.
        pem::encode(&pem).trim_end().to_owned()
    }
}

impl Decode for SpkiPem {
    fn decode(s: &str) -> Result<Vec<u8>> {
        let pem = pem::parse(s).context(error::PemDecodeSnafu)?;
        Ok(pem.contents().to_vec())
    }
}

/// Byte data that was decoded from, and will re-serialize to, the string
/// encoding `T`.
#[derive(Clone, Default)]
pub struct Decoded<T> {
    bytes: Vec<u8>,
    original: String,
    spooky: PhantomData<T>,
}

impl<T: Decode> Decoded<T> {
    /// Parse a string in the `T` encoding.
    pub fn from_encoded(s: &str) -> Result<Self> {
        Ok(Self {
            bytes: T::decode(s)?,
            original: s.to_owned(),
            spooky: PhantomData,
        })
    }
}

impl<T> Decoded<T> {
    /// The string form of this data.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Consumes self, returning the raw bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl<T: Encode> From<Vec<u8>> for Decoded<T> {
    fn from(bytes: Vec<u8>) -> Self {
        let original = T::encode(&bytes);
        Self {
            bytes,
            original,
            spooky: PhantomData,
        }
    }
}

impl<T> AsRef<[u8]> for Decoded<T> {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<T> Deref for Decoded<T> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<T> fmt::Debug for Decoded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.original, f)
    }
}

impl<T> fmt::Display for Decoded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.original, f)
    }
}

// Equality and ordering are on the bytes; two encodings of the same bytes
// are the same value.
impl<T> PartialEq for Decoded<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl<T> Eq for Decoded<T> {}

impl<T> PartialOrd for Decoded<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Decoded<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl<T> Hash for Decoded<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl<'de, T: Decode> Deserialize<'de> for Decoded<T> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let original = String::deserialize(deserializer)?;
        Ok(Self {
            bytes: T::decode(&original).map_err(serde::de::Error::custom)?,
            original,
            spooky: PhantomData,
        })
    }
}

impl<T> Serialize for Decoded<T> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.original)
    }
}

#[cfg(test)]
mod tests {
    use super::{Base64, Decoded, Hex};

    #[test]
    fn hex_round_trip() {
        let decoded: Decoded<Hex> = serde_json::from_str("\"00aaff\"").unwrap();
        assert_eq!(decoded.as_ref(), &[0x00, 0xaa, 0xff]);
        assert_eq!(serde_json::to_string(&decoded).unwrap(), "\"00aaff\"");
    }

    #[test]
    fn from_bytes_encodes() {
        let decoded = Decoded::<Base64>::from(b"hello\n".to_vec());
        assert_eq!(decoded.original(), "aGVsbG8K");
    }

    #[test]
    fn invalid_hex_rejected() {
        assert!(serde_json::from_str::<Decoded<Hex>>("\"zz\"").is_err());
    }
}
