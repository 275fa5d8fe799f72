// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for metadata schema objects.

use snafu::{Backtrace, Snafu};
use std::path::PathBuf;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for schema operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Error {
    /// A duplicate key ID was present in a key map.
    #[snafu(display("Duplicate key ID: {}", keyid))]
    DuplicateKeyId { keyid: String },

    /// Unable to open a file
    #[snafu(display("Failed to open '{}': {}", path.display(), source))]
    FileOpen {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// Unable to read the file
    #[snafu(display("Failed to read '{}': {}", path.display(), source))]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// A hex-encoded field could not be decoded.
    #[snafu(display("Invalid hex string: {}", source))]
    HexDecode {
        source: hex::FromHexError,
        backtrace: Backtrace,
    },

    /// A base64-encoded field could not be decoded.
    #[snafu(display("Invalid base64 string: {}", source))]
    Base64Decode {
        source: base64::DecodeError,
        backtrace: Backtrace,
    },

    /// A PEM-framed field could not be decoded.
    #[snafu(display("Invalid PEM document: {}", source))]
    PemDecode {
        source: pem::PemError,
        backtrace: Backtrace,
    },

    /// A key ID in a key map did not match the contents of its key.
    #[snafu(display("Key ID '{}' does not match calculated ID '{}'", keyid, calculated))]
    InvalidKeyId { keyid: String, calculated: String },

    /// A SubjectPublicKeyInfo document was malformed.
    #[snafu(display("Invalid SubjectPublicKeyInfo document: {}", reason))]
    InvalidSpki { reason: &'static str },

    /// Failed to serialize a value to canonical JSON.
    #[snafu(display("Failed to serialize {} to JSON: {}", what, source))]
    JsonSerialization {
        what: String,
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    /// A role is missing from the root metadata.
    #[snafu(display("Role '{}' is missing from the root metadata", role))]
    RoleMissing { role: String },

    /// A role's signatures did not meet its threshold.
    #[snafu(display(
        "Signature threshold of {} not met for role '{}' ({} valid signatures)",
        threshold,
        role,
        valid,
    ))]
    SignatureThreshold {
        role: String,
        threshold: u64,
        valid: u64,
    },

    /// A target file could not be hashed because it is not a file.
    #[snafu(display("Target path '{}' is not a file", path.display()))]
    TargetNotAFile { path: PathBuf, backtrace: Backtrace },
}
