// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The error type for the library. Errors surface to the top level with a
//! one-line diagnostic; nothing is recovered locally except the
//! "repository not initialized" case on the sign path and missing
//! credentials during transport setup.

use crate::schema::RoleName;
use snafu::{Backtrace, Snafu};
use std::path::PathBuf;

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for this library. The `Display` line of each variant is
/// the one-line diagnostic the CLI prints.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Failed to serialize value to canonical JSON: {}", source))]
    CanonicalJson {
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Cannot read CA certificate bundle '{}': {}", path.display(), source))]
    CaCertRead {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Cannot parse CA certificate bundle '{}': {}", path.display(), source))]
    CaCertParse {
        path: PathBuf,
        source: reqwest::Error,
    },

    #[snafu(display("Cannot clear change list at '{}': {}", path.display(), source))]
    ChangeListClear {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Cannot parse change '{}': {}", path.display(), source))]
    ChangeParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Container exited with code {}", code))]
    ContainerExit { code: i64 },

    #[snafu(display("Cannot {} verification container: {}", operation, source))]
    Container {
        operation: &'static str,
        source: bollard::errors::Error,
    },

    #[snafu(display("Target '{}' has no custom field with in-toto metadata", name))]
    CustomMissing { name: String },

    #[snafu(display(
        "Target '{}' under targets/releases does not match a delegation path pattern",
        name
    ))]
    DelegationPathViolation { name: String },

    #[snafu(display("No delegation to '{}' exists in the trusted collection", role))]
    DelegationMissing { role: String },

    #[snafu(display(
        "the digest sum of the artifact from the trusted collection {} is not equal to the computed digest {}",
        trusted,
        computed,
    ))]
    DigestMismatch { trusted: String, computed: String },

    #[snafu(display("Failed to create directory '{}': {}", path.display(), source))]
    DirCreate {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to run in-toto verification engine: {}", source))]
    EngineExec {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("In-toto verification engine rejected the supply chain ({})", status))]
    EngineFailure { status: std::process::ExitStatus },

    #[snafu(display("Metadata for role '{}' expired at {}", role, expires))]
    ExpiredMetadata {
        role: String,
        expires: chrono::DateTime<chrono::Utc>,
    },

    #[snafu(display("Failed to read '{}': {}", path.display(), source))]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to write '{}': {}", path.display(), source))]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to parse '{}': {}", path.display(), source))]
    FileParseJson {
        path: PathBuf,
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to fetch '{}': {}", url, source))]
    Fetch {
        url: String,
        source: reqwest::Error,
    },

    #[snafu(display("Failed to build HTTP client: {}", source))]
    HttpClientBuild { source: reqwest::Error },

    #[snafu(display("In-toto metadata invalid: {}", source))]
    IntotoInvalid {
        #[snafu(source(from(crate::intoto::Error, Box::new)))]
        source: Box<crate::intoto::Error>,
    },

    #[snafu(display("Failed to decrypt private key (wrong passphrase?): {}", source))]
    KeyDecrypt { source: pkcs8::Error },

    #[snafu(display("Failed to encrypt private key: {}", source))]
    KeyEncrypt { source: pkcs8::Error },

    #[snafu(display("Failed to calculate key ID: {}", source))]
    KeyId {
        #[snafu(backtrace)]
        source: crate::schema::Error,
    },

    #[snafu(display("Key rejected: {}", source))]
    KeyRejected {
        source: aws_lc_rs::error::KeyRejected,
    },

    #[snafu(display("Unrecognized or invalid private key"))]
    KeyUnrecognized { backtrace: Backtrace },

    #[snafu(display(
        "Link '{}' embedded in the custom blob does not match its published target",
        name
    ))]
    LinkPayloadMismatch { name: String },

    #[snafu(display("Metadata error: {}", source))]
    Metadata {
        #[snafu(backtrace)]
        source: crate::schema::Error,
    },

    #[snafu(display(
        "Hash mismatch for '{}': calculated {}, expected {}",
        role,
        calculated,
        expected,
    ))]
    MetadataHashMismatch {
        role: String,
        calculated: String,
        expected: String,
    },

    #[snafu(display("No root key available; provide one with --root-key"))]
    NoRootKey,

    #[snafu(display("no targets key despite having initialized a repo"))]
    NoTargetsKey,

    #[snafu(display("Passphrase for '{}' not provided after {} attempts", alias, attempts))]
    PassphraseGivenUp { alias: String, attempts: u8 },

    #[snafu(display("Cannot prompt for the '{}' passphrase: {}", alias, source))]
    PassphrasePrompt {
        alias: String,
        source: std::io::Error,
    },

    #[snafu(display("Invalid PEM document: {}", source))]
    PemParse {
        source: pem::PemError,
        backtrace: Backtrace,
    },

    #[snafu(display("Cannot parse reference '{}': {}", reference, reason))]
    ReferenceInvalid {
        reference: String,
        reason: &'static str,
    },

    #[snafu(display("Trust data for '{}' does not exist on the trust server", gun))]
    RepositoryNotFound { gun: String },

    #[snafu(display("Trust server returned status {} for '{}'", status, url))]
    RemoteStatus {
        status: reqwest::StatusCode,
        url: String,
    },

    #[snafu(display("Root key material at '{}' must be encrypted", path.display()))]
    RootKeyNotEncrypted { path: PathBuf },

    #[snafu(display("Cannot ping trust server '{}': {}", server, source))]
    ServerPing {
        server: String,
        source: reqwest::Error,
    },

    #[snafu(display("Failed to sign message: {}", source))]
    Sign {
        source: aws_lc_rs::error::Unspecified,
    },

    #[snafu(display("No signing key available for role '{}'", role))]
    SigningKeyNotFound { role: RoleName },

    #[snafu(display("Target '{}' not found in trusted collection '{}'", name, gun))]
    TargetNotFound { name: String, gun: String },

    #[snafu(display("Failed to build tar stream for '{}': {}", path.display(), source))]
    TarBuild {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("this targets role has more than 1 key"))]
    TargetsRoleKeyCount,

    #[snafu(display("there are more than 2 targets keys"))]
    TooManyTargetsKeys,

    #[snafu(display("there are more than 1 releases keys"))]
    TooManyReleasesKeys,

    #[snafu(display("Cannot exchange credentials for a bearer token at '{}': {}", url, source))]
    TokenExchange {
        url: String,
        source: reqwest::Error,
    },

    #[snafu(display("Token response from '{}' held no token", url))]
    TokenMissing { url: String },

    #[snafu(display("Failed to build async runtime for the sandbox: {}", source))]
    RuntimeBuild {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Trusted SHA-256 digest missing for target '{}'", name))]
    TrustedShaMissing { name: String },

    #[snafu(display("Failed to parse URL '{}': {}", url, source))]
    UrlParse {
        url: String,
        source: url::ParseError,
    },

    #[snafu(display("Version number overflow for role '{}'", role))]
    VersionOverflow { role: RoleName },

    #[snafu(display("Failed to create verification workspace: {}", source))]
    WorkspaceCreate {
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

impl Error {
    /// Whether this error means the trust data for the GUN has never been
    /// published. The sign path recovers from this by initializing the
    /// collection; every other caller treats it as fatal.
    pub fn is_repository_not_found(&self) -> bool {
        matches!(self, Error::RepositoryNotFound { .. })
    }
}
