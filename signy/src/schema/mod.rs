// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0
#![allow(clippy::used_underscore_binding)]

//! Provides the schema objects for trusted collection metadata: the root,
//! targets, snapshot and timestamp roles, the `targets/releases` delegation,
//! and the target entries they sign.

mod de;
pub mod decoded;
mod error;
pub mod key;
pub(crate) mod spki;

pub use crate::schema::error::{Error, Result};

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::key::Key;
use aws_lc_rs::digest::{digest, Context, SHA256, SHA512};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::num::NonZeroU64;
use std::path::Path;

/// A named signing authority within a trusted collection.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoleName {
    /// The root role delegates trust to specific keys trusted for all other
    /// roles used in the system.
    Root,
    /// The targets role's signature indicates which target files are trusted
    /// by clients.
    Targets,
    /// The snapshot role signs a metadata file that provides information
    /// about the latest version of all targets metadata on the repository.
    /// Custody of this role is delegated to the trust server.
    Snapshot,
    /// The timestamp role is used to prevent an adversary from replaying an
    /// out-of-date signed metadata file. Custody of this role is delegated
    /// to the trust server.
    Timestamp,
    /// The single delegation from the targets role, owning release tags and
    /// in-toto link targets.
    #[serde(rename = "targets/releases")]
    Releases,
}

forward_display_to_serde!(RoleName);
forward_from_str_to_serde!(RoleName);

impl RoleName {
    /// The file name of this role's metadata within a repository.
    pub fn filename(self) -> String {
        format!("{}.json", self)
    }

    /// Whether the signing key for this role is held by the client (as
    /// opposed to the trust server).
    pub fn client_managed(self) -> bool {
        !matches!(self, RoleName::Snapshot | RoleName::Timestamp)
    }
}

/// Common trait implemented by all roles.
pub trait Role: Serialize {
    /// The role name this object represents when not delegated.
    const TYPE: RoleName;

    /// Determines when metadata should be considered expired and no longer
    /// trusted by clients.
    fn expires(&self) -> DateTime<Utc>;

    /// An integer that is greater than 0. Clients MUST NOT replace a metadata
    /// file with a version number less than the one currently trusted.
    fn version(&self) -> NonZeroU64;

    /// The deterministic JSON serialization used when calculating the digest
    /// of a metadata object.
    fn canonical_form(&self) -> Result<Vec<u8>> {
        crate::canonical::to_canonical_json(self).context(error::JsonSerializationSnafu {
            what: "role".to_owned(),
        })
    }
}

/// A signed metadata object.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signed<T> {
    /// The role that is signed.
    pub signed: T,
    /// A list of signatures and their key IDs.
    pub signatures: Vec<Signature>,
}

/// A signature and the key ID that made it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signature {
    /// The key ID (listed in root.json) that made this signature.
    pub keyid: Decoded<Hex>,
    /// A hex-encoded signature of the canonical JSON form of a role.
    pub sig: Decoded<Hex>,
}

/// Counts the distinct role keys that produced a valid signature over
/// `canonical` and fails unless the threshold is met.
fn verify_signatures(
    role: &str,
    canonical: &[u8],
    signatures: &[Signature],
    keys: &HashMap<Decoded<Hex>, Key>,
    role_keys: &[Decoded<Hex>],
    threshold: NonZeroU64,
) -> Result<()> {
    let mut valid = 0u64;
    let mut seen = Vec::new();
    for signature in signatures {
        if !role_keys.contains(&signature.keyid) || seen.contains(&&signature.keyid) {
            continue;
        }
        if let Some(key) = keys.get(&signature.keyid) {
            if key.verify(canonical, &signature.sig) {
                valid += 1;
                seen.push(&signature.keyid);
            }
        }
    }
    ensure!(
        valid >= threshold.get(),
        error::SignatureThresholdSnafu {
            role: role.to_owned(),
            threshold: threshold.get(),
            valid,
        }
    );
    Ok(())
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The root.json file is signed by the root role's keys. It indicates which
/// keys are authorized for all roles, including the root role itself.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "root")]
pub struct Root {
    /// The version number of the metadata format specification.
    pub spec_version: String,

    /// Whether the repository supports consistent snapshots. Trust servers
    /// for short-lived collections do not; this is always `false` here.
    pub consistent_snapshot: bool,

    /// An integer that is greater than 0.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired and no longer
    /// trusted by clients.
    pub expires: DateTime<Utc>,

    /// The public keys attested by the root role, keyed by key ID. Each key
    /// ID is validated against its key during deserialization.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// The key IDs and signature thresholds for each role.
    pub roles: HashMap<RoleName, RoleKeys>,

    /// Extra arguments found during deserialization.
    ///
    /// We must store these to correctly verify signatures for this object.
    ///
    /// If you're instantiating this struct, you should make this
    /// `HashMap::new()`.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// Represents the key IDs used for a role and the threshold of signatures
/// required to validate it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RoleKeys {
    /// The key IDs used for the role.
    pub keyids: Vec<Decoded<Hex>>,

    /// The threshold of signatures required to validate the role.
    pub threshold: NonZeroU64,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Root {
    /// An iterator over the keys for a given role.
    pub fn keys_for_role(&self, role: RoleName) -> impl Iterator<Item = (&Decoded<Hex>, &Key)> {
        self.roles
            .get(&role)
            .map(|role_keys| role_keys.keyids.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter_map(move |keyid| self.keys.get(keyid).map(|key| (keyid, key)))
    }

    /// Given a public key, return the corresponding key ID attested by this
    /// root, if any.
    pub fn key_id(&self, key: &Key) -> Option<Decoded<Hex>> {
        for (key_id, candidate) in &self.keys {
            if key == candidate {
                return Some(key_id.clone());
            }
        }
        None
    }

    /// Verifies that a signed role meets the signature threshold this root
    /// sets for it.
    pub fn verify_role<T: Role>(&self, signed: &Signed<T>) -> Result<()> {
        let role_keys = self.roles.get(&T::TYPE).context(error::RoleMissingSnafu {
            role: T::TYPE.to_string(),
        })?;
        verify_signatures(
            &T::TYPE.to_string(),
            &signed.signed.canonical_form()?,
            &signed.signatures,
            &self.keys,
            &role_keys.keyids,
            role_keys.threshold,
        )
    }
}

impl Role for Root {
    const TYPE: RoleName = RoleName::Root;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Represents a `snapshot.json` file, listing the version numbers and hashes
/// of all targets metadata on the repository. The trust server signs this.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "snapshot")]
pub struct Snapshot {
    /// The version number of the metadata format specification.
    pub spec_version: String,

    /// An integer that is greater than 0.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired.
    pub expires: DateTime<Utc>,

    /// A mapping from metadata file name to its description.
    pub meta: HashMap<String, SnapshotMeta>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// Describes a metadata file in a `snapshot.json` file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SnapshotMeta {
    /// The length in bytes of the metadata file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,

    /// The hashes of the metadata file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<Hashes>,

    /// An integer that is greater than 0.
    pub version: NonZeroU64,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Role for Snapshot {
    const TYPE: RoleName = RoleName::Snapshot;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Represents a `timestamp.json` file, indicating the latest version of the
/// snapshot metadata. The trust server signs this.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "timestamp")]
pub struct Timestamp {
    /// The version number of the metadata format specification.
    pub spec_version: String,

    /// An integer that is greater than 0.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired.
    pub expires: DateTime<Utc>,

    /// A description of the `snapshot.json` file.
    pub meta: HashMap<String, SnapshotMeta>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

impl Role for Timestamp {
    const TYPE: RoleName = RoleName::Timestamp;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Represents the hash dictionary of a target or metadata file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Hashes {
    /// The SHA-256 digest of the file.
    pub sha256: Decoded<Hex>,

    /// The SHA-512 digest of the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha512: Option<Decoded<Hex>>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// A named, length- and hash-bound entry within a role, optionally carrying
/// a canonical-JSON `custom` blob.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Target {
    /// The length in bytes of the target material.
    pub length: u64,

    /// The hashes of the target material.
    pub hashes: Hashes,

    /// Opaque data made available to the client application. The in-toto
    /// layer stores its metadata blob here; the framework treats it as
    /// canonical JSON and nothing more.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Target {
    /// Builds a `Target` by hashing the contents of a file.
    pub fn from_path<P>(path: P, custom: Option<Value>) -> Result<Target>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        ensure!(path.is_file(), error::TargetNotAFileSnafu { path });

        let mut file = File::open(path).context(error::FileOpenSnafu { path })?;
        let mut sha256 = Context::new(&SHA256);
        let mut sha512 = Context::new(&SHA512);
        let mut buf = [0; 8 * 1024];
        let mut length = 0;
        loop {
            match file.read(&mut buf).context(error::FileReadSnafu { path })? {
                0 => break,
                n => {
                    sha256.update(&buf[..n]);
                    sha512.update(&buf[..n]);
                    length += n as u64;
                }
            }
        }

        Ok(Target {
            length,
            hashes: Hashes {
                sha256: sha256.finish().as_ref().to_vec().into(),
                sha512: Some(sha512.finish().as_ref().to_vec().into()),
                _extra: HashMap::new(),
            },
            custom,
            _extra: HashMap::new(),
        })
    }

    /// Builds a `Target` by hashing a byte payload already in memory.
    pub fn from_bytes(bytes: &[u8], custom: Option<Value>) -> Target {
        Target {
            length: bytes.len() as u64,
            hashes: Hashes {
                sha256: digest(&SHA256, bytes).as_ref().to_vec().into(),
                sha512: Some(digest(&SHA512, bytes).as_ref().to_vec().into()),
                _extra: HashMap::new(),
            },
            custom,
            _extra: HashMap::new(),
        }
    }

    /// The hex form of this target's SHA-256 digest.
    pub fn sha256_hex(&self) -> String {
        hex::encode(&self.hashes.sha256)
    }
}

/// Represents a `targets.json` file (the top-level targets role or the
/// `targets/releases` delegation).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "targets")]
pub struct Targets {
    /// The version number of the metadata format specification.
    pub spec_version: String,

    /// An integer that is greater than 0.
    pub version: NonZeroU64,

    /// Determines when metadata should be considered expired.
    pub expires: DateTime<Utc>,

    /// The target entries signed by this role, keyed by target name.
    pub targets: HashMap<String, Target>,

    /// Subsets of the targets for which responsibility is delegated to
    /// another role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

impl Targets {
    /// Create a new `Targets` object with no targets and no delegations.
    pub fn new(spec_version: &str, version: NonZeroU64, expires: DateTime<Utc>) -> Self {
        Targets {
            spec_version: spec_version.to_owned(),
            version,
            expires,
            targets: HashMap::new(),
            delegations: None,
            _extra: HashMap::new(),
        }
    }

    /// Add a target to this role.
    pub fn add_target(&mut self, name: &str, target: Target) {
        self.targets.insert(name.to_owned(), target);
    }

    /// Remove a target from this role.
    pub fn remove_target(&mut self, name: &str) -> Option<Target> {
        self.targets.remove(name)
    }

    /// Returns the delegated role called `name`, if any.
    pub fn delegated_role(&self, name: &str) -> Option<&DelegatedRole> {
        self.delegations
            .as_ref()
            .and_then(|delegations| delegations.role(name))
    }
}

impl Role for Targets {
    const TYPE: RoleName = RoleName::Targets;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

/// Delegations are found in a `targets.json` file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Delegations {
    /// The public keys that verify signatures of delegated targets roles,
    /// keyed by key ID.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<Decoded<Hex>, Key>,

    /// The list of delegated roles.
    pub roles: Vec<DelegatedRole>,
}

impl Delegations {
    /// Creates a new `Delegations` with no keys or roles.
    pub fn new() -> Self {
        Delegations {
            keys: HashMap::new(),
            roles: Vec::new(),
        }
    }

    /// Returns the delegated role called `role_name`, if any.
    pub fn role(&self, role_name: &str) -> Option<&DelegatedRole> {
        self.roles.iter().find(|role| role.name == role_name)
    }

    /// Verifies that a delegated targets role meets its signature threshold.
    pub fn verify_role(&self, name: &str, signed: &Signed<Targets>) -> Result<()> {
        let role = self.role(name).context(error::RoleMissingSnafu {
            role: name.to_owned(),
        })?;
        verify_signatures(
            name,
            &signed.signed.canonical_form()?,
            &signed.signatures,
            &self.keys,
            &role.keyids,
            role.threshold,
        )
    }
}

impl Default for Delegations {
    fn default() -> Self {
        Self::new()
    }
}

/// Each role delegated in a targets file is considered a delegated role.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DelegatedRole {
    /// The name of the delegated role, e.g. "targets/releases".
    pub name: String,

    /// The key IDs used by this role.
    pub keyids: Vec<Decoded<Hex>>,

    /// The threshold of signatures required to validate the role.
    pub threshold: NonZeroU64,

    /// The target name prefixes entrusted to this role. A target belongs to
    /// this role when its name starts with one of these patterns.
    pub paths: Vec<String>,

    /// Indicates whether subsequent delegations should be considered.
    pub terminating: bool,
}

impl DelegatedRole {
    /// Whether a target name falls under this role's path patterns.
    pub fn matches_path(&self, target_name: &str) -> bool {
        self.paths
            .iter()
            .any(|pattern| target_name.starts_with(pattern.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::key::{Key, RsaKey, RsaScheme};
    use maplit::hashmap;

    const RSA_PEM: &str = "-----BEGIN PUBLIC KEY-----\n\
        MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAlCiQlX+eNDI8KAZ0ImP0\n\
        IiiL1bG1+gdsWXkazt+dmnUMJwMdAQ07fUhzEKS4BlkLPReSdWQeenPaermf5y+0\n\
        qzq3+i8+WIBNDl8p4rTNFzEEzv24Cm/XybUaZVpkFn867Sm3YMWJI2GwDQ3I31B5\n\
        YUzzpd8o9C6qrqgiNXtQ9Biw7TnKW7Dw2TaN5st8Emem6Tr5gpy+QN91w6HibpDE\n\
        +m0gJtbMBwb921B3Px8NJgfjTxUy/yJ50qipK5YkIFg94aeuRMHBTVknHaZhJR/v\n\
        LvGKjFmuzPuWneadYzU4uvNmj6QLuUKVpan927lKSNJbbLlcIrbbcaAAwnzULCPO\n\
        tQIDAQAB\n\
        -----END PUBLIC KEY-----";

    fn rsa_key() -> Key {
        Key::Rsa {
            keyval: RsaKey {
                public: Decoded::from_encoded(RSA_PEM).unwrap(),
                _extra: HashMap::new(),
            },
            scheme: RsaScheme::RsassaPssSha256,
            _extra: HashMap::new(),
        }
    }

    #[test]
    fn key_id_is_stable() {
        let first = rsa_key().key_id().unwrap();
        let second = rsa_key().key_id().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_ref().len(), 32);
    }

    #[test]
    fn root_rejects_mismatched_key_id() {
        let key = rsa_key();
        let bogus_id = hex::encode([0u8; 32]);
        let root = serde_json::json!({
            "_type": "root",
            "spec_version": "1.0.0",
            "consistent_snapshot": false,
            "version": 1,
            "expires": "2030-01-01T00:00:00Z",
            "keys": { (bogus_id): serde_json::to_value(key).unwrap() },
            "roles": {},
        });
        assert!(serde_json::from_value::<Root>(root).is_err());
    }

    #[test]
    fn root_accepts_valid_key_map() {
        let key = rsa_key();
        let key_id = key.key_id().unwrap().to_string();
        let root = serde_json::json!({
            "_type": "root",
            "spec_version": "1.0.0",
            "consistent_snapshot": false,
            "version": 1,
            "expires": "2030-01-01T00:00:00Z",
            "keys": { (key_id.clone()): serde_json::to_value(key).unwrap() },
            "roles": {
                "root": { "keyids": [key_id], "threshold": 1 },
            },
        });
        let root: Root = serde_json::from_value(root).unwrap();
        assert_eq!(root.keys_for_role(RoleName::Root).count(), 1);
    }

    #[test]
    fn target_from_bytes_binds_length_and_hashes() {
        let target = Target::from_bytes(b"hello\n", None);
        assert_eq!(target.length, 6);
        assert_eq!(
            target.sha256_hex(),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03",
        );
        assert!(target.hashes.sha512.is_some());
    }

    #[test]
    fn target_from_path_matches_from_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello\n").unwrap();

        let from_path = Target::from_path(&path, None).unwrap();
        let from_bytes = Target::from_bytes(b"hello\n", None);
        assert_eq!(from_path, from_bytes);

        assert!(Target::from_path(dir.path(), None).is_err());
    }

    #[test]
    fn delegated_role_prefix_matching() {
        let role = DelegatedRole {
            name: "targets/releases".to_owned(),
            keyids: Vec::new(),
            threshold: NonZeroU64::new(1).unwrap(),
            paths: vec![
                "example.com/demo:".to_owned(),
                "example.com/demo/in-toto-links/".to_owned(),
            ],
            terminating: false,
        };
        assert!(role.matches_path("example.com/demo:v1"));
        assert!(role.matches_path("example.com/demo/in-toto-links/step1.link"));
        assert!(!role.matches_path("example.com/demo/evil.layout"));
        assert!(!role.matches_path("example.com/other:v1"));
    }

    #[test]
    fn role_names_serialize_to_wire_form() {
        let names = hashmap! {
            RoleName::Root => "root",
            RoleName::Targets => "targets",
            RoleName::Snapshot => "snapshot",
            RoleName::Timestamp => "timestamp",
            RoleName::Releases => "targets/releases",
        };
        for (role, expected) in names {
            assert_eq!(role.to_string(), expected);
        }
        assert_eq!(RoleName::Releases.filename(), "targets/releases.json");
        assert!(!RoleName::Snapshot.client_managed());
    }
}
