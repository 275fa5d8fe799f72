// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-toto metadata handling: the root layout and its keys, the canonical
//! custom blob stored on a trusted collection target, and the verification
//! workspace files it re-materializes into.
//!
//! The in-toto verification engine itself is an external collaborator; this
//! module guarantees that the engine only ever sees structurally
//! well-formed input.

mod rule;
mod validate;

pub use rule::{ArtifactRule, MatchKind};
pub use validate::validate_layout;

use crate::schema::decoded::{Base64, Decoded};
use serde::{Deserialize, Serialize};
use snafu::{ensure, Backtrace, ResultExt, Snafu};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// The file name the root layout is materialized under in a verification
/// workspace.
pub const LAYOUT_DEFAULT_NAME: &str = "layout.template";
/// The file name the layout public key is materialized under.
pub const KEY_DEFAULT_NAME: &str = "key.pub";

const LINK_SUFFIX: &str = ".link";

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for in-toto metadata operations. Validation failures are
/// distinguishable by reason.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Failed to serialize in-toto metadata to canonical JSON: {}", source))]
    CanonicalJson {
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("expiry time parsed incorrectly - date either invalid or of incorrect format"))]
    ExpiresInvalid { value: String },

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

    #[snafu(display("invalid key found: key ID '{}' does not match derived ID '{}'", keyid, derived))]
    KeyIdMismatch { keyid: String, derived: String },

    #[snafu(display("keyid: '{}' is not a valid hex string", keyid))]
    KeyIdNotHex { keyid: String },

    #[snafu(display(
        "invalid KeyType for key '{}': should be 'rsa', got '{}'",
        keyid,
        keytype,
    ))]
    KeyNotRsa { keyid: String, keytype: String },

    #[snafu(display(
        "invalid scheme for key '{}': should be 'rsassa-pss-sha256', got: '{}'",
        keyid,
        scheme,
    ))]
    KeySchemeInvalid { keyid: String, scheme: String },

    #[snafu(display("Cannot parse layout: {}", source))]
    LayoutParse {
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Link file name '{}' is not a plain '.link' file name", name))]
    LinkName { name: String },

    #[snafu(display("cannot read links directory '{}': {}", path.display(), source))]
    LinksDirRead {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("name cannot be empty"))]
    NameEmpty,

    #[snafu(display("non unique step or inspection name found: '{}'", name))]
    NameNotUnique { name: String },

    #[snafu(display("in key '{}': private key found", keyid))]
    PrivateKeyPresent { keyid: String },

    #[snafu(display("in key '{}': public key cannot be empty", keyid))]
    PublicKeyEmpty { keyid: String },

    #[snafu(display("invalid artifact rule '{}': {}", rule, reason))]
    RuleInvalid { rule: String, reason: String },

    #[snafu(display("in step '{}', keyid '{}' not found in layout keys", step, keyid))]
    StepKeyMissing { step: String, keyid: String },

    #[snafu(display(
        "invalid Type value for step '{}': should be 'step'",
        name,
    ))]
    StepTypeInvalid { name: String },

    #[snafu(display("invalid Type value for layout: should be 'layout'"))]
    WrongType,
}

/// A public key inside a root layout.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Key {
    /// The key ID, a hex digest derived from the key's public bytes.
    #[serde(default)]
    pub keyid: String,
    /// The hash algorithms used to derive the key ID.
    #[serde(default)]
    pub keyid_hash_algorithms: Vec<String>,
    /// The key type; only `rsa` keys may sign layouts.
    #[serde(default)]
    pub keytype: String,
    /// The signature scheme.
    #[serde(default)]
    pub scheme: String,
    /// The key material.
    #[serde(default)]
    pub keyval: KeyVal,
}

/// The material halves of an in-toto key. Layout keys must carry only the
/// public half.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct KeyVal {
    /// PEM public key material.
    #[serde(default)]
    pub public: String,
    /// PEM private key material; must be absent in layouts.
    #[serde(default)]
    pub private: String,
}

/// One expected supply-chain step in a layout.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Step {
    /// Must be `step`.
    #[serde(rename = "_type", default)]
    pub step_type: String,
    /// The unique step name.
    #[serde(default)]
    pub name: String,
    /// Artifact rules over the step's materials.
    #[serde(default)]
    pub expected_materials: Vec<Vec<String>>,
    /// Artifact rules over the step's products.
    #[serde(default)]
    pub expected_products: Vec<Vec<String>>,
    /// Key IDs allowed to sign this step's link metadata.
    #[serde(default)]
    pub pubkeys: Vec<String>,
    /// The command expected to have produced this step.
    #[serde(default)]
    pub expected_command: Vec<String>,
    /// How many functionaries must provide a link for this step.
    #[serde(default)]
    pub threshold: u64,
}

/// An inspection run by the verification engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Inspection {
    /// Must be `inspection`.
    #[serde(rename = "_type", default)]
    pub inspection_type: String,
    /// The inspection name; must not collide with step names.
    #[serde(default)]
    pub name: String,
    /// Artifact rules over the inspection's materials.
    #[serde(default)]
    pub expected_materials: Vec<Vec<String>>,
    /// Artifact rules over the inspection's products.
    #[serde(default)]
    pub expected_products: Vec<Vec<String>>,
    /// The command the engine runs for this inspection.
    #[serde(default)]
    pub run: Vec<String>,
}

/// An in-toto root layout: the document describing the expected supply
/// chain.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Layout {
    /// Must be `layout`.
    #[serde(rename = "_type", default)]
    pub layout_type: String,
    /// ISO-8601 UTC expiration of the layout.
    #[serde(default)]
    pub expires: String,
    /// Free-form description.
    #[serde(default)]
    pub readme: String,
    /// The functionary public keys, keyed by key ID.
    #[serde(default)]
    pub keys: BTreeMap<String, Key>,
    /// The expected supply-chain steps, in order.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// The inspections to run at verification time.
    #[serde(default)]
    pub inspect: Vec<Inspection>,
}

/// A signed envelope around a layout. The signatures are opaque here; the
/// verification engine checks them.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Metablock {
    /// Signatures over the signed portion.
    #[serde(default)]
    pub signatures: Vec<serde_json::Value>,
    /// The layout itself.
    #[serde(default)]
    pub signed: Layout,
}

impl Metablock {
    /// Loads a metablock (a signed layout) from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read(path).context(FileReadSnafu { path })?;
        serde_json::from_slice(&raw).context(LayoutParseSnafu)
    }
}

/// The in-toto metadata attached to a trusted collection target: the layout
/// public key, the layout, and the collected link metadata, all as raw
/// bytes so the canonical JSON form is stable.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Metadata {
    /// The layout verification public key.
    pub key: Decoded<Base64>,
    /// The root layout bytes.
    pub layout: Decoded<Base64>,
    /// Link metadata bytes, keyed by `.link` file name.
    pub links: BTreeMap<String, Decoded<Base64>>,
}

impl Metadata {
    /// Reads the layout, the layout public key, and every `.link` file in
    /// `link_dir`, producing the blob to attach to a target. A missing link
    /// directory is an error; an empty one produces an empty `links` map.
    pub fn from_paths(layout: &Path, link_dir: &Path, layout_key: &Path) -> Result<Self> {
        let key = fs::read(layout_key).context(FileReadSnafu { path: layout_key })?;
        let layout_bytes = fs::read(layout).context(FileReadSnafu { path: layout })?;

        let mut links = BTreeMap::new();
        let entries = fs::read_dir(link_dir).context(LinksDirReadSnafu { path: link_dir })?;
        for entry in entries {
            let entry = entry.context(LinksDirReadSnafu { path: link_dir })?;
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(name) if name.ends_with(LINK_SUFFIX) => name.to_owned(),
                _ => continue,
            };
            let content = fs::read(entry.path()).context(FileReadSnafu { path: entry.path() })?;
            links.insert(name, Decoded::from(content));
        }

        Ok(Self {
            key: Decoded::from(key),
            layout: Decoded::from(layout_bytes),
            links,
        })
    }

    /// The canonical JSON bytes of this blob; this is the representation
    /// whose hash the trust collection signs.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        crate::canonical::to_canonical_json(self).context(CanonicalJsonSnafu)
    }

    /// Parses the blob back out of a target's custom field.
    pub fn from_custom(custom: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(custom.clone()).context(LayoutParseSnafu)
    }

    /// The custom field value to attach to a target.
    pub fn to_custom(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).context(CanonicalJsonSnafu)
    }

    /// Writes `layout.template`, `key.pub` and every link file into `dir`,
    /// all read-only (mode `0400`). Link names must be plain `.link` file
    /// names; anything resembling a path is rejected before it touches the
    /// filesystem.
    pub fn write_files(&self, dir: &Path) -> Result<()> {
        write_readonly(&dir.join(LAYOUT_DEFAULT_NAME), &self.layout)?;
        write_readonly(&dir.join(KEY_DEFAULT_NAME), &self.key)?;
        for (name, content) in &self.links {
            ensure!(
                name.ends_with(LINK_SUFFIX)
                    && !name.contains('/')
                    && !name.contains('\\')
                    && !name.contains(".."),
                LinkNameSnafu { name }
            );
            write_readonly(&dir.join(name), content)?;
        }
        Ok(())
    }
}

fn write_readonly(path: &Path, content: &[u8]) -> Result<()> {
    fs::write(path, content).context(FileWriteSnafu { path })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o400))
            .context(FileWriteSnafu { path })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stage_fixture(dir: &Path) -> (PathBuf, PathBuf) {
        let layout = dir.join("root.layout");
        let key = dir.join("alice.pub");
        fs::write(&layout, b"{\"signed\": {}}").unwrap();
        fs::write(&key, b"-----BEGIN PUBLIC KEY-----\nabc\n-----END PUBLIC KEY-----\n").unwrap();
        fs::write(dir.join("build.link"), b"link one").unwrap();
        fs::write(dir.join("package.link"), b"link two").unwrap();
        fs::write(dir.join("README.md"), b"not a link").unwrap();
        (layout, key)
    }

    #[test]
    fn pack_collects_only_link_files() {
        let dir = TempDir::new().unwrap();
        let (layout, key) = stage_fixture(dir.path());

        let metadata = Metadata::from_paths(&layout, dir.path(), &key).unwrap();
        assert_eq!(metadata.links.len(), 2);
        assert!(metadata.links.contains_key("build.link"));
        assert!(metadata.links.contains_key("package.link"));
    }

    #[test]
    fn pack_is_independent_of_directory_order() {
        let dir = TempDir::new().unwrap();
        let (layout, key) = stage_fixture(dir.path());

        let first = Metadata::from_paths(&layout, dir.path(), &key).unwrap();
        let second = Metadata::from_paths(&layout, dir.path(), &key).unwrap();
        assert_eq!(
            first.to_canonical_json().unwrap(),
            second.to_canonical_json().unwrap(),
        );
    }

    #[test]
    fn missing_link_dir_is_an_error_but_empty_is_not() {
        let dir = TempDir::new().unwrap();
        let (layout, key) = stage_fixture(dir.path());

        let missing = dir.path().join("no-such-dir");
        assert!(Metadata::from_paths(&layout, &missing, &key).is_err());

        let empty = TempDir::new().unwrap();
        let metadata = Metadata::from_paths(&layout, empty.path(), &key).unwrap();
        assert!(metadata.links.is_empty());
    }

    #[test]
    fn unpack_reproduces_packed_files() {
        let dir = TempDir::new().unwrap();
        let (layout, key) = stage_fixture(dir.path());
        let metadata = Metadata::from_paths(&layout, dir.path(), &key).unwrap();

        let out = TempDir::new().unwrap();
        metadata.write_files(out.path()).unwrap();

        assert_eq!(
            fs::read(out.path().join(LAYOUT_DEFAULT_NAME)).unwrap(),
            fs::read(&layout).unwrap(),
        );
        assert_eq!(
            fs::read(out.path().join(KEY_DEFAULT_NAME)).unwrap(),
            fs::read(&key).unwrap(),
        );
        assert_eq!(
            fs::read(out.path().join("build.link")).unwrap(),
            b"link one",
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(out.path().join("build.link"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o400);
        }
    }

    #[test]
    fn custom_field_round_trip() {
        let dir = TempDir::new().unwrap();
        let (layout, key) = stage_fixture(dir.path());
        let metadata = Metadata::from_paths(&layout, dir.path(), &key).unwrap();

        let custom = metadata.to_custom().unwrap();
        let reparsed = Metadata::from_custom(&custom).unwrap();
        assert_eq!(metadata, reparsed);
    }

    #[test]
    fn path_like_link_names_never_reach_the_filesystem() {
        let mut links = BTreeMap::new();
        links.insert(
            "../escape.link".to_owned(),
            Decoded::from(b"evil".to_vec()),
        );
        let metadata = Metadata {
            key: Decoded::from(b"k".to_vec()),
            layout: Decoded::from(b"l".to_vec()),
            links,
        };
        let out = TempDir::new().unwrap();
        assert!(metadata.write_files(out.path()).is_err());
    }
}
