// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signy binds a signed supply-chain attestation (an in-toto root layout,
//! its verification public keys, and the collected step link metadata) to a
//! named, versioned artifact, by publishing a trusted collection to a
//! Notary-v1-compatible trust server and carrying the in-toto metadata in
//! the collection's custom target fields.
//!
//! The [`TrustCollection`] client owns the sign path (initialize, stage
//! targets, sign, publish) and the pull path (fetch and verify the metadata
//! chain); the [`verify`] module drives pull-side verification, including
//! running the in-toto engine on the host or inside a container.
//!
//! # Testing
//!
//! Unit tests are run in the usual manner: `cargo test`. Tests that talk to
//! a trust server run it in-process; nothing reaches the network.

#![forbid(missing_debug_implementations, missing_copy_implementations)]
#![deny(rust_2018_idioms)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc
)]

mod canonical;
mod changelist;
pub mod editor;
pub mod error;
pub mod intoto;
mod keys;
mod reference;
mod sandbox;
pub mod schema;
pub mod sign;
mod transport;
pub mod verify;

pub use crate::canonical::to_canonical_json;
pub use crate::changelist::{Change, ChangeAction, ChangeList};
pub use crate::keys::{
    read_role_key, resolve_passphrase, KeyStore, RELEASES_PASSPHRASE_VAR, ROOT_PASSPHRASE_VAR,
    TARGETS_PASSPHRASE_VAR,
};
pub use crate::reference::Reference;
pub use crate::sandbox::VERIFICATION_IMAGE;
pub use crate::transport::{AuthClient, TransportSettings, DOCKER_NOTARY_SERVER};

use crate::editor::{CollectionEditor, SigningKeys};
use crate::error::Result;
use crate::schema::key::Key;
use crate::schema::{
    Role, RoleName, Root, Signed, Snapshot, SnapshotMeta, Target, Targets, Timestamp,
};
use crate::sign::Sign;
use aws_lc_rs::digest::{digest, SHA256};
use chrono::Utc;
use log::{debug, info};
use snafu::{ensure, OptionExt, ResultExt};
use std::fs;
use std::path::{Path, PathBuf};

/// Returns where the signy trust data lives by default: `~/.signy`
/// (`%USERPROFILE%\.signy` on Windows).
pub fn default_trust_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".signy")
}

/// Ensures the trust directory exists with mode `0700`. Idempotent.
pub fn ensure_trust_dir<P: AsRef<Path>>(trust_dir: P) -> Result<()> {
    let trust_dir = trust_dir.as_ref();
    fs::create_dir_all(trust_dir).context(error::DirCreateSnafu { path: trust_dir })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(trust_dir, fs::Permissions::from_mode(0o700))
            .context(error::DirCreateSnafu { path: trust_dir })?;
    }
    Ok(())
}

/// A target entry together with the role it was found under.
#[derive(Debug, Clone)]
pub struct TargetWithRole {
    /// The target name.
    pub name: String,
    /// The target entry.
    pub target: Target,
    /// The role that signed the entry.
    pub role: RoleName,
}

/// A target staged for the next publish.
#[derive(Debug, Clone)]
pub struct StagedTarget {
    /// The role the target is staged to.
    pub role: RoleName,
    /// The target name.
    pub name: String,
    /// The target entry.
    pub target: Target,
}

/// A role name with the key IDs currently attested for it.
#[derive(Debug, Clone)]
pub struct RoleWithKeys {
    /// The role name (top-level or delegated).
    pub role: String,
    /// Hex key IDs attested for the role.
    pub keyids: Vec<String>,
}

/// The fully verified metadata of one trusted collection, as loaded from
/// the trust server on the pull path.
#[derive(Debug, Clone)]
pub struct TrustedCollection {
    /// The root role.
    pub root: Signed<Root>,
    /// The top-level targets role.
    pub targets: Signed<Targets>,
    /// The `targets/releases` delegation, when published.
    pub releases: Option<Signed<Targets>>,
}

/// A client for one trusted collection on one trust server, keyed by
/// `(trust_dir, gun, server)`. Metadata is cached on disk below the trust
/// directory; role private keys live in the trust directory's key store.
#[derive(Debug)]
pub struct TrustCollection {
    trust_dir: PathBuf,
    gun: String,
    transport: AuthClient,
    keys: KeyStore,
    changes: ChangeList,
}

impl TrustCollection {
    /// Opens a client for `gun` against the trust server in `settings`.
    /// Creates the trust directory (mode `0700`) and builds the
    /// authenticated transport (ping, challenge, bearer token).
    pub fn open(settings: &TransportSettings, trust_dir: &Path, gun: &str) -> Result<Self> {
        ensure_trust_dir(trust_dir)?;
        let keys = KeyStore::open(trust_dir)?;
        let transport = AuthClient::build(settings, gun)?;
        let repo_dir = trust_dir.join("tuf").join(gun);
        let changes = ChangeList::open(&repo_dir)?;
        Ok(Self {
            trust_dir: trust_dir.to_owned(),
            gun: gun.to_owned(),
            transport,
            keys,
            changes,
        })
    }

    /// The GUN this client is bound to.
    pub fn gun(&self) -> &str {
        &self.gun
    }

    /// The key store backing this client.
    pub fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    fn metadata_dir(&self) -> PathBuf {
        self.trust_dir.join("tuf").join(&self.gun).join("metadata")
    }

    fn tuf_path(&self, file: &str) -> String {
        format!("v2/{}/_trust/tuf/{}", self.gun, file)
    }

    fn fetch_metadata(&self, role: RoleName) -> Result<Option<Vec<u8>>> {
        self.transport.get_bytes(&self.tuf_path(&role.filename()))
    }

    fn cache_metadata(&self, role: RoleName, bytes: &[u8]) -> Result<()> {
        let path = self.metadata_dir().join(role.filename());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context(error::DirCreateSnafu { path: parent })?;
        }
        fs::write(&path, bytes).context(error::FileWriteSnafu { path })
    }

    /// Fetches and verifies the collection's root role. The first root seen
    /// from the server is trusted and cached; afterwards the cached root
    /// pins the collection's keys.
    fn load_root(&self) -> Result<Signed<Root>> {
        let cached = self.metadata_dir().join(RoleName::Root.filename());
        let bytes = if cached.is_file() {
            fs::read(&cached).context(error::FileReadSnafu { path: &cached })?
        } else {
            let bytes = self
                .fetch_metadata(RoleName::Root)?
                .context(error::RepositoryNotFoundSnafu { gun: &self.gun })?;
            self.cache_metadata(RoleName::Root, &bytes)?;
            bytes
        };
        let signed: Signed<Root> =
            serde_json::from_slice(&bytes).context(error::FileParseJsonSnafu { path: cached })?;
        // The root role attests its own key set.
        signed
            .signed
            .verify_role(&signed)
            .context(error::MetadataSnafu)?;
        Ok(signed)
    }

    /// Loads and verifies the full metadata chain from the trust server:
    /// root, then timestamp, then snapshot, then the targets roles, each
    /// signature-checked against its parent and cross-checked against the
    /// snapshot hashes.
    pub fn load(&self) -> Result<TrustedCollection> {
        let root = self.load_root()?;
        check_expiry(&root.signed, RoleName::Root)?;

        let timestamp_bytes = self
            .fetch_metadata(RoleName::Timestamp)?
            .context(error::RepositoryNotFoundSnafu { gun: &self.gun })?;
        let timestamp: Signed<Timestamp> = serde_json::from_slice(&timestamp_bytes)
            .context(error::FileParseJsonSnafu {
                path: RoleName::Timestamp.filename(),
            })?;
        root.signed
            .verify_role(&timestamp)
            .context(error::MetadataSnafu)?;
        check_expiry(&timestamp.signed, RoleName::Timestamp)?;

        let snapshot_bytes = self
            .fetch_metadata(RoleName::Snapshot)?
            .context(error::RepositoryNotFoundSnafu { gun: &self.gun })?;
        if let Some(meta) = timestamp.signed.meta.get(&RoleName::Snapshot.filename()) {
            check_meta_hash(RoleName::Snapshot, &snapshot_bytes, meta)?;
        }
        let snapshot: Signed<Snapshot> = serde_json::from_slice(&snapshot_bytes)
            .context(error::FileParseJsonSnafu {
                path: RoleName::Snapshot.filename(),
            })?;
        root.signed
            .verify_role(&snapshot)
            .context(error::MetadataSnafu)?;
        check_expiry(&snapshot.signed, RoleName::Snapshot)?;

        let targets_bytes = self
            .fetch_metadata(RoleName::Targets)?
            .context(error::RepositoryNotFoundSnafu { gun: &self.gun })?;
        if let Some(meta) = snapshot.signed.meta.get(&RoleName::Targets.filename()) {
            check_meta_hash(RoleName::Targets, &targets_bytes, meta)?;
        }
        let targets: Signed<Targets> = serde_json::from_slice(&targets_bytes)
            .context(error::FileParseJsonSnafu {
                path: RoleName::Targets.filename(),
            })?;
        root.signed
            .verify_role(&targets)
            .context(error::MetadataSnafu)?;
        check_expiry(&targets.signed, RoleName::Targets)?;

        let releases = if let Some(delegations) = &targets.signed.delegations {
            if delegations.role(&RoleName::Releases.to_string()).is_some() {
                match self.fetch_metadata(RoleName::Releases)? {
                    Some(bytes) => {
                        if let Some(meta) =
                            snapshot.signed.meta.get(&RoleName::Releases.filename())
                        {
                            check_meta_hash(RoleName::Releases, &bytes, meta)?;
                        }
                        let releases: Signed<Targets> = serde_json::from_slice(&bytes)
                            .context(error::FileParseJsonSnafu {
                                path: RoleName::Releases.filename(),
                            })?;
                        delegations
                            .verify_role(&RoleName::Releases.to_string(), &releases)
                            .context(error::MetadataSnafu)?;
                        check_expiry(&releases.signed, RoleName::Releases)?;
                        self.cache_metadata(RoleName::Releases, &bytes)?;
                        Some(releases)
                    }
                    None => None,
                }
            } else {
                None
            }
        } else {
            None
        };

        self.cache_metadata(RoleName::Targets, &targets_bytes)?;

        Ok(TrustedCollection {
            root,
            targets,
            releases,
        })
    }

    /// Returns targets visible in the collection, most-specific role first:
    /// everything under `targets/releases`, then the top-level targets.
    pub fn list_targets(&self) -> Result<Vec<TargetWithRole>> {
        let trusted = self.load()?;
        Ok(Self::targets_of(&trusted))
    }

    fn targets_of(trusted: &TrustedCollection) -> Vec<TargetWithRole> {
        let mut listing = Vec::new();
        if let Some(releases) = &trusted.releases {
            let mut names: Vec<_> = releases.signed.targets.keys().collect();
            names.sort();
            for name in names {
                listing.push(TargetWithRole {
                    name: name.clone(),
                    target: releases.signed.targets[name].clone(),
                    role: RoleName::Releases,
                });
            }
        }
        let mut names: Vec<_> = trusted.targets.signed.targets.keys().collect();
        names.sort();
        for name in names {
            listing.push(TargetWithRole {
                name: name.clone(),
                target: trusted.targets.signed.targets[name].clone(),
                role: RoleName::Targets,
            });
        }
        listing
    }

    /// Returns a single target by name. The tie-break order is the listing
    /// order: the delegated role is searched before top-level targets.
    pub fn get_target_by_name(&self, name: &str) -> Result<TargetWithRole> {
        self.list_targets()?
            .into_iter()
            .find(|entry| entry.name == name)
            .context(error::TargetNotFoundSnafu {
                name,
                gun: &self.gun,
            })
    }

    /// Returns every role in the collection with its attested key IDs.
    pub fn list_roles(&self) -> Result<Vec<RoleWithKeys>> {
        let trusted = self.load()?;
        let mut roles = Vec::new();
        let mut top: Vec<_> = trusted.root.signed.roles.iter().collect();
        top.sort_by_key(|(role, _)| role.to_string());
        for (role, keys) in top {
            roles.push(RoleWithKeys {
                role: role.to_string(),
                keyids: keys.keyids.iter().map(ToString::to_string).collect(),
            });
        }
        if let Some(delegations) = &trusted.targets.signed.delegations {
            for role in &delegations.roles {
                roles.push(RoleWithKeys {
                    role: role.name.clone(),
                    keyids: role.keyids.iter().map(ToString::to_string).collect(),
                });
            }
        }
        Ok(roles)
    }

    /// Signs the staged targets into the collection and publishes it to the
    /// trust server.
    ///
    /// The change list is cleared on entry and in a guaranteed-release
    /// scope on exit, so a failed mid-publish attempt cannot persist as
    /// stale local staging. A collection that does not exist yet is
    /// initialized first (root key import or creation, key reuse across
    /// repositories, and the `targets/releases` delegation).
    pub fn sign_and_publish(
        &self,
        root_key_path: Option<&Path>,
        staged: &[StagedTarget],
    ) -> Result<()> {
        self.changes.clear()?;
        let _guard = self.changes.clear_on_drop();

        for item in staged {
            self.changes.add(&Change {
                action: ChangeAction::Create,
                scope: item.role,
                name: item.name.clone(),
                target: item.target.clone(),
            })?;
        }

        let mut editor = match self.load() {
            Ok(trusted) => {
                debug!("trusted collection for {} exists, editing", self.gun);
                let mut editor = CollectionEditor::from_existing(
                    &self.gun,
                    trusted.root,
                    trusted.targets,
                    trusted.releases,
                );
                self.reconcile_targets_key(&mut editor)?;
                if editor
                    .targets()
                    .delegated_role(&RoleName::Releases.to_string())
                    .is_none()
                {
                    let releases_key = self.keys.releases_key()?;
                    editor.ensure_releases_delegation(&releases_key)?;
                }
                editor
            }
            Err(err) if err.is_repository_not_found() => {
                info!("initializing trusted collection for {}", self.gun);
                self.initialize(root_key_path)?
            }
            Err(err) => return Err(err),
        };

        for change in self.changes.list()? {
            editor.add_target(change.scope, &change.name, change.target)?;
        }

        let signing_keys = self.signing_keys(&editor)?;
        let signed = editor.sign(&signing_keys)?;

        self.transport
            .post_json(&self.tuf_path(""), signed.publish_body())?;
        signed.write_cache(self.metadata_dir())?;

        self.changes.clear()?;
        Ok(())
    }

    /// Builds the metadata for a collection that does not exist on the
    /// trust server yet. Snapshot and timestamp custody stays with the
    /// server, whose public keys are fetched during initialization.
    fn initialize(&self, root_key_path: Option<&Path>) -> Result<CollectionEditor> {
        let root_key_ids = self.keys.import_root_key(root_key_path)?;
        let root_key_id = root_key_ids.first().context(error::NoRootKeySnafu)?;
        let root_key = self
            .keys
            .load_key(RoleName::Root, root_key_id)?
            .public_key();

        // Reuse a single targets key across repositories, creating it only
        // when the store has none.
        let targets_ids = self.keys.list_keys(RoleName::Targets)?;
        let targets_key = match targets_ids.as_slice() {
            [] => self.keys.generate_key(RoleName::Targets)?.1,
            [id, ..] => self.keys.load_key(RoleName::Targets, id)?.public_key(),
        };

        let releases_key = self.keys.releases_key()?;

        let snapshot_key = self.remote_role_key(RoleName::Snapshot)?;
        let timestamp_key = self.remote_role_key(RoleName::Timestamp)?;

        CollectionEditor::create(
            &self.gun,
            &root_key,
            &targets_key,
            &releases_key,
            &snapshot_key,
            &timestamp_key,
        )
    }

    /// Restores the "one signer per collection" property for the targets
    /// role: with exactly one local key, nothing to do; with two, the role
    /// is rotated to the key that is not currently attested; zero or three
    /// or more is an error.
    fn reconcile_targets_key(&self, editor: &mut CollectionEditor) -> Result<()> {
        let store_ids = self.keys.list_keys(RoleName::Targets)?;
        let current = editor
            .root()
            .roles
            .get(&RoleName::Targets)
            .map(|role| role.keyids.clone())
            .unwrap_or_default();
        ensure!(current.len() <= 1, error::TargetsRoleKeyCountSnafu);

        match store_ids.len() {
            0 => error::NoTargetsKeySnafu.fail(),
            1 => {
                let id = &store_ids[0];
                if current.first().map(ToString::to_string).as_deref() != Some(id.as_str()) {
                    let public = self.keys.load_key(RoleName::Targets, id)?.public_key();
                    editor.rotate_targets_key(&public)?;
                }
                Ok(())
            }
            2 => {
                let this_id = current
                    .first()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                let that_id = store_ids
                    .iter()
                    .find(|id| **id != this_id)
                    .expect("two keys, at most one matches");
                debug!("rotating targets key from {} to {}", this_id, that_id);
                let public = self.keys.load_key(RoleName::Targets, that_id)?.public_key();
                editor.rotate_targets_key(&public)?;
                Ok(())
            }
            _ => error::TooManyTargetsKeysSnafu.fail(),
        }
    }

    /// Loads the private keys that the edit needs: the keys currently (or
    /// newly) attested for targets and `targets/releases`, plus root when
    /// the edit changes the root role.
    fn signing_keys(&self, editor: &CollectionEditor) -> Result<SigningKeys> {
        let targets_id = editor
            .root()
            .roles
            .get(&RoleName::Targets)
            .and_then(|role| role.keyids.first())
            .context(error::SigningKeyNotFoundSnafu {
                role: RoleName::Targets,
            })?
            .to_string();
        let targets = self.keys.load_key(RoleName::Targets, &targets_id)?;

        let releases_id = editor
            .targets()
            .delegated_role(&RoleName::Releases.to_string())
            .and_then(|role| role.keyids.first())
            .context(error::SigningKeyNotFoundSnafu {
                role: RoleName::Releases,
            })?
            .to_string();
        let releases = self.keys.load_key(RoleName::Releases, &releases_id)?;

        let root = if editor.root_dirty() {
            let root_id = editor
                .root()
                .roles
                .get(&RoleName::Root)
                .and_then(|role| role.keyids.first())
                .context(error::SigningKeyNotFoundSnafu {
                    role: RoleName::Root,
                })?
                .to_string();
            Some(self.keys.load_key(RoleName::Root, &root_id)?)
        } else {
            None
        };

        Ok(SigningKeys {
            root,
            targets,
            releases,
        })
    }

    /// Fetches a server-managed role's public key, used when initializing
    /// a collection with remotely-held snapshot and timestamp roles.
    fn remote_role_key(&self, role: RoleName) -> Result<Key> {
        let path = self.tuf_path(&format!("{}.key", role));
        let bytes = self
            .transport
            .get_bytes(&path)?
            .context(error::RepositoryNotFoundSnafu { gun: &self.gun })?;
        serde_json::from_slice(&bytes).context(error::FileParseJsonSnafu { path })
    }
}

fn check_expiry<T: Role>(role: &T, name: RoleName) -> Result<()> {
    ensure!(
        role.expires() > Utc::now(),
        error::ExpiredMetadataSnafu {
            role: name.to_string(),
            expires: role.expires(),
        }
    );
    Ok(())
}

fn check_meta_hash(role: RoleName, bytes: &[u8], meta: &SnapshotMeta) -> Result<()> {
    if let Some(length) = meta.length {
        ensure!(
            bytes.len() as u64 == length,
            error::MetadataHashMismatchSnafu {
                role: role.to_string(),
                calculated: bytes.len().to_string(),
                expected: length.to_string(),
            }
        );
    }
    if let Some(hashes) = &meta.hashes {
        let calculated = digest(&SHA256, bytes);
        ensure!(
            calculated.as_ref() == hashes.sha256.as_ref(),
            error::MetadataHashMismatchSnafu {
                role: role.to_string(),
                calculated: hex::encode(calculated.as_ref()),
                expected: hex::encode(&hashes.sha256),
            }
        );
    }
    Ok(())
}
