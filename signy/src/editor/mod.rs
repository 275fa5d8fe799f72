// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provides a `CollectionEditor` for building and editing the client-signed
//! roles of a trusted collection.

pub mod signed;

use crate::editor::signed::{SignedCollection, SignedRole};
use crate::error::{self, Result};
use crate::schema::key::Key;
use crate::schema::{
    DelegatedRole, Delegations, RoleKeys, RoleName, Root, Signed, Target, Targets,
};
use crate::sign::{Sign, SignKeyPair};
use aws_lc_rs::rand::SystemRandom;
use chrono::{DateTime, Duration, Utc};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashMap;
use std::num::NonZeroU64;

pub(crate) const SPEC_VERSION: &str = "1.0.0";

// Client-managed role lifetimes, after which the collection must be
// re-signed. Snapshot and timestamp lifetimes are the trust server's call.
const ROOT_EXPIRES_DAYS: i64 = 10 * 365;
const TARGETS_EXPIRES_DAYS: i64 = 3 * 365;

/// The path patterns entrusted to `targets/releases`: every tag of the GUN,
/// and every in-toto link target below it. The pull-side metadata check
/// relies on this restriction, so it is defined in exactly one place.
pub fn releases_path_patterns(gun: &str) -> Vec<String> {
    vec![format!("{}:", gun), format!("{}/in-toto-links/", gun)]
}

/// The signing keys for one edit of a collection. The root key is needed
/// only for edits that change the root role.
#[derive(Debug)]
pub struct SigningKeys {
    /// Root role key; required when the edit dirties the root.
    pub root: Option<SignKeyPair>,
    /// Targets role key.
    pub targets: SignKeyPair,
    /// `targets/releases` delegation key.
    pub releases: SignKeyPair,
}

/// `CollectionEditor` holds the client-signed roles of one trusted
/// collection while they are being built or edited, and signs them all at
/// once when the edit is complete.
#[derive(Debug)]
pub struct CollectionEditor {
    gun: String,
    root: Root,
    targets: Targets,
    releases: Targets,
    root_dirty: bool,
    fresh: bool,
}

impl CollectionEditor {
    /// Creates the metadata for a brand new collection: a root role
    /// attesting all role keys (snapshot and timestamp keys belong to the
    /// trust server), a targets role delegating to `targets/releases`, and
    /// an empty releases role.
    pub fn create(
        gun: &str,
        root_key: &Key,
        targets_key: &Key,
        releases_key: &Key,
        snapshot_key: &Key,
        timestamp_key: &Key,
    ) -> Result<Self> {
        let one = NonZeroU64::new(1).expect("1 is not zero");
        let mut keys = HashMap::new();
        let mut roles = HashMap::new();
        for (role, key) in [
            (RoleName::Root, root_key),
            (RoleName::Targets, targets_key),
            (RoleName::Snapshot, snapshot_key),
            (RoleName::Timestamp, timestamp_key),
        ] {
            let keyid = key.key_id().context(error::KeyIdSnafu)?;
            keys.insert(keyid.clone(), key.clone());
            roles.insert(
                role,
                RoleKeys {
                    keyids: vec![keyid],
                    threshold: one,
                    _extra: HashMap::new(),
                },
            );
        }

        let root = Root {
            spec_version: SPEC_VERSION.to_owned(),
            consistent_snapshot: false,
            version: one,
            expires: expires_in(ROOT_EXPIRES_DAYS),
            keys,
            roles,
            _extra: HashMap::new(),
        };

        let mut targets = Targets::new(SPEC_VERSION, one, expires_in(TARGETS_EXPIRES_DAYS));
        let releases_keyid = releases_key.key_id().context(error::KeyIdSnafu)?;
        let mut delegations = Delegations::new();
        delegations
            .keys
            .insert(releases_keyid.clone(), releases_key.clone());
        delegations.roles.push(DelegatedRole {
            name: RoleName::Releases.to_string(),
            keyids: vec![releases_keyid],
            threshold: one,
            paths: releases_path_patterns(gun),
            terminating: false,
        });
        targets.delegations = Some(delegations);

        let releases = Targets::new(SPEC_VERSION, one, expires_in(TARGETS_EXPIRES_DAYS));

        Ok(Self {
            gun: gun.to_owned(),
            root,
            targets,
            releases,
            root_dirty: true,
            fresh: true,
        })
    }

    /// Edits an existing collection. Versions are bumped and expirations
    /// refreshed when the edit is signed.
    pub fn from_existing(
        gun: &str,
        root: Signed<Root>,
        targets: Signed<Targets>,
        releases: Option<Signed<Targets>>,
    ) -> Self {
        let releases = releases.map(|signed| signed.signed).unwrap_or_else(|| {
            Targets::new(
                SPEC_VERSION,
                NonZeroU64::new(1).expect("1 is not zero"),
                expires_in(TARGETS_EXPIRES_DAYS),
            )
        });
        Self {
            gun: gun.to_owned(),
            root: root.signed,
            targets: targets.signed,
            releases,
            root_dirty: false,
            fresh: false,
        }
    }

    /// The GUN whose collection is being edited.
    pub fn gun(&self) -> &str {
        &self.gun
    }

    /// The current root role metadata.
    pub fn root(&self) -> &Root {
        &self.root
    }

    /// The current top-level targets role metadata.
    pub fn targets(&self) -> &Targets {
        &self.targets
    }

    /// Establishes the `targets/releases` delegation when the collection
    /// does not have one yet. No-op when the delegation exists.
    pub fn ensure_releases_delegation(&mut self, releases_key: &Key) -> Result<()> {
        if self
            .targets
            .delegated_role(&RoleName::Releases.to_string())
            .is_some()
        {
            return Ok(());
        }
        let keyid = releases_key.key_id().context(error::KeyIdSnafu)?;
        let delegations = self.targets.delegations.get_or_insert_with(Delegations::new);
        delegations.keys.insert(keyid.clone(), releases_key.clone());
        delegations.roles.push(DelegatedRole {
            name: RoleName::Releases.to_string(),
            keyids: vec![keyid],
            threshold: NonZeroU64::new(1).expect("1 is not zero"),
            paths: releases_path_patterns(&self.gun),
            terminating: false,
        });
        Ok(())
    }

    /// Add a `Target` to a role. Targets staged to `targets/releases` must
    /// fall under the delegation's path patterns.
    pub fn add_target(&mut self, role: RoleName, name: &str, target: Target) -> Result<()> {
        match role {
            RoleName::Targets => {
                self.targets.add_target(name, target);
                Ok(())
            }
            RoleName::Releases => {
                let delegated = self
                    .targets
                    .delegated_role(&RoleName::Releases.to_string())
                    .context(error::DelegationMissingSnafu {
                        role: RoleName::Releases.to_string(),
                    })?;
                ensure!(
                    delegated.matches_path(name),
                    error::DelegationPathViolationSnafu { name }
                );
                self.releases.add_target(name, target);
                Ok(())
            }
            other => error::SigningKeyNotFoundSnafu { role: other }.fail(),
        }
    }

    /// Replaces the targets role key in the root, leaving the old key
    /// attested so previously published metadata stays verifiable.
    pub fn rotate_targets_key(&mut self, new_key: &Key) -> Result<()> {
        let keyid = new_key.key_id().context(error::KeyIdSnafu)?;
        self.root.keys.insert(keyid.clone(), new_key.clone());
        let role = self
            .root
            .roles
            .get_mut(&RoleName::Targets)
            .context(error::DelegationMissingSnafu {
                role: RoleName::Targets.to_string(),
            })?;
        role.keyids = vec![keyid];
        self.root_dirty = true;
        Ok(())
    }

    /// Whether this edit changes the root role (and therefore needs the
    /// root signing key).
    pub fn root_dirty(&self) -> bool {
        self.root_dirty
    }

    /// Builds and signs each changed role, returning the set of signed
    /// metadata ready to publish.
    pub fn sign(mut self, keys: &SigningKeys) -> Result<SignedCollection> {
        let rng = SystemRandom::new();

        if !self.fresh {
            self.targets.version = bump(self.targets.version, RoleName::Targets)?;
            self.targets.expires = expires_in(TARGETS_EXPIRES_DAYS);
            self.releases.version = bump(self.releases.version, RoleName::Releases)?;
            self.releases.expires = expires_in(TARGETS_EXPIRES_DAYS);
            if self.root_dirty {
                self.root.version = bump(self.root.version, RoleName::Root)?;
            }
        }

        let root = if self.root_dirty {
            let key = keys.root.as_ref().context(error::SigningKeyNotFoundSnafu {
                role: RoleName::Root,
            })?;
            Some(SignedRole::new(self.root, key as &dyn Sign, &rng)?)
        } else {
            None
        };

        let targets = SignedRole::new(self.targets, &keys.targets as &dyn Sign, &rng)?;
        let releases = SignedRole::new(self.releases, &keys.releases as &dyn Sign, &rng)?;

        Ok(SignedCollection {
            root,
            targets,
            releases,
        })
    }
}

fn expires_in(days: i64) -> DateTime<Utc> {
    Utc::now() + Duration::days(days)
}

fn bump(version: NonZeroU64, role: RoleName) -> Result<NonZeroU64> {
    version
        .get()
        .checked_add(1)
        .and_then(NonZeroU64::new)
        .context(error::VersionOverflowSnafu { role })
}
