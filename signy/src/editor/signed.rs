// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provides `SignedRole` and `SignedCollection`, the output of the editor
//! after signing, ready to be published and cached.

use crate::error::{self, Result};
use crate::schema::{Role, RoleName, Signature, Signed};
use crate::sign::Sign;
use aws_lc_rs::digest::{digest, SHA256, SHA256_OUTPUT_LEN};
use aws_lc_rs::rand::SecureRandom;
use serde::Serialize;
use snafu::ResultExt;
use std::fs;
use std::path::Path;

/// A signed role, including its serialized form (`buffer`) which is what is
/// published and cached. The `sha256` and `length` are calculated from this
/// buffer and referenced by other roles, which makes it imperative that this
/// buffer is what gets written.
#[derive(Debug, Clone)]
pub struct SignedRole<T> {
    pub(crate) signed: Signed<T>,
    pub(crate) buffer: Vec<u8>,
    pub(crate) sha256: [u8; SHA256_OUTPUT_LEN],
    pub(crate) length: u64,
}

impl<T> SignedRole<T>
where
    T: Role + Serialize,
{
    /// Creates a new `SignedRole` by signing `role` with `key`.
    pub fn new(role: T, key: &dyn Sign, rng: &dyn SecureRandom) -> Result<Self> {
        let keyid = key.public_key().key_id().context(error::KeyIdSnafu)?;

        let mut signed = Signed {
            signed: role,
            signatures: Vec::new(),
        };
        let canonical = signed.signed.canonical_form().context(error::MetadataSnafu)?;
        let sig = key.sign(&canonical, rng)?;
        signed.signatures.push(Signature {
            keyid,
            sig: sig.into(),
        });

        SignedRole::from_signed(signed)
    }

    /// Creates a `SignedRole<T>` from an already-signed metadata object,
    /// computing the serialized buffer, length and digest.
    pub fn from_signed(signed: Signed<T>) -> Result<Self> {
        let mut buffer =
            serde_json::to_vec_pretty(&signed).context(error::CanonicalJsonSnafu)?;
        buffer.push(b'\n');
        let length = buffer.len() as u64;

        let mut sha256 = [0; SHA256_OUTPUT_LEN];
        sha256.copy_from_slice(digest(&SHA256, &buffer).as_ref());

        Ok(SignedRole {
            signed,
            buffer,
            sha256,
            length,
        })
    }

    /// Provides access to the internal signed metadata object.
    pub fn signed(&self) -> &Signed<T> {
        &self.signed
    }

    /// The serialized form of the signed role; anything that writes this
    /// role must write exactly these bytes.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// The SHA-256 digest of the serialized buffer.
    pub fn sha256(&self) -> &[u8] {
        &self.sha256
    }

    /// The length in bytes of the serialized buffer.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Writes the buffer to `outdir` under the given role's file name.
    pub fn write<P: AsRef<Path>>(&self, outdir: P, role: RoleName) -> Result<()> {
        let path = outdir.as_ref().join(role.filename());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context(error::DirCreateSnafu { path: parent })?;
        }
        fs::write(&path, &self.buffer).context(error::FileWriteSnafu { path })
    }
}

/// The client-signed portion of a trusted collection, ready to publish.
/// The trust server signs snapshot and timestamp on receipt.
#[derive(Debug)]
pub struct SignedCollection {
    /// The root role, present only when it changed in this edit.
    pub root: Option<SignedRole<crate::schema::Root>>,
    /// The top-level targets role.
    pub targets: SignedRole<crate::schema::Targets>,
    /// The `targets/releases` delegation.
    pub releases: SignedRole<crate::schema::Targets>,
}

impl SignedCollection {
    /// The JSON publish body: an object mapping role name to the exact
    /// signed metadata buffers.
    pub fn publish_body(&self) -> String {
        let mut body = String::from("{");
        let mut first = true;
        let mut push = |name: RoleName, buffer: &[u8]| {
            if !first {
                body.push(',');
            }
            first = false;
            // Role names never need escaping, but quote through serde_json
            // anyway so the key is always valid JSON.
            body.push_str(&serde_json::to_string(&name.to_string()).unwrap_or_default());
            body.push(':');
            body.push_str(String::from_utf8_lossy(buffer).trim_end());
        };
        if let Some(root) = &self.root {
            push(RoleName::Root, &root.buffer);
        }
        push(RoleName::Targets, &self.targets.buffer);
        push(RoleName::Releases, &self.releases.buffer);
        body.push('}');
        body
    }

    /// Writes every signed role to the repository metadata cache.
    pub fn write_cache<P: AsRef<Path>>(&self, metadata_dir: P) -> Result<()> {
        let metadata_dir = metadata_dir.as_ref();
        if let Some(root) = &self.root {
            root.write(metadata_dir, RoleName::Root)?;
        }
        self.targets.write(metadata_dir, RoleName::Targets)?;
        self.releases.write(metadata_dir, RoleName::Releases)?;
        Ok(())
    }
}
