// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The on-disk store of role private keys and the passphrase resolution
//! machinery that guards them.
//!
//! Keys live under `<trust_dir>/private/<role>/<key_id>.key` as PEM files.
//! Root key material must be passphrase-encrypted on disk; other roles may
//! be cleartext when no passphrase is available (a headless CI signer with
//! only `SIGNY_TARGETS_PASSPHRASE` unset, for example).

use crate::error::{self, Result};
use crate::schema::key::Key;
use crate::schema::RoleName;
use crate::sign::{self, parse_keypair, Sign, SignKeyPair};
use aws_lc_rs::rand::SystemRandom;
use log::debug;
use snafu::{ensure, ResultExt};
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Environment variable consulted for the root role passphrase.
pub const ROOT_PASSPHRASE_VAR: &str = "SIGNY_ROOT_PASSPHRASE";
/// Environment variable consulted for the targets role passphrase.
pub const TARGETS_PASSPHRASE_VAR: &str = "SIGNY_TARGETS_PASSPHRASE";
/// Environment variable consulted for the targets/releases role passphrase.
pub const RELEASES_PASSPHRASE_VAR: &str = "SIGNY_RELEASES_PASSPHRASE";

const MAX_PROMPT_ATTEMPTS: u8 = 3;

/// The passphrase alias for a role. `targets/releases` and `releases` are
/// equivalent aliases.
pub fn passphrase_alias(role: RoleName) -> &'static str {
    match role {
        RoleName::Root => "root",
        RoleName::Releases => "releases",
        _ => "targets",
    }
}

fn passphrase_var(alias: &str) -> Option<&'static str> {
    match alias {
        "root" => Some(ROOT_PASSPHRASE_VAR),
        "targets" => Some(TARGETS_PASSPHRASE_VAR),
        "releases" | "targets/releases" => Some(RELEASES_PASSPHRASE_VAR),
        _ => None,
    }
}

/// Resolves the passphrase for a key alias: a fixed environment mapping is
/// consulted first, then the user is prompted interactively. Returns `None`
/// when no passphrase can be obtained without a terminal.
pub fn resolve_passphrase(alias: &str, create_new: bool) -> Result<Option<Zeroizing<String>>> {
    if let Some(var) = passphrase_var(alias) {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return Ok(Some(Zeroizing::new(value)));
            }
        }
    }

    // Fall back to an interactive prompt. Without a terminal the prompt
    // errors out, which callers treat as "no passphrase".
    for attempt in 0..MAX_PROMPT_ATTEMPTS {
        let prompt = format!("Enter passphrase for {} key: ", alias);
        let passphrase = match rpassword::prompt_password(&prompt) {
            Ok(value) => Zeroizing::new(value),
            Err(err) => {
                debug!("cannot prompt for {} passphrase: {}", alias, err);
                return Ok(None);
            }
        };
        if !create_new {
            return Ok(Some(passphrase));
        }
        let repeat = Zeroizing::new(
            rpassword::prompt_password(format!("Repeat passphrase for {} key: ", alias))
                .context(error::PassphrasePromptSnafu { alias })?,
        );
        if *passphrase == *repeat {
            return Ok(Some(passphrase));
        }
        debug!("passphrases do not match, attempt {}", attempt + 1);
    }

    error::PassphraseGivenUpSnafu {
        alias,
        attempts: MAX_PROMPT_ATTEMPTS,
    }
    .fail()
}

/// Attempts to read a role key from a PEM file. Root key material must be
/// encrypted; cleartext PEM is accepted for the other roles.
pub fn read_role_key(role: RoleName, path: &Path) -> Result<SignKeyPair> {
    let pem_bytes = Zeroizing::new(fs::read(path).context(error::FileReadSnafu { path })?);
    let pem = pem::parse(pem_bytes.as_slice()).context(error::PemParseSnafu)?;

    if sign::is_encrypted(&pem) {
        let alias = passphrase_alias(role);
        let passphrase =
            resolve_passphrase(alias, false)?.ok_or_else(|| error::Error::PassphraseGivenUp {
                alias: alias.to_owned(),
                attempts: 0,
            })?;
        parse_keypair(pem_bytes.as_slice(), Some(passphrase.as_str()))
    } else {
        ensure!(
            role != RoleName::Root,
            error::RootKeyNotEncryptedSnafu { path }
        );
        parse_keypair(pem_bytes.as_slice(), None)
    }
}

/// The store of role private keys inside a trust directory.
#[derive(Debug)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Opens (creating if needed) the key store under `trust_dir`.
    pub fn open<P: AsRef<Path>>(trust_dir: P) -> Result<Self> {
        let dir = trust_dir.as_ref().join("private");
        fs::create_dir_all(&dir).context(error::DirCreateSnafu { path: &dir })?;
        Ok(Self { dir })
    }

    fn role_dir(&self, role: RoleName) -> PathBuf {
        self.dir.join(role.to_string())
    }

    fn key_path(&self, role: RoleName, key_id: &str) -> PathBuf {
        self.role_dir(role).join(format!("{}.key", key_id))
    }

    /// Lists the IDs of all stored keys for a role, sorted so that reuse is
    /// stable across invocations.
    pub fn list_keys(&self, role: RoleName) -> Result<Vec<String>> {
        let dir = self.role_dir(role);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir).context(error::FileReadSnafu { path: &dir })? {
            let entry = entry.context(error::FileReadSnafu { path: &dir })?;
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|name| name.strip_suffix(".key")) {
                ids.push(id.to_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Loads and decrypts the stored key `key_id` for `role`.
    pub fn load_key(&self, role: RoleName, key_id: &str) -> Result<SignKeyPair> {
        read_role_key(role, &self.key_path(role, key_id))
    }

    /// Loads the single signing key for a role, which must exist.
    pub fn signing_key(&self, role: RoleName) -> Result<SignKeyPair> {
        let ids = self.list_keys(role)?;
        let id = ids
            .first()
            .ok_or(error::Error::SigningKeyNotFound { role })?;
        self.load_key(role, id)
    }

    /// Copies key material (already PEM-framed, encrypted or not) into the
    /// store under its derived key ID.
    pub fn add_key(&self, role: RoleName, pem_bytes: &[u8], key_pair: &SignKeyPair) -> Result<String> {
        let key_id = key_pair
            .public_key()
            .key_id()
            .context(error::KeyIdSnafu)?
            .to_string();
        let path = self.key_path(role, &key_id);
        let parent = self.role_dir(role);
        fs::create_dir_all(&parent).context(error::DirCreateSnafu { path: &parent })?;
        write_private(&path, pem_bytes)?;
        Ok(key_id)
    }

    /// Generates a new ECDSA key for a role, stores it, and returns its ID
    /// and public half. Root keys are always encrypted; other roles fall
    /// back to cleartext PEM when no passphrase is available.
    pub fn generate_key(&self, role: RoleName) -> Result<(String, Key)> {
        let rng = SystemRandom::new();
        let der = sign::generate_ecdsa_key(&rng)?;

        let alias = passphrase_alias(role);
        let passphrase = resolve_passphrase(alias, true)?;
        let pem_text = match &passphrase {
            Some(passphrase) => sign::encrypt_key(&der, passphrase)?,
            None => {
                ensure!(
                    role != RoleName::Root,
                    error::RootKeyNotEncryptedSnafu {
                        path: self.role_dir(role),
                    }
                );
                sign::cleartext_pem(&der)
            }
        };

        let key_pair = parse_keypair(pem_text.as_bytes(), passphrase.as_deref().map(|p| &**p))?;
        let public = key_pair.public_key();
        let key_id = self.add_key(role, pem_text.as_bytes(), &key_pair)?;
        debug!("generated {} key {}", role, key_id);
        Ok((key_id, public))
    }

    /// Imports the root key from `path` into the store, or reuses an
    /// existing stored root key; generates a fresh one when neither exists.
    /// Returns the root key IDs to initialize the repository with.
    pub fn import_root_key(&self, path: Option<&Path>) -> Result<Vec<String>> {
        if let Some(path) = path {
            let key_pair = read_role_key(RoleName::Root, path)?;
            let pem_bytes = fs::read(path).context(error::FileReadSnafu { path })?;
            let key_id = self.add_key(RoleName::Root, &pem_bytes, &key_pair)?;
            return Ok(vec![key_id]);
        }

        let existing = self.list_keys(RoleName::Root)?;
        if let Some(key_id) = existing.first() {
            // The lexicographically first key is reused, which is stable
            // across invocations for a given store.
            debug!("found root key, using: {}", key_id);
            return Ok(vec![key_id.clone()]);
        }

        let (key_id, _) = self.generate_key(RoleName::Root)?;
        Ok(vec![key_id])
    }

    /// Restores the "one releases key" invariant: zero stored keys creates
    /// a new ECDSA key, exactly one is reused, more than one is an error.
    /// Returns the public half.
    pub fn releases_key(&self) -> Result<Key> {
        let ids = self.list_keys(RoleName::Releases)?;
        match ids.as_slice() {
            [] => {
                let (_, public) = self.generate_key(RoleName::Releases)?;
                Ok(public)
            }
            [id] => Ok(self
                .load_key(RoleName::Releases, id)?
                .public_key()),
            _ => error::TooManyReleasesKeysSnafu.fail(),
        }
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .context(error::FileWriteSnafu { path })?;
    file.write_all(contents)
        .context(error::FileWriteSnafu { path })
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents).context(error::FileWriteSnafu { path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::{cleartext_pem, encrypt_key, generate_ecdsa_key};
    use aws_lc_rs::rand::SystemRandom;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, KeyStore) {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn cleartext_root_key_rejected() {
        let dir = TempDir::new().unwrap();
        let rng = SystemRandom::new();
        let der = generate_ecdsa_key(&rng).unwrap();
        let path = dir.path().join("root.key");
        std::fs::write(&path, cleartext_pem(&der)).unwrap();

        let err = read_role_key(RoleName::Root, &path).unwrap_err();
        assert!(err.to_string().contains("must be encrypted"));

        // The same material is fine for a non-root role.
        assert!(read_role_key(RoleName::Targets, &path).is_ok());
    }

    #[test]
    fn import_root_key_from_encrypted_file() {
        std::env::set_var(ROOT_PASSPHRASE_VAR, "correct horse");
        let (_keep, store) = test_store();

        let rng = SystemRandom::new();
        let der = generate_ecdsa_key(&rng).unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("root.key");
        std::fs::write(&path, encrypt_key(&der, "correct horse").unwrap()).unwrap();

        let ids = store.import_root_key(Some(&path)).unwrap();
        assert_eq!(ids.len(), 1);
        // A second import without a path reuses the stored key.
        assert_eq!(store.import_root_key(None).unwrap(), ids);
    }

    #[test]
    fn releases_key_is_created_once_and_reused() {
        std::env::set_var(RELEASES_PASSPHRASE_VAR, "release me");
        let (_keep, store) = test_store();

        let first = store.releases_key().unwrap();
        let second = store.releases_key().unwrap();
        assert_eq!(first.key_id().unwrap(), second.key_id().unwrap());
        assert_eq!(store.list_keys(RoleName::Releases).unwrap().len(), 1);
    }

    #[test]
    fn stored_keys_are_sorted_for_stable_reuse() {
        std::env::set_var(TARGETS_PASSPHRASE_VAR, "targets pass");
        let (_keep, store) = test_store();
        let (first_id, _) = store.generate_key(RoleName::Targets).unwrap();
        let (second_id, _) = store.generate_key(RoleName::Targets).unwrap();

        let mut expected = vec![first_id, second_id];
        expected.sort();
        assert_eq!(store.list_keys(RoleName::Targets).unwrap(), expected);
    }
}
