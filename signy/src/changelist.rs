// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A per-repository staging list of pending role edits, persisted under
//! `<trust_dir>/tuf/<gun>/changelist/`. The list is emptied at the start
//! and the end of every sign-and-publish call; a crash between the two
//! points cannot leave stale edits behind to be published later.

use crate::error::{self, Result};
use crate::schema::{RoleName, Target};
use log::warn;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::fs;
use std::path::{Path, PathBuf};

/// The kind of edit a change stages.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// Create or replace a target entry.
    Create,
}

/// One staged role edit.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Change {
    /// What the change does.
    pub action: ChangeAction,
    /// The role the change applies to.
    pub scope: RoleName,
    /// The name of the target being changed.
    pub name: String,
    /// The target entry to store.
    pub target: Target,
}

/// The on-disk staging list for one repository.
#[derive(Debug)]
pub struct ChangeList {
    dir: PathBuf,
}

impl ChangeList {
    /// Opens (creating if needed) the change list below `repo_dir`.
    pub fn open<P: AsRef<Path>>(repo_dir: P) -> Result<Self> {
        let dir = repo_dir.as_ref().join("changelist");
        fs::create_dir_all(&dir).context(error::DirCreateSnafu { path: &dir })?;
        Ok(Self { dir })
    }

    fn change_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir).context(error::FileReadSnafu { path: &self.dir })? {
            let entry = entry.context(error::FileReadSnafu { path: &self.dir })?;
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "change") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Stages a change.
    pub fn add(&self, change: &Change) -> Result<()> {
        let next = self
            .change_files()?
            .last()
            .and_then(|path| path.file_stem()?.to_str()?.parse::<u32>().ok())
            .map_or(0, |index| index + 1);
        let path = self.dir.join(format!("{:06}.change", next));
        let json = serde_json::to_vec_pretty(change).context(error::FileParseJsonSnafu {
            path: path.clone(),
        })?;
        fs::write(&path, json).context(error::FileWriteSnafu { path })
    }

    /// Returns all staged changes in the order they were added.
    pub fn list(&self) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        for path in self.change_files()? {
            let raw = fs::read(&path).context(error::FileReadSnafu { path: &path })?;
            changes
                .push(serde_json::from_slice(&raw).context(error::ChangeParseSnafu { path })?);
        }
        Ok(changes)
    }

    /// Whether no changes are staged.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.change_files()?.is_empty())
    }

    /// Removes every staged change.
    pub fn clear(&self) -> Result<()> {
        for path in self.change_files()? {
            fs::remove_file(&path).context(error::ChangeListClearSnafu { path })?;
        }
        Ok(())
    }

    /// A guard that clears the list when dropped, so a failed mid-publish
    /// attempt cannot persist as stale local staging.
    pub fn clear_on_drop(&self) -> ClearGuard<'_> {
        ClearGuard { list: self }
    }
}

/// Clears the owning [`ChangeList`] on drop.
#[derive(Debug)]
pub struct ClearGuard<'a> {
    list: &'a ChangeList,
}

impl Drop for ClearGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.list.clear() {
            warn!("cannot clear change list: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Target;
    use tempfile::TempDir;

    fn change(name: &str) -> Change {
        Change {
            action: ChangeAction::Create,
            scope: RoleName::Releases,
            name: name.to_owned(),
            target: Target::from_bytes(name.as_bytes(), None),
        }
    }

    #[test]
    fn changes_are_listed_in_insertion_order() {
        let dir = TempDir::new().unwrap();
        let list = ChangeList::open(dir.path()).unwrap();
        list.add(&change("example.com/demo:v1")).unwrap();
        list.add(&change("example.com/demo/in-toto-links/a.link"))
            .unwrap();

        let staged = list.list().unwrap();
        assert_eq!(staged.len(), 2);
        assert_eq!(staged[0].name, "example.com/demo:v1");
        assert_eq!(staged[1].name, "example.com/demo/in-toto-links/a.link");
    }

    #[test]
    fn clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let list = ChangeList::open(dir.path()).unwrap();
        list.add(&change("example.com/demo:v1")).unwrap();
        assert!(!list.is_empty().unwrap());
        list.clear().unwrap();
        assert!(list.is_empty().unwrap());
    }

    #[test]
    fn guard_clears_on_scope_exit() {
        let dir = TempDir::new().unwrap();
        let list = ChangeList::open(dir.path()).unwrap();
        {
            let _guard = list.clear_on_drop();
            list.add(&change("example.com/demo:v1")).unwrap();
        }
        assert!(list.is_empty().unwrap());
    }
}
