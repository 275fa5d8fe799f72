// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The pull-side verification driver: fetch the trusted target, compare the
//! artifact digest, check the in-toto metadata published under the
//! delegation, and run the in-toto engine over a re-materialized workspace.
//!
//! Artifact-digest verification always precedes any engine invocation, so
//! an untrusted payload is never executed by inspection rules.

use crate::error::{self, Result};
use crate::intoto::Metadata;
use crate::reference::Reference;
use crate::sandbox;
use crate::schema::RoleName;
use crate::{TargetWithRole, TrustCollection};
use aws_lc_rs::digest::{digest, SHA256};
use log::{info, warn};
use snafu::{ensure, OptionExt, ResultExt};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// How the in-toto verification engine is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationMode {
    /// Run the engine directly on the host, in the workspace directory.
    OnHost,
    /// Run the engine inside a container started from this image.
    InContainer {
        /// The verification container image.
        image: String,
    },
}

/// Fetches the trusted target for a reference and extracts its SHA-256
/// digest in hex form.
pub fn fetch_target(
    collection: &TrustCollection,
    reference: &Reference,
) -> Result<(TargetWithRole, String)> {
    let target = collection.get_target_by_name(&reference.target_name())?;
    let trusted_sha = target.target.sha256_hex();
    ensure!(
        !trusted_sha.is_empty(),
        error::TrustedShaMissingSnafu {
            name: target.name.clone(),
        }
    );
    info!(
        "Pulled trust data for {}, with role {} - SHA256: {}",
        reference, target.role, trusted_sha,
    );
    Ok((target, trusted_sha))
}

/// Hashes the artifact bytes and compares them hex-for-hex against the
/// digest the trust server signed.
pub fn check_artifact_digest(artifact: &[u8], trusted_sha: &str) -> Result<()> {
    let computed = hex::encode(digest(&SHA256, artifact).as_ref());
    info!("Computed SHA: {}", computed);
    ensure!(
        computed == trusted_sha,
        error::DigestMismatchSnafu {
            trusted: trusted_sha,
            computed,
        }
    );
    Ok(())
}

/// Ensures the trust metadata for a reference matches the artifact bytes:
/// the trusted collection is consulted, the artifact is hashed, and the two
/// digests must be equal.
pub fn verify_trust(
    collection: &TrustCollection,
    reference: &Reference,
    artifact: &[u8],
) -> Result<(TargetWithRole, String)> {
    let (target, trusted_sha) = fetch_target(collection, reference)?;
    check_artifact_digest(artifact, &trusted_sha)?;
    info!("The SHA sums are equal: {}", trusted_sha);
    Ok((target, trusted_sha))
}

/// Integrity check over the published in-toto metadata, run before the
/// engine sees any of it:
///
/// * every target under `targets/releases` must match one of the
///   delegation's path patterns, and
/// * every link embedded in an artifact target's custom blob must re-hash
///   to the published link target's `hashes` and `length`.
///
/// This catches a compromised delegation key that published a target
/// outside the path pattern or with mismatched internal data.
pub fn verify_intoto_metadata(collection: &TrustCollection) -> Result<()> {
    let trusted = collection.load()?;
    let releases = match &trusted.releases {
        Some(releases) => releases,
        None => return Ok(()),
    };
    let delegation = trusted
        .targets
        .signed
        .delegated_role(&RoleName::Releases.to_string())
        .context(error::DelegationMissingSnafu {
            role: RoleName::Releases.to_string(),
        })?;

    for name in releases.signed.targets.keys() {
        ensure!(
            delegation.matches_path(name),
            error::DelegationPathViolationSnafu { name }
        );
    }

    let link_prefix = format!("{}/in-toto-links/", collection.gun());
    for (name, target) in &releases.signed.targets {
        let custom = match &target.custom {
            Some(custom) => custom,
            None => continue,
        };
        let metadata = Metadata::from_custom(custom).context(error::IntotoInvalidSnafu)?;
        for (link_name, link_bytes) in &metadata.links {
            let published = format!("{}{}", link_prefix, link_name);
            let link_target = match releases.signed.targets.get(&published) {
                Some(link_target) => link_target,
                None => {
                    warn!("link {} from {} has no published target", link_name, name);
                    continue;
                }
            };
            let matches = link_target.length == link_bytes.as_ref().len() as u64
                && link_target.hashes.sha256.as_ref()
                    == digest(&SHA256, link_bytes.as_ref()).as_ref();
            ensure!(
                matches,
                error::LinkPayloadMismatchSnafu {
                    name: published.clone(),
                }
            );
        }
    }

    Ok(())
}

/// A freshly created temporary directory into which verification metadata
/// is materialized. Deleted on all exit paths unless `keep` is set.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    keep: bool,
}

impl Workspace {
    /// Creates a new workspace directory.
    pub fn create(keep: bool) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("intoto-verification")
            .tempdir()
            .context(error::WorkspaceCreateSnafu)?;
        Ok(Self {
            dir: Some(dir),
            keep,
        })
    }

    /// The workspace directory path.
    pub fn path(&self) -> &Path {
        self.dir.as_ref().expect("workspace lives until drop").path()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if self.keep {
                let path = dir.into_path();
                info!("Keeping verification workspace {}", path.display());
            }
            // Dropping the TempDir otherwise removes the directory tree.
        }
    }
}

/// Options for [`verify_artifact`].
#[derive(Debug)]
pub struct VerifyOptions {
    /// How to execute the in-toto engine.
    pub mode: VerificationMode,
    /// Retain the workspace directory after verification.
    pub keep: bool,
    /// Additional files staged into the workspace for the engine.
    pub extra_targets: Vec<PathBuf>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            mode: VerificationMode::InContainer {
                image: sandbox::VERIFICATION_IMAGE.to_owned(),
            },
            keep: false,
            extra_targets: Vec::new(),
        }
    }
}

/// Runs the full in-toto verification for an already digest-checked
/// target: re-materializes the custom blob into a scoped workspace, writes
/// `bundle.json` with the artifact bytes, stages any extra target files,
/// and invokes the engine on the host or in a container.
pub fn verify_artifact(
    target: &TargetWithRole,
    artifact: &[u8],
    options: &VerifyOptions,
) -> Result<()> {
    let custom = target
        .target
        .custom
        .as_ref()
        .context(error::CustomMissingSnafu {
            name: target.name.clone(),
        })?;
    let metadata = Metadata::from_custom(custom).context(error::IntotoInvalidSnafu)?;

    let workspace = Workspace::create(options.keep)?;
    info!(
        "Writing In-Toto metadata files into {}",
        workspace.path().display(),
    );
    metadata
        .write_files(workspace.path())
        .context(error::IntotoInvalidSnafu)?;

    let bundle = workspace.path().join("bundle.json");
    fs::write(&bundle, artifact).context(error::FileWriteSnafu { path: &bundle })?;

    for extra in &options.extra_targets {
        let name = match extra.file_name() {
            Some(name) => name,
            None => continue,
        };
        let dest = workspace.path().join(name);
        fs::copy(extra, &dest).context(error::FileWriteSnafu { path: &dest })?;
    }

    match &options.mode {
        VerificationMode::OnHost => run_engine_on_host(workspace.path())?,
        VerificationMode::InContainer { image } => sandbox::run(image, workspace.path())?,
    }

    info!("The software product passed all verification.");
    Ok(())
}

/// Runs the in-toto engine binary directly in the workspace directory.
fn run_engine_on_host(workspace: &Path) -> Result<()> {
    let status = std::process::Command::new("in-toto-verify")
        .arg("--layout")
        .arg(crate::intoto::LAYOUT_DEFAULT_NAME)
        .arg("--layout-keys")
        .arg(crate::intoto::KEY_DEFAULT_NAME)
        .arg("--link-dir")
        .arg(".")
        .current_dir(workspace)
        .status()
        .context(error::EngineExecSnafu)?;
    ensure!(status.success(), error::EngineFailureSnafu { status });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_comparison_reports_both_values() {
        let err = check_artifact_digest(b"goodbye\n", &hex::encode([0x11; 32])).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("is not equal to the computed digest"));
        assert!(message.contains(&hex::encode([0x11; 32])));
    }

    #[test]
    fn digest_comparison_accepts_matching_bytes() {
        let trusted = hex::encode(
            aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, b"hello\n").as_ref(),
        );
        check_artifact_digest(b"hello\n", &trusted).unwrap();
    }

    #[test]
    fn workspace_is_removed_unless_kept() {
        let removed = {
            let workspace = Workspace::create(false).unwrap();
            workspace.path().to_owned()
        };
        assert!(!removed.exists());

        let kept = {
            let workspace = Workspace::create(true).unwrap();
            workspace.path().to_owned()
        };
        assert!(kept.exists());
        std::fs::remove_dir_all(kept).unwrap();
    }
}
