// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::{self, Result};
use clap::Parser;
use log::warn;
use signy::verify::{self, VerificationMode, VerifyOptions};
use signy::{Reference, TransportSettings, TrustCollection};
use snafu::{ensure, ResultExt};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
pub(crate) struct VerifyArgs {
    /// The artifact reference, e.g. localhost:5000/demo:v1
    reference: String,

    /// Verify a thick bundle; only the signature is pulled from the trust
    /// server and verified against a local bundle
    #[arg(long)]
    thick: bool,

    /// Local file to validate the SHA256 against (mandatory for thick
    /// bundles)
    #[arg(long)]
    local: Option<PathBuf>,

    /// Also fetch in-toto metadata from the trusted collection and run the
    /// verification engine
    #[arg(long = "in-toto")]
    in_toto: bool,

    /// Run in-toto inspections on the OS instead of in a container
    #[arg(long = "verify-on-os")]
    verify_on_os: bool,

    /// Container image to run the in-toto verification
    #[arg(long, default_value = signy::VERIFICATION_IMAGE)]
    image: String,

    /// Keep the temporary verification workspace
    #[arg(long)]
    keep: bool,

    /// Additional target files to stage into the verification workspace
    #[arg(long = "target")]
    targets: Vec<PathBuf>,
}

impl VerifyArgs {
    pub(crate) fn run(&self, settings: &TransportSettings, trust_dir: &Path) -> Result<()> {
        ensure!(!self.thick || self.local.is_some(), error::MissingLocalSnafu);
        // Pulling the artifact itself is the external blob store's job, so
        // the bytes to verify always come from a local path.
        let local = self.local.as_ref().ok_or(error::Error::MissingArtifact)?;
        let artifact = fs::read(local).context(error::FileReadSnafu { path: local })?;

        let reference = Reference::parse(&self.reference)?;
        let collection = TrustCollection::open(settings, trust_dir, reference.gun())?;

        let (target, _trusted_sha) = verify::verify_trust(&collection, &reference, &artifact)?;

        if self.in_toto {
            verify::verify_intoto_metadata(&collection)?;

            let mode = if self.verify_on_os {
                warn!("Running in-toto inspections on the OS instead of in container...");
                VerificationMode::OnHost
            } else {
                VerificationMode::InContainer {
                    image: self.image.clone(),
                }
            };
            verify::verify_artifact(
                &target,
                &artifact,
                &VerifyOptions {
                    mode,
                    keep: self.keep,
                    extra_targets: self.targets.clone(),
                },
            )?;
        }

        Ok(())
    }
}
