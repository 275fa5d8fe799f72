// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::{self, Result};
use clap::Parser;
use log::{debug, info};
use signy::intoto::{validate_layout, Metablock, Metadata};
use signy::schema::{RoleName, Target};
use signy::{Reference, StagedTarget, TransportSettings, TrustCollection};
use snafu::{ensure, ResultExt};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
pub(crate) struct SignArgs {
    /// The artifact file to sign
    file: PathBuf,

    /// The artifact reference, e.g. localhost:5000/demo:v1
    reference: String,

    /// Path to the root key used when initializing a new trusted collection
    #[arg(long = "root-key")]
    root_key: Option<PathBuf>,

    /// Sign a thick bundle: only the signature is published, the artifact
    /// bytes are not handed to the registry
    #[arg(long)]
    thick: bool,

    /// Attach in-toto metadata to the signed target
    #[arg(long = "in-toto")]
    in_toto: bool,

    /// Path to the in-toto root layout
    #[arg(long)]
    layout: Option<PathBuf>,

    /// Directory containing the in-toto link metadata
    #[arg(long)]
    links: Option<PathBuf>,

    /// Path to the public key used to verify the root layout
    #[arg(long = "layout-key")]
    layout_key: Option<PathBuf>,
}

impl SignArgs {
    pub(crate) fn run(&self, settings: &TransportSettings, trust_dir: &Path) -> Result<()> {
        let reference = Reference::parse(&self.reference)?;
        let artifact = fs::read(&self.file).context(error::FileReadSnafu { path: &self.file })?;

        let metadata = if self.in_toto {
            Some(self.intoto_metadata()?)
        } else {
            None
        };

        if !self.thick {
            debug!("artifact push to the registry is handled by the external blob store");
        }

        let mut staged = Vec::new();
        let custom = metadata
            .as_ref()
            .map(Metadata::to_custom)
            .transpose()?;
        let bundle = Target::from_bytes(&artifact, custom);
        let sha256 = bundle.sha256_hex();
        staged.push(StagedTarget {
            role: RoleName::Releases,
            name: reference.target_name(),
            target: bundle,
        });

        if let Some(metadata) = &metadata {
            for (name, content) in &metadata.links {
                staged.push(StagedTarget {
                    role: RoleName::Releases,
                    name: format!("{}/in-toto-links/{}", reference.gun(), name),
                    target: Target::from_bytes(content.as_ref(), None),
                });
            }
        }

        let collection = TrustCollection::open(settings, trust_dir, reference.gun())?;
        collection.sign_and_publish(self.root_key.as_deref(), &staged)?;

        println!("Pushed trust data for {}: {}", reference, sha256);
        Ok(())
    }

    /// Validates the layout and packs it, its public key, and the links
    /// into the canonical blob carried in the target's custom field.
    fn intoto_metadata(&self) -> Result<Metadata> {
        let layout = self.required_flag(&self.layout, "layout")?;
        let links = self.required_flag(&self.links, "links")?;
        let layout_key = self.required_flag(&self.layout_key, "layout-key")?;

        info!("Adding in-toto layout and links metadata to TUF");
        let metablock = Metablock::load(layout)?;
        validate_layout(&metablock.signed)?;

        Ok(Metadata::from_paths(layout, links, layout_key)?)
    }

    fn required_flag<'a>(
        &self,
        value: &'a Option<PathBuf>,
        flag: &'static str,
    ) -> Result<&'a Path> {
        ensure!(value.is_some(), error::MissingInTotoFlagSnafu { flag });
        Ok(value.as_deref().expect("checked above"))
    }
}
