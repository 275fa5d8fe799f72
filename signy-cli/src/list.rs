// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::error::Result;
use clap::Parser;
use signy::{TransportSettings, TrustCollection};
use std::path::Path;

#[derive(Debug, Parser)]
pub(crate) struct ListArgs {
    /// The Globally Unique Name of the trusted collection
    gun: String,
}

impl ListArgs {
    pub(crate) fn run(&self, settings: &TransportSettings, trust_dir: &Path) -> Result<()> {
        let collection = TrustCollection::open(settings, trust_dir, &self.gun)?;
        for target in collection.list_targets()? {
            println!("{}\t{}", target.name, target.target.sha256_hex());
        }
        Ok(())
    }
}
