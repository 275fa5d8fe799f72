// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    // Identifiers like Command::Sign are clearer than Self::Sign regardless of context
    clippy::use_self,
    clippy::result_large_err,
)]

mod error;
mod list;
mod sign;
mod verify;

use crate::error::Result;
use clap::Parser;
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use snafu::{ErrorCompat, ResultExt};
use std::path::PathBuf;

/// This wrapper enables global options and initializes the logger before
/// running any subcommands.
#[derive(Parser)]
#[command(
    name = "signy",
    version,
    about = "Sign and verify cloud-native artifacts with TUF and in-toto metadata"
)]
struct Program {
    /// The trust server used
    #[arg(long, global = true, default_value = signy::DOCKER_NOTARY_SERVER)]
    server: String,

    /// Trust certs signed only by this CA
    #[arg(long, global = true)]
    tlscacert: Option<PathBuf>,

    /// Directory where the trust data is persisted to
    #[arg(short = 'd', long = "dir", global = true, default_value_os_t = signy::default_trust_dir())]
    dir: PathBuf,

    /// Set the logging level [trace|debug|info|warn|error]
    #[arg(long = "log", global = true, default_value = "info")]
    log_level: LevelFilter,

    /// Timeout for the trust server
    #[arg(short = 't', long, global = true, default_value = "5s")]
    timeout: String,

    #[command(subcommand)]
    cmd: Command,
}

impl Program {
    fn run(self) -> Result<()> {
        TermLogger::init(
            self.log_level,
            ConfigBuilder::new()
                .add_filter_allow_str("signy")
                .build(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )
        .context(error::LoggerSnafu)?;

        let timeout = humantime::parse_duration(&self.timeout).context(error::TimeoutInvalidSnafu {
            input: self.timeout.clone(),
        })?;
        let settings = signy::TransportSettings {
            server: self.server.clone(),
            tlscacert: self.tlscacert.clone(),
            timeout,
        };

        match self.cmd {
            Command::Sign(args) => args.run(&settings, &self.dir),
            Command::Verify(args) => args.run(&settings, &self.dir),
            Command::List(args) => args.run(&settings, &self.dir),
        }
    }
}

#[derive(Parser)]
enum Command {
    /// Sign an artifact and publish its trust data
    Sign(sign::SignArgs),
    /// Verify the trust data for an artifact
    Verify(verify::VerifyArgs),
    /// List all targets for a remote trusted collection
    List(list::ListArgs),
}

fn main() -> ! {
    std::process::exit(match Program::parse().run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{err}");
            if let Some(var) = std::env::var_os("RUST_BACKTRACE") {
                if var != "0" {
                    if let Some(backtrace) = ErrorCompat::backtrace(&err) {
                        eprintln!("\n{backtrace:?}");
                    }
                }
            }
            1
        }
    })
}
