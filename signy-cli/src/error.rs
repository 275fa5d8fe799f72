// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

use snafu::{Backtrace, Snafu};
use std::path::PathBuf;

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum Error {
    #[snafu(display("Failed to read '{}': {}", path.display(), source))]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("In-toto metadata invalid: {}", source))]
    #[snafu(context(false))]
    Intoto {
        source: signy::intoto::Error,
    },

    #[snafu(display("Failed to initialize the logger: {}", source))]
    Logger {
        source: log::SetLoggerError,
        backtrace: Backtrace,
    },

    #[snafu(display("--{} is required when --in-toto is passed", flag))]
    MissingInTotoFlag { flag: &'static str },

    #[snafu(display("no local file provided for thick bundle verification"))]
    MissingLocal,

    #[snafu(display(
        "no local artifact to verify; pass --local (pulling from a registry is delegated to \
         the external blob store)"
    ))]
    MissingArtifact,

    #[snafu(display("Timeout '{}' is not a valid duration: {}", input, source))]
    TimeoutInvalid {
        input: String,
        source: humantime::DurationError,
    },

    #[snafu(context(false))]
    #[snafu(display("{}", source))]
    Trust {
        source: signy::error::Error,
    },
}
