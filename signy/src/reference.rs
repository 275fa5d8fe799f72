// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing of artifact references of the form `host[:port]/path[:tag]` into
//! a Globally Unique Name and a tag.

use crate::error::{self, Result};
use snafu::ensure;

/// The default registry host assumed for bare `user/name` references.
pub const DEFAULT_INDEX_HOST: &str = "docker.io";

const DEFAULT_TAG: &str = "latest";

/// A parsed artifact reference: the GUN identifying a trust collection, and
/// the tag naming one artifact within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    gun: String,
    tag: String,
}

impl Reference {
    /// Parses a reference string. A missing tag defaults to `latest`;
    /// digest references yield an empty tag.
    pub fn parse(reference: &str) -> Result<Self> {
        ensure!(
            !reference.is_empty(),
            error::ReferenceInvalidSnafu {
                reference,
                reason: "empty reference",
            }
        );
        ensure!(
            !reference.contains(char::is_whitespace),
            error::ReferenceInvalidSnafu {
                reference,
                reason: "whitespace in reference",
            }
        );

        // A digest reference pins content directly; there is no tag to sign.
        if let Some((name, _digest)) = reference.split_once('@') {
            return Ok(Self {
                gun: normalize(name, reference)?,
                tag: String::new(),
            });
        }

        // The tag separator is a colon after the last slash. A colon before
        // it belongs to the registry port.
        let (name, tag) = match reference.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, tag.to_owned()),
            _ => (reference, DEFAULT_TAG.to_owned()),
        };
        ensure!(
            !name.is_empty(),
            error::ReferenceInvalidSnafu {
                reference,
                reason: "missing repository name",
            }
        );

        Ok(Self {
            gun: normalize(name, reference)?,
            tag,
        })
    }

    /// The Globally Unique Name identifying the trust collection.
    pub fn gun(&self) -> &str {
        &self.gun
    }

    /// The tag within the collection; empty for digest references.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The target name this reference signs or verifies, which must fall
    /// under the `"{gun}:"` delegation path pattern.
    pub fn target_name(&self) -> String {
        format!("{}:{}", self.gun, self.tag)
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.tag.is_empty() {
            f.write_str(&self.gun)
        } else {
            write!(f, "{}:{}", self.gun, self.tag)
        }
    }
}

/// Fully qualifies a repository name: a first path segment that is not a
/// registry host means the canonical index host is prepended.
fn normalize(name: &str, reference: &str) -> Result<String> {
    let first = name.split('/').next().unwrap_or("");
    let is_host = first.contains('.') || first.contains(':') || first == "localhost";
    if is_host {
        ensure!(
            name.contains('/'),
            error::ReferenceInvalidSnafu {
                reference,
                reason: "missing repository path",
            }
        );
        Ok(name.to_owned())
    } else {
        Ok(format!("{}/{}", DEFAULT_INDEX_HOST, name))
    }
}

#[cfg(test)]
mod tests {
    use super::Reference;

    #[test]
    fn parse_reference() {
        let tests = [
            ("localhost:5000/local-test-simple:v1", "localhost:5000/local-test-simple", "v1"),
            (
                "localhost:5000/multi-path/some/bundle:v1",
                "localhost:5000/multi-path/some/bundle",
                "v1",
            ),
            ("dockerhubusername/bundle:v3", "docker.io/dockerhubusername/bundle", "v3"),
            (
                "mycnabregistry.azurecr.io/org/sub-org/bundle:latest",
                "mycnabregistry.azurecr.io/org/sub-org/bundle",
                "latest",
            ),
        ];
        for (input, gun, tag) in tests {
            let parsed = Reference::parse(input).unwrap();
            assert_eq!(parsed.gun(), gun, "gun for {}", input);
            assert_eq!(parsed.tag(), tag, "tag for {}", input);
        }
    }

    #[test]
    fn missing_tag_defaults_to_latest() {
        let parsed = Reference::parse("localhost:5000/demo").unwrap();
        assert_eq!(parsed.gun(), "localhost:5000/demo");
        assert_eq!(parsed.tag(), "latest");
        assert_eq!(parsed.target_name(), "localhost:5000/demo:latest");
    }

    #[test]
    fn digest_reference_has_empty_tag() {
        let parsed = Reference::parse(
            "localhost:5000/demo@sha256:5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03",
        )
        .unwrap();
        assert_eq!(parsed.gun(), "localhost:5000/demo");
        assert_eq!(parsed.tag(), "");
    }

    #[test]
    fn invalid_references_rejected() {
        assert!(Reference::parse("").is_err());
        assert!(Reference::parse("spaces in/name:v1").is_err());
        assert!(Reference::parse("localhost:5000").is_err());
    }
}
