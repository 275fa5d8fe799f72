// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The in-toto artifact rule grammar.
//!
//! ```text
//! MATCH <pattern> [IN <source-path-prefix>] WITH (MATERIALS|PRODUCTS)
//!     [IN <destination-path-prefix>] FROM <step>
//! CREATE|DELETE|MODIFY|ALLOW|DISALLOW|REQUIRE <pattern>
//! ```
//!
//! Rules are validated before a layout is trusted; the engine interprets
//! them at verification time.

use crate::intoto::{Error, Result};

/// Which artifact set of the source step a `MATCH` rule compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The source step's materials.
    Materials,
    /// The source step's products.
    Products,
}

/// A parsed artifact rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactRule {
    /// The artifact must have been created by this step.
    Create(String),
    /// The artifact must have been deleted by this step.
    Delete(String),
    /// The artifact must have been modified by this step.
    Modify(String),
    /// The artifact is allowed to appear.
    Allow(String),
    /// The artifact must not appear.
    Disallow(String),
    /// The artifact must appear.
    Require(String),
    /// The artifact must match an artifact recorded by another step.
    Match {
        /// Glob pattern selecting artifacts of this step.
        pattern: String,
        /// Optional path prefix applied to this step's artifacts.
        source_prefix: Option<String>,
        /// Which artifact set of the source step is compared.
        with: MatchKind,
        /// Optional path prefix applied to the source step's artifacts.
        destination_prefix: Option<String>,
        /// The step whose artifacts are compared against.
        step: String,
    },
}

fn invalid(rule: &[String], reason: &str) -> Error {
    Error::RuleInvalid {
        rule: rule.join(" "),
        reason: reason.to_owned(),
    }
}

impl ArtifactRule {
    /// Parses (unpacks) a rule from its list form, enforcing the grammar
    /// above. Keywords are case-insensitive.
    pub fn parse(rule: &[String]) -> Result<Self> {
        let keyword = rule
            .first()
            .ok_or_else(|| invalid(rule, "empty rule"))?
            .to_uppercase();

        match keyword.as_str() {
            "CREATE" | "DELETE" | "MODIFY" | "ALLOW" | "DISALLOW" | "REQUIRE" => {
                if rule.len() != 2 {
                    return Err(invalid(
                        rule,
                        "generic rules must have the form: KEYWORD <pattern>",
                    ));
                }
                let pattern = rule[1].clone();
                Ok(match keyword.as_str() {
                    "CREATE" => ArtifactRule::Create(pattern),
                    "DELETE" => ArtifactRule::Delete(pattern),
                    "MODIFY" => ArtifactRule::Modify(pattern),
                    "ALLOW" => ArtifactRule::Allow(pattern),
                    "DISALLOW" => ArtifactRule::Disallow(pattern),
                    _ => ArtifactRule::Require(pattern),
                })
            }
            "MATCH" => Self::parse_match(rule),
            _ => Err(invalid(rule, "unknown rule keyword")),
        }
    }

    fn parse_match(rule: &[String]) -> Result<Self> {
        // MATCH <pattern> [IN <source>] WITH (MATERIALS|PRODUCTS)
        //     [IN <destination>] FROM <step>
        if !matches!(rule.len(), 6 | 8 | 10) {
            return Err(invalid(rule, "MATCH rules must have 6, 8 or 10 tokens"));
        }

        let pattern = rule[1].clone();
        let mut index = 2;

        let source_prefix = if rule[index].to_uppercase() == "IN" {
            let prefix = rule
                .get(index + 1)
                .ok_or_else(|| invalid(rule, "IN requires a path prefix"))?
                .clone();
            index += 2;
            Some(prefix)
        } else {
            None
        };

        if rule.get(index).map(|token| token.to_uppercase()) != Some("WITH".to_owned()) {
            return Err(invalid(rule, "expected WITH"));
        }
        let with = match rule
            .get(index + 1)
            .map(|token| token.to_uppercase())
            .as_deref()
        {
            Some("MATERIALS") => MatchKind::Materials,
            Some("PRODUCTS") => MatchKind::Products,
            _ => return Err(invalid(rule, "WITH requires MATERIALS or PRODUCTS")),
        };
        index += 2;

        let destination_prefix = if rule.get(index).map(|token| token.to_uppercase())
            == Some("IN".to_owned())
        {
            let prefix = rule
                .get(index + 1)
                .ok_or_else(|| invalid(rule, "IN requires a path prefix"))?
                .clone();
            index += 2;
            Some(prefix)
        } else {
            None
        };

        if rule.get(index).map(|token| token.to_uppercase()) != Some("FROM".to_owned()) {
            return Err(invalid(rule, "expected FROM"));
        }
        let step = rule
            .get(index + 1)
            .ok_or_else(|| invalid(rule, "FROM requires a step name"))?
            .clone();
        if index + 2 != rule.len() {
            return Err(invalid(rule, "trailing tokens after FROM <step>"));
        }

        Ok(ArtifactRule::Match {
            pattern,
            source_prefix,
            with,
            destination_prefix,
            step,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ArtifactRule, MatchKind};

    fn rule(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|token| (*token).to_owned()).collect()
    }

    #[test]
    fn generic_rules_parse() {
        assert_eq!(
            ArtifactRule::parse(&rule(&["CREATE", "foo.tar.gz"])).unwrap(),
            ArtifactRule::Create("foo.tar.gz".to_owned()),
        );
        assert_eq!(
            ArtifactRule::parse(&rule(&["allow", "*"])).unwrap(),
            ArtifactRule::Allow("*".to_owned()),
        );
        assert_eq!(
            ArtifactRule::parse(&rule(&["DISALLOW", "*"])).unwrap(),
            ArtifactRule::Disallow("*".to_owned()),
        );
    }

    #[test]
    fn match_rule_full_form() {
        let parsed = ArtifactRule::parse(&rule(&[
            "MATCH",
            "demo-project/*",
            "IN",
            "src",
            "WITH",
            "PRODUCTS",
            "IN",
            "dist",
            "FROM",
            "clone",
        ]))
        .unwrap();
        assert_eq!(
            parsed,
            ArtifactRule::Match {
                pattern: "demo-project/*".to_owned(),
                source_prefix: Some("src".to_owned()),
                with: MatchKind::Products,
                destination_prefix: Some("dist".to_owned()),
                step: "clone".to_owned(),
            },
        );
    }

    #[test]
    fn match_rule_short_form() {
        let parsed =
            ArtifactRule::parse(&rule(&["MATCH", "foo.py", "WITH", "MATERIALS", "FROM", "build"]))
                .unwrap();
        assert_eq!(
            parsed,
            ArtifactRule::Match {
                pattern: "foo.py".to_owned(),
                source_prefix: None,
                with: MatchKind::Materials,
                destination_prefix: None,
                step: "build".to_owned(),
            },
        );
    }

    #[test]
    fn malformed_rules_rejected() {
        assert!(ArtifactRule::parse(&rule(&[])).is_err());
        assert!(ArtifactRule::parse(&rule(&["CREATE"])).is_err());
        assert!(ArtifactRule::parse(&rule(&["CREATE", "a", "b"])).is_err());
        assert!(ArtifactRule::parse(&rule(&["FROB", "x"])).is_err());
        assert!(ArtifactRule::parse(&rule(&["MATCH", "x", "WITH", "NEITHER", "FROM", "s"]))
            .is_err());
        assert!(ArtifactRule::parse(&rule(&[
            "MATCH", "x", "WITH", "PRODUCTS", "FROM", "s", "extra",
        ]))
        .is_err());
    }
}
