// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic byte serialization for everything that is hashed or signed.
//!
//! Canonical JSON (sorted keys, no insignificant whitespace, fixed number
//! encoding, UTF-8) is the one representation shared by the trust collection
//! and the in-toto custom blob: both sides must agree on the exact bytes or
//! the hashes in the collection are meaningless.

use olpc_cjson::CanonicalFormatter;
use serde::Serialize;

/// Serializes `value` into its canonical JSON byte form.
///
/// Fails only for values that cannot be represented as JSON, such as
/// non-finite floating point numbers or maps with non-string keys. Callers
/// wrap the error with their own context.
pub fn to_canonical_json<T>(value: &T) -> Result<Vec<u8>, serde_json::Error>
where
    T: Serialize + ?Sized,
{
    let mut data = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
    value.serialize(&mut ser)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::to_canonical_json;
    use serde_json::json;

    #[test]
    fn sorted_keys_no_whitespace() {
        let value = json!({"zebra": 1, "alpha": {"b": [2, 3], "a": "x"}});
        let bytes = to_canonical_json(&value).unwrap();
        assert_eq!(bytes, br#"{"alpha":{"a":"x","b":[2,3]},"zebra":1}"#);
    }

    #[test]
    fn deterministic_and_idempotent() {
        let value = json!({"key": "value", "links": {"b.link": "x", "a.link": "y"}});
        let first = to_canonical_json(&value).unwrap();
        let second = to_canonical_json(&value).unwrap();
        assert_eq!(first, second);

        // Canonicalizing the parse of canonical bytes is the identity.
        let reparsed: serde_json::Value = serde_json::from_slice(&first).unwrap();
        assert_eq!(to_canonical_json(&reparsed).unwrap(), first);
    }

    #[test]
    fn escapes_survive_reparsing() {
        let value = json!({"name": "demo/\"quoted\"", "n": 0});
        let bytes = to_canonical_json(&value).unwrap();
        let reparsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reparsed, value);
    }
}
