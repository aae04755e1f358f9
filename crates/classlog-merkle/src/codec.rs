//! Canonical JSON and hashing primitives.
//!
//! Every hash in this crate is computed over the output of `canonical_json`,
//! never over `serde_json`'s default (insertion-order) serialization, so that
//! two processes holding the same logical event always produce the same hash.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::MerkleError;
use crate::SessionDescriptor;

/// Serialize a JSON value with object keys sorted at every nesting level.
///
/// Arrays keep their original order; only object keys are reordered.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&sort_keys(value)).expect("sorted value always serializes")
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.iter().map(|(k, v)| (k.clone(), sort_keys(v))).collect();
            serde_json::to_value(sorted).expect("btreemap of values always serializes")
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Hash a sequence of strings by joining them with a tab and taking the hex
/// SHA-256 digest. Rejects any part containing a tab, since that would make
/// the join ambiguous.
pub fn merkle_hash(parts: &[&str]) -> Result<String, MerkleError> {
    for part in parts {
        if part.contains('\t') {
            return Err(MerkleError::InvalidInput(
                "hash input must not contain a tab character".to_owned(),
            ));
        }
    }
    let joined = parts.join("\t");
    let digest = Sha256::digest(joined.as_bytes());
    Ok(hex::encode(digest))
}

/// Current UTC time, ISO-8601-like, matching `datetime.utcnow().isoformat()`:
/// no trailing `Z`, microsecond precision.
pub fn timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Canonical session key for a session descriptor.
pub fn session_key(session: &SessionDescriptor) -> String {
    let value = serde_json::to_value(session).expect("session descriptor always serializes");
    canonical_json(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_nested_object_keys() {
        let value = json!({"b": 1, "a": {"z": 1, "y": 2}});
        assert_eq!(canonical_json(&value), r#"{"a":{"y":2,"z":1},"b":1}"#);
    }

    #[test]
    fn canonical_json_preserves_array_order() {
        let value = json!({"a": [3, 1, 2]});
        assert_eq!(canonical_json(&value), r#"{"a":[3,1,2]}"#);
    }

    #[test]
    fn merkle_hash_rejects_tab_containing_input() {
        let err = merkle_hash(&["a\tb", "c"]).unwrap_err();
        assert!(matches!(err, MerkleError::InvalidInput(_)));
    }

    #[test]
    fn merkle_hash_is_order_sensitive() {
        let h1 = merkle_hash(&["a", "b"]).unwrap();
        let h2 = merkle_hash(&["b", "a"]).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn merkle_hash_is_deterministic() {
        let h1 = merkle_hash(&["x", "y", "z"]).unwrap();
        let h2 = merkle_hash(&["x", "y", "z"]).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn session_key_is_stable_regardless_of_insertion_order() {
        let mut s1: SessionDescriptor = SessionDescriptor::new();
        s1.insert("tool".to_owned(), vec!["docs".to_owned()]);
        s1.insert("student".to_owned(), vec!["u1".to_owned()]);

        let mut s2: SessionDescriptor = SessionDescriptor::new();
        s2.insert("student".to_owned(), vec!["u1".to_owned()]);
        s2.insert("tool".to_owned(), vec!["docs".to_owned()]);

        assert_eq!(session_key(&s1), session_key(&s2));
    }
}
