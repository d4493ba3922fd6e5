//! Stable digests over strings, string collections and serializable values
//!
//! Every element is followed by a NUL byte before hashing, so element
//! boundaries are part of the digest: `["ab", "c"]` and `["a", "bc"]` differ.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Hash of an unordered collection. Permutations and duplicates hash equally.
pub fn hash_of_set<S: AsRef<str>>(values: &[S]) -> String {
    let mut sorted: Vec<&str> = values.iter().map(AsRef::as_ref).collect();
    sorted.sort_unstable();
    sorted.dedup();
    digest(sorted)
}

/// Hash of an ordered collection. Reordering changes the result.
pub fn hash_of_sequence<S: AsRef<str>>(values: &[S]) -> String {
    digest(values.iter().map(AsRef::as_ref))
}

/// Hash of a string map over its key-sorted `(key, value)` pairs.
pub fn hash_of_map(map: &BTreeMap<String, String>) -> String {
    digest(map.iter().flat_map(|(k, v)| [k.as_str(), v.as_str()]))
}

/// Hash of the JSON encoding of `value`.
///
/// Struct fields encode in declaration order and `BTreeMap`s in key order,
/// so the digest is stable for a given type. `Vec` fields stay positional.
pub fn hash_of_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let encoded = serde_json::to_string(value)?;
    Ok(digest([encoded.as_str()]))
}

fn digest<'a>(elements: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for element in elements {
        hasher.update(element.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
