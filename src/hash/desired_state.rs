//! Desired-state hash annotation
//!
//! Merge-style updates add and overwrite fields but never remove entries the
//! merge does not know about. When an item disappears from a desired list the
//! live object keeps it. Recording a hash of the intended state lets the
//! engine notice the shrink and roll the object.
//!
//! Contributions that are empty are skipped. A newly tracked field therefore
//! leaves every existing hash untouched until someone actually sets it.

use std::collections::BTreeMap;

use kube::{Resource, ResourceExt};
use serde::Serialize;

use super::content::{hash_of_json, hash_of_map, hash_of_sequence, hash_of_set};
use crate::error::Result;

/// Annotation holding the composed desired-state digest
pub const DESIRED_STATE_HASH_ANNOTATION: &str = "dbcluster.io/desired-state-hash";

#[derive(Clone, Debug, Default)]
pub struct DesiredStateHash {
    items: BTreeMap<String, String>,
}

impl DesiredStateHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_string(self, name: &str, value: &str) -> Self {
        if value.is_empty() {
            return self;
        }
        self.insert(name, hash_of_sequence(&[value]))
    }

    /// Order-insensitive contribution, for things like a set of secret keys
    pub fn add_string_set<S: AsRef<str>>(self, name: &str, values: &[S]) -> Self {
        if values.is_empty() {
            return self;
        }
        self.insert(name, hash_of_set(values))
    }

    /// Order-sensitive contribution, for lists whose order means something
    pub fn add_string_list<S: AsRef<str>>(self, name: &str, values: &[S]) -> Self {
        if values.is_empty() {
            return self;
        }
        self.insert(name, hash_of_sequence(values))
    }

    pub fn add_string_map(self, name: &str, map: &BTreeMap<String, String>) -> Self {
        if map.is_empty() {
            return self;
        }
        self.insert(name, hash_of_map(map))
    }

    /// Contribution from any serializable value. Zero values count as empty:
    /// `null`, `false`, `0`, `""`, `{}` and `[]`.
    pub fn add_json<T: Serialize + ?Sized>(self, name: &str, value: &T) -> Result<Self> {
        let encoded = serde_json::to_value(value)?;
        let empty = match &encoded {
            serde_json::Value::Null => true,
            serde_json::Value::Bool(flag) => !flag,
            serde_json::Value::Number(n) => n.as_f64() == Some(0.0),
            serde_json::Value::String(text) => text.is_empty(),
            serde_json::Value::Array(items) => items.is_empty(),
            serde_json::Value::Object(fields) => fields.is_empty(),
        };
        if empty {
            return Ok(self);
        }
        Ok(self.insert(name, hash_of_json(&encoded)?))
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The composed digest stored in the annotation
    pub fn build(&self) -> String {
        hash_of_map(&self.items)
    }

    /// Write the composed digest onto `obj`
    pub fn annotate<K: Resource>(&self, obj: &mut K) {
        obj.annotations_mut()
            .insert(DESIRED_STATE_HASH_ANNOTATION.to_string(), self.build());
    }

    fn insert(mut self, name: &str, hash: String) -> Self {
        self.items.insert(name.to_string(), hash);
        self
    }
}

/// The desired-state digest currently recorded on `obj`, if any
pub fn annotation<K: Resource>(obj: &K) -> Option<&str> {
    obj.annotations()
        .get(DESIRED_STATE_HASH_ANNOTATION)
        .map(String::as_str)
}
