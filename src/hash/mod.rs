//! Content hashing for change detection
//!
//! [`content`] hashes collections with explicit ordering semantics;
//! [`desired_state`] composes those hashes into the annotation that records
//! what an object was built from.

pub mod content;
pub mod desired_state;

pub use content::{hash_of_json, hash_of_map, hash_of_sequence, hash_of_set};
pub use desired_state::{DesiredStateHash, DESIRED_STATE_HASH_ANNOTATION};
