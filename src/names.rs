//! Deterministic names for generated child objects
//!
//! A generated name is the human-readable parts joined with `-`, followed by
//! a short hash of the exact part sequence. Hashing the parts (not the joined
//! string) keeps `["a-b", "c"]` and `["a", "b-c"]` apart.
//!
//! Names produced by [`join`] are stable forever: objects already exist under
//! them. [`join_with_constraints`] returns the same bytes as [`join`] for any
//! input it does not need to rewrite.

use sha2::{Digest, Sha256};

const SEPARATOR: &str = "-";
const TRUNCATION_MARKER: &str = "---";
const HASH_LEN: usize = 8;

/// Character and length restrictions a generated name must satisfy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Constraints {
    pub max_length: usize,
    /// Allow `.` in addition to `[a-z0-9-]`
    pub allow_dots: bool,
    /// Require the first character to be a letter rather than any alphanumeric
    pub letter_start: bool,
}

/// RFC 1035 label: Services and anything else that must be a DNS label
pub const DNS_LABEL: Constraints = Constraints {
    max_length: 63,
    allow_dots: false,
    letter_start: true,
};

/// RFC 1123 subdomain: most other object names
pub const DNS_SUBDOMAIN: Constraints = Constraints {
    max_length: 253,
    allow_dots: true,
    letter_start: false,
};

/// Join parts into a name with a hash suffix over the part sequence.
pub fn join(parts: &[&str]) -> String {
    let hash = parts_hash(parts);
    if parts.is_empty() {
        return hash;
    }
    format!("{}{SEPARATOR}{hash}", parts.join(SEPARATOR))
}

/// Like [`join`], but rewrites the readable portion to satisfy `constraints`.
///
/// Disallowed characters become `-` and upper case is folded. With dots
/// allowed, `-` next to a `.` and empty dot-separated labels are dropped. An
/// invalid or missing first character gets an `x` prefix, and over-long names
/// are cut with a `---` marker before the hash. The hash always covers the
/// original parts, so inputs that collide after rewriting still get distinct
/// names.
pub fn join_with_constraints(constraints: &Constraints, parts: &[&str]) -> String {
    let hash = parts_hash(parts);
    if parts.is_empty() {
        return hash;
    }

    let mut readable: String = parts
        .join(SEPARATOR)
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else if c == '.' && constraints.allow_dots {
                c
            } else {
                '-'
            }
        })
        .collect();

    if readable.contains('.') {
        let labels: Vec<&str> = readable.split('.').collect();
        let last = labels.len() - 1;
        let cleaned: Vec<&str> = labels
            .into_iter()
            .enumerate()
            .map(|(i, label)| {
                let label = if i > 0 { label.trim_start_matches('-') } else { label };
                if i < last {
                    label.trim_end_matches('-')
                } else {
                    label
                }
            })
            .filter(|label| !label.is_empty())
            .collect();
        readable = cleaned.join(".");
    }

    let valid_start = match readable.chars().next() {
        Some(c) if constraints.letter_start => c.is_ascii_lowercase(),
        Some(c) => c.is_ascii_lowercase() || c.is_ascii_digit(),
        None => false,
    };
    if !valid_start {
        readable.insert(0, 'x');
    }

    let name = format!("{readable}{SEPARATOR}{hash}");
    if name.len() <= constraints.max_length {
        return name;
    }

    let keep = constraints
        .max_length
        .saturating_sub(hash.len() + TRUNCATION_MARKER.len());
    // `readable` is pure ASCII at this point, so byte slicing is safe.
    let prefix = readable[..keep.min(readable.len())].trim_end_matches(['-', '.']);
    format!("{prefix}{TRUNCATION_MARKER}{hash}")
}

fn parts_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hex::encode(hasher.finalize());
    digest[..HASH_LEN].to_string()
}
