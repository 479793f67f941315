//! Canonical payload model and content hashing.
//!
//! Remote records carry heterogeneous field values (strings, integers,
//! dates, string lists). They map onto the tagged [`Value`] variant, and a
//! record payload is a [`Payload`]: a `BTreeMap` from field name to value,
//! so field order is stable by construction.
//!
//! The content hash is computed over the *canonical* form of a payload:
//! NFC-normalized text with uniform newlines and no trailing whitespace,
//! sorted and deduplicated string lists. Two payloads are equal exactly
//! when their hashes are equal.

use crate::{FieldName, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use unicode_normalization::UnicodeNormalization;

/// Well-known note payload fields.
pub mod fields {
    pub const NAME: &str = "name";
    pub const CONTENT: &str = "content";
    pub const SUMMARY: &str = "summary";
    pub const FOLDER: &str = "folder";
    pub const TAGS: &str = "tags";
    pub const STATUS: &str = "status";
    pub const PRIORITY: &str = "priority";
    pub const IMPORTANCE: &str = "importance";
    pub const SORT_ORDER: &str = "sortOrder";
}

/// A single typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    /// Milliseconds since the Unix epoch
    Date(Timestamp),
    StringList(Vec<String>),
}

/// A record payload with stable field ordering.
pub type Payload = BTreeMap<FieldName, Value>;

impl Value {
    /// Build a `StringList` from anything yielding string-likes.
    pub fn string_list<I, S>(items: I) -> Value
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = items.into_iter().map(Into::into).collect();
        list.sort();
        list.dedup();
        Value::StringList(list)
    }

    /// Canonical form of this value for hashing and equality checks.
    ///
    /// Text is NFC-normalized, CRLF becomes LF, and trailing whitespace is
    /// trimmed. String lists are sorted and deduplicated. Other variants
    /// are already canonical.
    pub fn canonicalize(&self) -> Value {
        match self {
            Value::Text(s) => Value::Text(canonical_text(s)),
            Value::StringList(items) => {
                let mut list: Vec<String> = items.iter().map(|s| canonical_text(s)).collect();
                list.sort();
                list.dedup();
                Value::StringList(list)
            }
            other => other.clone(),
        }
    }

    /// Whether two values are equal after canonicalization.
    pub fn canonical_eq(&self, other: &Value) -> bool {
        self.canonicalize() == other.canonicalize()
    }
}

fn canonical_text(s: &str) -> String {
    let normalized: String = s.nfc().collect();
    let unified = normalized.replace("\r\n", "\n").replace('\r', "\n");
    unified.trim_end().to_string()
}

/// Canonicalize every field of a payload.
pub fn canonicalize(payload: &Payload) -> Payload {
    payload
        .iter()
        .map(|(name, value)| (name.clone(), value.canonicalize()))
        .collect()
}

/// Content hash of a payload: SHA-256 over the canonical serialization,
/// hex-encoded. A pure function of the payload.
pub fn content_hash(payload: &Payload) -> String {
    let canonical = canonicalize(payload);
    // BTreeMap serializes in key order, so the byte stream is stable.
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

/// Field names present in either payload whose canonical values differ.
pub fn changed_fields(a: &Payload, b: &Payload) -> BTreeSet<FieldName> {
    let mut changed = BTreeSet::new();
    for name in a.keys().chain(b.keys()) {
        if changed.contains(name) {
            continue;
        }
        match (a.get(name), b.get(name)) {
            (Some(va), Some(vb)) if va.canonical_eq(vb) => {}
            _ => {
                changed.insert(name.clone());
            }
        }
    }
    changed
}
