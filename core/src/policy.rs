//! Per-field resolution policy.
//!
//! The policy table says how each payload field merges when two replicas
//! changed it concurrently. Fields the table does not know fall to the
//! fallback class, which for notes is manual resolution.

use crate::value::fields;
use crate::FieldName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a single field resolves under concurrent modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyClass {
    /// Set-union of both sides, sorted (string lists)
    UnionMerge,
    /// Value from the side with the greater `last_write_wins`;
    /// ties go to the greater site id
    LastEditWins,
    /// Same decision rule as LWW, applied to status-like fields
    NewerMetadata,
    /// Never auto-resolved
    Manual,
}

impl PolicyClass {
    /// Whether a field of this class can resolve without a human.
    pub fn is_auto(self) -> bool {
        !matches!(self, PolicyClass::Manual)
    }
}

/// Field-name-to-policy mapping for one payload type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTable {
    classes: BTreeMap<FieldName, PolicyClass>,
    fallback: PolicyClass,
}

impl PolicyTable {
    /// An empty table where every field falls to `fallback`.
    pub fn new(fallback: PolicyClass) -> Self {
        Self {
            classes: BTreeMap::new(),
            fallback,
        }
    }

    /// The policy table for note payloads.
    pub fn notes() -> Self {
        Self::new(PolicyClass::Manual)
            .with_field(fields::TAGS, PolicyClass::UnionMerge)
            .with_field(fields::NAME, PolicyClass::LastEditWins)
            .with_field(fields::CONTENT, PolicyClass::LastEditWins)
            .with_field(fields::SUMMARY, PolicyClass::LastEditWins)
            .with_field(fields::STATUS, PolicyClass::NewerMetadata)
            .with_field(fields::PRIORITY, PolicyClass::NewerMetadata)
            .with_field(fields::IMPORTANCE, PolicyClass::NewerMetadata)
            .with_field(fields::FOLDER, PolicyClass::NewerMetadata)
    }

    /// Builder-style field registration.
    pub fn with_field(mut self, name: impl Into<FieldName>, class: PolicyClass) -> Self {
        self.classes.insert(name.into(), class);
        self
    }

    /// Resolution class for a field.
    pub fn class_for(&self, name: &str) -> PolicyClass {
        self.classes.get(name).copied().unwrap_or(self.fallback)
    }

    /// Whether a field auto-resolves.
    pub fn is_auto(&self, name: &str) -> bool {
        self.class_for(name).is_auto()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::notes()
    }
}
