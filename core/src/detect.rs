//! Conflict detection: classify local/remote divergence and produce
//! field-level diffs.
//!
//! Detection is pure. It takes already-fetched record/metadata pairs,
//! never touches a store, and is safe to run concurrently on disjoint
//! record ids. Given the same inputs it always produces the same
//! classification and diffs.

use crate::config::{ConflictWindows, SyncConfig};
use crate::metadata::ConflictClass;
use crate::policy::{PolicyClass, PolicyTable};
use crate::record::RecordWithMeta;
use crate::value::{changed_fields, Value};
use crate::{FieldName, RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// What kind of divergence was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Concurrent writes to disjoint field sets
    FieldLevelMergeable,
    /// Concurrent writes to overlapping field sets
    ContentConflict,
    /// Divergence outside the conflict window; falls to LWW
    StaleDivergence,
    /// Tombstone on one side, live modification on the other
    DeletionConflict,
}

/// Per-field view of a divergence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiff {
    pub field: FieldName,
    pub local_value: Option<Value>,
    pub remote_value: Option<Value>,
    /// Both sides touched this field since their last sync
    pub conflicted: bool,
    /// The policy table can resolve this field without a human
    pub auto_resolvable: bool,
    /// Pre-computed policy outcome, when one exists; `None` for manual
    /// fields and for auto fields whose winning side dropped the field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_value: Option<Value>,
}

/// A detected conflict between a local and a remote state of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub record_id: RecordId,
    pub local: RecordWithMeta,
    pub remote: RecordWithMeta,
    pub conflict_type: ConflictType,
    pub detected_at: Timestamp,
    pub fields: Vec<FieldDiff>,
}

/// Outcome of comparing a local and a remote record state.
#[derive(Debug, Clone, PartialEq)]
pub enum Divergence {
    /// Same content, same tombstone state; nothing to do
    InSync,
    /// Local strictly supersedes remote; keep local, push later
    LocalAhead,
    /// Remote strictly supersedes local; accept remote
    RemoteAhead,
    /// Concurrent or stale divergence that needs resolution
    Diverged(Box<ConflictInfo>),
}

/// Pure classifier over (record, metadata) pairs.
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    windows: ConflictWindows,
    policy: PolicyTable,
}

impl ConflictDetector {
    pub fn new(policy: PolicyTable, windows: ConflictWindows) -> Self {
        Self { windows, policy }
    }

    /// Detector with the note policy table and configured windows.
    pub fn with_config(config: &SyncConfig) -> Self {
        Self::new(PolicyTable::notes(), config.conflict_windows())
    }

    /// Compare a local and a remote state of the same record.
    pub fn assess(
        &self,
        local: &RecordWithMeta,
        remote: &RecordWithMeta,
        now: Timestamp,
    ) -> Divergence {
        let hashes_equal = local.meta.content_hash == remote.meta.content_hash;
        let tombstones_agree = local.record.is_active() == remote.record.is_active();

        if hashes_equal && tombstones_agree {
            return Divergence::InSync;
        }

        // Causal order settles divergence without a conflict.
        if local.meta.happens_before(&remote.meta) {
            return Divergence::RemoteAhead;
        }
        if local.meta.happens_after(&remote.meta) {
            return Divergence::LocalAhead;
        }

        // Concurrent from here on.
        if !tombstones_agree {
            return self.diverged(local, remote, ConflictType::DeletionConflict, now);
        }
        if hashes_equal {
            return Divergence::InSync;
        }

        let conflict_type = if local.meta.has_conflict_with(&remote.meta, &self.windows) {
            match local.meta.classify(&remote.meta) {
                ConflictClass::FieldLevelMergeable => ConflictType::FieldLevelMergeable,
                _ => ConflictType::ContentConflict,
            }
        } else {
            ConflictType::StaleDivergence
        };
        self.diverged(local, remote, conflict_type, now)
    }

    fn diverged(
        &self,
        local: &RecordWithMeta,
        remote: &RecordWithMeta,
        conflict_type: ConflictType,
        now: Timestamp,
    ) -> Divergence {
        Divergence::Diverged(Box::new(ConflictInfo {
            record_id: local.record.id.clone(),
            local: local.clone(),
            remote: remote.clone(),
            conflict_type,
            detected_at: now,
            fields: self.field_diffs(local, remote),
        }))
    }

    /// One diff per payload field whose canonical values differ.
    fn field_diffs(&self, local: &RecordWithMeta, remote: &RecordWithMeta) -> Vec<FieldDiff> {
        let mut diffs = Vec::new();
        for field in changed_fields(&local.record.payload, &remote.record.payload) {
            let local_value = local.record.payload.get(&field).cloned();
            let remote_value = remote.record.payload.get(&field).cloned();
            let conflicted = local.meta.modified_fields.contains(&field)
                && remote.meta.modified_fields.contains(&field);
            let class = self.policy.class_for(&field);
            let resolved_value = resolve_field(
                class,
                &field,
                local,
                remote,
                local_value.as_ref(),
                remote_value.as_ref(),
            );
            diffs.push(FieldDiff {
                field,
                local_value,
                remote_value,
                conflicted,
                auto_resolvable: class.is_auto(),
                resolved_value,
            });
        }
        diffs
    }
}

/// Policy outcome for one differing field, or `None` when the policy
/// cannot produce a value (manual fields, union over non-lists, winner
/// dropped the field).
///
/// A field modified on exactly one side goes to its unique modifier;
/// only contested fields fall to LWW with the site-id tiebreaker.
pub(crate) fn resolve_field(
    class: PolicyClass,
    field: &str,
    local: &RecordWithMeta,
    remote: &RecordWithMeta,
    local_value: Option<&Value>,
    remote_value: Option<&Value>,
) -> Option<Value> {
    match class {
        PolicyClass::Manual => None,
        PolicyClass::UnionMerge => union_lists(local_value, remote_value),
        PolicyClass::LastEditWins | PolicyClass::NewerMetadata => {
            let local_touched = local.meta.modified_fields.contains(field);
            let remote_touched = remote.meta.modified_fields.contains(field);
            match (local_touched, remote_touched) {
                (true, false) => local_value.cloned(),
                (false, true) => remote_value.cloned(),
                _ => {
                    if local.meta.lww_wins_over(&remote.meta) {
                        local_value.cloned()
                    } else {
                        remote_value.cloned()
                    }
                }
            }
        }
    }
}

fn union_lists(a: Option<&Value>, b: Option<&Value>) -> Option<Value> {
    let mut items: Vec<String> = Vec::new();
    for side in [a, b] {
        match side {
            None | Some(Value::Null) => {}
            Some(Value::StringList(list)) => items.extend(list.iter().cloned()),
            Some(_) => return None, // not representable as a union
        }
    }
    items.sort();
    items.dedup();
    Some(Value::StringList(items))
}
