//! Per-record CRDT metadata and its comparison algebra.
//!
//! Every record carries one of these. The pair `(db_version,
//! column_version)` is the logical causality vector; `last_write_wins`
//! and `site_id` break ties deterministically when two replicas wrote
//! concurrently.

use crate::clock::ReplicaClock;
use crate::config::ConflictWindows;
use crate::record::Record;
use crate::value::content_hash;
use crate::{FieldName, RecordId, SiteId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Causal relation between two metadata values for the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Causality {
    /// `self` strictly precedes `other`
    Before,
    /// `self` strictly follows `other`
    After,
    Concurrent,
}

/// Classification of divergence between two metadata values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictClass {
    /// Equal hashes, or one side causally precedes the other
    NoConflict,
    /// Concurrent writes touching disjoint field sets
    FieldLevelMergeable,
    /// Concurrent writes touching overlapping field sets
    ContentConflict,
}

/// CRDT metadata attached to every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdtMetadata {
    pub record_id: RecordId,
    /// Stable per-device id; lexicographic order ties LWW
    pub site_id: SiteId,
    /// Incremented on any local mutation
    pub column_version: u64,
    /// The replica's logical clock at the last write; non-decreasing
    pub db_version: u64,
    /// Wall-clock time of the last local mutation
    pub last_write_wins: Timestamp,
    /// Digest over the canonical payload serialization
    pub content_hash: String,
    /// Payload fields touched by the last local mutation;
    /// cleared on successful sync-out
    pub modified_fields: BTreeSet<FieldName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_resolved_at: Option<Timestamp>,
}

impl CrdtMetadata {
    /// Metadata for a freshly created local record.
    ///
    /// All payload fields count as modified.
    pub fn create(record: &Record, clock: ReplicaClock, now: Timestamp) -> Self {
        Self {
            record_id: record.id.clone(),
            site_id: clock.site_id,
            column_version: 1,
            db_version: clock.logical,
            last_write_wins: now,
            content_hash: content_hash(&record.payload),
            modified_fields: record.payload.keys().cloned().collect(),
            conflict_resolved_at: None,
        }
    }

    /// Fold a local mutation into the metadata. The metadata adopts the
    /// mutating device's site id; `site_id` always names the last
    /// writer.
    pub fn update_for_local_change<I, F>(
        &mut self,
        record: &Record,
        touched: I,
        clock: ReplicaClock,
        now: Timestamp,
    ) where
        I: IntoIterator<Item = F>,
        F: Into<FieldName>,
    {
        self.column_version += 1;
        self.db_version = self.db_version.max(clock.logical);
        self.site_id = clock.site_id;
        self.last_write_wins = now;
        self.content_hash = content_hash(&record.payload);
        self.modified_fields = touched.into_iter().map(Into::into).collect();
    }

    /// Fold an applied sync into the metadata: the logical clock advances
    /// and the modified-field set is cleared. `last_write_wins` is left
    /// alone, it tracks local mutations only.
    pub fn increment_for_sync(&mut self, clock: &ReplicaClock) {
        self.db_version = self.db_version.max(clock.logical);
        self.modified_fields.clear();
    }

    /// Clear the modified-field set after a successful sync-out.
    pub fn clear_modified_fields(&mut self) {
        self.modified_fields.clear();
    }

    /// Causal comparison by lexicographic `(db_version, column_version)`.
    pub fn compare(&self, other: &CrdtMetadata) -> Causality {
        let a = (self.db_version, self.column_version);
        let b = (other.db_version, other.column_version);
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Causality::Before,
            std::cmp::Ordering::Greater => Causality::After,
            std::cmp::Ordering::Equal => Causality::Concurrent,
        }
    }

    pub fn happens_before(&self, other: &CrdtMetadata) -> bool {
        self.compare(other) == Causality::Before
    }

    pub fn happens_after(&self, other: &CrdtMetadata) -> bool {
        self.compare(other) == Causality::After
    }

    pub fn is_concurrent_with(&self, other: &CrdtMetadata) -> bool {
        self.compare(other) == Causality::Concurrent
    }

    /// Conflict heuristic: equal hashes never conflict; otherwise the
    /// divergence counts as a live conflict only inside the configured
    /// version/time window. Outside the window it is stale and falls to
    /// last-write-wins at the resolver.
    pub fn has_conflict_with(&self, other: &CrdtMetadata, windows: &ConflictWindows) -> bool {
        if self.content_hash == other.content_hash {
            return false;
        }
        let version_gap = self.column_version.abs_diff(other.column_version);
        let time_gap = self.last_write_wins.abs_diff(other.last_write_wins);
        version_gap <= windows.version_window && time_gap <= windows.time_window_ms
    }

    /// Classify divergence per the comparison algebra.
    pub fn classify(&self, other: &CrdtMetadata) -> ConflictClass {
        if self.content_hash == other.content_hash || !self.is_concurrent_with(other) {
            return ConflictClass::NoConflict;
        }
        if self.modified_fields.is_disjoint(&other.modified_fields) {
            ConflictClass::FieldLevelMergeable
        } else {
            ConflictClass::ContentConflict
        }
    }

    /// Whether this metadata supersedes `other` in the replica-local
    /// "highest vector seen" order `(db_version, column_version,
    /// last_write_wins, site_id)`.
    pub fn supersedes(&self, other: &CrdtMetadata) -> bool {
        (
            self.db_version,
            self.column_version,
            self.last_write_wins,
            &self.site_id,
        ) > (
            other.db_version,
            other.column_version,
            other.last_write_wins,
            &other.site_id,
        )
    }

    /// The side that wins under last-write-wins: greater
    /// `last_write_wins`, ties broken by greater `site_id`.
    pub fn lww_wins_over(&self, other: &CrdtMetadata) -> bool {
        (self.last_write_wins, &self.site_id) > (other.last_write_wins, &other.site_id)
    }
}
