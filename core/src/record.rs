//! Record types: the unit of sync.

use crate::metadata::CrdtMetadata;
use crate::value::{Payload, Value};
use crate::{FieldName, RecordId, Timestamp, Version};
use serde::{Deserialize, Serialize};

/// A note record as stored on a replica.
///
/// Deletion is a tombstone: `deleted_at` is set and the payload may be
/// retained; metadata continues to evolve so the deletion can still lose
/// to a concurrent remote edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Stable identifier
    pub id: RecordId,
    /// Typed payload fields (name, content, tags, ...)
    pub payload: Payload,
    /// Incremented on each local update
    pub version: Version,
    /// Bumped on each applied sync
    pub sync_version: Version,
    /// Wall-clock time of the last local mutation
    pub modified_at: Timestamp,
    /// Set when a sync-out succeeds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<Timestamp>,
    /// Set when a conflict resolution was applied to this record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_resolved_at: Option<Timestamp>,
    /// Soft-delete tombstone
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

impl Record {
    /// Create a record from an initial payload.
    pub fn create(id: impl Into<RecordId>, payload: Payload, now: Timestamp) -> Self {
        Self {
            id: id.into(),
            payload,
            version: 1,
            sync_version: 0,
            modified_at: now,
            last_synced_at: None,
            conflict_resolved_at: None,
            deleted_at: None,
        }
    }

    /// Replace the whole payload as a local edit.
    pub fn apply_local_edit(&mut self, payload: Payload, now: Timestamp) {
        self.payload = payload;
        self.version += 1;
        self.modified_at = now;
    }

    /// Set a single field as a local edit.
    pub fn set_field(&mut self, field: impl Into<FieldName>, value: Value, now: Timestamp) {
        self.payload.insert(field.into(), value);
        self.version += 1;
        self.modified_at = now;
    }

    /// Mark the record deleted (tombstone).
    pub fn mark_deleted(&mut self, now: Timestamp) {
        self.deleted_at = Some(now);
        self.version += 1;
        self.modified_at = now;
    }

    /// Record a successful sync-out.
    pub fn mark_synced(&mut self, now: Timestamp) {
        self.last_synced_at = Some(now);
    }

    /// Whether the record is live (not tombstoned).
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Whether the record has local changes not yet pushed.
    pub fn is_dirty(&self) -> bool {
        match self.last_synced_at {
            None => true,
            Some(synced) => self.modified_at > synced,
        }
    }
}

/// A record together with its CRDT metadata, as read from a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordWithMeta {
    pub record: Record,
    pub meta: CrdtMetadata,
}

impl RecordWithMeta {
    pub fn new(record: Record, meta: CrdtMetadata) -> Self {
        Self { record, meta }
    }
}

impl From<(Record, CrdtMetadata)> for RecordWithMeta {
    fn from((record, meta): (Record, CrdtMetadata)) -> Self {
        Self { record, meta }
    }
}
