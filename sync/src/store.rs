//! Store ports: the contracts the sync engine consumes.
//!
//! The engine talks to two stores it does not own. The [`RemoteStore`]
//! is a cloud record service addressed through zones, change tokens, and
//! batch modify calls. The [`LocalStore`] is the device's durable
//! replica: records, metadata, the pending-conflict queue, the
//! resolution journal, and the sync-state singleton.

use async_trait::async_trait;
use carrel_core::{ConflictInfo, JournalEntry, RecordId, RecordWithMeta, Timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Opaque cursor identifying the last observed remote change.
/// Monotonic per zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeToken(pub String);

impl ChangeToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A record in remote wire form.
///
/// The remote service stores heterogeneous field values; this carries
/// the record and its CRDT metadata losslessly in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub record_id: RecordId,
    #[serde(flatten)]
    pub entry: RecordWithMeta,
}

impl RemoteRecord {
    pub fn from_local(entry: &RecordWithMeta) -> Self {
        Self {
            record_id: entry.record.id.clone(),
            entry: entry.clone(),
        }
    }

    pub fn into_local(self) -> RecordWithMeta {
        self.entry
    }
}

/// Save policy for batch modifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SavePolicy {
    /// Only fields that changed are written; concurrent remote writes to
    /// other fields survive
    ChangedKeys,
    /// The whole record is overwritten
    AllKeys,
}

/// Per-record outcome of a batch modify.
pub type ModifyResults = BTreeMap<RecordId, std::result::Result<(), RemoteError>>;

/// One page of remote changes since a token.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub modifications: Vec<RemoteRecord>,
    pub deletions: Vec<RecordId>,
    pub token: ChangeToken,
    /// More pages are available; fetch again with the new token
    pub more: bool,
}

/// Discriminated error kinds surfaced by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("not authenticated with the remote store")]
    NotAuthenticated,

    #[error("network unavailable")]
    NetworkUnavailable,

    #[error("remote quota exceeded")]
    QuotaExceeded,

    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    #[error("remote record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("record changed on the remote since last fetch: {0}")]
    RecordChanged(RecordId),

    #[error("rate limited by the remote store")]
    RateLimited { retry_after: Option<Duration> },

    #[error("remote service unavailable")]
    ServiceUnavailable { retry_after: Option<Duration> },

    #[error("remote store error: {0}")]
    Other(String),
}

impl RemoteError {
    /// Classification per the error taxonomy.
    pub fn retryability(&self) -> crate::error::Retryability {
        use crate::error::Retryability;
        match self {
            RemoteError::NetworkUnavailable
            | RemoteError::RateLimited { .. }
            | RemoteError::ServiceUnavailable { .. } => Retryability::Transient,
            RemoteError::RecordChanged(_) => Retryability::AuthoritativeState,
            RemoteError::NotAuthenticated
            | RemoteError::QuotaExceeded
            | RemoteError::ZoneNotFound(_)
            | RemoteError::RecordNotFound(_)
            | RemoteError::Other(_) => Retryability::NonRetryable,
        }
    }
}

/// The remote cloud record store, as much of it as the engine consumes.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create the zone if it does not exist. Idempotent.
    async fn save_zone(&self, zone: &str) -> std::result::Result<(), RemoteError>;

    /// Subscribe to change notifications for the zone. Idempotent.
    async fn subscribe(&self, zone: &str) -> std::result::Result<(), RemoteError>;

    /// Batch save/delete. Returns a per-record outcome map; with
    /// `atomic = false`, record failures do not abort the batch.
    async fn modify(
        &self,
        saving: Vec<RemoteRecord>,
        deleting: Vec<RecordId>,
        policy: SavePolicy,
        atomic: bool,
    ) -> std::result::Result<ModifyResults, RemoteError>;

    /// Incremental changes since a token; `None` means from the
    /// beginning of the zone.
    async fn fetch_zone_changes(
        &self,
        zone: &str,
        since: Option<&ChangeToken>,
    ) -> std::result::Result<ChangeSet, RemoteError>;
}

/// Errors from the durable local store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("write contention on the local store")]
    WriteContention,

    #[error("record not found locally: {0}")]
    NotFound(RecordId),

    #[error("local store corrupted: {0}")]
    Corrupted(String),

    #[error("local store io error: {0}")]
    Io(String),
}

/// The sync-state singleton row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub change_token: Option<ChangeToken>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub conflict_count: u64,
}

/// Everything a pull applies in one writer transaction.
///
/// The implementation must commit all of it atomically with the token:
/// either the records, tombstones, journal entries, queued conflicts,
/// and new sync state all land, or none do. Recovery then never loses
/// changes or re-applies them.
#[derive(Debug, Clone, Default)]
pub struct PullBatch {
    pub upserts: Vec<RecordWithMeta>,
    /// Record ids tombstoned remotely, with the deletion time
    pub deletions: Vec<(RecordId, Timestamp)>,
    pub journal: Vec<JournalEntry>,
    /// Conflicts deferred to manual resolution
    pub conflicts: Vec<ConflictInfo>,
    /// Record ids whose pending conflicts settled in this pull
    pub settled: Vec<RecordId>,
    /// The new sync state, including the advanced change token
    pub state: SyncState,
}

/// The durable local replica.
///
/// `mark_synced` and `commit_pull` are writer transactions: each call is
/// atomic. The sync engine is the sole caller that moves `change_token`,
/// `last_synced_at`, and `sync_version`.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get_record(&self, id: &str)
        -> std::result::Result<Option<RecordWithMeta>, StoreError>;

    async fn upsert_record(&self, entry: RecordWithMeta) -> std::result::Result<(), StoreError>;

    /// Tombstone a record locally.
    async fn delete_record(&self, id: &str, at: Timestamp)
        -> std::result::Result<(), StoreError>;

    /// Records with local changes not yet pushed, ordered by record id.
    async fn pending_since(
        &self,
        cursor: Option<Timestamp>,
    ) -> std::result::Result<Vec<RecordWithMeta>, StoreError>;

    /// Set `last_synced_at` and clear `modified_fields` for the given
    /// records in a single writer transaction.
    async fn mark_synced(
        &self,
        ids: &[RecordId],
        at: Timestamp,
    ) -> std::result::Result<(), StoreError>;

    async fn journal_append(&self, entry: JournalEntry) -> std::result::Result<(), StoreError>;

    async fn journal_for_record(
        &self,
        id: &str,
    ) -> std::result::Result<Vec<JournalEntry>, StoreError>;

    async fn enqueue_conflict(&self, conflict: ConflictInfo)
        -> std::result::Result<(), StoreError>;

    async fn pending_conflicts(&self) -> std::result::Result<Vec<ConflictInfo>, StoreError>;

    async fn clear_conflict(&self, id: &str) -> std::result::Result<(), StoreError>;

    async fn load_sync_state(&self) -> std::result::Result<SyncState, StoreError>;

    async fn save_sync_state(&self, state: &SyncState) -> std::result::Result<(), StoreError>;

    /// Apply a pull batch atomically. See [`PullBatch`].
    async fn commit_pull(&self, batch: PullBatch) -> std::result::Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use carrel_core::{fields, CrdtMetadata, Payload, Record, ReplicaClock, Value};

    fn entry() -> RecordWithMeta {
        let payload: Payload = [(
            fields::NAME.to_string(),
            Value::Text("inbox".to_string()),
        )]
        .into_iter()
        .collect();
        let record = Record::create("note_1", payload, 1_000);
        let meta = CrdtMetadata::create(&record, ReplicaClock::with_logical("device_a", 1), 1_000);
        RecordWithMeta::new(record, meta)
    }

    #[test]
    fn remote_record_roundtrip() {
        let local = entry();
        let wire = RemoteRecord::from_local(&local);
        assert_eq!(wire.record_id, "note_1");
        let back = wire.into_local();
        assert_eq!(back, local);
    }

    #[test]
    fn remote_record_serialization() {
        let wire = RemoteRecord::from_local(&entry());
        let json = serde_json::to_string(&wire).unwrap();
        // Flattened: record and metadata live beside the id.
        assert!(json.contains("recordId"));
        assert!(json.contains("contentHash"));
        let parsed: RemoteRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, wire);
    }

    #[test]
    fn sync_state_defaults_are_empty() {
        let state = SyncState::default();
        assert!(state.change_token.is_none());
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_error.is_none());
    }
}
