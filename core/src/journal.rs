//! Resolution journal: append-only audit of conflict resolutions.
//!
//! Every resolution the sync engine applies emits one entry; a conflict
//! is only "settled" once its entry exists. Entries are kept newest-first
//! in a per-record ring capped at the configured retention.
//!
//! Entry ids are a digest of the resolution inputs, so replaying the
//! same resolution yields the same id and appending it again is a no-op.

use crate::config::ResolutionStrategy;
use crate::resolve::ResolvedRecord;
use crate::{RecordId, SiteId, Timestamp, Version};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::collections::VecDeque;

/// One immutable resolution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    /// Deterministic id: digest of the resolution inputs
    pub id: String,
    pub record_id: RecordId,
    pub strategy: ResolutionStrategy,
    pub winner_site_id: SiteId,
    pub local_version: Version,
    pub remote_version: Version,
    pub resolved_at: Timestamp,
    /// Free-form context (merged fields, deferral reasons, ...)
    pub details: serde_json::Value,
}

impl JournalEntry {
    /// Build the entry for an applied resolution.
    pub fn from_resolution(resolution: &ResolvedRecord, details: serde_json::Value) -> Self {
        let id = entry_id(
            &resolution.record.id,
            resolution.local_version,
            resolution.remote_version,
            resolution.strategy,
            &resolution.winner_site_id,
        );
        Self {
            id,
            record_id: resolution.record.id.clone(),
            strategy: resolution.strategy,
            winner_site_id: resolution.winner_site_id.clone(),
            local_version: resolution.local_version,
            remote_version: resolution.remote_version,
            resolved_at: resolution.resolved_at,
            details,
        }
    }
}

fn entry_id(
    record_id: &str,
    local_version: Version,
    remote_version: Version,
    strategy: ResolutionStrategy,
    winner_site_id: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record_id.as_bytes());
    hasher.update(local_version.to_be_bytes());
    hasher.update(remote_version.to_be_bytes());
    hasher.update(serde_json::to_string(&strategy).unwrap_or_default().as_bytes());
    hasher.update(winner_site_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// In-memory journal: per-record capped rings, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionJournal {
    retention_per_record: usize,
    entries: BTreeMap<RecordId, VecDeque<JournalEntry>>,
}

impl Default for ResolutionJournal {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ResolutionJournal {
    pub fn new(retention_per_record: usize) -> Self {
        Self {
            retention_per_record,
            entries: BTreeMap::new(),
        }
    }

    /// Append an entry. Re-appending an entry with a known id is a no-op,
    /// which makes resolution replay idempotent.
    pub fn append(&mut self, entry: JournalEntry) {
        let ring = self.entries.entry(entry.record_id.clone()).or_default();
        if ring.iter().any(|existing| existing.id == entry.id) {
            return;
        }
        ring.push_front(entry);
        while ring.len() > self.retention_per_record {
            ring.pop_back();
        }
    }

    /// Entries for one record, newest first.
    pub fn for_record(&self, record_id: &str) -> Vec<&JournalEntry> {
        self.entries
            .get(record_id)
            .map(|ring| ring.iter().collect())
            .unwrap_or_default()
    }

    /// Entries across all records whose `resolved_at` falls in
    /// `[from, to]`, newest first.
    pub fn in_range(&self, from: Timestamp, to: Timestamp) -> Vec<&JournalEntry> {
        let mut hits: Vec<&JournalEntry> = self
            .entries
            .values()
            .flatten()
            .filter(|e| e.resolved_at >= from && e.resolved_at <= to)
            .collect();
        hits.sort_by(|a, b| b.resolved_at.cmp(&a.resolved_at).then(a.id.cmp(&b.id)));
        hits
    }

    /// Whether a record has at least one resolution entry.
    pub fn has_entry_for(&self, record_id: &str) -> bool {
        self.entries
            .get(record_id)
            .is_some_and(|ring| !ring.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(|ring| ring.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(record_id: &str, local: Version, remote: Version, at: Timestamp) -> JournalEntry {
        JournalEntry {
            id: entry_id(
                record_id,
                local,
                remote,
                ResolutionStrategy::FieldLevelMerge,
                "device_aa",
            ),
            record_id: record_id.to_string(),
            strategy: ResolutionStrategy::FieldLevelMerge,
            winner_site_id: "device_aa".to_string(),
            local_version: local,
            remote_version: remote,
            resolved_at: at,
            details: serde_json::Value::Null,
        }
    }

    #[test]
    fn append_and_read_newest_first() {
        let mut journal = ResolutionJournal::new(10);
        journal.append(entry("note_1", 1, 1, 1_000));
        journal.append(entry("note_1", 2, 2, 2_000));

        let entries = journal.for_record("note_1");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].resolved_at, 2_000);
        assert_eq!(entries[1].resolved_at, 1_000);
    }

    #[test]
    fn duplicate_id_is_a_no_op() {
        let mut journal = ResolutionJournal::new(10);
        journal.append(entry("note_1", 1, 1, 1_000));
        journal.append(entry("note_1", 1, 1, 1_000));
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn retention_caps_per_record() {
        let mut journal = ResolutionJournal::new(3);
        for i in 0..5 {
            journal.append(entry("note_1", i, i, 1_000 + i));
        }
        let entries = journal.for_record("note_1");
        assert_eq!(entries.len(), 3);
        // Oldest entries fell off the back.
        assert_eq!(entries[2].resolved_at, 1_002);
    }

    #[test]
    fn range_query_spans_records() {
        let mut journal = ResolutionJournal::new(10);
        journal.append(entry("note_1", 1, 1, 1_000));
        journal.append(entry("note_2", 1, 1, 2_000));
        journal.append(entry("note_3", 1, 1, 3_000));

        let hits = journal.in_range(1_500, 2_500);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record_id, "note_2");
    }

    #[test]
    fn entry_id_is_deterministic() {
        let a = entry("note_1", 3, 4, 1_000);
        let b = entry("note_1", 3, 4, 9_999);
        // Same inputs, same id; resolved_at is not part of the identity.
        assert_eq!(a.id, b.id);
        let c = entry("note_1", 4, 4, 1_000);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn has_entry_tracks_settled_records() {
        let mut journal = ResolutionJournal::new(10);
        assert!(!journal.has_entry_for("note_1"));
        journal.append(entry("note_1", 1, 1, 1_000));
        assert!(journal.has_entry_for("note_1"));
    }

    #[test]
    fn serialization_roundtrip() {
        let mut journal = ResolutionJournal::new(10);
        journal.append(entry("note_1", 1, 2, 1_000));
        let json = serde_json::to_string(&journal).unwrap();
        let parsed: ResolutionJournal = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.for_record("note_1").len(), 1);
    }
}
