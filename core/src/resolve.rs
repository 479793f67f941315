//! Conflict resolution.
//!
//! The resolver implements the hybrid policy: deterministic automatic
//! resolution (field-level merge, last-write-wins, newer-metadata-wins)
//! with fall-through to manual resolution. Both replicas evaluating the
//! same pair of states reach the same [`ResolvedRecord`]; this rests on
//! the canonical payload hash, the stable ordering of modified-field
//! sets, and the total order on site ids.

use crate::config::{ResolutionStrategy, SyncConfig};
use crate::detect::{resolve_field, ConflictInfo, ConflictType, FieldDiff};
use crate::error::{Error, Result};
use crate::metadata::CrdtMetadata;
use crate::policy::{PolicyClass, PolicyTable};
use crate::record::{Record, RecordWithMeta};
use crate::value::{content_hash, Value};
use crate::{FieldName, RecordId, SiteId, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRecord {
    /// Merged record, ready to be written and pushed
    pub record: Record,
    /// Merged metadata; carries both sides' modified fields until a
    /// sync-out clears them
    pub meta: CrdtMetadata,
    pub strategy: ResolutionStrategy,
    pub winner_site_id: SiteId,
    pub local_version: Version,
    pub remote_version: Version,
    pub resolved_at: Timestamp,
}

/// A side-by-side view of a conflict prepared for manual resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDiff {
    pub record_id: RecordId,
    pub conflict_type: ConflictType,
    pub detected_at: Timestamp,
    pub local_modified_at: Timestamp,
    pub remote_modified_at: Timestamp,
    pub fields: Vec<FieldDiff>,
}

/// Per-field manual choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum FieldChoice {
    Local,
    Remote,
    /// A value typed in by the user
    Custom(Value),
}

/// A manual resolution decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "choices", rename_all = "camelCase")]
pub enum ManualDecision {
    UseLocal,
    UseRemote,
    PerField(BTreeMap<FieldName, FieldChoice>),
}

/// Applies the resolution policy to detected conflicts.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    policy: PolicyTable,
    auto_window_ms: u64,
}

impl ConflictResolver {
    pub fn new(policy: PolicyTable, auto_window_ms: u64) -> Self {
        Self {
            policy,
            auto_window_ms,
        }
    }

    /// Resolver with the note policy table and configured auto window.
    pub fn with_config(config: &SyncConfig) -> Self {
        Self::new(PolicyTable::notes(), config.auto_window_ms())
    }

    /// Attempt automatic resolution of a batch of conflicts.
    ///
    /// Returns the conflicts that resolved and those deferred to manual
    /// resolution. A deferred conflict is returned untouched; partial
    /// field progress is discarded.
    pub fn resolve_automatically(
        &self,
        conflicts: Vec<ConflictInfo>,
        now: Timestamp,
    ) -> (Vec<ResolvedRecord>, Vec<ConflictInfo>) {
        let mut resolved = Vec::new();
        let mut deferred = Vec::new();
        for conflict in conflicts {
            match self.resolve_one(&conflict, now) {
                Some(record) => resolved.push(record),
                None => deferred.push(conflict),
            }
        }
        (resolved, deferred)
    }

    fn resolve_one(&self, conflict: &ConflictInfo, now: Timestamp) -> Option<ResolvedRecord> {
        // Deletion conflicts resolve purely by timestamps; everything
        // else honors the auto-resolution window first.
        if conflict.conflict_type == ConflictType::DeletionConflict {
            return Some(self.resolve_deletion(conflict, now));
        }

        let gap = conflict
            .local
            .record
            .modified_at
            .abs_diff(conflict.remote.record.modified_at);
        if gap > self.auto_window_ms {
            return None;
        }

        if conflict.conflict_type == ConflictType::StaleDivergence {
            Some(self.resolve_lww(conflict, now))
        } else {
            self.resolve_by_fields(conflict, now)
        }
    }

    /// Metadata-driven deterministic resolution.
    ///
    /// Causal order decides outright; concurrent states merge field by
    /// field when the modified sets are disjoint and fall to LWW with
    /// the site-id tiebreaker otherwise. Commutative: both replicas
    /// evaluating the same pair produce the same result.
    pub fn resolve_crdt(
        &self,
        local: &RecordWithMeta,
        remote: &RecordWithMeta,
        now: Timestamp,
    ) -> ResolvedRecord {
        if local.record.is_active() != remote.record.is_active() {
            return self.resolve_deletion_pair(local, remote, now);
        }
        if local.meta.happens_before(&remote.meta) {
            return self.take_side(local, remote, Side::Remote, ResolutionStrategy::ServerWins, now);
        }
        if local.meta.happens_after(&remote.meta) {
            return self.take_side(local, remote, Side::Local, ResolutionStrategy::LocalWins, now);
        }

        if local
            .meta
            .modified_fields
            .is_disjoint(&remote.meta.modified_fields)
        {
            if let Some(resolved) = self.merge_fields(local, remote, now, true) {
                return resolved;
            }
        }
        self.resolve_lww_pair(local, remote, now)
    }

    /// Resolve one conflict under a configured default strategy.
    ///
    /// `FieldLevelMerge` runs the per-field policy (the normal hybrid
    /// path); `Manual` always defers; the decree strategies pick a side
    /// without consulting the policy table.
    pub fn resolve_with_strategy(
        &self,
        conflict: ConflictInfo,
        strategy: ResolutionStrategy,
        now: Timestamp,
    ) -> (Vec<ResolvedRecord>, Vec<ConflictInfo>) {
        match strategy {
            ResolutionStrategy::FieldLevelMerge => self.resolve_automatically(vec![conflict], now),
            ResolutionStrategy::Manual => (Vec::new(), vec![conflict]),
            ResolutionStrategy::ServerWins => {
                let resolved = self.take_side(
                    &conflict.local,
                    &conflict.remote,
                    Side::Remote,
                    ResolutionStrategy::ServerWins,
                    now,
                );
                (vec![resolved], Vec::new())
            }
            ResolutionStrategy::LocalWins => {
                let resolved = self.take_side(
                    &conflict.local,
                    &conflict.remote,
                    Side::Local,
                    ResolutionStrategy::LocalWins,
                    now,
                );
                (vec![resolved], Vec::new())
            }
            ResolutionStrategy::LatestWins | ResolutionStrategy::LastWriteWins => {
                let resolved = self.resolve_lww_pair(&conflict.local, &conflict.remote, now);
                (vec![resolved], Vec::new())
            }
        }
    }

    /// Prepare the side-by-side diff a manual-resolution surface needs.
    pub fn prepare_manual(&self, conflict: &ConflictInfo) -> ConflictDiff {
        ConflictDiff {
            record_id: conflict.record_id.clone(),
            conflict_type: conflict.conflict_type,
            detected_at: conflict.detected_at,
            local_modified_at: conflict.local.record.modified_at,
            remote_modified_at: conflict.remote.record.modified_at,
            fields: conflict.fields.clone(),
        }
    }

    /// Apply a user's decision to a conflict.
    pub fn apply_manual(
        &self,
        conflict: &ConflictInfo,
        decision: &ManualDecision,
        now: Timestamp,
    ) -> Result<ResolvedRecord> {
        let local = &conflict.local;
        let remote = &conflict.remote;
        match decision {
            ManualDecision::UseLocal => Ok(self.manual_side(conflict, Side::Local, now)),
            ManualDecision::UseRemote => Ok(self.manual_side(conflict, Side::Remote, now)),
            ManualDecision::PerField(choices) => {
                let diffed: BTreeMap<&str, &FieldDiff> = conflict
                    .fields
                    .iter()
                    .map(|d| (d.field.as_str(), d))
                    .collect();
                for field in choices.keys() {
                    if !diffed.contains_key(field.as_str()) {
                        return Err(Error::InvalidDecision(format!(
                            "field '{field}' is not part of the conflict"
                        )));
                    }
                }

                // Base is the LWW winner; choices override it.
                let base = if local.meta.lww_wins_over(&remote.meta) {
                    local
                } else {
                    remote
                };
                let mut payload = base.record.payload.clone();
                for (field, choice) in choices {
                    let picked = match choice {
                        FieldChoice::Local => local.record.payload.get(field).cloned(),
                        FieldChoice::Remote => remote.record.payload.get(field).cloned(),
                        FieldChoice::Custom(value) => Some(value.clone()),
                    };
                    match picked {
                        Some(value) => {
                            payload.insert(field.clone(), value);
                        }
                        None => {
                            payload.remove(field);
                        }
                    }
                }
                Ok(self.build_resolution(
                    local,
                    remote,
                    payload,
                    base.record.deleted_at,
                    ResolutionStrategy::Manual,
                    base.meta.site_id.clone(),
                    now,
                ))
            }
        }
    }

    fn resolve_deletion(&self, conflict: &ConflictInfo, now: Timestamp) -> ResolvedRecord {
        self.resolve_deletion_pair(&conflict.local, &conflict.remote, now)
    }

    /// Tombstone against live modification: the live side wins only when
    /// it was modified after the deletion; otherwise the tombstone holds.
    fn resolve_deletion_pair(
        &self,
        local: &RecordWithMeta,
        remote: &RecordWithMeta,
        now: Timestamp,
    ) -> ResolvedRecord {
        let (tombstone, live) = if local.record.is_active() {
            (remote, local)
        } else {
            (local, remote)
        };
        let deleted_at = tombstone.record.deleted_at.unwrap_or(0);
        let winner = if live.record.modified_at > deleted_at {
            live
        } else {
            tombstone
        };
        self.take_side_of(local, remote, winner, ResolutionStrategy::LastWriteWins, now)
    }

    fn resolve_lww(&self, conflict: &ConflictInfo, now: Timestamp) -> ResolvedRecord {
        self.resolve_lww_pair(&conflict.local, &conflict.remote, now)
    }

    fn resolve_lww_pair(
        &self,
        local: &RecordWithMeta,
        remote: &RecordWithMeta,
        now: Timestamp,
    ) -> ResolvedRecord {
        if local.meta.lww_wins_over(&remote.meta) {
            self.take_side(local, remote, Side::Local, ResolutionStrategy::LastWriteWins, now)
        } else {
            self.take_side(local, remote, Side::Remote, ResolutionStrategy::LastWriteWins, now)
        }
    }

    /// Field-by-field automatic merge. Returns `None` when any differing
    /// field is unclassified or its policy cannot produce a value, in
    /// which case the whole conflict defers and partial progress is
    /// dropped.
    fn resolve_by_fields(&self, conflict: &ConflictInfo, now: Timestamp) -> Option<ResolvedRecord> {
        let merged = self.merge_fields(&conflict.local, &conflict.remote, now, false)?;
        Some(merged)
    }

    fn merge_fields(
        &self,
        local: &RecordWithMeta,
        remote: &RecordWithMeta,
        now: Timestamp,
        crdt_path: bool,
    ) -> Option<ResolvedRecord> {
        // Base is the side with the later edit; ties go to the greater
        // site id so both replicas pick the same base.
        let base = if local.meta.lww_wins_over(&remote.meta) {
            local
        } else {
            remote
        };
        let mut payload = base.record.payload.clone();
        let mut any_union = false;
        let mut any_unique = false;

        let diffs = crate::value::changed_fields(&local.record.payload, &remote.record.payload);
        for field in &diffs {
            let mut class = self.policy.class_for(field);
            if class == PolicyClass::Manual {
                if !crdt_path {
                    return None;
                }
                // The metadata-driven path never defers: unclassified
                // fields resolve like any other contested field.
                class = PolicyClass::LastEditWins;
            }
            if class == PolicyClass::UnionMerge {
                any_union = true;
            }
            let local_touched = local.meta.modified_fields.contains(field);
            let remote_touched = remote.meta.modified_fields.contains(field);
            if local_touched != remote_touched {
                any_unique = true;
            }
            let value = resolve_field(
                class,
                field,
                local,
                remote,
                local.record.payload.get(field),
                remote.record.payload.get(field),
            );
            match value {
                Some(v) => {
                    payload.insert(field.clone(), v);
                }
                None if class == PolicyClass::UnionMerge => return None,
                None => {
                    payload.remove(field);
                }
            }
        }

        let strategy = if any_union || any_unique || crdt_path {
            ResolutionStrategy::FieldLevelMerge
        } else {
            ResolutionStrategy::LastWriteWins
        };
        Some(self.build_resolution(
            local,
            remote,
            payload,
            base.record.deleted_at,
            strategy,
            base.meta.site_id.clone(),
            now,
        ))
    }

    fn manual_side(&self, conflict: &ConflictInfo, side: Side, now: Timestamp) -> ResolvedRecord {
        let winner = match side {
            Side::Local => &conflict.local,
            Side::Remote => &conflict.remote,
        };
        self.build_resolution(
            &conflict.local,
            &conflict.remote,
            winner.record.payload.clone(),
            winner.record.deleted_at,
            ResolutionStrategy::Manual,
            winner.meta.site_id.clone(),
            now,
        )
    }

    fn take_side(
        &self,
        local: &RecordWithMeta,
        remote: &RecordWithMeta,
        side: Side,
        strategy: ResolutionStrategy,
        now: Timestamp,
    ) -> ResolvedRecord {
        let winner = match side {
            Side::Local => local,
            Side::Remote => remote,
        };
        self.take_side_of(local, remote, winner, strategy, now)
    }

    fn take_side_of(
        &self,
        local: &RecordWithMeta,
        remote: &RecordWithMeta,
        winner: &RecordWithMeta,
        strategy: ResolutionStrategy,
        now: Timestamp,
    ) -> ResolvedRecord {
        self.build_resolution(
            local,
            remote,
            winner.record.payload.clone(),
            winner.record.deleted_at,
            strategy,
            winner.meta.site_id.clone(),
            now,
        )
    }

    /// Assemble the merged record and metadata. Every input that feeds
    /// this is symmetric in (local, remote), so the output is too.
    #[allow(clippy::too_many_arguments)]
    fn build_resolution(
        &self,
        local: &RecordWithMeta,
        remote: &RecordWithMeta,
        payload: crate::value::Payload,
        deleted_at: Option<Timestamp>,
        strategy: ResolutionStrategy,
        winner_site_id: SiteId,
        now: Timestamp,
    ) -> ResolvedRecord {
        let hash = content_hash(&payload);
        let record = Record {
            id: local.record.id.clone(),
            payload,
            version: local.record.version.max(remote.record.version) + 1,
            sync_version: local.record.sync_version.max(remote.record.sync_version) + 1,
            modified_at: local.record.modified_at.max(remote.record.modified_at),
            last_synced_at: None,
            conflict_resolved_at: Some(now),
            deleted_at,
        };
        // Invariant: the merged state stays concurrent with any third
        // replica the inputs were concurrent with. Causality vector is
        // the pointwise max; modified fields carry the union of both
        // sides until a sync-out clears them.
        let meta = CrdtMetadata {
            record_id: record.id.clone(),
            site_id: winner_site_id.clone(),
            column_version: local.meta.column_version.max(remote.meta.column_version),
            db_version: local.meta.db_version.max(remote.meta.db_version),
            last_write_wins: local.meta.last_write_wins.max(remote.meta.last_write_wins),
            content_hash: hash,
            modified_fields: local
                .meta
                .modified_fields
                .union(&remote.meta.modified_fields)
                .cloned()
                .collect(),
            conflict_resolved_at: Some(now),
        };
        ResolvedRecord {
            record,
            meta,
            strategy,
            winner_site_id,
            local_version: local.record.version,
            remote_version: remote.record.version,
            resolved_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Local,
    Remote,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ReplicaClock;
    use crate::detect::{ConflictDetector, Divergence};
    use crate::value::{fields, Payload};

    fn base_payload(name: &str) -> Payload {
        [(fields::NAME.to_string(), Value::Text(name.to_string()))]
            .into_iter()
            .collect()
    }

    fn entry(site: &str, logical: u64, name: &str, now: Timestamp) -> RecordWithMeta {
        let record = Record::create("note_1", base_payload(name), now);
        let meta = CrdtMetadata::create(&record, ReplicaClock::with_logical(site, logical), now);
        RecordWithMeta::new(record, meta)
    }

    fn resolver() -> ConflictResolver {
        ConflictResolver::with_config(&SyncConfig::default())
    }

    fn detector() -> ConflictDetector {
        ConflictDetector::with_config(&SyncConfig::default())
    }

    fn diverged(local: &RecordWithMeta, remote: &RecordWithMeta, now: Timestamp) -> ConflictInfo {
        match detector().assess(local, remote, now) {
            Divergence::Diverged(info) => *info,
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    fn tag_conflict() -> (RecordWithMeta, RecordWithMeta) {
        let mut local = entry("device_aa", 1, "inbox", 10_000);
        let mut remote = entry("device_bb", 1, "inbox", 10_000);

        local
            .record
            .set_field(fields::TAGS, Value::string_list(["urgent"]), 10_000);
        local.meta.update_for_local_change(
            &local.record,
            [fields::TAGS],
            ReplicaClock::with_logical("device_aa", 1),
            10_000,
        );
        remote
            .record
            .set_field(fields::TAGS, Value::string_list(["review"]), 12_000);
        remote.meta.update_for_local_change(
            &remote.record,
            [fields::TAGS],
            ReplicaClock::with_logical("device_bb", 1),
            12_000,
        );
        (local, remote)
    }

    #[test]
    fn tags_union_merge() {
        let (local, remote) = tag_conflict();
        let conflict = diverged(&local, &remote, 13_000);

        let (resolved, deferred) = resolver().resolve_automatically(vec![conflict], 13_000);
        assert!(deferred.is_empty());
        let merged = &resolved[0];
        assert_eq!(
            merged.record.payload[fields::TAGS],
            Value::string_list(["review", "urgent"])
        );
        assert_eq!(merged.strategy, ResolutionStrategy::FieldLevelMerge);
        assert_eq!(
            merged.record.sync_version,
            local.record.sync_version.max(remote.record.sync_version) + 1
        );
        assert_eq!(merged.record.conflict_resolved_at, Some(13_000));
        // The merged fields stay marked modified until a sync-out
        // clears them.
        assert!(merged.meta.modified_fields.contains(fields::TAGS));
    }

    #[test]
    fn lww_tiebreak_on_identical_timestamps() {
        let mut local = entry("device_aa", 1, "inbox", 100_000);
        let mut remote = entry("device_bb", 1, "inbox", 100_000);
        local
            .record
            .set_field(fields::CONTENT, Value::Text("from aa".to_string()), 100_000);
        local.meta.update_for_local_change(
            &local.record,
            [fields::CONTENT],
            ReplicaClock::with_logical("device_aa", 1),
            100_000,
        );
        remote
            .record
            .set_field(fields::CONTENT, Value::Text("from bb".to_string()), 100_000);
        remote.meta.update_for_local_change(
            &remote.record,
            [fields::CONTENT],
            ReplicaClock::with_logical("device_bb", 1),
            100_000,
        );

        let conflict = diverged(&local, &remote, 101_000);
        let (resolved, deferred) = resolver().resolve_automatically(vec![conflict], 101_000);
        assert!(deferred.is_empty());
        let merged = &resolved[0];
        // Same instant: the greater site id wins.
        assert_eq!(merged.winner_site_id, "device_bb");
        assert_eq!(merged.strategy, ResolutionStrategy::LastWriteWins);
        assert_eq!(
            merged.record.payload[fields::CONTENT],
            Value::Text("from bb".to_string())
        );
    }

    #[test]
    fn stale_age_defers() {
        let mut local = entry("device_aa", 1, "mine", 0);
        let mut remote = entry("device_bb", 1, "theirs", 0);
        local.record.modified_at = 0;
        local.meta.last_write_wins = 0;
        remote.record.modified_at = 400_000;
        remote.meta.last_write_wins = 400_000;

        let conflict = diverged(&local, &remote, 401_000);
        let (resolved, deferred) = resolver().resolve_automatically(vec![conflict], 401_000);
        assert!(resolved.is_empty());
        assert_eq!(deferred.len(), 1);
        // Deferred conflicts come back untouched.
        assert_eq!(deferred[0].record_id, "note_1");
    }

    #[test]
    fn stale_divergence_inside_auto_window_resolves_by_lww() {
        let mut local = entry("device_aa", 1, "mine", 0);
        let mut remote = entry("device_bb", 1, "theirs", 0);
        // 60 s apart: outside the 30 s conflict window, inside the 300 s
        // auto window.
        local.record.modified_at = 0;
        local.meta.last_write_wins = 0;
        remote.record.modified_at = 60_000;
        remote.meta.last_write_wins = 60_000;

        let conflict = diverged(&local, &remote, 61_000);
        assert_eq!(conflict.conflict_type, ConflictType::StaleDivergence);
        let (resolved, deferred) = resolver().resolve_automatically(vec![conflict], 61_000);
        assert!(deferred.is_empty());
        assert_eq!(
            resolved[0].record.payload[fields::NAME],
            Value::Text("theirs".to_string())
        );
        assert_eq!(resolved[0].strategy, ResolutionStrategy::LastWriteWins);
    }

    #[test]
    fn unclassified_field_defers_whole_conflict() {
        let mut local = entry("device_aa", 1, "inbox", 10_000);
        let mut remote = entry("device_bb", 1, "inbox", 10_000);
        local
            .record
            .set_field(fields::TAGS, Value::string_list(["urgent"]), 10_000);
        local
            .record
            .set_field(fields::SORT_ORDER, Value::Int(1), 10_000);
        local.meta.update_for_local_change(
            &local.record,
            [fields::TAGS, fields::SORT_ORDER],
            ReplicaClock::with_logical("device_aa", 1),
            10_000,
        );
        remote
            .record
            .set_field(fields::SORT_ORDER, Value::Int(2), 11_000);
        remote.meta.update_for_local_change(
            &remote.record,
            [fields::SORT_ORDER],
            ReplicaClock::with_logical("device_bb", 1),
            11_000,
        );

        let conflict = diverged(&local, &remote, 12_000);
        let (resolved, deferred) = resolver().resolve_automatically(vec![conflict], 12_000);
        // sortOrder is unclassified: no partial tag merge may survive.
        assert!(resolved.is_empty());
        assert_eq!(deferred.len(), 1);
    }

    #[test]
    fn deletion_conflict_live_wins_when_newer() {
        let mut local = entry("device_aa", 1, "inbox", 10_000);
        let mut remote = entry("device_bb", 1, "inbox", 10_000);
        local.record.mark_deleted(11_000);
        local.meta.update_for_local_change(
            &local.record,
            [] as [&str; 0],
            ReplicaClock::with_logical("device_aa", 1),
            11_000,
        );
        remote
            .record
            .set_field(fields::NAME, Value::Text("revived".to_string()), 12_000);
        remote.meta.update_for_local_change(
            &remote.record,
            [fields::NAME],
            ReplicaClock::with_logical("device_bb", 1),
            12_000,
        );

        let conflict = diverged(&local, &remote, 13_000);
        let (resolved, _) = resolver().resolve_automatically(vec![conflict], 13_000);
        let merged = &resolved[0];
        assert!(merged.record.is_active());
        assert_eq!(
            merged.record.payload[fields::NAME],
            Value::Text("revived".to_string())
        );
    }

    #[test]
    fn deletion_conflict_tombstone_wins_when_newer() {
        let mut local = entry("device_aa", 1, "inbox", 10_000);
        let mut remote = entry("device_bb", 1, "inbox", 10_000);
        remote
            .record
            .set_field(fields::NAME, Value::Text("revived".to_string()), 11_000);
        remote.meta.update_for_local_change(
            &remote.record,
            [fields::NAME],
            ReplicaClock::with_logical("device_bb", 1),
            11_000,
        );
        local.record.mark_deleted(12_000);
        local.meta.update_for_local_change(
            &local.record,
            [] as [&str; 0],
            ReplicaClock::with_logical("device_aa", 1),
            12_000,
        );

        let conflict = diverged(&local, &remote, 13_000);
        let (resolved, _) = resolver().resolve_automatically(vec![conflict], 13_000);
        assert!(!resolved[0].record.is_active());
    }

    #[test]
    fn resolve_crdt_causal_order_decides() {
        let resolver = resolver();
        let local = entry("device_aa", 1, "old", 10_000);
        let remote = entry("device_bb", 5, "new", 11_000);

        let merged = resolver.resolve_crdt(&local, &remote, 12_000);
        assert_eq!(merged.strategy, ResolutionStrategy::ServerWins);
        assert_eq!(
            merged.record.payload[fields::NAME],
            Value::Text("new".to_string())
        );

        let merged = resolver.resolve_crdt(&remote, &local, 12_000);
        assert_eq!(merged.strategy, ResolutionStrategy::LocalWins);
        assert_eq!(
            merged.record.payload[fields::NAME],
            Value::Text("new".to_string())
        );
    }

    #[test]
    fn resolve_crdt_is_commutative() {
        let (local, remote) = tag_conflict();
        let resolver = resolver();

        let ab = resolver.resolve_crdt(&local, &remote, 13_000);
        let ba = resolver.resolve_crdt(&remote, &local, 13_000);
        assert_eq!(ab.record.payload, ba.record.payload);
        assert_eq!(ab.meta.content_hash, ba.meta.content_hash);
        assert_eq!(ab.winner_site_id, ba.winner_site_id);
        assert_eq!(ab.record.sync_version, ba.record.sync_version);
    }

    #[test]
    fn replay_is_idempotent() {
        let (local, remote) = tag_conflict();
        let conflict = diverged(&local, &remote, 13_000);
        let resolver = resolver();

        let (first, _) = resolver.resolve_automatically(vec![conflict.clone()], 13_000);
        let (second, _) = resolver.resolve_automatically(vec![conflict], 13_000);
        assert_eq!(first, second);
    }

    #[test]
    fn manual_use_local_and_remote() {
        let (local, remote) = tag_conflict();
        let conflict = diverged(&local, &remote, 13_000);
        let resolver = resolver();

        let picked = resolver
            .apply_manual(&conflict, &ManualDecision::UseLocal, 14_000)
            .unwrap();
        assert_eq!(picked.strategy, ResolutionStrategy::Manual);
        assert_eq!(picked.winner_site_id, "device_aa");
        assert_eq!(
            picked.record.payload[fields::TAGS],
            Value::string_list(["urgent"])
        );

        let picked = resolver
            .apply_manual(&conflict, &ManualDecision::UseRemote, 14_000)
            .unwrap();
        assert_eq!(picked.winner_site_id, "device_bb");
    }

    #[test]
    fn manual_per_field_choice() {
        let (local, remote) = tag_conflict();
        let conflict = diverged(&local, &remote, 13_000);
        let resolver = resolver();

        let choices: BTreeMap<FieldName, FieldChoice> =
            [(fields::TAGS.to_string(), FieldChoice::Local)]
                .into_iter()
                .collect();
        let picked = resolver
            .apply_manual(&conflict, &ManualDecision::PerField(choices), 14_000)
            .unwrap();
        assert_eq!(
            picked.record.payload[fields::TAGS],
            Value::string_list(["urgent"])
        );
    }

    #[test]
    fn manual_unknown_field_is_invalid() {
        let (local, remote) = tag_conflict();
        let conflict = diverged(&local, &remote, 13_000);
        let choices: BTreeMap<FieldName, FieldChoice> =
            [("attachments".to_string(), FieldChoice::Local)]
                .into_iter()
                .collect();
        let err = resolver()
            .apply_manual(&conflict, &ManualDecision::PerField(choices), 14_000)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDecision(_)));
    }

    #[test]
    fn default_strategy_decrees() {
        let (local, remote) = tag_conflict();
        let conflict = diverged(&local, &remote, 13_000);
        let resolver = resolver();

        let (resolved, deferred) = resolver.resolve_with_strategy(
            conflict.clone(),
            ResolutionStrategy::ServerWins,
            13_000,
        );
        assert!(deferred.is_empty());
        assert_eq!(resolved[0].winner_site_id, "device_bb");
        assert_eq!(
            resolved[0].record.payload[fields::TAGS],
            Value::string_list(["review"])
        );

        let (resolved, deferred) = resolver.resolve_with_strategy(
            conflict.clone(),
            ResolutionStrategy::LocalWins,
            13_000,
        );
        assert!(deferred.is_empty());
        assert_eq!(
            resolved[0].record.payload[fields::TAGS],
            Value::string_list(["urgent"])
        );

        let (resolved, deferred) =
            resolver.resolve_with_strategy(conflict, ResolutionStrategy::Manual, 13_000);
        assert!(resolved.is_empty());
        assert_eq!(deferred.len(), 1);
    }

    #[test]
    fn prepare_manual_exposes_diffs() {
        let (local, remote) = tag_conflict();
        let conflict = diverged(&local, &remote, 13_000);
        let diff = resolver().prepare_manual(&conflict);
        assert_eq!(diff.record_id, "note_1");
        assert_eq!(diff.fields.len(), 1);
        assert_eq!(diff.local_modified_at, 10_000);
        assert_eq!(diff.remote_modified_at, 12_000);
    }
}
