//! In-memory reference stores.
//!
//! [`MemoryLocalStore`] is a faithful local replica: atomic pull
//! batches, a pending-conflict queue, and a capped resolution journal.
//! [`MemoryRemoteStore`] emulates the cloud record service: a change
//! log behind monotone tokens, paged fetches, per-record
//! `record_changed` rejection, and scriptable failures.
//!
//! The integration suite drives the engine against these; downstream
//! consumers can use them to test their own sync plumbing.

use crate::store::{
    ChangeSet, ChangeToken, LocalStore, ModifyResults, PullBatch, RemoteError, RemoteRecord,
    RemoteStore, SavePolicy, StoreError, SyncState,
};
use async_trait::async_trait;
use carrel_core::{
    ConflictInfo, JournalEntry, RecordId, RecordWithMeta, ResolutionJournal, Timestamp,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

// ---------------------------------------------------------------------------
// Local store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LocalInner {
    records: BTreeMap<RecordId, RecordWithMeta>,
    conflicts: BTreeMap<RecordId, ConflictInfo>,
    journal: ResolutionJournal,
    state: SyncState,
}

/// In-memory durable replica with single-writer transactions.
pub struct MemoryLocalStore {
    inner: RwLock<LocalInner>,
    /// Commit kill-points: each pending count fails one `commit_pull`
    fail_next_commits: AtomicU32,
}

impl MemoryLocalStore {
    pub fn new() -> Arc<Self> {
        Self::with_retention(10)
    }

    pub fn with_retention(journal_retention: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(LocalInner {
                journal: ResolutionJournal::new(journal_retention),
                ..Default::default()
            }),
            fail_next_commits: AtomicU32::new(0),
        })
    }

    /// Make the next `commit_pull` fail after doing nothing, simulating
    /// a crash before the transaction commits.
    pub fn fail_next_commit(&self) {
        self.fail_next_commits.fetch_add(1, Ordering::SeqCst);
    }

    /// Seed or overwrite a record directly, as the editing app would.
    pub async fn put(&self, entry: RecordWithMeta) {
        self.inner
            .write()
            .await
            .records
            .insert(entry.record.id.clone(), entry);
    }

    pub async fn record_count(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn journal_entry_count(&self) -> usize {
        self.inner.read().await.journal.len()
    }

    pub async fn snapshot(&self) -> BTreeMap<RecordId, RecordWithMeta> {
        self.inner.read().await.records.clone()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get_record(&self, id: &str) -> Result<Option<RecordWithMeta>, StoreError> {
        Ok(self.inner.read().await.records.get(id).cloned())
    }

    async fn upsert_record(&self, entry: RecordWithMeta) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .records
            .insert(entry.record.id.clone(), entry);
        Ok(())
    }

    async fn delete_record(&self, id: &str, at: Timestamp) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.record.mark_deleted(at);
        Ok(())
    }

    async fn pending_since(
        &self,
        cursor: Option<Timestamp>,
    ) -> Result<Vec<RecordWithMeta>, StoreError> {
        let inner = self.inner.read().await;
        let floor = cursor.unwrap_or(0);
        Ok(inner
            .records
            .values()
            .filter(|entry| entry.record.is_dirty() && entry.record.modified_at >= floor)
            .cloned()
            .collect())
    }

    async fn mark_synced(&self, ids: &[RecordId], at: Timestamp) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        for id in ids {
            if let Some(entry) = inner.records.get_mut(id) {
                entry.record.mark_synced(at);
                entry.meta.clear_modified_fields();
            }
        }
        Ok(())
    }

    async fn journal_append(&self, entry: JournalEntry) -> Result<(), StoreError> {
        self.inner.write().await.journal.append(entry);
        Ok(())
    }

    async fn journal_for_record(&self, id: &str) -> Result<Vec<JournalEntry>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .journal
            .for_record(id)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn enqueue_conflict(&self, conflict: ConflictInfo) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .conflicts
            .insert(conflict.record_id.clone(), conflict);
        Ok(())
    }

    async fn pending_conflicts(&self) -> Result<Vec<ConflictInfo>, StoreError> {
        Ok(self.inner.read().await.conflicts.values().cloned().collect())
    }

    async fn clear_conflict(&self, id: &str) -> Result<(), StoreError> {
        self.inner.write().await.conflicts.remove(id);
        Ok(())
    }

    async fn load_sync_state(&self) -> Result<SyncState, StoreError> {
        Ok(self.inner.read().await.state.clone())
    }

    async fn save_sync_state(&self, state: &SyncState) -> Result<(), StoreError> {
        self.inner.write().await.state = state.clone();
        Ok(())
    }

    async fn commit_pull(&self, batch: PullBatch) -> Result<(), StoreError> {
        if self.fail_next_commits.load(Ordering::SeqCst) > 0 {
            self.fail_next_commits.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::Io("injected commit failure".to_string()));
        }

        // One writer lock for the whole batch: all of it or none of it.
        let mut inner = self.inner.write().await;
        for entry in batch.upserts {
            inner.records.insert(entry.record.id.clone(), entry);
        }
        for (id, at) in batch.deletions {
            if let Some(entry) = inner.records.get_mut(&id) {
                entry.record.deleted_at = Some(at);
                entry.record.last_synced_at = Some(at);
            }
        }
        for entry in batch.journal {
            inner.journal.append(entry);
        }
        for conflict in batch.conflicts {
            inner.conflicts.insert(conflict.record_id.clone(), conflict);
        }
        for id in &batch.settled {
            inner.conflicts.remove(id);
        }
        inner.state = batch.state;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Remote store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogEvent {
    Saved,
    Deleted,
}

struct RemoteInner {
    zones: BTreeSet<String>,
    subscriptions: BTreeSet<String>,
    records: BTreeMap<RecordId, RemoteRecord>,
    log: Vec<(u64, RecordId, LogEvent)>,
    seq: u64,
    page_size: usize,
    /// Faults keyed by 1-based call index
    modify_faults: BTreeMap<u64, RemoteError>,
    fetch_faults: BTreeMap<u64, RemoteError>,
    modify_calls: u64,
    fetch_calls: u64,
    latency: Duration,
}

impl Default for RemoteInner {
    fn default() -> Self {
        Self {
            zones: BTreeSet::new(),
            subscriptions: BTreeSet::new(),
            records: BTreeMap::new(),
            log: Vec::new(),
            seq: 0,
            page_size: usize::MAX,
            modify_faults: BTreeMap::new(),
            fetch_faults: BTreeMap::new(),
            modify_calls: 0,
            fetch_calls: 0,
            latency: Duration::ZERO,
        }
    }
}

/// In-memory cloud record service with a change log and fault scripting.
pub struct MemoryRemoteStore {
    inner: Mutex<RemoteInner>,
}

impl MemoryRemoteStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RemoteInner::default()),
        })
    }

    /// Cap the number of change-log events per fetch page.
    pub async fn set_page_size(&self, page_size: usize) {
        self.inner.lock().await.page_size = page_size.max(1);
    }

    /// Inject latency ahead of every remote call.
    pub async fn set_latency(&self, latency: Duration) {
        self.inner.lock().await.latency = latency;
    }

    /// Script a failure for the nth `modify` call (1-based, counted
    /// across the store's lifetime).
    pub async fn fail_on_modify_call(&self, call: u64, error: RemoteError) {
        self.inner.lock().await.modify_faults.insert(call, error);
    }

    /// Script a failure for the next `modify` call.
    pub async fn fail_next_modify(&self, error: RemoteError) {
        let mut inner = self.inner.lock().await;
        let call = inner.modify_calls + 1;
        inner.modify_faults.insert(call, error);
    }

    /// Script a failure for the nth `fetch_zone_changes` call (1-based).
    pub async fn fail_on_fetch_call(&self, call: u64, error: RemoteError) {
        self.inner.lock().await.fetch_faults.insert(call, error);
    }

    /// Script a failure for the next `fetch_zone_changes` call.
    pub async fn fail_next_fetch(&self, error: RemoteError) {
        let mut inner = self.inner.lock().await;
        let call = inner.fetch_calls + 1;
        inner.fetch_faults.insert(call, error);
    }

    async fn apply_latency(&self) {
        let latency = self.inner.lock().await.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    pub async fn record(&self, id: &str) -> Option<RemoteRecord> {
        self.inner.lock().await.records.get(id).cloned()
    }

    pub async fn record_count(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn modify_call_count(&self) -> u64 {
        self.inner.lock().await.modify_calls
    }

    pub async fn fetch_call_count(&self) -> u64 {
        self.inner.lock().await.fetch_calls
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn save_zone(&self, zone: &str) -> Result<(), RemoteError> {
        self.inner.lock().await.zones.insert(zone.to_string());
        Ok(())
    }

    async fn subscribe(&self, zone: &str) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().await;
        if !inner.zones.contains(zone) {
            return Err(RemoteError::ZoneNotFound(zone.to_string()));
        }
        inner.subscriptions.insert(zone.to_string());
        Ok(())
    }

    async fn modify(
        &self,
        saving: Vec<RemoteRecord>,
        deleting: Vec<RecordId>,
        _policy: SavePolicy,
        _atomic: bool,
    ) -> Result<ModifyResults, RemoteError> {
        self.apply_latency().await;
        let mut inner = self.inner.lock().await;
        inner.modify_calls += 1;
        let call = inner.modify_calls;
        if let Some(error) = inner.modify_faults.remove(&call) {
            return Err(error);
        }

        let mut results = ModifyResults::new();
        for incoming in saving {
            let id = incoming.record_id.clone();
            let verdict = match inner.records.get(&id) {
                None => Ok(()),
                Some(stored) => {
                    let same_content = stored.entry.meta.content_hash
                        == incoming.entry.meta.content_hash
                        && stored.entry.record.is_active() == incoming.entry.record.is_active();
                    let supersedes = incoming.entry.meta.happens_after(&stored.entry.meta)
                        || incoming.entry.record.sync_version > stored.entry.record.sync_version;
                    if same_content || supersedes {
                        Ok(())
                    } else {
                        Err(RemoteError::RecordChanged(id.clone()))
                    }
                }
            };
            match verdict {
                Ok(()) => {
                    let replay = inner
                        .records
                        .get(&id)
                        .is_some_and(|stored| stored.entry == incoming.entry);
                    if !replay {
                        inner.seq += 1;
                        let seq = inner.seq;
                        inner.records.insert(id.clone(), incoming);
                        inner.log.push((seq, id.clone(), LogEvent::Saved));
                    }
                    results.insert(id, Ok(()));
                }
                Err(error) => {
                    results.insert(id, Err(error));
                }
            }
        }
        for id in deleting {
            if inner.records.remove(&id).is_some() {
                inner.seq += 1;
                let seq = inner.seq;
                inner.log.push((seq, id.clone(), LogEvent::Deleted));
            }
            // Deleting an absent record is a successful no-op.
            results.insert(id, Ok(()));
        }
        Ok(results)
    }

    async fn fetch_zone_changes(
        &self,
        zone: &str,
        since: Option<&ChangeToken>,
    ) -> Result<ChangeSet, RemoteError> {
        self.apply_latency().await;
        let mut inner = self.inner.lock().await;
        inner.fetch_calls += 1;
        let call = inner.fetch_calls;
        if let Some(error) = inner.fetch_faults.remove(&call) {
            return Err(error);
        }
        if !inner.zones.contains(zone) {
            return Err(RemoteError::ZoneNotFound(zone.to_string()));
        }

        let since_seq = match since {
            None => 0,
            Some(token) => token
                .as_str()
                .parse::<u64>()
                .map_err(|_| RemoteError::Other(format!("bad change token: {}", token.as_str())))?,
        };

        let page: Vec<&(u64, RecordId, LogEvent)> = inner
            .log
            .iter()
            .filter(|(seq, _, _)| *seq > since_seq)
            .take(inner.page_size)
            .collect();
        let more = inner
            .log
            .iter()
            .filter(|(seq, _, _)| *seq > since_seq)
            .count()
            > page.len();
        let last_seq = page.last().map(|(seq, _, _)| *seq).unwrap_or(since_seq);

        // Coalesce per record: the page reports each record's latest
        // state once.
        let mut seen: BTreeSet<&RecordId> = BTreeSet::new();
        let mut modifications = Vec::new();
        let mut deletions = Vec::new();
        for (_, record_id, _) in page.iter().rev() {
            if !seen.insert(record_id) {
                continue;
            }
            match inner.records.get(record_id) {
                Some(record) => modifications.push(record.clone()),
                None => deletions.push(record_id.clone()),
            }
        }
        modifications.reverse();
        deletions.reverse();

        Ok(ChangeSet {
            modifications,
            deletions,
            token: ChangeToken(last_seq.to_string()),
            more,
        })
    }
}
