//! The sync engine: push/pull orchestration over the store ports.
//!
//! One engine instance owns a replica's sync. It pushes dirty records in
//! chunks, pulls remote changes behind an incremental change token,
//! routes divergence through the detector and resolver, and applies
//! everything a pull produces in one atomic local batch together with
//! the advanced token.
//!
//! The engine is the sole writer of `change_token`, `last_synced_at`,
//! and `sync_version`. Resolutions flow through it so the journal stays
//! ordered; a conflict is settled only once its journal entry is part of
//! the committed batch.

use crate::error::{Result, Retryability, SyncError};
use crate::notify::{EventCallback, Notifier, SubscriptionHandle, SyncEvent};
use crate::state::{backoff_delay, SyncPhase, SyncReport, SyncStats};
use crate::store::{
    LocalStore, PullBatch, RemoteError, RemoteRecord, RemoteStore, SavePolicy,
};
use carrel_core::{
    ConflictDetector, ConflictResolver, Divergence, JournalEntry, ManualDecision, RecordId,
    RecordWithMeta, ReplicaClock, ResolvedRecord, SyncConfig, TimeSource, Timestamp,
};
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Counters from the push phase.
#[derive(Debug, Default)]
struct PushOutcome {
    pushed: usize,
    failures: usize,
    /// Records the remote rejected as changed; they re-resolve on pull
    changed: Vec<RecordId>,
}

/// Counters from the pull phase.
#[derive(Debug, Default)]
struct PullOutcome {
    pulled: usize,
    deleted: usize,
    conflicts_resolved: usize,
    conflicts_deferred: usize,
}

/// Push/pull orchestrator for one replica.
pub struct SyncEngine {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    time: Arc<dyn TimeSource + Send + Sync>,
    config: SyncConfig,
    zone: String,
    detector: ConflictDetector,
    resolver: ConflictResolver,
    clock: Mutex<ReplicaClock>,
    notifier: Arc<Notifier>,
    phase: RwLock<SyncPhase>,
    stats: Mutex<SyncStats>,
    sync_gate: Mutex<()>,
    running: AtomicBool,
    cancelled: AtomicBool,
    zone_ready: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        time: Arc<dyn TimeSource + Send + Sync>,
        site_id: impl Into<String>,
        zone: impl Into<String>,
        config: SyncConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let detector = ConflictDetector::with_config(&config);
        let resolver = ConflictResolver::with_config(&config);
        Ok(Arc::new(Self {
            local,
            remote,
            time,
            zone: zone.into(),
            detector,
            resolver,
            clock: Mutex::new(ReplicaClock::new(site_id.into())),
            notifier: Notifier::new(),
            phase: RwLock::new(SyncPhase::Idle),
            stats: Mutex::new(SyncStats::default()),
            sync_gate: Mutex::new(()),
            running: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            zone_ready: AtomicBool::new(false),
            config,
        }))
    }

    /// Run one push/pull cycle.
    ///
    /// Re-entrancy guard: if a sync is already running, this returns
    /// immediately with `skipped = true` and no side effects.
    pub async fn sync(&self) -> Result<SyncReport> {
        let guard = match self.sync_gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("sync already in progress; skipping");
                return Ok(SyncReport {
                    skipped: true,
                    ..Default::default()
                });
            }
        };
        self.running.store(true, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);

        let result = self.run_cycle().await;

        self.running.store(false, Ordering::SeqCst);
        drop(guard);

        match result {
            Ok(report) => {
                self.stats.lock().await.absorb(&report);
                self.set_phase(SyncPhase::Idle).await;
                self.emit_progress(1.0);
                self.notifier.emit(SyncEvent::Completed(report));
                Ok(report)
            }
            Err(SyncError::Cancelled) => {
                tracing::info!("sync cancelled");
                self.set_phase(SyncPhase::Cancelled).await;
                self.set_phase(SyncPhase::Idle).await;
                Err(SyncError::Cancelled)
            }
            Err(err) => {
                tracing::error!(error = %err, "sync failed");
                self.stats.lock().await.failed_runs += 1;
                self.note_failure(&err).await;
                self.set_phase(SyncPhase::Failed {
                    message: err.to_string(),
                })
                .await;
                Err(err)
            }
        }
    }

    async fn run_cycle(&self) -> Result<SyncReport> {
        self.ensure_zone().await?;

        self.set_phase(SyncPhase::Pushing).await;
        self.emit_progress(0.0);
        let push = self.push().await?;
        if !push.changed.is_empty() {
            tracing::info!(
                records = push.changed.len(),
                "remote rejected changed records; they re-resolve on pull"
            );
        }
        self.check_cancelled()?;

        self.set_phase(SyncPhase::Pulling).await;
        let pull = self.pull().await?;

        Ok(SyncReport {
            pushed: push.pushed,
            push_failures: push.failures,
            pulled: pull.pulled,
            deleted: pull.deleted,
            conflicts_resolved: pull.conflicts_resolved,
            conflicts_deferred: pull.conflicts_deferred,
            skipped: false,
        })
    }

    /// Push local changes in chunks of at most `records_per_chunk`.
    async fn push(&self) -> Result<PushOutcome> {
        let mut pending = self.local.pending_since(None).await?;
        let mut outcome = PushOutcome::default();
        if pending.is_empty() {
            self.emit_progress(0.5);
            return Ok(outcome);
        }
        // Deterministic chunk layout across runs.
        pending.sort_by(|a, b| a.record.id.cmp(&b.record.id));

        let chunk_size = self.config.records_per_chunk;
        let total_chunks = pending.len().div_ceil(chunk_size);

        for (index, chunk) in pending.chunks(chunk_size).enumerate() {
            self.check_cancelled()?;

            let mut saving = Vec::new();
            let mut deleting = Vec::new();
            for entry in chunk {
                if entry.record.is_active() {
                    saving.push(RemoteRecord::from_local(entry));
                } else {
                    deleting.push(entry.record.id.clone());
                }
            }

            let remote = Arc::clone(&self.remote);
            let results = self
                .with_retries("push chunk", SyncPhase::Pushing, || {
                    let remote = Arc::clone(&remote);
                    let saving = saving.clone();
                    let deleting = deleting.clone();
                    async move {
                        remote
                            .modify(saving, deleting, SavePolicy::ChangedKeys, false)
                            .await
                            .map_err(SyncError::from)
                    }
                })
                .await?;

            let mut succeeded: Vec<RecordId> = Vec::new();
            for (record_id, record_result) in results {
                match record_result {
                    Ok(()) => succeeded.push(record_id),
                    Err(RemoteError::RecordChanged(_)) => {
                        tracing::debug!(%record_id, "record changed remotely; deferring to pull");
                        outcome.changed.push(record_id);
                    }
                    Err(err) => {
                        tracing::warn!(%record_id, error = %err, "record failed to save");
                        outcome.failures += 1;
                    }
                }
            }

            if !succeeded.is_empty() {
                let now = self.time.now_ms();
                let local = Arc::clone(&self.local);
                self.with_retries("mark synced", SyncPhase::Pushing, || {
                    let local = Arc::clone(&local);
                    let ids = succeeded.clone();
                    async move { local.mark_synced(&ids, now).await.map_err(SyncError::from) }
                })
                .await?;
                outcome.pushed += succeeded.len();
            }

            self.emit_progress((index + 1) as f64 / total_chunks as f64 * 0.5);
        }
        Ok(outcome)
    }

    /// Pull remote changes since the saved token and apply them
    /// atomically together with the new token.
    async fn pull(&self) -> Result<PullOutcome> {
        let mut outcome = PullOutcome::default();
        let mut state = self.local.load_sync_state().await?;

        loop {
            self.check_cancelled()?;

            let since = state.change_token.clone();
            let remote = Arc::clone(&self.remote);
            let zone = self.zone.clone();
            let changes = self
                .with_retries("fetch zone changes", SyncPhase::Pulling, || {
                    let remote = Arc::clone(&remote);
                    let zone = zone.clone();
                    let since = since.clone();
                    async move {
                        remote
                            .fetch_zone_changes(&zone, since.as_ref())
                            .await
                            .map_err(SyncError::from)
                    }
                })
                .await?;

            let total = (changes.modifications.len() + changes.deletions.len()).max(1);
            let mut processed = 0usize;
            let mut batch = PullBatch::default();
            let now = self.time.now_ms();

            for wire in changes.modifications {
                self.apply_modification(wire, &mut batch, &mut outcome, now)
                    .await?;
                processed += 1;
                self.emit_progress(0.5 + 0.5 * processed as f64 / total as f64);
            }

            for record_id in changes.deletions {
                batch.deletions.push((record_id, now));
                outcome.deleted += 1;
                processed += 1;
                self.emit_progress(0.5 + 0.5 * processed as f64 / total as f64);
            }

            // The token moves only inside the same committed batch.
            state.change_token = Some(changes.token.clone());
            state.last_sync_at = Some(Utc::now());
            state.consecutive_failures = 0;
            state.last_error = None;
            state.conflict_count = state
                .conflict_count
                .saturating_sub(batch.settled.len() as u64)
                + batch.conflicts.len() as u64;
            batch.state = state.clone();

            let local = Arc::clone(&self.local);
            self.with_retries("commit pull", SyncPhase::Pulling, || {
                let local = Arc::clone(&local);
                let batch = batch.clone();
                async move { local.commit_pull(batch).await.map_err(SyncError::from) }
            })
            .await?;

            if !changes.more {
                break;
            }
        }
        Ok(outcome)
    }

    async fn apply_modification(
        &self,
        wire: RemoteRecord,
        batch: &mut PullBatch,
        outcome: &mut PullOutcome,
        now: Timestamp,
    ) -> Result<()> {
        let mut incoming = wire.into_local();
        // Observing remote metadata keeps db_version monotone across
        // the replica.
        let clock = {
            let mut clock = self.clock.lock().await;
            clock.observe(incoming.meta.db_version);
            clock.clone()
        };
        let accept = |incoming: &mut RecordWithMeta| {
            incoming.meta.increment_for_sync(&clock);
            incoming.record.last_synced_at = Some(now);
        };

        let existing = self.local.get_record(&incoming.record.id).await?;
        let Some(existing) = existing else {
            accept(&mut incoming);
            batch.upserts.push(incoming);
            outcome.pulled += 1;
            return Ok(());
        };

        // Clean local replica and a strictly newer applied sync: accept
        // without running detection.
        if !existing.record.is_dirty()
            && incoming.record.sync_version > existing.record.sync_version
        {
            accept(&mut incoming);
            batch.upserts.push(incoming);
            outcome.pulled += 1;
            return Ok(());
        }

        match self.detector.assess(&existing, &incoming, now) {
            Divergence::InSync | Divergence::LocalAhead => {}
            Divergence::RemoteAhead => {
                accept(&mut incoming);
                batch.upserts.push(incoming);
                outcome.pulled += 1;
            }
            Divergence::Diverged(info) => {
                let info = *info;
                self.notifier
                    .emit(SyncEvent::ConflictDetected(Box::new(info.clone())));
                let (resolved, deferred) =
                    self.resolver
                        .resolve_with_strategy(info, self.config.default_strategy, now);
                for resolution in resolved {
                    self.stage_resolution(resolution, batch);
                    outcome.conflicts_resolved += 1;
                }
                for conflict in deferred {
                    tracing::info!(record_id = %conflict.record_id, "conflict deferred to manual resolution");
                    batch.conflicts.push(conflict);
                    outcome.conflicts_deferred += 1;
                }
            }
        }
        Ok(())
    }

    fn stage_resolution(&self, resolution: ResolvedRecord, batch: &mut PullBatch) {
        let details = serde_json::json!({
            "trigger": "pull",
            "localVersion": resolution.local_version,
            "remoteVersion": resolution.remote_version,
        });
        batch
            .journal
            .push(JournalEntry::from_resolution(&resolution, details));
        batch.settled.push(resolution.record.id.clone());
        batch
            .upserts
            .push(RecordWithMeta::new(resolution.record, resolution.meta));
    }

    /// Apply a manual decision to a queued conflict.
    ///
    /// The journal entry is written before the conflict row is cleared;
    /// a conflict without its entry is not settled.
    pub async fn resolve_manually(
        &self,
        record_id: &str,
        decision: &ManualDecision,
    ) -> Result<SyncReport> {
        let conflicts = self.local.pending_conflicts().await?;
        let Some(conflict) = conflicts.into_iter().find(|c| c.record_id == record_id) else {
            return Err(SyncError::Core(carrel_core::Error::RecordMissing(
                record_id.to_string(),
            )));
        };

        let now = self.time.now_ms();
        let resolution = self.resolver.apply_manual(&conflict, decision, now)?;
        let details = serde_json::json!({
            "trigger": "manual",
            "localVersion": resolution.local_version,
            "remoteVersion": resolution.remote_version,
        });
        self.local
            .journal_append(JournalEntry::from_resolution(&resolution, details))
            .await?;
        self.local
            .upsert_record(RecordWithMeta::new(resolution.record, resolution.meta))
            .await?;
        self.local.clear_conflict(record_id).await?;

        let mut state = self.local.load_sync_state().await?;
        state.conflict_count = state.conflict_count.saturating_sub(1);
        self.local.save_sync_state(&state).await?;

        Ok(SyncReport {
            conflicts_resolved: 1,
            ..Default::default()
        })
    }

    /// Side-by-side diff for a queued conflict, for manual-resolution UI.
    pub async fn prepare_manual(&self, record_id: &str) -> Result<carrel_core::ConflictDiff> {
        let conflicts = self.local.pending_conflicts().await?;
        let Some(conflict) = conflicts.into_iter().find(|c| c.record_id == record_id) else {
            return Err(SyncError::Core(carrel_core::Error::RecordMissing(
                record_id.to_string(),
            )));
        };
        Ok(self.resolver.prepare_manual(&conflict))
    }

    /// Create the zone and subscription once. Both remote calls are
    /// idempotent.
    async fn ensure_zone(&self) -> Result<()> {
        if self.zone_ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        let remote = Arc::clone(&self.remote);
        let zone = self.zone.clone();
        self.with_retries("save zone", SyncPhase::Pushing, || {
            let remote = Arc::clone(&remote);
            let zone = zone.clone();
            async move { remote.save_zone(&zone).await.map_err(SyncError::from) }
        })
        .await?;
        let remote = Arc::clone(&self.remote);
        let zone = self.zone.clone();
        self.with_retries("subscribe", SyncPhase::Pushing, || {
            let remote = Arc::clone(&remote);
            let zone = zone.clone();
            async move { remote.subscribe(&zone).await.map_err(SyncError::from) }
        })
        .await?;
        self.zone_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Run an operation under the soft deadline, retrying transient
    /// failures with exponential backoff and honoring rate-limit hints.
    async fn with_retries<T, F, Fut>(&self, what: &str, resume: SyncPhase, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.check_cancelled()?;
            self.set_phase(resume.clone()).await;

            let outcome = match tokio::time::timeout(self.config.operation_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(self.config.operation_timeout)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.retryability() == Retryability::Transient => {
                    if attempt > self.config.max_retries {
                        return Err(SyncError::RetriesExhausted {
                            attempts: attempt,
                            last: err.to_string(),
                        });
                    }
                    let delay = backoff_delay(&self.config, attempt, err.retry_after());
                    tracing::warn!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure; backing off"
                    );
                    self.set_phase(SyncPhase::Backoff { attempt }).await;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn note_failure(&self, err: &SyncError) {
        match self.local.load_sync_state().await {
            Ok(mut state) => {
                state.consecutive_failures += 1;
                state.last_error = Some(err.to_string());
                if let Err(save_err) = self.local.save_sync_state(&state).await {
                    tracing::warn!(error = %save_err, "failed to persist failure state");
                }
            }
            Err(load_err) => {
                tracing::warn!(error = %load_err, "failed to load sync state after failure");
            }
        }
    }

    /// Request cancellation. Takes effect at the next chunk boundary or
    /// phase transition; in-flight remote effects reconcile on the next
    /// pull.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn phase(&self) -> SyncPhase {
        self.phase.read().await.clone()
    }

    pub async fn stats(&self) -> SyncStats {
        *self.stats.lock().await
    }

    /// Observe sync events. Dropping the handle unsubscribes.
    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionHandle {
        self.notifier.subscribe(callback)
    }

    async fn set_phase(&self, phase: SyncPhase) {
        let mut current = self.phase.write().await;
        if *current != phase {
            *current = phase.clone();
            drop(current);
            self.notifier.emit(SyncEvent::PhaseChanged(phase));
        }
    }

    fn emit_progress(&self, progress: f64) {
        self.notifier
            .emit(SyncEvent::Progress(progress.clamp(0.0, 1.0)));
    }
}
