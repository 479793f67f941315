//! Adaptive sync scheduling.
//!
//! The monitor decides how often the engine runs, from activity signals
//! and recent conflict density. It owns no sync state and performs no
//! sync work itself; it only schedules [`SyncEngine::sync`] invocations.

use crate::engine::SyncEngine;
use crate::notify::SyncEvent;
use carrel_core::{SyncConfig, TimeSource, Timestamp};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long a conflict stays in the decision history.
const CONFLICT_HISTORY_WINDOW: Duration = Duration::from_secs(300);

/// How recent activity or conflicts must be to tighten the cadence.
const RECENCY_WINDOW: Duration = Duration::from_secs(60);

/// Activity-driven polling schedule.
pub struct AdaptiveMonitor {
    config: SyncConfig,
    time: Arc<dyn TimeSource + Send + Sync>,
    editing: AtomicBool,
    last_activity_ms: AtomicU64,
    conflict_history: Mutex<VecDeque<Timestamp>>,
}

impl AdaptiveMonitor {
    pub fn new(config: SyncConfig, time: Arc<dyn TimeSource + Send + Sync>) -> Arc<Self> {
        Arc::new(Self {
            config,
            time,
            editing: AtomicBool::new(false),
            last_activity_ms: AtomicU64::new(0),
            conflict_history: Mutex::new(VecDeque::new()),
        })
    }

    /// Signal that an editing session started or ended.
    pub fn set_editing(&self, editing: bool) {
        self.editing.store(editing, Ordering::SeqCst);
        if editing {
            self.record_activity();
        }
    }

    /// Signal user activity (navigation, edits, searches).
    pub fn record_activity(&self) {
        self.last_activity_ms
            .store(self.time.now_ms(), Ordering::SeqCst);
    }

    /// Record a detected conflict into the bounded history.
    pub fn record_conflict(&self) {
        let now = self.time.now_ms();
        let Ok(mut history) = self.conflict_history.lock() else {
            return;
        };
        history.push_back(now);
        let horizon = now.saturating_sub(CONFLICT_HISTORY_WINDOW.as_millis() as u64);
        while history.front().is_some_and(|&t| t < horizon) {
            history.pop_front();
        }
    }

    /// The polling interval implied by the current signals.
    ///
    /// Editing wins, then recent activity, then recent conflicts, then
    /// the idle cadence.
    pub fn current_interval(&self) -> Duration {
        let active = self.config.active_interval;
        if self.editing.load(Ordering::SeqCst) {
            return active;
        }

        let now = self.time.now_ms();
        let recency_ms = RECENCY_WINDOW.as_millis() as u64;

        let last_activity = self.last_activity_ms.load(Ordering::SeqCst);
        if last_activity > 0 && now.saturating_sub(last_activity) < recency_ms {
            return active * 2;
        }

        let recent_conflict = self
            .conflict_history
            .lock()
            .map(|history| {
                history
                    .back()
                    .is_some_and(|&t| now.saturating_sub(t) < recency_ms)
            })
            .unwrap_or(false);
        if recent_conflict {
            return active.mul_f64(1.5);
        }

        self.config.idle_interval
    }

    /// Number of conflicts currently inside the history window.
    pub fn recent_conflict_count(&self) -> usize {
        let now = self.time.now_ms();
        let horizon = now.saturating_sub(CONFLICT_HISTORY_WINDOW.as_millis() as u64);
        self.conflict_history
            .lock()
            .map(|history| history.iter().filter(|&&t| t >= horizon).count())
            .unwrap_or(0)
    }

    /// Drive the engine on the adaptive cadence until the handle stops.
    ///
    /// The monitor subscribes to the engine's conflict events so the
    /// cadence tightens while conflicts are fresh.
    pub fn spawn(self: &Arc<Self>, engine: Arc<SyncEngine>) -> MonitorHandle {
        let monitor = Arc::clone(self);
        let stopped = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stopped);

        let conflict_feed = Arc::clone(self);
        let subscription = engine.subscribe(Box::new(move |event| {
            if matches!(event, SyncEvent::ConflictDetected(_)) {
                conflict_feed.record_conflict();
            }
        }));

        let task: JoinHandle<()> = tokio::spawn(async move {
            // Keep the subscription alive for the task's lifetime.
            let _subscription = subscription;
            loop {
                let interval = monitor.current_interval();
                tokio::time::sleep(interval).await;
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                match engine.sync().await {
                    Ok(report) if report.skipped => {
                        tracing::debug!("scheduled sync skipped; previous run still active")
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "scheduled sync failed"),
                }
            }
        });

        MonitorHandle { stopped, task }
    }
}

/// Stops the monitor loop when asked or dropped.
pub struct MonitorHandle {
    stopped: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
