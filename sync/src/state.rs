//! Sync phase machine, statistics, and backoff math.

use carrel_core::SyncConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the engine currently is.
///
/// Normal flow is `Idle -> Pushing -> Pulling -> Idle`. Transient
/// failures detour through `Backoff`; non-retryable failures land in
/// `Failed`; `Cancelled` resets to `Idle` after cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum SyncPhase {
    Idle,
    Pushing,
    Pulling,
    Backoff { attempt: u32 },
    Failed { message: String },
    Cancelled,
}

impl SyncPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Failed { .. } | SyncPhase::Cancelled)
    }
}

/// Counters from one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub pushed: usize,
    pub push_failures: usize,
    pub pulled: usize,
    pub deleted: usize,
    pub conflicts_resolved: usize,
    pub conflicts_deferred: usize,
    /// The run was a no-op because another sync was already running
    pub skipped: bool,
}

/// Aggregate statistics across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub runs: u64,
    pub total_pushed: u64,
    pub total_pulled: u64,
    pub conflicts_resolved: u64,
    pub conflicts_deferred: u64,
    pub failed_runs: u64,
}

impl SyncStats {
    pub fn absorb(&mut self, report: &SyncReport) {
        self.runs += 1;
        self.total_pushed += report.pushed as u64;
        self.total_pulled += report.pulled as u64;
        self.conflicts_resolved += report.conflicts_resolved as u64;
        self.conflicts_deferred += report.conflicts_deferred as u64;
    }
}

/// Delay before retry attempt `attempt` (1-based):
/// `min(base * 2^(attempt-1), max)` plus up to 25% jitter, floored at
/// any `retry_after` hint the remote provided.
pub fn backoff_delay(
    config: &SyncConfig,
    attempt: u32,
    retry_after: Option<Duration>,
) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let exponential = config
        .base_retry_delay
        .saturating_mul(1u32 << exponent)
        .min(config.max_retry_delay);
    let jitter_ms = (exponential.as_millis() as u64 / 4).max(1);
    let delay = exponential + Duration::from_millis(fastrand::u64(0..jitter_ms));
    match retry_after {
        Some(hint) if hint > delay => hint,
        _ => delay,
    }
}
