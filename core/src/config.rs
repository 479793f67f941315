//! Sync configuration.
//!
//! Everything here is a tunable, not an invariant. The conflict window
//! and the auto-resolution window in particular were tuned empirically in
//! production and are exposed so deployments can adjust them.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Strategy applied to a conflict, used both as the configured default
/// and as the label recorded in the resolution journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    ServerWins,
    LocalWins,
    /// Whole-record last-write-wins with site-id tiebreak
    LatestWins,
    #[default]
    FieldLevelMerge,
    LastWriteWins,
    Manual,
}

/// Version/time bounds within which divergence counts as a live conflict
/// rather than stale history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictWindows {
    /// Maximum `column_version` gap
    pub version_window: u64,
    /// Maximum `last_write_wins` gap in milliseconds
    pub time_window_ms: u64,
}

/// Configuration for the whole sync core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Polling interval while the user is editing
    pub active_interval: Duration,
    /// Polling interval when idle
    pub idle_interval: Duration,
    /// Maximum wall-clock gap between local and remote modification for
    /// which automatic resolution is attempted
    pub auto_resolution_window: Duration,
    /// Time half of the conflict-vs-stale window
    pub conflict_window: Duration,
    /// Version half of the conflict-vs-stale window
    pub conflict_version_window: u64,
    /// Remote per-operation record cap
    pub records_per_chunk: usize,
    /// First retry delay
    pub base_retry_delay: Duration,
    /// Retry delay ceiling
    pub max_retry_delay: Duration,
    pub max_retries: u32,
    /// Soft deadline for a single remote or durable operation
    pub operation_timeout: Duration,
    /// Journal ring size per record
    pub journal_retention_per_record: usize,
    pub default_strategy: ResolutionStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_secs(2),
            idle_interval: Duration::from_secs(30),
            auto_resolution_window: Duration::from_secs(300),
            conflict_window: Duration::from_secs(30),
            conflict_version_window: 2,
            records_per_chunk: 400,
            base_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(300),
            max_retries: 5,
            operation_timeout: Duration::from_secs(30),
            journal_retention_per_record: 10,
            default_strategy: ResolutionStrategy::FieldLevelMerge,
        }
    }
}

impl SyncConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.records_per_chunk == 0 {
            return Err(Error::InvalidConfig("records_per_chunk must be > 0".into()));
        }
        if self.journal_retention_per_record == 0 {
            return Err(Error::InvalidConfig(
                "journal_retention_per_record must be > 0".into(),
            ));
        }
        if self.base_retry_delay > self.max_retry_delay {
            return Err(Error::InvalidConfig(
                "base_retry_delay must not exceed max_retry_delay".into(),
            ));
        }
        if self.active_interval.is_zero() || self.idle_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "polling intervals must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// The conflict-vs-stale window in the form the metadata layer takes.
    pub fn conflict_windows(&self) -> ConflictWindows {
        ConflictWindows {
            version_window: self.conflict_version_window,
            time_window_ms: self.conflict_window.as_millis() as u64,
        }
    }

    /// Auto-resolution window in milliseconds.
    pub fn auto_window_ms(&self) -> u64 {
        self.auto_resolution_window.as_millis() as u64
    }
}
