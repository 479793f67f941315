//! Unified error handling for sync orchestration.
//!
//! Errors carry a [`Retryability`] classification instead of driving
//! control flow through panics: the engine's state machine consumes the
//! classification to decide between backoff, re-pull, surfacing to the
//! caller, or halting.

use crate::store::{RemoteError, StoreError};
use std::time::Duration;

/// How an error should be treated by the sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    /// Back off with jitter and retry, up to the configured limit
    Transient,
    /// The remote has newer state; re-pull, re-resolve, re-attempt
    AuthoritativeState,
    /// Abort the operation and surface to the caller
    NonRetryable,
    /// Halt sync and expose a diagnostic state
    Fatal,
}

/// Sync orchestration error.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("local store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] carrel_core::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("sync cancelled")]
    Cancelled,

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("resolution journal corrupted: {0}")]
    JournalCorrupted(String),
}

impl SyncError {
    /// Classify per the error taxonomy.
    pub fn retryability(&self) -> Retryability {
        match self {
            SyncError::Remote(remote) => remote.retryability(),
            SyncError::Store(StoreError::WriteContention) => Retryability::Transient,
            SyncError::Store(StoreError::Corrupted(_)) => Retryability::Fatal,
            SyncError::Store(_) => Retryability::NonRetryable,
            SyncError::Core(carrel_core::Error::InvalidMetadata { .. }) => Retryability::Fatal,
            SyncError::Core(_) => Retryability::NonRetryable,
            SyncError::Timeout(_) => Retryability::Transient,
            SyncError::Cancelled => Retryability::NonRetryable,
            SyncError::RetriesExhausted { .. } => Retryability::NonRetryable,
            SyncError::JournalCorrupted(_) => Retryability::Fatal,
        }
    }

    /// Retry hint from rate-limiting responses, when the remote gave one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::Remote(RemoteError::RateLimited { retry_after })
            | SyncError::Remote(RemoteError::ServiceUnavailable { retry_after }) => *retry_after,
            _ => None,
        }
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_classify_per_taxonomy() {
        let transient = SyncError::Remote(RemoteError::NetworkUnavailable);
        assert_eq!(transient.retryability(), Retryability::Transient);

        let rate_limited = SyncError::Remote(RemoteError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        });
        assert_eq!(rate_limited.retryability(), Retryability::Transient);
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(5)));

        let quota = SyncError::Remote(RemoteError::QuotaExceeded);
        assert_eq!(quota.retryability(), Retryability::NonRetryable);

        let changed = SyncError::Remote(RemoteError::RecordChanged("note_1".into()));
        assert_eq!(changed.retryability(), Retryability::AuthoritativeState);
    }

    #[test]
    fn local_and_internal_errors_classify() {
        assert_eq!(
            SyncError::Store(StoreError::WriteContention).retryability(),
            Retryability::Transient
        );
        assert_eq!(
            SyncError::Store(StoreError::Corrupted("bad row".into())).retryability(),
            Retryability::Fatal
        );
        assert_eq!(
            SyncError::Timeout(Duration::from_secs(30)).retryability(),
            Retryability::Transient
        );
        assert_eq!(
            SyncError::JournalCorrupted("truncated".into()).retryability(),
            Retryability::Fatal
        );
        assert_eq!(
            SyncError::Core(carrel_core::Error::InvalidDecision("x".into())).retryability(),
            Retryability::NonRetryable
        );
    }
}
