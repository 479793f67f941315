//! Error types for the Carrel core.

use crate::{FieldName, RecordId};
use thiserror::Error;

/// All possible errors from the deterministic core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("record not found: {0}")]
    RecordMissing(RecordId),

    #[error("invalid manual decision: {0}")]
    InvalidDecision(String),

    #[error("merge not representable for field '{field}' of record {record_id}")]
    MergeNotRepresentable {
        record_id: RecordId,
        field: FieldName,
    },

    #[error("invalid CRDT metadata for record {record_id}: {reason}")]
    InvalidMetadata { record_id: RecordId, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
