//! Pipeline error taxonomy.

use ncr_state::StorageError;

/// Errors produced by the reindex / sync pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Repository stream could not be opened or broke mid-run. Fatal.
    #[error("source unavailable for {kind}: {reason}")]
    SourceUnavailable { kind: String, reason: String },

    /// Whole-batch bulk operation failed; recovered by chunking.
    #[error("bulk operation failed for batch {batch} ({count} records): {reason}")]
    BulkOperationFailed {
        batch: u64,
        count: usize,
        reason: String,
    },

    /// A chunk failed after the batch degraded.
    #[error("chunk {chunk} of batch {batch} failed ({count} records, first {first_ref}): {reason}")]
    ChunkFailed {
        batch: u64,
        chunk: usize,
        count: usize,
        first_ref: String,
        reason: String,
    },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("version conflict on {record_ref}: expected {expected}, found {actual}")]
    VersionConflict {
        record_ref: String,
        expected: String,
        actual: String,
    },

    /// Aggregate could not be resolved or replayed.
    #[error("aggregate error for {record_ref}: {reason}")]
    Aggregate { record_ref: String, reason: String },

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Lift a collaborator error, keeping not-found and conflicts distinct.
    pub fn from_storage(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { record_ref } => SyncError::NotFound(record_ref),
            StorageError::VersionConflict {
                record_ref,
                expected,
                actual,
            } => SyncError::VersionConflict {
                record_ref,
                expected,
                actual,
            },
            StorageError::StreamUnavailable { kind, reason } => {
                SyncError::SourceUnavailable { kind, reason }
            }
            StorageError::Replay {
                record_ref,
                seq,
                reason,
            } => SyncError::Aggregate {
                record_ref,
                reason: format!("seq {seq}: {reason}"),
            },
            other => SyncError::Storage(other),
        }
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, SyncError::VersionConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        SyncError::from_storage(err)
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, SyncError>;
