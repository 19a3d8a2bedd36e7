//! Error types for ncr-state

use thiserror::Error;

use crate::record::{RecordRef, VersionToken};

/// Errors raised while connecting to or preparing a backend
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// Kind registry could not be loaded
    #[error("Kind registry invalid: {0}")]
    Registry(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors surfaced by the collaborator traits (repository, search index,
/// event store, aggregate resolver).
#[derive(Error, Debug)]
pub enum StorageError {
    /// The requested record does not exist
    #[error("record not found: {record_ref}")]
    NotFound { record_ref: String },

    /// Optimistic write lost a race against another writer
    #[error("version conflict on {record_ref}: expected {expected}, found {actual}")]
    VersionConflict {
        record_ref: String,
        expected: String,
        actual: String,
    },

    /// A kind string or record reference failed to parse
    #[error("invalid record reference '{value}': {reason}")]
    InvalidRef { value: String, reason: String },

    /// Kind is not present in the registry
    #[error("unknown record kind: {kind}")]
    UnknownKind { kind: String },

    /// Kind is registered but lacks the capability the caller needs
    #[error("record kind {kind} does not implement capability {capability}")]
    MissingCapability { kind: String, capability: String },

    /// Event history could not be folded into an aggregate
    #[error("event replay failed for {record_ref} at seq {seq}: {reason}")]
    Replay {
        record_ref: String,
        seq: u64,
        reason: String,
    },

    /// Stream for a record kind could not be opened or broke mid-way
    #[error("stream unavailable for {kind}: {reason}")]
    StreamUnavailable { kind: String, reason: String },

    /// Bulk index request was rejected
    #[error("bulk index of {count} record(s) failed: {reason}")]
    BulkIndex { count: usize, reason: String },

    /// Run context is not a JSON object
    #[error("invalid context: {0}")]
    InvalidContext(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific error
    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// `true` for [`StorageError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// `true` for [`StorageError::VersionConflict`].
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StorageError::VersionConflict { .. })
    }

    /// Conflict between the token a writer expected and the one stored;
    /// `None` on either side reads as "absent".
    pub fn version_conflict(
        record_ref: &RecordRef,
        expected: Option<&VersionToken>,
        actual: Option<&VersionToken>,
    ) -> Self {
        let label = |t: Option<&VersionToken>| {
            t.map(|t| t.short().to_string())
                .unwrap_or_else(|| "absent".to_string())
        };
        StorageError::VersionConflict {
            record_ref: record_ref.to_string(),
            expected: label(expected),
            actual: label(actual),
        }
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_conflict_message_names_both_tokens() {
        let err = StorageError::VersionConflict {
            record_ref: "acme:article:1".to_string(),
            expected: "aaa".to_string(),
            actual: "bbb".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("acme:article:1"));
        assert!(msg.contains("aaa"));
        assert!(msg.contains("bbb"));
        assert!(err.is_version_conflict());
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_predicate() {
        let err = StorageError::NotFound {
            record_ref: "acme:article:2".to_string(),
        };
        assert!(err.is_not_found());
        assert!(err.to_string().contains("record not found"));
    }
}
