//! Collaborator trait definitions for NCR Sync
//!
//! These traits define the services the pipeline talks to:
//! - `Repository`: node storage (stream / get / conditional put)
//! - `SearchIndex`: bulk indexing of records
//! - `EventStore`: per-record event history
//! - `AggregateResolver` / `Aggregate`: event-sourced reconstruction
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module; SurrealDB implementations live in
//! `surreal_repository`, `surreal_search` and `surreal_events`.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::context::Context;
use crate::error::StorageError;
use crate::events::RecordEvent;
use crate::record::{Record, RecordKind, RecordRef, VersionToken};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Lazy, forward-only stream of records for one kind.
pub type RecordStream = BoxStream<'static, StorageResult<Record>>;

// ---------------------------------------------------------------------------
// Repository: node storage
// ---------------------------------------------------------------------------

/// Node repository.
///
/// Guarantees:
/// - `stream` yields every record of one kind for the context's tenant, in a
///   stable repository-defined order. The stream cannot be restarted.
/// - `get` returns `StorageError::NotFound` when the record is absent.
/// - `put` is atomic per record. With `expected = Some(t)` it succeeds only
///   if the stored etag equals `t`; with `expected = None` it succeeds only
///   if no record exists. Any mismatch is `StorageError::VersionConflict`.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Open a stream over all records of `kind`.
    async fn stream(&self, kind: &RecordKind, ctx: &Context) -> StorageResult<RecordStream>;

    /// Fetch one record. `consistent` requests a strongly consistent read
    /// where the backend distinguishes.
    async fn get(&self, record_ref: &RecordRef, consistent: bool, ctx: &Context)
        -> StorageResult<Record>;

    /// Conditionally write a record.
    async fn put(
        &self,
        record: &Record,
        expected: Option<&VersionToken>,
        ctx: &Context,
    ) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// SearchIndex: bulk indexing
// ---------------------------------------------------------------------------

/// Search index.
///
/// `bulk_index` is all-or-nothing from the caller's point of view: it either
/// indexes every record or returns an error.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn bulk_index(&self, records: &[Record], ctx: &Context) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// EventStore: record histories
// ---------------------------------------------------------------------------

/// Append-only per-record event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an event. Fails if an event with the same seq exists.
    async fn append(&self, event: RecordEvent, ctx: &Context) -> StorageResult<()>;

    /// Events with `seq > after_seq`, ordered by seq.
    async fn events_after(
        &self,
        record_ref: &RecordRef,
        after_seq: u64,
        ctx: &Context,
    ) -> StorageResult<Vec<RecordEvent>>;
}

// ---------------------------------------------------------------------------
// Aggregates: event-sourced reconstruction
// ---------------------------------------------------------------------------

/// Event-sourced state of one record.
#[async_trait]
pub trait Aggregate: Send {
    /// Replay every event not yet reflected in the current state.
    async fn sync(&mut self, ctx: &Context) -> StorageResult<()>;

    /// Etag of the current state; `None` while the history is empty.
    fn current_version(&self) -> Option<&VersionToken>;

    /// The current state as a record; `NotFound` while the history is empty.
    fn current_record(&self) -> StorageResult<Record>;
}

/// Builds aggregates for records.
#[async_trait]
pub trait AggregateResolver: Send + Sync {
    /// Start from a known snapshot; only later events are replayed.
    async fn from_snapshot(&self, record: Record, ctx: &Context)
        -> StorageResult<Box<dyn Aggregate>>;

    /// Start from nothing; the whole history is replayed.
    async fn from_reference(
        &self,
        record_ref: &RecordRef,
        ctx: &Context,
    ) -> StorageResult<Box<dyn Aggregate>>;
}
