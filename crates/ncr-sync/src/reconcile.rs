//! Reconciliation engine: bring a stored record in line with its events.

use std::fmt;
use std::sync::Arc;

use ncr_state::{
    Aggregate, AggregateResolver, Context, Record, RecordRef, Repository, StorageError,
    VersionToken,
};
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, SyncError};

/// How a record enters reconciliation.
#[derive(Debug, Clone)]
pub enum EntryState {
    /// The stored record is known; its etag is the expected version.
    FromSnapshot(Record),
    /// Rebuild from the whole history. `expected` is the stored etag when a
    /// record exists, `None` to insert only if absent.
    FromReferenceOnly {
        record_ref: RecordRef,
        expected: Option<VersionToken>,
    },
}

impl EntryState {
    pub fn record_ref(&self) -> &RecordRef {
        match self {
            EntryState::FromSnapshot(record) => record.record_ref(),
            EntryState::FromReferenceOnly { record_ref, .. } => record_ref,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// New state written to the repository
    Synced,
    /// Already current, nothing written
    Matched,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Synced => "SYNCED",
            Outcome::Matched => "MATCHED",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of reconciling one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub record_ref: RecordRef,
    pub outcome: Outcome,
    /// State after replay; what should be indexed when `Synced`
    pub record: Record,
}

/// Runs one record through resolve, replay, compare and conditional put.
///
/// Index writes are left to the caller so batch runs can group them.
pub struct Reconciler {
    resolver: Arc<dyn AggregateResolver>,
    repository: Arc<dyn Repository>,
}

impl Reconciler {
    pub fn new(resolver: Arc<dyn AggregateResolver>, repository: Arc<dyn Repository>) -> Self {
        Self {
            resolver,
            repository,
        }
    }

    pub async fn reconcile(&self, entry: EntryState, ctx: &Context) -> Result<Reconciled> {
        let record_ref = entry.record_ref().clone();

        let (expected, mut aggregate): (Option<VersionToken>, Box<dyn Aggregate>) = match entry {
            EntryState::FromSnapshot(record) => {
                let expected = record.etag().clone();
                let aggregate = self
                    .resolver
                    .from_snapshot(record, ctx)
                    .await
                    .map_err(|e| aggregate_error(&record_ref, e))?;
                (Some(expected), aggregate)
            }
            EntryState::FromReferenceOnly { expected, .. } => {
                let aggregate = self
                    .resolver
                    .from_reference(&record_ref, ctx)
                    .await
                    .map_err(|e| aggregate_error(&record_ref, e))?;
                (expected, aggregate)
            }
        };

        aggregate
            .sync(ctx)
            .await
            .map_err(|e| aggregate_error(&record_ref, e))?;

        // an empty history has no state to write
        let record = aggregate.current_record()?;

        if aggregate.current_version() == expected.as_ref() {
            debug!(record_ref = %record_ref, "etag unchanged");
            return Ok(Reconciled {
                record_ref,
                outcome: Outcome::Matched,
                record,
            });
        }

        self.repository.put(&record, expected.as_ref(), ctx).await?;
        debug!(
            record_ref = %record_ref,
            etag = record.etag().short(),
            "repository updated"
        );

        Ok(Reconciled {
            record_ref,
            outcome: Outcome::Synced,
            record,
        })
    }
}

fn aggregate_error(record_ref: &RecordRef, err: StorageError) -> SyncError {
    match err {
        StorageError::Replay { .. } | StorageError::NotFound { .. } => SyncError::from_storage(err),
        other => SyncError::Aggregate {
            record_ref: record_ref.to_string(),
            reason: other.to_string(),
        },
    }
}
