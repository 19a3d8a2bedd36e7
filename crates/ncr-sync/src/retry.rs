//! Degrading retry executor.
//!
//! A batch is first sent whole. If that fails it is split into
//! `chunk_divisor` chunks, each retried once after a short pause, so a single
//! bad record costs one chunk instead of the whole batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ncr_state::{Context, Record, SearchIndex, StorageResult};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::obs;
use crate::window::Batch;

/// An all-or-nothing operation over a slice of records.
#[async_trait]
pub trait BulkOperation: Send + Sync {
    /// Short name used in logs ("index").
    fn name(&self) -> &'static str;

    async fn apply(&self, records: &[Record], ctx: &Context) -> StorageResult<()>;
}

/// Bulk indexing into a [`SearchIndex`].
pub struct BulkIndex {
    index: Arc<dyn SearchIndex>,
}

impl BulkIndex {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl BulkOperation for BulkIndex {
    fn name(&self) -> &'static str {
        "index"
    }

    async fn apply(&self, records: &[Record], ctx: &Context) -> StorageResult<()> {
        self.index.bulk_index(records, ctx).await
    }
}

/// What happened to one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Records the bulk operation accepted (or would have, in a dry run)
    pub applied: usize,
    /// Chunks that failed and were skipped
    pub failed_chunks: usize,
    /// Records inside the skipped chunks
    pub failed_records: usize,
    /// The whole-batch attempt failed and the batch was chunked
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    chunk_divisor: usize,
    chunk_pause: Duration,
    dry_run: bool,
}

impl RetryExecutor {
    pub fn new(chunk_divisor: usize, chunk_pause: Duration, dry_run: bool) -> Self {
        Self {
            chunk_divisor: chunk_divisor.max(1),
            chunk_pause,
            dry_run,
        }
    }

    /// Chunk length for a batch of `len` records.
    pub fn chunk_size(&self, len: usize) -> usize {
        len.div_ceil(self.chunk_divisor).max(1)
    }

    /// Run `op` over `batch`.
    ///
    /// Returns the number of records applied across the attempts. With
    /// `skip_errors` false the first failing chunk aborts the batch with
    /// [`SyncError::ChunkFailed`].
    pub async fn execute(
        &self,
        op: &dyn BulkOperation,
        batch: &Batch,
        ctx: &Context,
        skip_errors: bool,
    ) -> Result<BatchOutcome> {
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }

        if self.dry_run {
            obs::emit_batch_dry_run(batch.index, batch.len(), op.name());
            return Ok(BatchOutcome {
                applied: batch.len(),
                ..BatchOutcome::default()
            });
        }

        let err = match op.apply(&batch.records, ctx).await {
            Ok(()) => {
                obs::emit_batch_dispatched(batch.index, batch.len(), batch.len());
                return Ok(BatchOutcome {
                    applied: batch.len(),
                    ..BatchOutcome::default()
                });
            }
            Err(e) => e,
        };

        let chunk_size = self.chunk_size(batch.len());
        let chunks = batch.len().div_ceil(chunk_size);
        let degraded = SyncError::BulkOperationFailed {
            batch: batch.index,
            count: batch.len(),
            reason: err.to_string(),
        };
        obs::emit_batch_degraded(batch.index, batch.len(), chunks, &degraded);

        let mut outcome = BatchOutcome {
            degraded: true,
            ..BatchOutcome::default()
        };

        for (i, chunk) in batch.records.chunks(chunk_size).enumerate() {
            let chunk_no = i + 1;
            tokio::time::sleep(self.chunk_pause).await;
            debug!(batch = batch.index, chunk = chunk_no, size = chunk.len(), "retrying chunk");

            match op.apply(chunk, ctx).await {
                Ok(()) => outcome.applied += chunk.len(),
                Err(e) => {
                    let failure = SyncError::ChunkFailed {
                        batch: batch.index,
                        chunk: chunk_no,
                        count: chunk.len(),
                        first_ref: chunk
                            .first()
                            .map(|r| r.record_ref().to_string())
                            .unwrap_or_default(),
                        reason: e.to_string(),
                    };
                    obs::emit_chunk_failed(batch.index, chunk_no, chunk.len(), &failure);
                    if !skip_errors {
                        return Err(failure);
                    }
                    outcome.failed_chunks += 1;
                    outcome.failed_records += chunk.len();
                }
            }
        }

        obs::emit_batch_dispatched(batch.index, batch.len(), outcome.applied);
        Ok(outcome)
    }
}
