//! Structured observability hooks for pipeline runs.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`run_span`], attached with `Instrument`
//! - Emission functions for run start/finish, batch dispatch and degradation,
//!   chunk and record failures, reconciliation outcomes and pauses
//!
//! Events are emitted at `info!` level, failures at `warn!`. Filter with
//! `RUST_LOG`; pass `--json` to the CLI for JSON lines.

use tracing::{info, warn};

/// Span carrying `run_id` and `command` for every event of one run.
///
/// Attach it to the run future rather than entering it, since the run
/// awaits across pauses:
///
/// ```ignore
/// driver.run().instrument(run_span(&run_id, "reindex")).await
/// ```
pub fn run_span(run_id: &str, command: &str) -> tracing::Span {
    tracing::info_span!("ncr.run", run_id = %run_id, command = %command)
}

/// Emit event: run started for a selector with the effective context.
pub fn emit_run_started(run_id: &str, command: &str, selector: &str, context: &str) {
    info!(
        event = "run.started",
        run_id = %run_id,
        command = %command,
        selector = %selector,
        context = %context,
    );
}

/// Emit event: run finished with its counters.
pub fn emit_run_finished(
    run_id: &str,
    command: &str,
    seen: u64,
    processed: u64,
    failed: u64,
    duration_ms: u64,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        command = %command,
        seen = seen,
        processed = processed,
        failed = failed,
        duration_ms = duration_ms,
    );
}

/// Emit event: a batch went through the bulk operation.
pub fn emit_batch_dispatched(batch: u64, size: usize, applied: usize) {
    info!(event = "batch.dispatched", batch = batch, size = size, applied = applied);
}

/// Emit event: dry run skipped the bulk operation for a batch.
pub fn emit_batch_dry_run(batch: u64, size: usize, operation: &str) {
    info!(event = "batch.dry_run", batch = batch, size = size, operation = %operation);
}

/// Emit event: whole-batch attempt failed; falling back to chunks.
pub fn emit_batch_degraded(batch: u64, size: usize, chunks: usize, error: &dyn std::fmt::Display) {
    warn!(
        event = "batch.degraded",
        batch = batch,
        size = size,
        chunks = chunks,
        error = %error,
    );
}

/// Emit event: a chunk of a degraded batch failed (warning level).
pub fn emit_chunk_failed(batch: u64, chunk: usize, size: usize, error: &dyn std::fmt::Display) {
    warn!(
        event = "chunk.failed",
        batch = batch,
        chunk = chunk,
        size = size,
        error = %error,
    );
}

/// Emit event: one record reconciled against its event history.
pub fn emit_record_reconciled(record_ref: &str, outcome: &str, etag: &str) {
    info!(
        event = "record.reconciled",
        record_ref = %record_ref,
        outcome = %outcome,
        etag = %etag,
    );
}

/// Emit event: one record failed during a batch run (warning level).
pub fn emit_record_failed(record_ref: &str, error: &dyn std::fmt::Display) {
    warn!(event = "record.failed", record_ref = %record_ref, error = %error);
}

/// Emit event: backpressure pause after a full batch.
pub fn emit_paused(batch: u64, delay_ms: u64) {
    info!(event = "run.paused", batch = batch, delay_ms = delay_ms);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_span_can_be_entered() {
        let span = run_span("test-run-id", "reindex");
        let _guard = span.enter();
        emit_paused(1, 50);
    }
}
