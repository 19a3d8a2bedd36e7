//! NCR Sync pipeline
//!
//! Batch reindexing, event-store reconciliation and export over the
//! collaborators defined in `ncr-state`.
//!
//! A run pulls records through a [`BatchCursor`], groups them in a
//! [`Window`], hands each full batch to the [`RetryExecutor`] (reindex) or
//! the [`Reconciler`] followed by the executor (sync), and lets the
//! [`Governor`] pause before the next batch. [`Pipeline`] wires those stages
//! together and returns a [`RunReport`].

pub mod config;
pub mod cursor;
pub mod driver;
pub mod error;
pub mod governor;
pub mod metrics;
pub mod obs;
pub mod reconcile;
pub mod retry;
pub mod stats;
pub mod telemetry;
pub mod window;

pub use config::{
    Bounds, PipelineConfig, PipelineConfigBuilder, BATCH_DELAY_BOUNDS, BATCH_SIZE_BOUNDS,
    DEFAULT_BATCH_DELAY_MS, DEFAULT_BATCH_SIZE,
};
pub use cursor::BatchCursor;
pub use driver::{Pipeline, SyncMode};
pub use error::{Result, SyncError};
pub use governor::Governor;
pub use metrics::METRICS;
pub use obs::run_span;
pub use reconcile::{EntryState, Outcome, Reconciled, Reconciler};
pub use retry::{BatchOutcome, BulkIndex, BulkOperation, RetryExecutor};
pub use stats::{Command, LineProgress, NoProgress, ProgressSink, RunReport, RunStats};
pub use telemetry::init_tracing;
pub use window::{Batch, Window};

/// NCR Sync version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
