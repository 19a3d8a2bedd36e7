//! Run driver: cursor → window → stage → governor, one owner for the
//! run's mutable state.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use ncr_state::context::{
    EXPORTING, EXPORTING_ALL, REINDEXING, REINDEXING_ALL, SKIP_ERRORS, SYNCING, SYNCING_ALL,
};
use ncr_state::{
    AggregateResolver, Capability, Context, KindRegistry, Record, RecordKind, RecordKindSelector,
    RecordRef, Repository, SearchIndex,
};
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::cursor::BatchCursor;
use crate::error::{Result, SyncError};
use crate::governor::Governor;
use crate::metrics::METRICS;
use crate::obs;
use crate::reconcile::{EntryState, Outcome, Reconciled, Reconciler};
use crate::retry::{BatchOutcome, BulkIndex, RetryExecutor};
use crate::stats::{Command, NoProgress, ProgressSink, RunReport, RunStats};
use crate::window::{Batch, Window};

/// Where a single-record sync starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Consistent read of the stored record; falls back to a rebuild when
    /// the record does not exist yet.
    #[default]
    Snapshot,
    /// Replay the whole history, ignoring the stored state.
    Rebuild,
}

/// Reindex, sync and export pipelines over injected collaborators.
pub struct Pipeline {
    repository: Arc<dyn Repository>,
    index: Arc<dyn SearchIndex>,
    registry: Arc<KindRegistry>,
    reconciler: Reconciler,
    config: PipelineConfig,
    progress: Arc<dyn ProgressSink>,
}

impl Pipeline {
    pub fn new(
        repository: Arc<dyn Repository>,
        index: Arc<dyn SearchIndex>,
        resolver: Arc<dyn AggregateResolver>,
        registry: Arc<KindRegistry>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(resolver, repository.clone()),
            repository,
            index,
            registry,
            config,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Push every record of the selected `indexed` kinds into the search index.
    pub async fn reindex(&self, selector: &RecordKindSelector, ctx: &Context) -> Result<RunReport> {
        let kinds = self.registry.resolve(selector, Capability::Indexed)?;
        let skip_errors = self.config.skip_errors() || ctx.flag(SKIP_ERRORS);
        let ctx = ctx
            .with(REINDEXING, true)
            .with(REINDEXING_ALL, selector.is_all())
            .with(SKIP_ERRORS, skip_errors);

        self.run(Command::Reindex, selector, kinds, ctx, skip_errors, None)
            .await
    }

    /// Reconcile every record of the selected `node` kinds with its events.
    pub async fn sync(&self, selector: &RecordKindSelector, ctx: &Context) -> Result<RunReport> {
        let kinds = self.registry.resolve(selector, Capability::Node)?;
        let skip_errors = self.config.skip_errors() || ctx.flag(SKIP_ERRORS);
        let ctx = ctx
            .with(SYNCING, true)
            .with(SYNCING_ALL, selector.is_all())
            .with(SKIP_ERRORS, skip_errors);

        self.run(Command::Sync, selector, kinds, ctx, skip_errors, None)
            .await
    }

    /// Write every record of the selected `node` kinds to `out` as JSON lines.
    pub async fn export<W: Write + Send>(
        &self,
        selector: &RecordKindSelector,
        ctx: &Context,
        out: &mut W,
    ) -> Result<RunReport> {
        let kinds = self.registry.resolve(selector, Capability::Node)?;
        let ctx = ctx
            .with(EXPORTING, true)
            .with(EXPORTING_ALL, selector.is_all());

        let out: &mut (dyn Write + Send) = out;
        self.run(Command::Export, selector, kinds, ctx, true, Some(out))
            .await
    }

    /// Reconcile one record. Every failure propagates.
    pub async fn sync_one(
        &self,
        record_ref: &RecordRef,
        mode: SyncMode,
        ctx: &Context,
    ) -> Result<Reconciled> {
        let ctx = ctx.with(SYNCING, true);
        let stored = self.get_one(record_ref, true, &ctx).await?;

        let entry = match (mode, stored) {
            (SyncMode::Snapshot, Some(record)) => EntryState::FromSnapshot(record),
            (SyncMode::Snapshot, None) => EntryState::FromReferenceOnly {
                record_ref: record_ref.clone(),
                expected: None,
            },
            (SyncMode::Rebuild, stored) => EntryState::FromReferenceOnly {
                record_ref: record_ref.clone(),
                expected: stored.map(|r| r.etag().clone()),
            },
        };

        let reconciled = self.reconciler.reconcile(entry, &ctx).await?;
        if reconciled.outcome == Outcome::Synced {
            self.index
                .bulk_index(std::slice::from_ref(&reconciled.record), &ctx)
                .await?;
            METRICS.inc_synced();
            METRICS.add_indexed(1);
        }
        obs::emit_record_reconciled(
            &reconciled.record_ref.to_string(),
            reconciled.outcome.as_str(),
            reconciled.record.etag().short(),
        );
        Ok(reconciled)
    }

    /// Fetch one record; `None` when it does not exist.
    pub async fn get_one(
        &self,
        record_ref: &RecordRef,
        consistent: bool,
        ctx: &Context,
    ) -> Result<Option<Record>> {
        match self.repository.get(record_ref, consistent, ctx).await {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn run(
        &self,
        command: Command,
        selector: &RecordKindSelector,
        kinds: Vec<RecordKind>,
        ctx: Context,
        skip_errors: bool,
        out: Option<&mut (dyn Write + Send)>,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let run_id_str = run_id.to_string();
        let started_at = Utc::now();
        let clock = Instant::now();
        let selector_label = selector.to_string();
        // only reindex honours dry runs
        let dry_run = command == Command::Reindex && self.config.dry_run();

        let span = obs::run_span(&run_id_str, command.as_str());
        obs::emit_run_started(
            &run_id_str,
            command.as_str(),
            &selector_label,
            &ctx.to_json().to_string(),
        );

        let driver = RunDriver {
            pipeline: self,
            command,
            executor: RetryExecutor::new(
                self.config.chunk_divisor(),
                self.config.chunk_pause(),
                dry_run,
            ),
            window: Window::new(self.config.batch_size()),
            governor: Governor::new(self.config.batch_delay()),
            stats: RunStats::default(),
            ctx,
            skip_errors,
            out,
        };
        let stats = driver.drive(kinds).instrument(span).await?;

        let duration_ms = clock.elapsed().as_millis() as u64;
        obs::emit_run_finished(
            &run_id_str,
            command.as_str(),
            stats.seen,
            stats.processed,
            stats.failed,
            duration_ms,
        );
        METRICS.flush();

        Ok(RunReport {
            run_id,
            command,
            selector: selector_label,
            started_at,
            duration_ms,
            dry_run,
            stats,
        })
    }
}

/// Owns the state of one run: counters, the open window and the governor.
struct RunDriver<'p, 'o> {
    pipeline: &'p Pipeline,
    command: Command,
    executor: RetryExecutor,
    window: Window,
    governor: Governor,
    stats: RunStats,
    ctx: Context,
    skip_errors: bool,
    out: Option<&'o mut (dyn Write + Send)>,
}

impl RunDriver<'_, '_> {
    async fn drive(mut self, kinds: Vec<RecordKind>) -> Result<RunStats> {
        let mut cursor = BatchCursor::new(
            self.pipeline.repository.clone(),
            kinds,
            self.ctx.clone(),
        );
        self.stats.current_batch = self.window.batch_index();

        while let Some(record) = cursor.next().await? {
            self.stats.seen += 1;
            METRICS.inc_seen();
            if self.command == Command::Reindex {
                self.pipeline.progress.record(self.stats.seen, &record);
            }

            if let Some(batch) = self.window.offer(record) {
                self.process(batch).await?;
                self.governor.pause(self.stats.batches).await;
                self.stats.pauses = self.governor.pauses();
            }
            self.stats.current_batch = self.window.batch_index();
        }

        // the final partial batch is never followed by a pause
        if let Some(batch) = self.window.flush() {
            self.process(batch).await?;
        }
        debug!(seen = self.stats.seen, batches = self.stats.batches, "cursor exhausted");

        Ok(self.stats)
    }

    async fn process(&mut self, batch: Batch) -> Result<()> {
        self.stats.batches += 1;
        match self.command {
            Command::Reindex => self.index_batch(batch).await,
            Command::Sync => self.sync_batch(batch).await,
            Command::Export => self.export_batch(batch),
        }
    }

    async fn index_batch(&mut self, batch: Batch) -> Result<()> {
        let outcome = self.apply_index(&batch).await?;
        self.stats.processed += outcome.applied as u64;
        self.stats.failed += outcome.failed_records as u64;
        Ok(())
    }

    /// Reconcile each record, then index the ones that changed as one batch.
    async fn sync_batch(&mut self, batch: Batch) -> Result<()> {
        let first_seq = self.stats.processed + self.stats.failed + 1;
        let mut changed = Vec::new();

        for (offset, record) in batch.records.into_iter().enumerate() {
            let seq = first_seq + offset as u64;
            let record_ref = record.record_ref().clone();

            match self
                .pipeline
                .reconciler
                .reconcile(EntryState::FromSnapshot(record), &self.ctx)
                .await
            {
                Ok(reconciled) => {
                    self.pipeline.progress.reconciled(seq, &reconciled);
                    obs::emit_record_reconciled(
                        &reconciled.record_ref.to_string(),
                        reconciled.outcome.as_str(),
                        reconciled.record.etag().short(),
                    );
                    self.stats.processed += 1;
                    match reconciled.outcome {
                        Outcome::Synced => {
                            self.stats.synced += 1;
                            METRICS.inc_synced();
                            changed.push(reconciled.record);
                        }
                        Outcome::Matched => self.stats.matched += 1,
                    }
                }
                Err(e) => {
                    if e.is_version_conflict() {
                        METRICS.inc_conflicts();
                    }
                    self.pipeline.progress.failed(seq, &record_ref, &e);
                    obs::emit_record_failed(&record_ref.to_string(), &e);
                    self.stats.failed += 1;
                }
            }
        }

        let writes = Batch {
            index: batch.index,
            records: changed,
            full: batch.full,
        };
        let outcome = self.apply_index(&writes).await?;
        self.stats.unindexed += outcome.failed_records as u64;
        Ok(())
    }

    fn export_batch(&mut self, batch: Batch) -> Result<()> {
        let Some(out) = self.out.as_mut() else {
            return Err(SyncError::Config("export run without an output".to_string()));
        };

        for record in &batch.records {
            match serde_json::to_string(record) {
                Ok(line) => {
                    writeln!(out, "{line}")?;
                    self.stats.processed += 1;
                }
                Err(e) => {
                    obs::emit_record_failed(&record.record_ref().to_string(), &e);
                    self.stats.failed += 1;
                }
            }
        }
        out.flush()?;
        Ok(())
    }

    async fn apply_index(&mut self, batch: &Batch) -> Result<BatchOutcome> {
        let op = BulkIndex::new(self.pipeline.index.clone());
        let outcome = self
            .executor
            .execute(&op, batch, &self.ctx, self.skip_errors)
            .await?;

        self.stats.failed_chunks += outcome.failed_chunks as u64;
        METRICS.add_indexed(outcome.applied as u64);
        METRICS.add_failed_chunks(outcome.failed_chunks as u64);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncr_state::fakes::{MemoryEventStore, MemoryRepository, MemorySearchIndex};
    use ncr_state::{EventSourcedResolver, RecordStatus};
    use serde_json::Map;
    use tracing_test::traced_test;

    fn registry() -> Arc<KindRegistry> {
        Arc::new(
            KindRegistry::builder()
                .kind("acme:article".parse().unwrap(), &[Capability::Node, Capability::Indexed])
                .build(),
        )
    }

    fn pipeline(repo: Arc<MemoryRepository>, index: Arc<MemorySearchIndex>) -> Pipeline {
        let registry = registry();
        let resolver = Arc::new(EventSourcedResolver::new(
            Arc::new(MemoryEventStore::new()),
            registry.clone(),
        ));
        let config = PipelineConfig::builder()
            .batch_size(2)
            .batch_delay_ms(10)
            .build()
            .unwrap();
        Pipeline::new(repo, index, resolver, registry, config)
    }

    fn seed(repo: &MemoryRepository, count: usize) {
        for i in 0..count {
            repo.seed(
                "",
                Record::new(
                    format!("acme:article:{i}").parse().unwrap(),
                    RecordStatus::Published,
                    None,
                    Map::new(),
                    0,
                ),
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reindex_counts_batches_and_pauses() {
        let repo = Arc::new(MemoryRepository::new());
        let index = Arc::new(MemorySearchIndex::new());
        seed(&repo, 5);

        let report = pipeline(repo, index.clone())
            .reindex(&RecordKindSelector::All(Capability::Indexed), &Context::new())
            .await
            .unwrap();

        assert_eq!(report.stats.seen, 5);
        assert_eq!(report.stats.processed, 5);
        assert_eq!(report.stats.batches, 3);
        assert_eq!(report.stats.pauses, 2);
        assert_eq!(index.calls(), vec![2, 2, 1]);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn degraded_batch_is_logged() {
        let repo = Arc::new(MemoryRepository::new());
        let index = Arc::new(MemorySearchIndex::new());
        seed(&repo, 2);
        index.fail_next(1);

        let report = pipeline(repo, index)
            .reindex(&RecordKindSelector::All(Capability::Indexed), &Context::new())
            .await
            .unwrap();

        assert_eq!(report.stats.processed, 2);
        assert!(logs_contain("batch.degraded"));
        assert!(logs_contain("run.finished"));
    }

    #[tokio::test]
    async fn get_one_maps_not_found_to_none() {
        let repo = Arc::new(MemoryRepository::new());
        let p = pipeline(repo, Arc::new(MemorySearchIndex::new()));
        let missing = p
            .get_one(&"acme:article:404".parse().unwrap(), true, &Context::new())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn unregistered_kind_is_rejected_before_streaming() {
        let repo = Arc::new(MemoryRepository::new());
        let p = pipeline(repo, Arc::new(MemorySearchIndex::new()));
        let err = p
            .reindex(
                &RecordKindSelector::Kind("acme:video".parse().unwrap()),
                &Context::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));
    }
}
