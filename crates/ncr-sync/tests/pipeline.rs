//! End-to-end pipeline behaviour over the in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ncr_state::fakes::{MemoryEventStore, MemoryRepository, MemorySearchIndex};
use ncr_state::{
    Capability, Context, EventKind, EventSourcedResolver, EventStore, KindRegistry, Record,
    RecordEvent, RecordKind, RecordKindSelector, RecordRef, RecordStatus, RecordStream,
    Repository, StorageResult, VersionToken,
};
use ncr_sync::{
    LineProgress, Outcome, Pipeline, PipelineConfig, PipelineConfigBuilder, SyncError, SyncMode,
};
use serde_json::{json, Map};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct World {
    repo: Arc<MemoryRepository>,
    index: Arc<MemorySearchIndex>,
    events: Arc<MemoryEventStore>,
    registry: Arc<KindRegistry>,
}

impl World {
    fn new() -> Self {
        Self {
            repo: Arc::new(MemoryRepository::new()),
            index: Arc::new(MemorySearchIndex::new()),
            events: Arc::new(MemoryEventStore::new()),
            registry: Arc::new(
                KindRegistry::builder()
                    .kind(kind("acme:article"), &[Capability::Node, Capability::Indexed])
                    .kind(kind("acme:video"), &[Capability::Node, Capability::Indexed])
                    .kind(kind("acme:redirect"), &[Capability::Node])
                    .build(),
            ),
        }
    }

    fn pipeline(&self, config: PipelineConfigBuilder) -> Pipeline {
        self.pipeline_over(self.repo.clone(), config)
    }

    fn pipeline_over(&self, repo: Arc<dyn Repository>, config: PipelineConfigBuilder) -> Pipeline {
        let resolver = Arc::new(EventSourcedResolver::new(
            self.events.clone(),
            self.registry.clone(),
        ));
        Pipeline::new(
            repo,
            self.index.clone(),
            resolver,
            self.registry.clone(),
            config.build().unwrap(),
        )
    }

    /// `count` records of `kind` with a one-event history each.
    async fn seed(&self, kind: &str, count: usize) -> Vec<RecordRef> {
        let mut refs = Vec::with_capacity(count);
        for i in 0..count {
            let record_ref: RecordRef = format!("{kind}:{i:04}").parse().unwrap();
            let title = Some(format!("Item {i}"));
            self.events
                .append(
                    RecordEvent::new(
                        record_ref.clone(),
                        1,
                        EventKind::Created {
                            status: RecordStatus::Draft,
                            title: title.clone(),
                            fields: Map::new(),
                        },
                    ),
                    &Context::new(),
                )
                .await
                .unwrap();
            self.repo.seed(
                "",
                Record::new(record_ref.clone(), RecordStatus::Draft, title, Map::new(), 1),
            );
            refs.push(record_ref);
        }
        refs
    }

    async fn publish(&self, record_ref: &RecordRef) {
        self.events
            .append(
                RecordEvent::new(
                    record_ref.clone(),
                    2,
                    EventKind::StatusChanged {
                        status: RecordStatus::Published,
                    },
                ),
                &Context::new(),
            )
            .await
            .unwrap();
    }
}

fn kind(s: &str) -> RecordKind {
    s.parse().unwrap()
}

fn all_indexed() -> RecordKindSelector {
    RecordKindSelector::All(Capability::Indexed)
}

fn all_nodes() -> RecordKindSelector {
    RecordKindSelector::All(Capability::Node)
}

fn config(batch_size: u64) -> PipelineConfigBuilder {
    PipelineConfig::builder()
        .batch_size(batch_size)
        .batch_delay_ms(10)
}

/// Repository where another writer always gets in just before our put.
struct RacingRepository {
    inner: Arc<MemoryRepository>,
}

#[async_trait]
impl Repository for RacingRepository {
    async fn stream(&self, kind: &RecordKind, ctx: &Context) -> StorageResult<RecordStream> {
        self.inner.stream(kind, ctx).await
    }

    async fn get(
        &self,
        record_ref: &RecordRef,
        consistent: bool,
        ctx: &Context,
    ) -> StorageResult<Record> {
        self.inner.get(record_ref, consistent, ctx).await
    }

    async fn put(
        &self,
        record: &Record,
        expected: Option<&VersionToken>,
        ctx: &Context,
    ) -> StorageResult<()> {
        if let Some(current) = self.inner.snapshot(ctx.tenant_id(), record.record_ref()) {
            self.inner.seed(
                ctx.tenant_id(),
                current.with_title(Some("edited elsewhere".to_string())),
            );
        }
        self.inner.put(record, expected, ctx).await
    }
}

// ---------------------------------------------------------------------------
// Reindex
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn batches_cover_every_record() {
    let world = World::new();
    world.seed("acme:article", 250).await;

    let report = world
        .pipeline(config(100))
        .reindex(&all_indexed(), &Context::new())
        .await
        .unwrap();

    assert_eq!(world.index.calls(), vec![100, 100, 50]);
    assert_eq!(report.stats.batches, 3);
    assert_eq!(report.stats.seen, 250);
    assert_eq!(report.stats.processed, 250);
    assert_eq!(world.index.len(), 250);
}

#[tokio::test(start_paused = true)]
async fn paced_run_pauses_between_full_batches_only() {
    let world = World::new();
    world.seed("acme:article", 250).await;

    let start = tokio::time::Instant::now();
    let report = world
        .pipeline(PipelineConfig::builder().batch_size(100).batch_delay_ms(50))
        .reindex(&all_indexed(), &Context::new())
        .await
        .unwrap();

    assert_eq!(report.stats.pauses, 2);
    assert_eq!(start.elapsed(), Duration::from_millis(100));
    assert_eq!((report.stats.seen, report.stats.processed), (250, 250));
}

#[tokio::test(start_paused = true)]
async fn one_window_spans_all_kinds() {
    let world = World::new();
    world.seed("acme:article", 3).await;
    world.seed("acme:video", 3).await;
    world.seed("acme:redirect", 3).await;

    let report = world
        .pipeline(config(4))
        .reindex(&all_indexed(), &Context::new())
        .await
        .unwrap();

    // redirects are not indexed
    assert_eq!(report.stats.seen, 6);
    assert_eq!(world.index.calls(), vec![4, 2]);
}

#[tokio::test(start_paused = true)]
async fn poison_record_costs_one_chunk() {
    let world = World::new();
    let refs = world.seed("acme:article", 100).await;
    world.index.poison(refs[57].clone());

    let report = world
        .pipeline(config(100).skip_errors(true))
        .reindex(&all_indexed(), &Context::new())
        .await
        .unwrap();

    assert_eq!(report.stats.processed, 90);
    assert_eq!(report.stats.failed, 10);
    assert_eq!(report.stats.failed_chunks, 1);
    assert!(report.has_failures());
    assert!(world.index.indexed("", &refs[57]).is_none());
    assert!(world.index.indexed("", &refs[0]).is_some());
}

#[tokio::test(start_paused = true)]
async fn failed_chunk_aborts_without_skip_errors() {
    let world = World::new();
    let refs = world.seed("acme:article", 30).await;
    world.index.poison(refs[5].clone());

    let err = world
        .pipeline(config(10))
        .reindex(&all_indexed(), &Context::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::ChunkFailed { batch: 1, .. }));
    // nothing after the failing batch was attempted
    assert!(world.index.indexed("", &refs[29]).is_none());
}

#[tokio::test(start_paused = true)]
async fn skip_errors_can_come_from_the_context() {
    let world = World::new();
    let refs = world.seed("acme:article", 10).await;
    world.index.poison(refs[0].clone());

    let ctx = Context::new().merge_json(json!({"skip_errors": true})).unwrap();
    let report = world
        .pipeline(config(10))
        .reindex(&all_indexed(), &ctx)
        .await
        .unwrap();

    assert_eq!(report.stats.processed, 9);
}

#[tokio::test(start_paused = true)]
async fn dry_run_leaves_the_index_alone() {
    let world = World::new();
    world.seed("acme:article", 25).await;

    let report = world
        .pipeline(config(10).dry_run(true))
        .reindex(&all_indexed(), &Context::new())
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.stats.processed, 25);
    assert!(world.index.calls().is_empty());
    assert!(world.index.is_empty());
}

#[tokio::test(start_paused = true)]
async fn reindex_twice_gives_the_same_index() {
    let world = World::new();
    world.seed("acme:article", 15).await;
    let pipeline = world.pipeline(config(4));

    pipeline.reindex(&all_indexed(), &Context::new()).await.unwrap();
    let first = world.index.indexed_refs();
    pipeline.reindex(&all_indexed(), &Context::new()).await.unwrap();

    assert_eq!(world.index.indexed_refs(), first);
    assert_eq!(world.index.len(), 15);
}

#[tokio::test]
async fn unavailable_source_aborts_the_run() {
    let world = World::new();
    world.seed("acme:article", 3).await;
    world.repo.make_unavailable(&kind("acme:article"));

    let err = world
        .pipeline(config(10))
        .reindex(&all_indexed(), &Context::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::SourceUnavailable { .. }));
    assert!(world.index.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn tenant_scopes_the_run() {
    let world = World::new();
    world.seed("acme:article", 3).await;
    world.repo.seed(
        "client1",
        Record::new(
            "acme:article:other".parse().unwrap(),
            RecordStatus::Published,
            None,
            Map::new(),
            0,
        ),
    );

    let report = world
        .pipeline(config(10))
        .reindex(&all_indexed(), &Context::new().with_tenant("client1"))
        .await
        .unwrap();

    assert_eq!(report.stats.seen, 1);
    assert!(world
        .index
        .indexed("client1", &"acme:article:other".parse().unwrap())
        .is_some());
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn sync_writes_only_records_with_new_events() {
    let world = World::new();
    let refs = world.seed("acme:article", 5).await;
    world.publish(&refs[1]).await;
    world.publish(&refs[3]).await;

    let progress = Arc::new(LineProgress::new(Vec::new()));
    let report = world
        .pipeline(config(2))
        .with_progress(progress.clone())
        .sync(&all_nodes(), &Context::new())
        .await
        .unwrap();

    assert_eq!(report.stats.seen, 5);
    assert_eq!(report.stats.synced, 2);
    assert_eq!(report.stats.matched, 3);
    assert_eq!(world.repo.put_calls(), 2);
    assert_eq!(world.index.indexed_refs(), vec![refs[1].clone(), refs[3].clone()]);
    assert_eq!(
        world.repo.snapshot("", &refs[1]).unwrap().status(),
        RecordStatus::Published
    );
    assert_eq!(report.summary(), "Synced 5 of 5 nodes for qname \"ALL\".");

    drop(world);
    let text = String::from_utf8(Arc::try_unwrap(progress).ok().unwrap().into_inner()).unwrap();
    let outcomes: Vec<&str> = text
        .lines()
        .map(|l| l.split_whitespace().nth(1).unwrap())
        .collect();
    assert_eq!(outcomes, vec!["MATCHED", "SYNCED", "MATCHED", "SYNCED", "MATCHED"]);
}

#[tokio::test(start_paused = true)]
async fn second_sync_matches_everything() {
    let world = World::new();
    let refs = world.seed("acme:article", 4).await;
    world.publish(&refs[0]).await;
    let pipeline = world.pipeline(config(10));

    pipeline.sync(&all_nodes(), &Context::new()).await.unwrap();
    let puts = world.repo.put_calls();
    let report = pipeline.sync(&all_nodes(), &Context::new()).await.unwrap();

    assert_eq!(report.stats.synced, 0);
    assert_eq!(report.stats.matched, 4);
    assert_eq!(world.repo.put_calls(), puts);
}

#[tokio::test(start_paused = true)]
async fn conflict_is_reported_and_never_indexed() {
    let world = World::new();
    let refs = world.seed("acme:article", 3).await;
    world.publish(&refs[2]).await;

    let racing = Arc::new(RacingRepository {
        inner: world.repo.clone(),
    });
    let report = world
        .pipeline_over(racing, config(10))
        .sync(&all_nodes(), &Context::new())
        .await
        .unwrap();

    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.matched, 2);
    assert_eq!(world.repo.conflicts(), 1);
    assert!(world.index.is_empty());
    // the other writer's version survives
    assert_eq!(
        world.repo.snapshot("", &refs[2]).unwrap().title(),
        Some("edited elsewhere")
    );
}

#[tokio::test(start_paused = true)]
async fn sync_ignores_dry_run() {
    let world = World::new();
    let refs = world.seed("acme:article", 2).await;
    world.publish(&refs[0]).await;

    let report = world
        .pipeline(config(10).dry_run(true))
        .sync(&all_nodes(), &Context::new())
        .await
        .unwrap();

    assert!(!report.dry_run);
    assert_eq!(world.index.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn sync_pauses_per_full_batch() {
    let world = World::new();
    world.seed("acme:article", 7).await;

    let start = tokio::time::Instant::now();
    let report = world
        .pipeline(PipelineConfig::builder().batch_size(3).batch_delay_ms(20))
        .sync(&all_nodes(), &Context::new())
        .await
        .unwrap();

    assert_eq!(report.stats.pauses, 2);
    assert_eq!(start.elapsed(), Duration::from_millis(40));
}

#[tokio::test(start_paused = true)]
async fn sync_skips_rejected_index_chunk() {
    let world = World::new();
    let refs = world.seed("acme:article", 6).await;
    world.publish(&refs[1]).await;
    world.publish(&refs[4]).await;
    world.index.poison(refs[1].clone());

    let report = world
        .pipeline(config(3).skip_errors(true))
        .sync(&all_nodes(), &Context::new())
        .await
        .unwrap();

    assert_eq!(report.stats.synced, 2);
    assert_eq!(report.stats.unindexed, 1);
    assert_eq!(report.stats.failed_chunks, 1);
    assert!(report.has_failures());
    // the repository write stands even though indexing failed
    assert_eq!(world.repo.put_calls(), 2);
    assert_eq!(
        world.repo.snapshot("", &refs[1]).unwrap().status(),
        RecordStatus::Published
    );
    assert_eq!(world.index.indexed_refs(), vec![refs[4].clone()]);
}

#[tokio::test(start_paused = true)]
async fn sync_aborts_on_rejected_index_chunk() {
    let world = World::new();
    let refs = world.seed("acme:article", 6).await;
    world.publish(&refs[1]).await;
    world.publish(&refs[4]).await;
    world.index.poison(refs[1].clone());

    let err = world
        .pipeline(config(3))
        .sync(&all_nodes(), &Context::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::ChunkFailed { batch: 1, .. }));
    // the second batch was never reconciled
    assert_eq!(world.repo.put_calls(), 1);
    assert_eq!(
        world.repo.snapshot("", &refs[4]).unwrap().status(),
        RecordStatus::Draft
    );
    assert!(world.index.is_empty());
}

// ---------------------------------------------------------------------------
// Single record operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sync_one_snapshot_indexes_the_new_state() {
    let world = World::new();
    let refs = world.seed("acme:article", 1).await;
    world.publish(&refs[0]).await;

    let out = world
        .pipeline(config(10))
        .sync_one(&refs[0], SyncMode::Snapshot, &Context::new())
        .await
        .unwrap();

    assert_eq!(out.outcome, Outcome::Synced);
    assert_eq!(
        world.index.indexed("", &refs[0]).unwrap().etag(),
        out.record.etag()
    );
}

#[tokio::test]
async fn sync_one_inserts_a_missing_record() {
    let world = World::new();
    let record_ref: RecordRef = "acme:article:new".parse().unwrap();
    world
        .events
        .append(
            RecordEvent::new(
                record_ref.clone(),
                1,
                EventKind::Created {
                    status: RecordStatus::Published,
                    title: Some("Fresh".into()),
                    fields: Map::new(),
                },
            ),
            &Context::new(),
        )
        .await
        .unwrap();

    let out = world
        .pipeline(config(10))
        .sync_one(&record_ref, SyncMode::Snapshot, &Context::new())
        .await
        .unwrap();

    assert_eq!(out.outcome, Outcome::Synced);
    assert!(world.repo.snapshot("", &record_ref).is_some());
}

#[tokio::test]
async fn sync_one_rebuild_replays_full_history() {
    let world = World::new();
    let refs = world.seed("acme:article", 1).await;
    world.publish(&refs[0]).await;
    // stored copy drifted away from its history
    let drifted = world
        .repo
        .snapshot("", &refs[0])
        .unwrap()
        .with_fields(json!({"junk": true}).as_object().cloned().unwrap());
    world.repo.seed("", drifted);

    let out = world
        .pipeline(config(10))
        .sync_one(&refs[0], SyncMode::Rebuild, &Context::new())
        .await
        .unwrap();

    assert_eq!(out.outcome, Outcome::Synced);
    let stored = world.repo.snapshot("", &refs[0]).unwrap();
    assert!(stored.fields().is_empty());
    assert_eq!(stored.status(), RecordStatus::Published);
}

#[tokio::test]
async fn sync_one_propagates_conflicts() {
    let world = World::new();
    let refs = world.seed("acme:article", 1).await;
    world.publish(&refs[0]).await;
    let racing = Arc::new(RacingRepository {
        inner: world.repo.clone(),
    });

    let err = world
        .pipeline_over(racing, config(10))
        .sync_one(&refs[0], SyncMode::Snapshot, &Context::new())
        .await
        .unwrap_err();

    assert!(err.is_version_conflict());
    assert!(world.index.is_empty());
}

#[tokio::test]
async fn get_one_returns_none_for_missing() {
    let world = World::new();
    let refs = world.seed("acme:article", 1).await;
    let pipeline = world.pipeline(config(10));

    let found = pipeline.get_one(&refs[0], true, &Context::new()).await.unwrap();
    assert_eq!(found.map(|r| r.record_ref().clone()), Some(refs[0].clone()));

    let missing = pipeline
        .get_one(&"acme:article:nope".parse().unwrap(), false, &Context::new())
        .await
        .unwrap();
    assert!(missing.is_none());
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn export_writes_one_line_per_node() {
    let world = World::new();
    world.seed("acme:article", 3).await;
    world.seed("acme:redirect", 2).await;

    let mut out = Vec::new();
    let report = world
        .pipeline(config(2))
        .export(&all_nodes(), &Context::new(), &mut out)
        .await
        .unwrap();

    let text = String::from_utf8(out).unwrap();
    let records: Vec<Record> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(records.len(), 5);
    assert_eq!(report.stats.processed, 5);
    assert_eq!(report.stats.pauses, 2);
    assert!(records.iter().all(Record::etag_is_current));
}

#[tokio::test(start_paused = true)]
async fn export_single_kind_to_file() {
    let world = World::new();
    world.seed("acme:article", 3).await;
    world.seed("acme:video", 4).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("videos.ndjson");
    let mut file = std::fs::File::create(&path).unwrap();
    world
        .pipeline(config(10))
        .export(
            &RecordKindSelector::Kind(kind("acme:video")),
            &Context::new(),
            &mut file,
        )
        .await
        .unwrap();
    drop(file);

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 4);
    assert!(text.lines().all(|l| l.contains("acme:video:")));
}
