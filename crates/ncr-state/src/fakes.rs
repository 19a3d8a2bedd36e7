//! In-memory fakes for the collaborator traits (testing and dry local runs)
//!
//! Provides `MemoryRepository`, `MemorySearchIndex` and `MemoryEventStore`.
//! Each one honors its trait contract and carries a few fault-injection knobs
//! so pipeline failure paths can be exercised without a database.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use crate::context::Context;
use crate::error::StorageError;
use crate::events::RecordEvent;
use crate::record::{Record, RecordKind, RecordRef, VersionToken};
use crate::storage_traits::*;

type TenantKey = (String, RecordRef);

// ---------------------------------------------------------------------------
// MemoryRepository
// ---------------------------------------------------------------------------

/// In-memory node repository keyed by `(tenant, record_ref)`.
///
/// Streams are ordered by record ref and are a point-in-time copy, so writes
/// made during a run never show up in a stream already handed out.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: Mutex<BTreeMap<TenantKey, Record>>,
    unavailable: Mutex<HashSet<RecordKind>>,
    fail_after: Mutex<HashMap<RecordKind, usize>>,
    put_calls: AtomicUsize,
    conflicts: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record` unconditionally for `tenant`.
    pub fn seed(&self, tenant: &str, record: Record) {
        let key = (tenant.to_string(), record.record_ref().clone());
        self.records.lock().unwrap().insert(key, record);
    }

    /// Stored copy, bypassing the trait.
    pub fn snapshot(&self, tenant: &str, record_ref: &RecordRef) -> Option<Record> {
        self.records
            .lock()
            .unwrap()
            .get(&(tenant.to_string(), record_ref.clone()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opening a stream for `kind` fails from now on.
    pub fn make_unavailable(&self, kind: &RecordKind) {
        self.unavailable.lock().unwrap().insert(kind.clone());
    }

    /// Streams for `kind` yield `count` records and then an error.
    pub fn fail_stream_after(&self, kind: &RecordKind, count: usize) {
        self.fail_after.lock().unwrap().insert(kind.clone(), count);
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn stream(&self, kind: &RecordKind, ctx: &Context) -> StorageResult<RecordStream> {
        if self.unavailable.lock().unwrap().contains(kind) {
            return Err(StorageError::StreamUnavailable {
                kind: kind.to_string(),
                reason: "repository marked unavailable".to_string(),
            });
        }

        let tenant = ctx.tenant_id();
        let mut items: Vec<StorageResult<Record>> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|((t, r), _)| t == tenant && r.kind() == kind)
            .map(|(_, record)| Ok(record.clone()))
            .collect();

        if let Some(&count) = self.fail_after.lock().unwrap().get(kind) {
            items.truncate(count);
            items.push(Err(StorageError::StreamUnavailable {
                kind: kind.to_string(),
                reason: format!("stream dropped after {count} records"),
            }));
        }

        Ok(Box::pin(stream::iter(items)))
    }

    async fn get(
        &self,
        record_ref: &RecordRef,
        _consistent: bool,
        ctx: &Context,
    ) -> StorageResult<Record> {
        self.snapshot(ctx.tenant_id(), record_ref)
            .ok_or_else(|| StorageError::NotFound {
                record_ref: record_ref.to_string(),
            })
    }

    async fn put(
        &self,
        record: &Record,
        expected: Option<&VersionToken>,
        ctx: &Context,
    ) -> StorageResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let key = (ctx.tenant_id().to_string(), record.record_ref().clone());
        let mut records = self.records.lock().unwrap();
        let actual = records.get(&key).map(|r| r.etag().clone());

        if actual.as_ref() != expected {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::version_conflict(
                record.record_ref(),
                expected,
                actual.as_ref(),
            ));
        }

        records.insert(key, record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySearchIndex
// ---------------------------------------------------------------------------

/// In-memory search index that records every bulk call it receives.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    docs: Mutex<BTreeMap<TenantKey, Record>>,
    calls: Mutex<Vec<usize>>,
    poisoned: Mutex<HashSet<RecordRef>>,
    fail_all: AtomicBool,
    fail_next: AtomicUsize,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any bulk call containing `record_ref` fails.
    pub fn poison(&self, record_ref: RecordRef) {
        self.poisoned.lock().unwrap().insert(record_ref);
    }

    /// Every bulk call fails while set.
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// The next `count` bulk calls fail, whatever they contain.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Size of every bulk call received, successful or not, in order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }

    pub fn indexed(&self, tenant: &str, record_ref: &RecordRef) -> Option<Record> {
        self.docs
            .lock()
            .unwrap()
            .get(&(tenant.to_string(), record_ref.clone()))
            .cloned()
    }

    /// Every indexed ref, in ref order.
    pub fn indexed_refs(&self) -> Vec<RecordRef> {
        self.docs
            .lock()
            .unwrap()
            .keys()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn bulk_index(&self, records: &[Record], ctx: &Context) -> StorageResult<()> {
        self.calls.lock().unwrap().push(records.len());

        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(StorageError::BulkIndex {
                count: records.len(),
                reason: "transient failure".to_string(),
            });
        }
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StorageError::BulkIndex {
                count: records.len(),
                reason: "index unavailable".to_string(),
            });
        }
        {
            let poisoned = self.poisoned.lock().unwrap();
            if let Some(bad) = records.iter().find(|r| poisoned.contains(r.record_ref())) {
                return Err(StorageError::BulkIndex {
                    count: records.len(),
                    reason: format!("document {} rejected", bad.record_ref()),
                });
            }
        }

        let tenant = ctx.tenant_id().to_string();
        let mut docs = self.docs.lock().unwrap();
        for record in records {
            docs.insert((tenant.clone(), record.record_ref().clone()), record.clone());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryEventStore
// ---------------------------------------------------------------------------

/// In-memory event log keyed by `(tenant, record_ref)`.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: Mutex<HashMap<TenantKey, Vec<RecordEvent>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: RecordEvent, ctx: &Context) -> StorageResult<()> {
        let key = (ctx.tenant_id().to_string(), event.record_ref.clone());
        let mut events = self.events.lock().unwrap();
        let history = events.entry(key).or_default();
        if history.iter().any(|e| e.seq == event.seq) {
            return Err(StorageError::Backend(format!(
                "event {} already recorded for {}",
                event.seq, event.record_ref
            )));
        }
        history.push(event);
        history.sort_by_key(|e| e.seq);
        Ok(())
    }

    async fn events_after(
        &self,
        record_ref: &RecordRef,
        after_seq: u64,
        ctx: &Context,
    ) -> StorageResult<Vec<RecordEvent>> {
        let events = self.events.lock().unwrap();
        Ok(events
            .get(&(ctx.tenant_id().to_string(), record_ref.clone()))
            .map(|history| {
                history
                    .iter()
                    .filter(|e| e.seq > after_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
