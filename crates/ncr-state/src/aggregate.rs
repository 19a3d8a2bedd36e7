//! Event-sourced aggregate backed by any [`EventStore`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::context::Context;
use crate::error::StorageError;
use crate::events::{EventKind, RecordEvent};
use crate::record::{Record, RecordRef, VersionToken};
use crate::registry::{Capability, KindRegistry};
use crate::storage_traits::{Aggregate, AggregateResolver, EventStore, StorageResult};

/// Aggregate that folds [`RecordEvent`]s onto an optional snapshot.
pub struct EventSourcedAggregate<S: EventStore + ?Sized> {
    store: Arc<S>,
    record_ref: RecordRef,
    state: Option<Record>,
    applied_seq: u64,
}

impl<S: EventStore + ?Sized> EventSourcedAggregate<S> {
    pub fn from_snapshot(store: Arc<S>, record: Record) -> Self {
        Self {
            store,
            record_ref: record.record_ref().clone(),
            applied_seq: record.last_event_seq(),
            state: Some(record),
        }
    }

    pub fn from_reference(store: Arc<S>, record_ref: RecordRef) -> Self {
        Self {
            store,
            record_ref,
            state: None,
            applied_seq: 0,
        }
    }

    /// Seq of the last event folded into the state.
    pub fn applied_seq(&self) -> u64 {
        self.applied_seq
    }

    fn replay_error(&self, seq: u64, reason: impl Into<String>) -> StorageError {
        StorageError::Replay {
            record_ref: self.record_ref.to_string(),
            seq,
            reason: reason.into(),
        }
    }

    fn apply(&mut self, event: RecordEvent) -> StorageResult<()> {
        if event.record_ref != self.record_ref {
            return Err(self.replay_error(
                event.seq,
                format!("event belongs to {}", event.record_ref),
            ));
        }
        if event.seq != self.applied_seq + 1 {
            return Err(self.replay_error(
                event.seq,
                format!("expected seq {}", self.applied_seq + 1),
            ));
        }

        let seq = event.seq;
        let next = match (self.state.take(), event.kind) {
            (None, EventKind::Created { status, title, fields }) => {
                Record::new(self.record_ref.clone(), status, title, fields, seq)
            }
            (Some(current), EventKind::Created { .. }) => {
                self.state = Some(current);
                return Err(self.replay_error(seq, "record created twice"));
            }
            (None, kind) => {
                return Err(self.replay_error(seq, format!("{} before created", kind.name())));
            }
            (Some(current), EventKind::Updated { title, fields: patch }) => {
                let mut fields = current.fields().clone();
                for (key, value) in patch {
                    if value == Value::Null {
                        fields.remove(&key);
                    } else {
                        fields.insert(key, value);
                    }
                }
                let title = title.or_else(|| current.title().map(str::to_string));
                Record::new(
                    self.record_ref.clone(),
                    current.status(),
                    title,
                    fields,
                    seq,
                )
            }
            (Some(current), EventKind::StatusChanged { status }) => {
                current.with_status(status).with_last_event_seq(seq)
            }
        };

        self.state = Some(next);
        self.applied_seq = seq;
        Ok(())
    }
}

#[async_trait]
impl<S: EventStore + ?Sized + 'static> Aggregate for EventSourcedAggregate<S> {
    async fn sync(&mut self, ctx: &Context) -> StorageResult<()> {
        let events = self
            .store
            .events_after(&self.record_ref, self.applied_seq, ctx)
            .await?;
        debug!(
            record_ref = %self.record_ref,
            from_seq = self.applied_seq,
            pending = events.len(),
            "replaying events"
        );
        for event in events {
            self.apply(event)?;
        }
        Ok(())
    }

    fn current_version(&self) -> Option<&VersionToken> {
        self.state.as_ref().map(Record::etag)
    }

    fn current_record(&self) -> StorageResult<Record> {
        self.state.clone().ok_or_else(|| StorageError::NotFound {
            record_ref: self.record_ref.to_string(),
        })
    }
}

/// Resolves aggregates for every kind registered with [`Capability::Node`].
pub struct EventSourcedResolver<S: EventStore + ?Sized> {
    store: Arc<S>,
    registry: Arc<KindRegistry>,
}

impl<S: EventStore + ?Sized> EventSourcedResolver<S> {
    pub fn new(store: Arc<S>, registry: Arc<KindRegistry>) -> Self {
        Self { store, registry }
    }
}

#[async_trait]
impl<S: EventStore + ?Sized + 'static> AggregateResolver for EventSourcedResolver<S> {
    async fn from_snapshot(
        &self,
        record: Record,
        _ctx: &Context,
    ) -> StorageResult<Box<dyn Aggregate>> {
        self.registry.require(record.kind(), Capability::Node)?;
        Ok(Box::new(EventSourcedAggregate::from_snapshot(
            self.store.clone(),
            record,
        )))
    }

    async fn from_reference(
        &self,
        record_ref: &RecordRef,
        _ctx: &Context,
    ) -> StorageResult<Box<dyn Aggregate>> {
        self.registry.require(record_ref.kind(), Capability::Node)?;
        Ok(Box::new(EventSourcedAggregate::from_reference(
            self.store.clone(),
            record_ref.clone(),
        )))
    }
}
