//! SurrealDB-backed [`EventStore`] implementation

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::debug;

use crate::context::Context;
use crate::error::StorageError;
use crate::events::RecordEvent;
use crate::record::RecordRef;
use crate::schema::EventRow;
use crate::storage_traits::{EventStore, StorageResult};

/// SurrealDB-backed implementation of [`EventStore`].
#[derive(Clone)]
pub struct SurrealEventStore {
    db: Surreal<Any>,
}

impl SurrealEventStore {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventStore for SurrealEventStore {
    async fn append(&self, event: RecordEvent, ctx: &Context) -> StorageResult<()> {
        let row = EventRow::from_event(ctx.tenant_id(), &event)?;
        debug!(record_ref = %event.record_ref, seq = event.seq, kind = event.kind.name(), "appending event");

        let created = match self
            .db
            .query("CREATE type::thing('node_events', $key) CONTENT $row")
            .bind(("key", row.event_key.clone()))
            .bind(("row", row))
            .await
        {
            Ok(mut res) => res.take::<Vec<EventRow>>(0),
            Err(e) => Err(e),
        };

        created.map(|_| ()).map_err(|e| {
            StorageError::Backend(format!(
                "event {} for {} not recorded: {}",
                event.seq, event.record_ref, e
            ))
        })
    }

    async fn events_after(
        &self,
        record_ref: &RecordRef,
        after_seq: u64,
        ctx: &Context,
    ) -> StorageResult<Vec<RecordEvent>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM node_events WHERE tenant_id = $tenant AND node_ref = $node_ref \
                 AND seq > $after ORDER BY seq ASC",
            )
            .bind(("tenant", ctx.tenant_id().to_string()))
            .bind(("node_ref", record_ref.to_string()))
            .bind(("after", after_seq))
            .await?;
        let rows: Vec<EventRow> = res.take(0)?;
        rows.into_iter().map(EventRow::into_event).collect()
    }
}
