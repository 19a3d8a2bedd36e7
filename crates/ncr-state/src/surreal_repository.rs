//! SurrealDB-backed [`Repository`] implementation
//!
//! Uses `schema::NodeRow` for persistence, converting to and from [`Record`]
//! at the boundary. Streams page through the table lazily by `node_ref`, so a
//! run over a large kind never holds more than one page in memory.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, instrument};

use crate::context::Context;
use crate::error::StorageError;
use crate::record::{Record, RecordKind, RecordRef, VersionToken};
use crate::schema::{node_key, NodeRow};
use crate::storage_traits::{RecordStream, Repository, StorageResult};

/// Rows fetched per round trip while streaming.
pub const STREAM_PAGE_SIZE: usize = 500;

/// SurrealDB-backed implementation of [`Repository`].
#[derive(Clone)]
pub struct SurrealRepository {
    db: Surreal<Any>,
}

impl SurrealRepository {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    async fn fetch(&self, tenant_id: &str, record_ref: &RecordRef) -> StorageResult<Option<Record>> {
        let mut res = self
            .db
            .query("SELECT * FROM type::thing('nodes', $key)")
            .bind(("key", node_key(tenant_id, record_ref)))
            .await?;
        let rows: Vec<NodeRow> = res.take(0)?;
        rows.into_iter().next().map(NodeRow::into_record).transpose()
    }

    async fn insert(&self, tenant_id: &str, record: &Record) -> StorageResult<()> {
        let row = NodeRow::from_record(tenant_id, record);
        let created = match self
            .db
            .query("CREATE type::thing('nodes', $key) CONTENT $row")
            .bind(("key", row.node_key.clone()))
            .bind(("row", row))
            .await
        {
            Ok(mut res) => res.take::<Vec<NodeRow>>(0),
            Err(e) => Err(e),
        };

        match created {
            Ok(rows) if !rows.is_empty() => Ok(()),
            Ok(_) => Err(StorageError::Backend(format!(
                "create of {} returned no row",
                record.record_ref()
            ))),
            Err(e) => match self.fetch(tenant_id, record.record_ref()).await? {
                Some(existing) => Err(StorageError::version_conflict(
                    record.record_ref(),
                    None,
                    Some(existing.etag()),
                )),
                None => Err(e.into()),
            },
        }
    }

    async fn replace(
        &self,
        tenant_id: &str,
        record: &Record,
        expected: &VersionToken,
    ) -> StorageResult<()> {
        let row = NodeRow::from_record(tenant_id, record);
        let mut res = self
            .db
            .query("UPDATE type::thing('nodes', $key) CONTENT $row WHERE etag = $expected RETURN AFTER")
            .bind(("key", row.node_key.clone()))
            .bind(("row", row))
            .bind(("expected", expected.to_string()))
            .await?;
        let updated: Vec<NodeRow> = res.take(0)?;
        if !updated.is_empty() {
            return Ok(());
        }

        let actual = self.fetch(tenant_id, record.record_ref()).await?;
        Err(StorageError::version_conflict(
            record.record_ref(),
            Some(expected),
            actual.as_ref().map(Record::etag),
        ))
    }
}

/// Keyset pagination state for one stream.
struct PageCursor {
    db: Surreal<Any>,
    tenant_id: String,
    kind: String,
    after: String,
    done: bool,
}

impl PageCursor {
    async fn next_page(&mut self) -> StorageResult<Vec<Record>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM nodes WHERE tenant_id = $tenant AND kind = $kind \
                 AND node_ref > $after ORDER BY node_ref ASC LIMIT $limit",
            )
            .bind(("tenant", self.tenant_id.clone()))
            .bind(("kind", self.kind.clone()))
            .bind(("after", self.after.clone()))
            .bind(("limit", STREAM_PAGE_SIZE))
            .await?;
        let rows: Vec<NodeRow> = res.take(0)?;
        rows.into_iter().map(NodeRow::into_record).collect()
    }
}

#[async_trait]
impl Repository for SurrealRepository {
    #[instrument(skip(self, ctx), fields(tenant = ctx.tenant_id()))]
    async fn stream(&self, kind: &RecordKind, ctx: &Context) -> StorageResult<RecordStream> {
        let cursor = PageCursor {
            db: self.db.clone(),
            tenant_id: ctx.tenant_id().to_string(),
            kind: kind.to_string(),
            after: String::new(),
            done: false,
        };

        let pages = stream::unfold(cursor, |mut cursor| async move {
            if cursor.done {
                return None;
            }
            match cursor.next_page().await {
                Ok(page) if page.is_empty() => None,
                Ok(page) => {
                    debug!(kind = %cursor.kind, rows = page.len(), "fetched page");
                    cursor.done = page.len() < STREAM_PAGE_SIZE;
                    if let Some(last) = page.last() {
                        cursor.after = last.record_ref().to_string();
                    }
                    let items: Vec<StorageResult<Record>> = page.into_iter().map(Ok).collect();
                    Some((items, cursor))
                }
                Err(e) => {
                    cursor.done = true;
                    let err = StorageError::StreamUnavailable {
                        kind: cursor.kind.clone(),
                        reason: e.to_string(),
                    };
                    Some((vec![Err(err)], cursor))
                }
            }
        });

        Ok(Box::pin(pages.flat_map(stream::iter)))
    }

    async fn get(
        &self,
        record_ref: &RecordRef,
        consistent: bool,
        ctx: &Context,
    ) -> StorageResult<Record> {
        debug!(%record_ref, consistent, "get node");
        self.fetch(ctx.tenant_id(), record_ref)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                record_ref: record_ref.to_string(),
            })
    }

    #[instrument(skip(self, record, ctx), fields(record_ref = %record.record_ref()))]
    async fn put(
        &self,
        record: &Record,
        expected: Option<&VersionToken>,
        ctx: &Context,
    ) -> StorageResult<()> {
        match expected {
            None => self.insert(ctx.tenant_id(), record).await,
            Some(token) => self.replace(ctx.tenant_id(), record, token).await,
        }
    }
}
