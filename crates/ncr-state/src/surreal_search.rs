//! SurrealDB-backed [`SearchIndex`] implementation
//!
//! Documents land in the `search_docs` table. A bulk call is one transaction,
//! so a failing document rolls back the whole call.

use async_trait::async_trait;
use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::debug;

use crate::context::Context;
use crate::error::StorageError;
use crate::record::{Record, RecordRef};
use crate::schema::{node_key, SearchDocRow};
use crate::storage_traits::{SearchIndex, StorageResult};

#[derive(Deserialize)]
struct CountRow {
    total: u64,
}

/// SurrealDB-backed implementation of [`SearchIndex`].
#[derive(Clone)]
pub struct SurrealSearchIndex {
    db: Surreal<Any>,
}

impl SurrealSearchIndex {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Indexed document for `record_ref`, if any.
    pub async fn document(&self, record_ref: &RecordRef, ctx: &Context) -> StorageResult<Option<Record>> {
        let mut res = self
            .db
            .query("SELECT * FROM type::thing('search_docs', $key)")
            .bind(("key", node_key(ctx.tenant_id(), record_ref)))
            .await?;
        let rows: Vec<SearchDocRow> = res.take(0)?;
        rows.into_iter()
            .next()
            .map(SearchDocRow::into_record)
            .transpose()
    }

    /// Number of documents indexed for the context's tenant.
    pub async fn count(&self, ctx: &Context) -> StorageResult<usize> {
        let mut res = self
            .db
            .query("SELECT count() AS total FROM search_docs WHERE tenant_id = $tenant GROUP ALL")
            .bind(("tenant", ctx.tenant_id().to_string()))
            .await?;
        let totals: Vec<CountRow> = res.take(0)?;
        Ok(totals.first().map(|row| row.total as usize).unwrap_or(0))
    }
}

#[async_trait]
impl SearchIndex for SurrealSearchIndex {
    async fn bulk_index(&self, records: &[Record], ctx: &Context) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let docs: Vec<SearchDocRow> = records
            .iter()
            .map(|r| SearchDocRow::from_record(ctx.tenant_id(), r))
            .collect();
        let count = docs.len();
        debug!(count, tenant = ctx.tenant_id(), "bulk indexing");

        let sql = r#"
            BEGIN TRANSACTION;
            FOR $doc IN $docs {
                UPSERT type::thing('search_docs', $doc.doc_key) CONTENT $doc;
            };
            COMMIT TRANSACTION;
        "#;

        self.db
            .query(sql)
            .bind(("docs", docs))
            .await
            .and_then(|res| res.check())
            .map_err(|e| StorageError::BulkIndex {
                count,
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
