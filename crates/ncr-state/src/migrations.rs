//! SurrealDB schema migrations and initialization
//!
//! Sets up the NCR tables with their unique keys and lookup indexes.
//! Every statement uses `IF NOT EXISTS`, so running it again is a no-op.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all NCR tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing NCR SurrealDB schema");

    init_nodes_table(db).await?;
    init_search_docs_table(db).await?;
    init_node_events_table(db).await?;

    info!("NCR schema initialization complete");
    Ok(())
}

/// Initialize `nodes` table
///
/// Schema:
/// ```text
/// TABLE nodes {
///   node_key:        STRING (record id, "tenant|vendor:kind:id")
///   tenant_id:       STRING
///   node_ref:        STRING (stream order)
///   kind:            STRING
///   status:          STRING
///   title:           STRING?
///   fields:          OBJECT
///   last_event_seq:  INT
///   etag:            STRING (optimistic concurrency token)
///   updated_at:      DATETIME
/// }
/// ```
async fn init_nodes_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing nodes table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS nodes SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_node_key ON TABLE nodes COLUMNS node_key UNIQUE;

        -- Paged streaming: tenant + kind, ordered by node_ref
        DEFINE INDEX IF NOT EXISTS idx_tenant_kind_ref ON TABLE nodes COLUMNS tenant_id, kind, node_ref;
    "#;

    db.query(sql).await?.check()?;
    info!("nodes table initialized");
    Ok(())
}

/// Initialize `search_docs` table
async fn init_search_docs_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing search_docs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS search_docs SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_doc_key ON TABLE search_docs COLUMNS doc_key UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_doc_tenant_kind ON TABLE search_docs COLUMNS tenant_id, kind;
    "#;

    db.query(sql).await?.check()?;
    info!("search_docs table initialized");
    Ok(())
}

/// Initialize `node_events` table
///
/// `(tenant_id, node_ref, seq)` is unique; histories are append-only.
async fn init_node_events_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing node_events table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS node_events SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_event_key ON TABLE node_events COLUMNS event_key UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_event_ref_seq ON TABLE node_events COLUMNS tenant_id, node_ref, seq UNIQUE;
    "#;

    db.query(sql).await?.check()?;
    info!("node_events table initialized");
    Ok(())
}
