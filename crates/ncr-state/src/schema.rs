//! Row types for the NCR SurrealDB tables
//!
//! Tables:
//! - nodes: repository records, one row per (tenant, node ref)
//! - search_docs: documents written by the search index
//! - node_events: per-record event histories
//!
//! Rows carry plain strings so SurrealDB never needs to understand the
//! domain types; conversion happens at the boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageError;
use crate::events::{EventKind, RecordEvent};
use crate::record::{Record, RecordRef, RecordStatus, VersionToken};
use crate::storage_traits::StorageResult;

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Key of a record within a tenant, used as the SurrealDB record id.
pub fn node_key(tenant_id: &str, record_ref: &RecordRef) -> String {
    format!("{tenant_id}|{record_ref}")
}

/// Key of one event; the zero-padded seq keeps keys sortable.
pub fn event_key(tenant_id: &str, record_ref: &RecordRef, seq: u64) -> String {
    format!("{tenant_id}|{record_ref}|{seq:020}")
}

fn fields_object(node_ref: &str, fields: Value) -> StorageResult<serde_json::Map<String, Value>> {
    match fields {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(serde_json::Map::new()),
        other => Err(StorageError::Backend(format!(
            "fields of {node_ref} are not an object: {other}"
        ))),
    }
}

/// Row in the `nodes` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRow {
    pub node_key: String,
    pub tenant_id: String,
    pub node_ref: String,
    pub kind: String,
    pub status: String,
    pub title: Option<String>,
    pub fields: Value,
    pub last_event_seq: u64,
    pub etag: String,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl NodeRow {
    pub fn from_record(tenant_id: &str, record: &Record) -> Self {
        NodeRow {
            node_key: node_key(tenant_id, record.record_ref()),
            tenant_id: tenant_id.to_string(),
            node_ref: record.record_ref().to_string(),
            kind: record.kind().to_string(),
            status: record.status().as_str().to_string(),
            title: record.title().map(str::to_string),
            fields: Value::Object(record.fields().clone()),
            last_event_seq: record.last_event_seq(),
            etag: record.etag().to_string(),
            updated_at: Utc::now(),
        }
    }

    /// Rebuild the record, keeping the stored etag.
    pub fn into_record(self) -> StorageResult<Record> {
        let record_ref: RecordRef = self.node_ref.parse()?;
        let status: RecordStatus = self.status.parse()?;
        let fields = fields_object(&self.node_ref, self.fields)?;
        Ok(Record::from_stored(
            record_ref,
            status,
            self.title,
            fields,
            self.last_event_seq,
            VersionToken::from_stored(self.etag),
        ))
    }
}

/// Row in the `search_docs` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDocRow {
    pub doc_key: String,
    pub tenant_id: String,
    pub node_ref: String,
    pub kind: String,
    pub status: String,
    pub title: Option<String>,
    pub body: Value,
    pub last_event_seq: u64,
    pub etag: String,
    #[serde(with = "surreal_datetime")]
    pub indexed_at: DateTime<Utc>,
}

impl SearchDocRow {
    pub fn from_record(tenant_id: &str, record: &Record) -> Self {
        SearchDocRow {
            doc_key: node_key(tenant_id, record.record_ref()),
            tenant_id: tenant_id.to_string(),
            node_ref: record.record_ref().to_string(),
            kind: record.kind().to_string(),
            status: record.status().as_str().to_string(),
            title: record.title().map(str::to_string),
            body: Value::Object(record.fields().clone()),
            last_event_seq: record.last_event_seq(),
            etag: record.etag().to_string(),
            indexed_at: Utc::now(),
        }
    }

    pub fn into_record(self) -> StorageResult<Record> {
        let record_ref: RecordRef = self.node_ref.parse()?;
        let status: RecordStatus = self.status.parse()?;
        let fields = fields_object(&self.node_ref, self.body)?;
        Ok(Record::from_stored(
            record_ref,
            status,
            self.title,
            fields,
            self.last_event_seq,
            VersionToken::from_stored(self.etag),
        ))
    }
}

/// Row in the `node_events` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub event_key: String,
    pub tenant_id: String,
    pub node_ref: String,
    /// 1-based sequence within the record's history
    pub seq: u64,
    /// Serialized [`EventKind`]
    pub event: Value,
    #[serde(with = "surreal_datetime")]
    pub occurred_at: DateTime<Utc>,
}

impl EventRow {
    pub fn from_event(tenant_id: &str, event: &RecordEvent) -> StorageResult<Self> {
        Ok(EventRow {
            event_key: event_key(tenant_id, &event.record_ref, event.seq),
            tenant_id: tenant_id.to_string(),
            node_ref: event.record_ref.to_string(),
            seq: event.seq,
            event: serde_json::to_value(&event.kind)?,
            occurred_at: event.occurred_at,
        })
    }

    pub fn into_event(self) -> StorageResult<RecordEvent> {
        let kind: EventKind = serde_json::from_value(self.event)?;
        Ok(RecordEvent {
            record_ref: self.node_ref.parse()?,
            seq: self.seq,
            kind,
            occurred_at: self.occurred_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Record {
        Record::new(
            "acme:article:42".parse().unwrap(),
            RecordStatus::Published,
            Some("Title".into()),
            json!({"body": "text"}).as_object().cloned().unwrap(),
            7,
        )
    }

    #[test]
    fn node_row_round_trip_keeps_etag() {
        let original = record();
        let row = NodeRow::from_record("client1", &original);
        assert_eq!(row.node_key, "client1|acme:article:42");
        assert_eq!(row.kind, "acme:article");

        let back = row.into_record().unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn node_row_rejects_non_object_fields() {
        let mut row = NodeRow::from_record("", &record());
        row.fields = json!([1, 2]);
        assert!(row.into_record().is_err());
    }

    #[test]
    fn event_keys_sort_by_seq() {
        let r: RecordRef = "acme:article:1".parse().unwrap();
        assert!(event_key("t", &r, 9) < event_key("t", &r, 10));
    }

    #[test]
    fn event_row_round_trip() {
        let event = RecordEvent::new(
            "acme:article:1".parse().unwrap(),
            3,
            EventKind::StatusChanged {
                status: RecordStatus::Archived,
            },
        );
        let row = EventRow::from_event("t", &event).unwrap();
        assert_eq!(row.event, json!({"type": "status_changed", "status": "archived"}));
        assert_eq!(row.into_event().unwrap(), event);
    }
}
