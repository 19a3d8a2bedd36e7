//! Record events: the history an aggregate is rebuilt from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::record::{RecordRef, RecordStatus};

/// What happened to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Record came into existence.
    Created {
        status: RecordStatus,
        title: Option<String>,
        #[serde(default)]
        fields: Map<String, Value>,
    },

    /// Fields were merged into the record; a `null` value removes the key.
    Updated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default)]
        fields: Map<String, Value>,
    },

    /// Status transition (publish, unpublish, archive, delete...).
    StatusChanged { status: RecordStatus },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Created { .. } => "created",
            EventKind::Updated { .. } => "updated",
            EventKind::StatusChanged { .. } => "status_changed",
        }
    }
}

/// A single event in a record's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEvent {
    pub record_ref: RecordRef,
    /// 1-based, contiguous within one record's history
    pub seq: u64,
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
}

impl RecordEvent {
    pub fn new(record_ref: RecordRef, seq: u64, kind: EventKind) -> Self {
        Self {
            record_ref,
            seq,
            kind,
            occurred_at: Utc::now(),
        }
    }
}
