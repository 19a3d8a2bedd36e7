//! Node records and their identities.
//!
//! A [`Record`] is immutable once built: every constructor either computes its
//! [`VersionToken`] from the content or adopts the token the repository stored
//! alongside it. Changing a record means building a new one with the `with_*`
//! helpers, which recompute the token.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Qualified record kind, `vendor:kind` (e.g. `acme:article`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordKind {
    vendor: String,
    name: String,
}

impl RecordKind {
    pub fn new(vendor: impl Into<String>, name: impl Into<String>) -> Result<Self, StorageError> {
        let vendor = vendor.into();
        let name = name.into();
        let raw = format!("{vendor}:{name}");
        validate_segment(&raw, &vendor, "vendor")?;
        validate_segment(&raw, &name, "kind")?;
        Ok(Self { vendor, name })
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn validate_segment(raw: &str, segment: &str, what: &str) -> Result<(), StorageError> {
    if segment.is_empty() {
        return Err(StorageError::InvalidRef {
            value: raw.to_string(),
            reason: format!("{what} must not be empty"),
        });
    }
    if !segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StorageError::InvalidRef {
            value: raw.to_string(),
            reason: format!("{what} may only contain [a-zA-Z0-9_-]"),
        });
    }
    Ok(())
}

impl FromStr for RecordKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(vendor), Some(name), None) => RecordKind::new(vendor, name),
            _ => Err(StorageError::InvalidRef {
                value: s.to_string(),
                reason: "expected vendor:kind".to_string(),
            }),
        }
    }
}

impl TryFrom<String> for RecordKind {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RecordKind> for String {
    fn from(kind: RecordKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vendor, self.name)
    }
}

/// Reference to a single record, `vendor:kind:id`.
///
/// The id is everything after the second `:` and may itself contain `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordRef {
    kind: RecordKind,
    id: String,
}

impl RecordRef {
    pub fn new(kind: RecordKind, id: impl Into<String>) -> Result<Self, StorageError> {
        let id = id.into();
        if id.is_empty() {
            return Err(StorageError::InvalidRef {
                value: format!("{kind}:"),
                reason: "id must not be empty".to_string(),
            });
        }
        Ok(Self { kind, id })
    }

    pub fn kind(&self) -> &RecordKind {
        &self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl FromStr for RecordRef {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(vendor), Some(name), Some(id)) => {
                RecordRef::new(RecordKind::new(vendor, name)?, id)
            }
            _ => Err(StorageError::InvalidRef {
                value: s.to_string(),
                reason: "expected vendor:kind:id".to_string(),
            }),
        }
    }
}

impl TryFrom<String> for RecordRef {
    type Error = StorageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RecordRef> for String {
    fn from(r: RecordRef) -> Self {
        r.to_string()
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Publication status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    #[default]
    Draft,
    Pending,
    Published,
    Scheduled,
    Expired,
    Archived,
    Deleted,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Draft => "draft",
            RecordStatus::Pending => "pending",
            RecordStatus::Published => "published",
            RecordStatus::Scheduled => "scheduled",
            RecordStatus::Expired => "expired",
            RecordStatus::Archived => "archived",
            RecordStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for RecordStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "draft" => RecordStatus::Draft,
            "pending" => RecordStatus::Pending,
            "published" => RecordStatus::Published,
            "scheduled" => RecordStatus::Scheduled,
            "expired" => RecordStatus::Expired,
            "archived" => RecordStatus::Archived,
            "deleted" => RecordStatus::Deleted,
            other => {
                return Err(StorageError::Backend(format!(
                    "unknown record status: {other}"
                )))
            }
        })
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version token ("etag"): SHA-256 hex over the canonical record content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    /// Wrap a token read back from storage.
    pub fn from_stored(token: impl Into<String>) -> Self {
        VersionToken(token.into())
    }

    fn of(content: &Value) -> Self {
        let mut buf = Vec::new();
        write_canonical(content, &mut buf);
        let mut hasher = Sha256::new();
        hasher.update(&buf);
        VersionToken(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 chars).
    pub fn short(&self) -> &str {
        self.0
            .char_indices()
            .nth(12)
            .map_or(self.0.as_str(), |(i, _)| &self.0[..i])
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize with object keys sorted at every depth, regardless of how the
/// `serde_json` map is ordered in this build.
fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(Value::String(key.clone()).to_string().as_bytes());
                out.push(b':');
                write_canonical(&map[key], out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        scalar => out.extend_from_slice(scalar.to_string().as_bytes()),
    }
}

/// A persisted node.
///
/// Deserializing adopts the `etag` found in the input, like
/// [`Record::from_stored`]; use [`Record::etag_is_current`] to check it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "node_ref")]
    record_ref: RecordRef,
    status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    last_event_seq: u64,
    etag: VersionToken,
}

impl Record {
    /// Build a record and compute its version token.
    pub fn new(
        record_ref: RecordRef,
        status: RecordStatus,
        title: Option<String>,
        fields: Map<String, Value>,
        last_event_seq: u64,
    ) -> Self {
        let etag = Self::compute_etag(&record_ref, status, title.as_deref(), &fields, last_event_seq);
        Self {
            record_ref,
            status,
            title,
            fields,
            last_event_seq,
            etag,
        }
    }

    /// Rebuild a record exactly as the repository stored it.
    pub fn from_stored(
        record_ref: RecordRef,
        status: RecordStatus,
        title: Option<String>,
        fields: Map<String, Value>,
        last_event_seq: u64,
        etag: VersionToken,
    ) -> Self {
        Self {
            record_ref,
            status,
            title,
            fields,
            last_event_seq,
            etag,
        }
    }

    fn compute_etag(
        record_ref: &RecordRef,
        status: RecordStatus,
        title: Option<&str>,
        fields: &Map<String, Value>,
        last_event_seq: u64,
    ) -> VersionToken {
        VersionToken::of(&serde_json::json!({
            "node_ref": record_ref.to_string(),
            "status": status.as_str(),
            "title": title,
            "fields": fields,
            "last_event_seq": last_event_seq,
        }))
    }

    pub fn record_ref(&self) -> &RecordRef {
        &self.record_ref
    }

    pub fn kind(&self) -> &RecordKind {
        self.record_ref.kind()
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn last_event_seq(&self) -> u64 {
        self.last_event_seq
    }

    pub fn etag(&self) -> &VersionToken {
        &self.etag
    }

    pub fn with_status(self, status: RecordStatus) -> Self {
        Self::new(self.record_ref, status, self.title, self.fields, self.last_event_seq)
    }

    pub fn with_title(self, title: Option<String>) -> Self {
        Self::new(self.record_ref, self.status, title, self.fields, self.last_event_seq)
    }

    pub fn with_fields(self, fields: Map<String, Value>) -> Self {
        Self::new(self.record_ref, self.status, self.title, fields, self.last_event_seq)
    }

    pub fn with_last_event_seq(self, seq: u64) -> Self {
        Self::new(self.record_ref, self.status, self.title, self.fields, seq)
    }

    /// `true` if the stored token still matches the content.
    pub fn etag_is_current(&self) -> bool {
        Self::compute_etag(
            &self.record_ref,
            self.status,
            self.title.as_deref(),
            &self.fields,
            self.last_event_seq,
        ) == self.etag
    }
}
