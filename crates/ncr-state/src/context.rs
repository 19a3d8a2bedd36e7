//! Run-scoped context threaded through every collaborator call.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageError;

pub const TENANT_ID: &str = "tenant_id";
pub const SKIP_ERRORS: &str = "skip_errors";
pub const EXPORTING: &str = "exporting";
pub const EXPORTING_ALL: &str = "exporting_all";
pub const REINDEXING: &str = "reindexing";
pub const REINDEXING_ALL: &str = "reindexing_all";
pub const SYNCING: &str = "syncing";
pub const SYNCING_ALL: &str = "syncing_all";

/// Immutable key/value map (tenant id, operation flags, caller extras).
///
/// Every "mutation" returns a new context; a context handed to a cursor is
/// never changed underneath it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(BTreeMap<String, Value>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object; any other JSON shape is rejected.
    pub fn from_json(value: Value) -> Result<Self, StorageError> {
        match value {
            Value::Object(map) => Ok(Context(map.into_iter().collect())),
            Value::Null => Ok(Context::new()),
            other => Err(StorageError::InvalidContext(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    /// Copy with every key of a JSON object layered on top.
    ///
    /// Used for caller-supplied `--context` blobs; keys in `value` win.
    pub fn merge_json(&self, value: Value) -> Result<Self, StorageError> {
        let extra = Context::from_json(value)?;
        let mut map = self.0.clone();
        map.extend(extra.0);
        Ok(Context(map))
    }

    /// Copy with `key` set to `value`.
    pub fn with(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = self.0.clone();
        map.insert(key.into(), value.into());
        Context(map)
    }

    /// Copy with the tenant id set.
    pub fn with_tenant(&self, tenant_id: impl Into<String>) -> Self {
        self.with(TENANT_ID, tenant_id.into())
    }

    /// Tenant id, or `""` when the context is not tenant-scoped.
    pub fn tenant_id(&self) -> &str {
        self.0.get(TENANT_ID).and_then(Value::as_str).unwrap_or("")
    }

    /// Boolean flag; missing or non-bool values read as `false`.
    pub fn flag(&self, name: &str) -> bool {
        self.0.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }
}
