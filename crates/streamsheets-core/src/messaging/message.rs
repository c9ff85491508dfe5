use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use streamsheets_engine::engine::resolve_path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Set when the message carries the arguments of an `EXECUTE` call.
    pub request_id: Option<String>,
    pub source: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub arrived_at: i64,
}

/// A queued message. The payload never changes once the message is queued.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub payload: Value,
    pub metadata: Metadata,
}

impl Message {
    pub fn new(payload: Value) -> Self {
        Message {
            id: Uuid::new_v4(),
            payload,
            metadata: Metadata {
                request_id: None,
                source: None,
                arrived_at: Utc::now().timestamp_millis(),
            },
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.metadata.request_id = Some(request_id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    /// Look up a dotted or JSON-pointer path in the payload.
    pub fn get(&self, path: &str) -> Option<&Value> {
        resolve_path(&self.payload, path)
    }

    /// Length of the array at `path`, or 0 when the path does not name an array.
    pub fn array_len(&self, path: &str) -> usize {
        match self.get(path) {
            Some(Value::Array(items)) => items.len(),
            _ => 0,
        }
    }

    /// Element `index` (1-based) of the array at `path`.
    pub fn element(&self, path: &str, index: usize) -> Option<&Value> {
        match self.get(path) {
            Some(Value::Array(items)) if index > 0 => items.get(index - 1),
            _ => None,
        }
    }
}
