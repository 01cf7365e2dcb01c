//! Contracts for external collaborators
//!
//! The core never assumes a backend: messages, documents and audit events
//! leave through these traits only.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Error type for collaborator operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Document not found
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Value could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend failure
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// ============================================================================
// Publishing
// ============================================================================

/// A message handed to a publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,

    /// Partitioning / deduplication key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    pub payload: Value,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload,
            headers: HashMap::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Publishes messages to a topic
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), StoreError>;
}

// ============================================================================
// Documents
// ============================================================================

/// Equality filter over top-level fields (or JSON pointers starting with `/`)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    pub conditions: Vec<(String, Value)>,
    pub limit: Option<usize>,
}

impl DocumentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field` to equal `value`
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a document satisfies every condition
    pub fn matches(&self, document: &Value) -> bool {
        self.conditions.iter().all(|(field, expected)| {
            let actual = if field.starts_with('/') {
                document.pointer(field)
            } else {
                document.get(field)
            };
            actual == Some(expected)
        })
    }
}

/// Keyed JSON document storage
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace a document
    async fn save(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Delete a document; returns whether it existed
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    /// Documents matching the filter, ordered by id
    async fn query(&self, collection: &str, filter: &DocumentFilter)
        -> Result<Vec<Value>, StoreError>;
}

// ============================================================================
// Audit events
// ============================================================================

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,

    /// Dotted event type, e.g. `run.dispatched`
    pub event_type: String,

    /// What the event is about (run id, workflow id, ...)
    pub subject: String,

    #[serde(default)]
    pub data: Value,

    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event_type: impl Into<String>, subject: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: event_type.into(),
            subject: subject.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only sink for audit events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches() {
        let doc = json!({"status": "active", "control": {"enabled": true}});

        assert!(DocumentFilter::new().matches(&doc));
        assert!(DocumentFilter::new().where_eq("status", "active").matches(&doc));
        assert!(DocumentFilter::new().where_eq("/control/enabled", true).matches(&doc));
        assert!(!DocumentFilter::new().where_eq("status", "failed").matches(&doc));
        assert!(!DocumentFilter::new().where_eq("missing", 1).matches(&doc));
    }
}
