//! In-memory collaborator implementations for testing and local runs

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{AuditEvent, DocumentFilter, DocumentStore, EventSink, Message, MessagePublisher, StoreError};

/// Publisher that keeps every message
#[derive(Debug, Default)]
pub struct InMemoryPublisher {
    messages: RwLock<Vec<Message>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    /// Messages published on one topic
    pub fn messages_for(&self, topic: &str) -> Vec<Message> {
        self.messages
            .read()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.messages.write().clear();
    }
}

#[async_trait]
impl MessagePublisher for InMemoryPublisher {
    async fn publish(&self, message: Message) -> Result<(), StoreError> {
        self.messages.write().push(message);
        Ok(())
    }
}

/// Document store backed by nested maps
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    pub fn clear(&self) {
        self.collections.write().clear();
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn save(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .collections
            .write()
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some())
    }

    async fn query(
        &self,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.read();
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let matching = docs.values().filter(|doc| filter.matches(doc)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }
}

/// Event sink that keeps every event
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    /// Events of one type, in append order
    pub fn events_of_type(&self, event_type: &str) -> Vec<AuditEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn append(&self, event: AuditEvent) -> Result<(), StoreError> {
        self.events.write().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_document_store_crud() {
        let store = InMemoryDocumentStore::new();

        store.save("actions", "b", json!({"kind": "x"})).await.unwrap();
        store.save("actions", "a", json!({"kind": "y"})).await.unwrap();
        store.save("actions", "c", json!({"kind": "x"})).await.unwrap();
        assert_eq!(store.count("actions"), 3);

        assert_eq!(store.get("actions", "a").await.unwrap(), Some(json!({"kind": "y"})));
        assert_eq!(store.get("other", "a").await.unwrap(), None);

        let xs = store
            .query("actions", &DocumentFilter::new().where_eq("kind", "x"))
            .await
            .unwrap();
        assert_eq!(xs.len(), 2);

        let limited = store
            .query("actions", &DocumentFilter::new().limit(1))
            .await
            .unwrap();
        assert_eq!(limited, vec![json!({"kind": "y"})]);

        assert!(store.delete("actions", "a").await.unwrap());
        assert!(!store.delete("actions", "a").await.unwrap());
        assert_eq!(store.count("actions"), 2);
    }

    #[tokio::test]
    async fn test_publisher_filters_by_topic() {
        let publisher = InMemoryPublisher::new();
        publisher
            .publish(Message::new("a", json!(1)).with_key("k"))
            .await
            .unwrap();
        publisher.publish(Message::new("b", json!(2))).await.unwrap();

        assert_eq!(publisher.messages().len(), 2);
        assert_eq!(publisher.messages_for("a")[0].key.as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn test_event_sink_appends() {
        let sink = InMemoryEventSink::new();
        sink.append(AuditEvent::new("run.dispatched", "r1", json!({})))
            .await
            .unwrap();
        sink.append(AuditEvent::new("phase.changed", "wf", json!({})))
            .await
            .unwrap();

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.events_of_type("phase.changed")[0].subject, "wf");
    }
}
