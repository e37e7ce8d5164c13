//! In-memory `DataStore`: a `DashMap`-backed reference implementation for
//! tests and for embedding the engine without external storage.

use crate::domain::entities::{Event, ObjectDocument};
use crate::domain::repositories::{AppendOptions, DataStore};
use crate::error::{EventStoreError, Result};
use crate::index::EventIndex;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

fn stream_key(document: &ObjectDocument) -> String {
    format!(
        "{}__{}__{}",
        document.object_name,
        document.object_id,
        document.active.stream_identifier
    )
}

/// Concurrent in-memory event store keyed by `(object_name, object_id,
/// stream_identifier)`. Each stream's events live in their own `Vec`,
/// guarded independently so unrelated streams never contend.
pub struct InMemoryDataStore {
    streams: Arc<DashMap<String, Vec<Event>>>,
    index: Arc<EventIndex>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(DashMap::new()),
            index: Arc::new(EventIndex::new()),
        }
    }

    pub fn index(&self) -> &EventIndex {
        &self.index
    }
}

impl Default for InMemoryDataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn append(&self, document: &ObjectDocument, events: &[Event], options: AppendOptions) -> Result<i64> {
        if events.is_empty() {
            return Ok(options.expected_tip);
        }

        let key = stream_key(document);
        let mut stream = self.streams.entry(key.clone()).or_default();
        let actual_tip = stream.len() as i64 - 1;

        if actual_tip != options.expected_tip {
            return Err(EventStoreError::ConcurrencyConflict {
                expected: options.expected_tip,
                actual: actual_tip,
            });
        }

        for event in events {
            self.index.index_event(&key, event.event_type_str(), event.event_version());
            stream.push(event.clone());
        }

        Ok(stream.len() as i64 - 1)
    }

    async fn read(&self, document: &ObjectDocument, from_version: u64, until_version: Option<u64>) -> Result<Vec<Event>> {
        let key = stream_key(document);
        let stream = match self.streams.get(&key) {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };

        Ok(stream
            .iter()
            .filter(|e| {
                e.event_version() >= from_version
                    && until_version.map(|until| e.event_version() < until).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn remove_events_for_failed_commit(&self, document: &ObjectDocument, from_version: u64, to_version: u64) -> Result<u64> {
        let key = stream_key(document);
        let mut stream = match self.streams.get_mut(&key) {
            Some(s) => s,
            None => return Ok(0),
        };

        let before = stream.len();
        stream.retain(|e| e.event_version() < from_version || e.event_version() > to_version);
        Ok((before - stream.len()) as u64)
    }

    async fn current_tip(&self, document: &ObjectDocument) -> Result<i64> {
        let key = stream_key(document);
        Ok(self.streams.get(&key).map(|s| s.len() as i64 - 1).unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::ObjectId;
    use serde_json::json;

    fn document() -> ObjectDocument {
        ObjectDocument::new("order", ObjectId::new("order-1").unwrap(), "main", "in_memory")
    }

    fn staged(version: u64) -> Event {
        Event::stage("order.placed", 1, json!({})).unwrap().with_version(version)
    }

    #[tokio::test]
    async fn append_then_read_round_trips() {
        let store = InMemoryDataStore::new();
        let doc = document();

        let tip = store
            .append(&doc, &[staged(0), staged(1)], AppendOptions { expected_tip: -1 })
            .await
            .unwrap();
        assert_eq!(tip, 1);

        let events = store.read(&doc, 0, None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(store.current_tip(&doc).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn append_rejects_stale_expected_tip() {
        let store = InMemoryDataStore::new();
        let doc = document();
        store
            .append(&doc, &[staged(0)], AppendOptions { expected_tip: -1 })
            .await
            .unwrap();

        let result = store.append(&doc, &[staged(1)], AppendOptions { expected_tip: -1 }).await;
        assert!(matches!(result, Err(EventStoreError::ConcurrencyConflict { .. })));
    }

    #[tokio::test]
    async fn remove_events_for_failed_commit_deletes_range() {
        let store = InMemoryDataStore::new();
        let doc = document();
        store
            .append(&doc, &[staged(0), staged(1), staged(2)], AppendOptions { expected_tip: -1 })
            .await
            .unwrap();

        let removed = store.remove_events_for_failed_commit(&doc, 1, 2).await.unwrap();
        assert_eq!(removed, 2);

        let remaining = store.read(&doc, 0, None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].event_version(), 0);
    }

    #[tokio::test]
    async fn read_stream_yields_the_same_events_as_read() {
        use futures::StreamExt;

        let store = InMemoryDataStore::new();
        let doc = document();
        let events: Vec<Event> = (0..5).map(staged).collect();
        store.append(&doc, &events, AppendOptions { expected_tip: -1 }).await.unwrap();

        let materialized = store.read(&doc, 0, None).await.unwrap();
        let streamed: Vec<Event> = store
            .read_stream(&doc, 0, None)
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(streamed, materialized);
    }

    #[tokio::test]
    async fn read_stream_can_be_dropped_before_exhaustion() {
        use futures::StreamExt;

        let store = InMemoryDataStore::new();
        let doc = document();
        let events: Vec<Event> = (0..10).map(staged).collect();
        store.append(&doc, &events, AppendOptions { expected_tip: -1 }).await.unwrap();

        let mut stream = store.read_stream(&doc, 0, None);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.event_version(), 0);
        drop(stream);
    }

    #[tokio::test]
    async fn distinct_streams_do_not_interfere() {
        let store = InMemoryDataStore::new();
        let doc_a = document();
        let doc_b = ObjectDocument::new("order", ObjectId::new("order-2").unwrap(), "main", "in_memory");

        store.append(&doc_a, &[staged(0)], AppendOptions { expected_tip: -1 }).await.unwrap();
        store.append(&doc_b, &[staged(0)], AppendOptions { expected_tip: -1 }).await.unwrap();

        assert_eq!(store.read(&doc_a, 0, None).await.unwrap().len(), 1);
        assert_eq!(store.read(&doc_b, 0, None).await.unwrap().len(), 1);
        assert_eq!(store.index().stats().total_events, 2);
    }
}
