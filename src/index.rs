//! Concurrent secondary index over event type, used by the in-memory data
//! store for type-scoped diagnostics without scanning every stream.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One indexed event's location: which stream, and at which version.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub stream_key: String,
    pub version: u64,
}

/// Maps event type to every `(stream, version)` it has occurred at.
pub struct EventIndex {
    by_type: Arc<DashMap<String, Vec<IndexEntry>>>,
    total_events: AtomicUsize,
}

impl EventIndex {
    pub fn new() -> Self {
        Self {
            by_type: Arc::new(DashMap::new()),
            total_events: AtomicUsize::new(0),
        }
    }

    pub fn index_event(&self, stream_key: &str, event_type: &str, version: u64) {
        self.by_type
            .entry(event_type.to_string())
            .or_default()
            .push(IndexEntry {
                stream_key: stream_key.to_string(),
                version,
            });
        self.total_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_by_type(&self, event_type: &str) -> Vec<IndexEntry> {
        self.by_type
            .get(event_type)
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn all_types(&self) -> Vec<String> {
        self.by_type.iter().map(|e| e.key().clone()).collect()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_events: self.total_events.load(Ordering::Relaxed),
            total_event_types: self.by_type.len(),
        }
    }

    pub fn clear(&self) {
        self.by_type.clear();
        self.total_events.store(0, Ordering::Relaxed);
    }
}

impl Default for EventIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStats {
    pub total_events: usize,
    pub total_event_types: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_event_groups_by_type() {
        let index = EventIndex::new();
        index.index_event("order__1__main", "order.placed", 0);
        index.index_event("order__2__main", "order.placed", 0);
        index.index_event("order__1__main", "order.shipped", 1);

        assert_eq!(index.get_by_type("order.placed").len(), 2);
        assert_eq!(index.get_by_type("order.shipped").len(), 1);
        assert_eq!(index.stats().total_events, 3);
        assert_eq!(index.stats().total_event_types, 2);
    }

    #[test]
    fn clear_resets_everything() {
        let index = EventIndex::new();
        index.index_event("order__1__main", "order.placed", 0);
        index.clear();
        assert_eq!(index.stats().total_events, 0);
        assert!(index.get_by_type("order.placed").is_empty());
    }
}
