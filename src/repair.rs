//! Repair service: clears a broken-stream marker left by a partial commit.

use crate::domain::entities::{Event, ObjectDocument};
use crate::domain::repositories::DataStore;
use crate::error::{EventStoreError, Result};
use std::sync::Arc;

/// The outcome of a successful repair.
pub struct RepairReport {
    pub events_removed: u64,
    pub marker_appended: bool,
}

pub struct RepairService {
    store: Arc<dyn DataStore>,
}

impl RepairService {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    /// Repair `document`, which must currently be marked broken. Deletes the
    /// orphaned range recorded in `broken_info`, clears the marker, and
    /// records a rollback entry. When `append_marker` is set, a visible
    /// `events.rolled_back` event is appended afterward — this advances the
    /// stream tip, so callers that care about exact version numbers should
    /// account for it.
    pub async fn repair(&self, document: &mut ObjectDocument, append_marker: bool) -> Result<RepairReport> {
        let broken_info = document
            .active
            .broken_info
            .clone()
            .ok_or_else(|| EventStoreError::NotBroken(document.active.stream_identifier.clone()))?;

        self.repair_range(
            document,
            broken_info.orphaned_from_version,
            broken_info.orphaned_to_version,
            append_marker,
        )
        .await
    }

    /// Manual recovery path for when `broken_info` is absent but the caller
    /// knows the orphaned range from external evidence (e.g. operator
    /// inspection of the data store directly).
    pub async fn repair_range(
        &self,
        document: &mut ObjectDocument,
        from_version: u64,
        to_version: u64,
        append_marker: bool,
    ) -> Result<RepairReport> {
        let events_removed = self
            .store
            .remove_events_for_failed_commit(document, from_version, to_version)
            .await?;

        if document.active.is_broken {
            document.active.clear_broken(events_removed)?;
        } else {
            document.active.rollback_history.push(crate::domain::entities::RollbackRecord {
                rolled_back_at: chrono::Utc::now(),
                from_version,
                to_version,
                events_removed,
                original_error: "manual repair".to_string(),
            });
        }

        let mut marker_appended = false;
        if append_marker {
            let marker = Event::stage(
                "events.rolled_back",
                1,
                serde_json::json!({
                    "from_version": from_version,
                    "to_version": to_version,
                    "events_removed": events_removed,
                }),
            )?
            .with_version((document.active.current_stream_version + 1) as u64);

            let options = crate::domain::repositories::AppendOptions {
                expected_tip: document.active.current_stream_version,
            };
            let new_tip = self.store.append(document, &[marker], options).await?;
            document.active.current_stream_version = new_tip;
            marker_appended = true;
        }

        Ok(RepairReport {
            events_removed,
            marker_appended,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ObjectDocument;
    use crate::domain::repositories::AppendOptions;
    use crate::domain::value_objects::ObjectId;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct MemStore {
        events: Mutex<HashMap<String, Vec<Event>>>,
    }

    impl MemStore {
        fn new() -> Self {
            Self {
                events: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl DataStore for MemStore {
        async fn append(
            &self,
            document: &ObjectDocument,
            events: &[Event],
            _options: AppendOptions,
        ) -> Result<i64> {
            let mut store = self.events.lock();
            let existing = store.entry(document.active.stream_identifier.clone()).or_default();
            existing.extend(events.iter().cloned());
            Ok(existing.len() as i64 - 1)
        }

        async fn read(
            &self,
            _document: &ObjectDocument,
            _from_version: u64,
            _until_version: Option<u64>,
        ) -> Result<Vec<Event>> {
            Ok(Vec::new())
        }

        async fn remove_events_for_failed_commit(
            &self,
            document: &ObjectDocument,
            from_version: u64,
            to_version: u64,
        ) -> Result<u64> {
            let mut store = self.events.lock();
            if let Some(events) = store.get_mut(&document.active.stream_identifier) {
                let before = events.len();
                events.retain(|e| e.event_version() < from_version || e.event_version() > to_version);
                return Ok((before - events.len()) as u64);
            }
            Ok(0)
        }

        async fn current_tip(&self, document: &ObjectDocument) -> Result<i64> {
            let store = self.events.lock();
            Ok(store
                .get(&document.active.stream_identifier)
                .map(|e| e.len() as i64 - 1)
                .unwrap_or(-1))
        }
    }

    fn document() -> ObjectDocument {
        ObjectDocument::new("order", ObjectId::new("order-1").unwrap(), "main", "in_memory")
    }

    #[tokio::test]
    async fn repair_clears_broken_marker_and_records_history() {
        let store = Arc::new(MemStore::new());
        let service = RepairService::new(store.clone());
        let mut doc = document();
        doc.active.current_stream_version = 3;
        doc.active.mark_broken(2, 3, "partial commit").unwrap();

        let report = service.repair(&mut doc, false).await.unwrap();
        assert!(!doc.active.is_broken);
        assert_eq!(report.events_removed, 0);
        assert_eq!(doc.active.rollback_history.len(), 1);
    }

    #[tokio::test]
    async fn repair_without_broken_marker_fails() {
        let store = Arc::new(MemStore::new());
        let service = RepairService::new(store);
        let mut doc = document();

        assert!(matches!(
            service.repair(&mut doc, false).await,
            Err(EventStoreError::NotBroken(_))
        ));
    }

    #[tokio::test]
    async fn repair_can_append_visible_marker_event() {
        let store = Arc::new(MemStore::new());
        let service = RepairService::new(store);
        let mut doc = document();
        doc.active.current_stream_version = 1;
        doc.active.mark_broken(1, 1, "partial commit").unwrap();

        let report = service.repair(&mut doc, true).await.unwrap();
        assert!(report.marker_appended);
        assert_eq!(doc.active.current_stream_version, 2);
    }

    #[tokio::test]
    async fn repair_range_supports_manual_recovery_without_broken_flag() {
        let store = Arc::new(MemStore::new());
        let service = RepairService::new(store);
        let mut doc = document();

        let report = service.repair_range(&mut doc, 0, 1, false).await.unwrap();
        assert_eq!(report.events_removed, 0);
        assert_eq!(doc.active.rollback_history.len(), 1);
        assert_eq!(doc.active.rollback_history[0].original_error, "manual repair");
    }
}
