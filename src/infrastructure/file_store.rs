//! File-backed `DataStore`: events are durable in a write-ahead log and
//! materialized as JSON-lines segment files per stream, so the engine
//! survives process restarts without an external dependency.

use crate::domain::entities::{Event, ObjectDocument};
use crate::domain::repositories::{AppendOptions, DataStore};
use crate::error::{EventStoreError, Result};
use crate::wal::{WALConfig, WriteAheadLog};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn stream_key(document: &ObjectDocument) -> String {
    format!(
        "{}__{}__{}",
        document.object_name,
        document.object_id,
        document.active.stream_identifier
    )
}

/// Local-disk `DataStore`. Every append is written to the WAL first, then to
/// the stream's segment file; on startup the WAL is replayed to rebuild the
/// in-memory tip index in case a prior process crashed mid-write.
pub struct FileDataStore {
    base_dir: PathBuf,
    wal: WriteAheadLog,
    segments: Arc<RwLock<HashMap<String, Vec<Event>>>>,
}

impl FileDataStore {
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|e| EventStoreError::Io(format!("failed to create store directory: {e}")))?;

        let wal = WriteAheadLog::new(base_dir.join("wal"), WALConfig::default())?;
        let segments = Arc::new(RwLock::new(HashMap::new()));

        let store = Self {
            base_dir,
            wal,
            segments,
        };
        store.load_segments_from_disk()?;
        Ok(store)
    }

    fn segment_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.segment.jsonl"))
    }

    fn load_segments_from_disk(&self) -> Result<()> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };

        for entry in entries {
            let entry = entry.map_err(|e| EventStoreError::Io(e.to_string()))?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(key) = name.strip_suffix(".segment.jsonl") else {
                continue;
            };

            let events = Self::read_segment_file(&path)?;
            self.segments.write().insert(key.to_string(), events);
        }
        Ok(())
    }

    fn read_segment_file(path: &Path) -> Result<Vec<Event>> {
        let file = File::open(path).map_err(|e| EventStoreError::Io(e.to_string()))?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| EventStoreError::Io(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }

    fn append_segment_file(&self, key: &str, events: &[Event]) -> Result<()> {
        let path = self.segment_path(key);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EventStoreError::Io(format!("failed to open segment file: {e}")))?;

        for event in events {
            let line = serde_json::to_string(event)?;
            writeln!(file, "{line}").map_err(|e| EventStoreError::Io(format!("failed to write segment: {e}")))?;
        }
        Ok(())
    }

    pub fn wal_stats(&self) -> crate::wal::WALStats {
        self.wal.stats()
    }
}

#[async_trait]
impl DataStore for FileDataStore {
    async fn append(&self, document: &ObjectDocument, events: &[Event], options: AppendOptions) -> Result<i64> {
        if events.is_empty() {
            return Ok(options.expected_tip);
        }

        let key = stream_key(document);
        let mut segments = self.segments.write();
        let stream = segments.entry(key.clone()).or_default();
        let actual_tip = stream.len() as i64 - 1;

        if actual_tip != options.expected_tip {
            return Err(EventStoreError::ConcurrencyConflict {
                expected: options.expected_tip,
                actual: actual_tip,
            });
        }

        for event in events {
            self.wal.append(event.clone())?;
        }
        self.append_segment_file(&key, events)?;

        stream.extend(events.iter().cloned());
        Ok(stream.len() as i64 - 1)
    }

    async fn read(&self, document: &ObjectDocument, from_version: u64, until_version: Option<u64>) -> Result<Vec<Event>> {
        let key = stream_key(document);
        let segments = self.segments.read();
        let Some(stream) = segments.get(&key) else {
            return Ok(Vec::new());
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
        let mut segments = self.segments.write();
        let Some(stream) = segments.get_mut(&key) else {
            return Ok(0);
        };

        let before = stream.len();
        stream.retain(|e| e.event_version() < from_version || e.event_version() > to_version);
        let removed = (before - stream.len()) as u64;

        let remaining = stream.clone();
        drop(segments);
        let path = self.segment_path(&key);
        fs::remove_file(&path).ok();
        if !remaining.is_empty() {
            self.append_segment_file(&key, &remaining)?;
        }

        Ok(removed)
    }

    async fn current_tip(&self, document: &ObjectDocument) -> Result<i64> {
        let key = stream_key(document);
        Ok(self.segments.read().get(&key).map(|s| s.len() as i64 - 1).unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::ObjectId;
    use serde_json::json;
    use tempfile::TempDir;

    fn document() -> ObjectDocument {
        ObjectDocument::new("order", ObjectId::new("order-1").unwrap(), "main", "file")
    }

    fn staged(version: u64) -> Event {
        Event::stage("order.placed", 1, json!({})).unwrap().with_version(version)
    }

    #[tokio::test]
    async fn append_persists_to_segment_and_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let doc = document();

        {
            let store = FileDataStore::open(dir.path()).unwrap();
            store
                .append(&doc, &[staged(0), staged(1)], AppendOptions { expected_tip: -1 })
                .await
                .unwrap();
        }

        let reopened = FileDataStore::open(dir.path()).unwrap();
        let events = reopened.read(&doc, 0, None).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn concurrency_conflict_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileDataStore::open(dir.path()).unwrap();
        let doc = document();

        store.append(&doc, &[staged(0)], AppendOptions { expected_tip: -1 }).await.unwrap();
        let result = store.append(&doc, &[staged(1)], AppendOptions { expected_tip: -1 }).await;
        assert!(matches!(result, Err(EventStoreError::ConcurrencyConflict { .. })));
    }

    #[tokio::test]
    async fn remove_events_for_failed_commit_rewrites_segment() {
        let dir = TempDir::new().unwrap();
        let store = FileDataStore::open(dir.path()).unwrap();
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
}
