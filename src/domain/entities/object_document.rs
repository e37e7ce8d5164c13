//! `ObjectDocument`: the persisted metadata record that locates an
//! aggregate's current stream, chunk layout, and snapshots.

use crate::domain::value_objects::ObjectId;
use crate::error::{EventStoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry in a stream's snapshot list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRef {
    pub name: String,
    pub version: u64,
}

/// Details recorded when a stream is marked broken by a partial commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokenInfo {
    pub orphaned_from_version: u64,
    pub orphaned_to_version: u64,
    pub error_message: String,
    pub broken_at: DateTime<Utc>,
}

/// One entry in a stream's rollback audit trail, appended whenever the
/// repair service clears a broken-stream marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRecord {
    pub rolled_back_at: DateTime<Utc>,
    pub from_version: u64,
    pub to_version: u64,
    pub events_removed: u64,
    pub original_error: String,
}

/// Chunking policy for a stream. Immutable for the stream's lifetime once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSettings {
    pub enabled: bool,
    pub chunk_size: u32,
}

impl ChunkSettings {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            chunk_size: u32::MAX,
        }
    }

    pub fn enabled(chunk_size: u32) -> Result<Self> {
        if chunk_size == 0 {
            return Err(EventStoreError::InvalidInput(
                "chunk_size must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            enabled: true,
            chunk_size,
        })
    }

    /// The chunk index a given event version belongs to.
    pub fn chunk_index_for(&self, event_version: u64) -> u64 {
        if !self.enabled {
            return 0;
        }
        event_version / self.chunk_size as u64
    }
}

/// Metadata for the stream currently backing an object: its identifier,
/// backend discriminator, tip version, chunking policy, snapshot list, and
/// broken-stream state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInformation {
    pub stream_identifier: String,
    pub stream_type: String,
    /// Last committed version, or -1 when the stream has never been written.
    pub current_stream_version: i64,
    pub chunk_settings: ChunkSettings,
    pub chunk_index_ceiling: u64,
    pub snapshots: Vec<SnapshotRef>,
    pub is_broken: bool,
    pub broken_info: Option<BrokenInfo>,
    pub rollback_history: Vec<RollbackRecord>,
}

impl StreamInformation {
    pub fn new(stream_identifier: impl Into<String>, stream_type: impl Into<String>) -> Self {
        Self {
            stream_identifier: stream_identifier.into(),
            stream_type: stream_type.into(),
            current_stream_version: -1,
            chunk_settings: ChunkSettings::disabled(),
            chunk_index_ceiling: 0,
            snapshots: Vec::new(),
            is_broken: false,
            broken_info: None,
            rollback_history: Vec::new(),
        }
    }

    pub fn with_chunking(mut self, chunk_size: u32) -> Result<Self> {
        self.chunk_settings = ChunkSettings::enabled(chunk_size)?;
        Ok(self)
    }

    /// Append a snapshot reference, keeping the list sorted ascending by version.
    pub fn record_snapshot(&mut self, name: impl Into<String>, version: u64) {
        let pos = self
            .snapshots
            .partition_point(|snapshot| snapshot.version <= version);
        self.snapshots.insert(
            pos,
            SnapshotRef {
                name: name.into(),
                version,
            },
        );
    }

    pub fn latest_snapshot_at_or_before(&self, version: u64) -> Option<&SnapshotRef> {
        self.snapshots
            .iter()
            .rev()
            .find(|snapshot| snapshot.version <= version)
    }

    /// Mark the stream broken after a partial commit. Fails if already broken.
    pub fn mark_broken(&mut self, from: u64, to: u64, reason: impl Into<String>) -> Result<()> {
        if self.is_broken {
            return Err(EventStoreError::Internal(
                "stream is already marked broken".to_string(),
            ));
        }
        self.is_broken = true;
        self.broken_info = Some(BrokenInfo {
            orphaned_from_version: from,
            orphaned_to_version: to,
            error_message: reason.into(),
            broken_at: Utc::now(),
        });
        Ok(())
    }

    /// Clear a broken-stream marker, recording an audit entry. Fails if the
    /// stream is not currently broken.
    pub fn clear_broken(&mut self, events_removed: u64) -> Result<()> {
        let info = self
            .broken_info
            .take()
            .ok_or_else(|| EventStoreError::NotBroken(self.stream_identifier.clone()))?;
        self.is_broken = false;
        self.rollback_history.push(RollbackRecord {
            rolled_back_at: Utc::now(),
            from_version: info.orphaned_from_version,
            to_version: info.orphaned_to_version,
            events_removed,
            original_error: info.error_message,
        });
        Ok(())
    }
}

/// Persisted metadata record for one aggregate instance: its active stream
/// plus any streams retired by a prior migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDocument {
    pub object_name: String,
    pub object_id: ObjectId,
    pub schema_version: u32,
    pub active: StreamInformation,
    pub closed_streams: Vec<StreamInformation>,
}

impl ObjectDocument {
    pub fn new(
        object_name: impl Into<String>,
        object_id: ObjectId,
        stream_identifier: impl Into<String>,
        stream_type: impl Into<String>,
    ) -> Self {
        Self {
            object_name: object_name.into(),
            object_id,
            schema_version: 1,
            active: StreamInformation::new(stream_identifier, stream_type),
            closed_streams: Vec::new(),
        }
    }

    /// Retire the current active stream and adopt `new_active` as current,
    /// used by the migration saga when closing the books on a cutover.
    pub fn cut_over_to(&mut self, new_active: StreamInformation) {
        let previous = std::mem::replace(&mut self.active, new_active);
        self.closed_streams.push(previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_id() -> ObjectId {
        ObjectId::new("order-1".to_string()).unwrap()
    }

    #[test]
    fn new_document_starts_at_tip_minus_one() {
        let doc = ObjectDocument::new("order", object_id(), "main", "in_memory");
        assert_eq!(doc.active.current_stream_version, -1);
        assert!(!doc.active.is_broken);
    }

    #[test]
    fn mark_broken_then_clear_records_audit() {
        let mut stream = StreamInformation::new("main", "in_memory");
        stream.mark_broken(5, 6, "partial write").unwrap();
        assert!(stream.is_broken);

        assert!(stream.mark_broken(5, 6, "again").is_err());

        stream.clear_broken(2).unwrap();
        assert!(!stream.is_broken);
        assert_eq!(stream.rollback_history.len(), 1);
        assert_eq!(stream.rollback_history[0].events_removed, 2);
    }

    #[test]
    fn clear_broken_requires_broken_state() {
        let mut stream = StreamInformation::new("main", "in_memory");
        assert!(stream.clear_broken(0).is_err());
    }

    #[test]
    fn snapshots_stay_sorted_by_version() {
        let mut stream = StreamInformation::new("main", "in_memory");
        stream.record_snapshot("s2", 99);
        stream.record_snapshot("s1", 49);
        assert_eq!(stream.snapshots[0].version, 49);
        assert_eq!(stream.snapshots[1].version, 99);

        assert_eq!(
            stream.latest_snapshot_at_or_before(60).unwrap().version,
            49
        );
        assert_eq!(
            stream.latest_snapshot_at_or_before(120).unwrap().version,
            99
        );
        assert!(stream.latest_snapshot_at_or_before(10).is_none());
    }

    #[test]
    fn chunk_settings_compute_index() {
        let settings = ChunkSettings::enabled(100).unwrap();
        assert_eq!(settings.chunk_index_for(0), 0);
        assert_eq!(settings.chunk_index_for(99), 0);
        assert_eq!(settings.chunk_index_for(100), 1);

        assert!(ChunkSettings::enabled(0).is_err());
    }

    #[test]
    fn cut_over_retires_previous_active_stream() {
        let mut doc = ObjectDocument::new("order", object_id(), "main", "in_memory");
        doc.active.current_stream_version = 99;
        let new_stream = StreamInformation::new("main#v2", "in_memory");
        doc.cut_over_to(new_stream);

        assert_eq!(doc.active.stream_identifier, "main#v2");
        assert_eq!(doc.closed_streams.len(), 1);
        assert_eq!(doc.closed_streams[0].current_stream_version, 99);
    }
}
