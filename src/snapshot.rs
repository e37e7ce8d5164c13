//! Snapshot manager (C9): keeps per-stream state checkpoints so replay can
//! start from `snapshot.version + 1` instead of from zero.

use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A materialized state checkpoint for one object's stream at a given version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub object_name: String,
    pub object_id: String,
    pub stream_identifier: String,
    pub version: u64,
    pub state_bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub snapshot_type: SnapshotType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotType {
    Manual,
    Automatic,
}

impl Snapshot {
    pub fn capture<S: Serialize>(
        object_name: impl Into<String>,
        object_id: impl Into<String>,
        stream_identifier: impl Into<String>,
        version: u64,
        state: &S,
        snapshot_type: SnapshotType,
    ) -> Result<Self> {
        let state_bytes = serde_json::to_vec(state)?;
        Ok(Self {
            object_name: object_name.into(),
            object_id: object_id.into(),
            stream_identifier: stream_identifier.into(),
            version,
            state_bytes,
            created_at: Utc::now(),
            snapshot_type,
        })
    }

    pub fn restore<S: for<'de> Deserialize<'de>>(&self) -> Result<S> {
        Ok(serde_json::from_slice(&self.state_bytes)?)
    }

    pub fn size_bytes(&self) -> usize {
        self.state_bytes.len()
    }
}

/// When to materialize a new snapshot after a commit.
#[derive(Debug, Clone)]
pub struct SnapshotPolicy {
    /// Materialize once `committed.max_version - last_snapshot_version` meets
    /// or exceeds this interval.
    pub interval: u64,
    pub max_snapshots_per_stream: usize,
    pub auto_snapshot: bool,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            interval: 100,
            max_snapshots_per_stream: 10,
            auto_snapshot: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotStats {
    pub total_snapshots: usize,
    pub total_streams: usize,
    pub total_size_bytes: usize,
    pub snapshots_created: u64,
    pub snapshots_pruned: u64,
}

fn stream_key(object_name: &str, object_id: &str, stream_identifier: &str) -> String {
    format!("{object_name}__{object_id}__{stream_identifier}")
}

/// Stores snapshots keyed by `(object_name, object_id, stream_identifier)`,
/// most recent version last. A real deployment backs this with a content-
/// addressed blob store; this in-memory keeping is also what the in-memory
/// `DataStore` implementation uses directly.
pub struct SnapshotManager {
    snapshots: Arc<RwLock<HashMap<String, Vec<Snapshot>>>>,
    policy: SnapshotPolicy,
    stats: Arc<RwLock<SnapshotStats>>,
}

impl SnapshotManager {
    pub fn new(policy: SnapshotPolicy) -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            policy,
            stats: Arc::new(RwLock::new(SnapshotStats::default())),
        }
    }

    pub fn policy(&self) -> &SnapshotPolicy {
        &self.policy
    }

    /// Store `snapshot`, evicting the oldest entries once the per-stream cap
    /// is exceeded. Does not mutate the owning `ObjectDocument`'s snapshot
    /// list; callers must call `StreamInformation::record_snapshot` once this
    /// returns, per the durable-before-visible ordering in the design.
    pub fn store(&self, snapshot: Snapshot) -> Result<()> {
        let key = stream_key(&snapshot.object_name, &snapshot.object_id, &snapshot.stream_identifier);
        let mut snapshots = self.snapshots.write();
        let entry = snapshots.entry(key).or_default();
        entry.push(snapshot);
        entry.sort_by_key(|s| s.version);

        let mut pruned = 0;
        if entry.len() > self.policy.max_snapshots_per_stream {
            let excess = entry.len() - self.policy.max_snapshots_per_stream;
            entry.drain(0..excess);
            pruned = excess;
        }

        let mut stats = self.stats.write();
        stats.snapshots_created += 1;
        stats.snapshots_pruned += pruned as u64;
        stats.total_snapshots = snapshots.values().map(|v| v.len()).sum();
        stats.total_streams = snapshots.len();
        stats.total_size_bytes = snapshots.values().flatten().map(|s| s.size_bytes()).sum();

        Ok(())
    }

    /// The highest snapshot whose version is `<= until`, if any. A snapshot
    /// that exists in the index but whose bytes fail to deserialize is
    /// treated as absent by callers (fall back to full replay), not here:
    /// this call only reports the index entry, restoration errors surface
    /// from `Snapshot::restore`.
    pub fn latest_at_or_before(
        &self,
        object_name: &str,
        object_id: &str,
        stream_identifier: &str,
        until: u64,
    ) -> Option<Snapshot> {
        let key = stream_key(object_name, object_id, stream_identifier);
        let snapshots = self.snapshots.read();
        snapshots
            .get(&key)
            .and_then(|v| v.iter().rev().find(|s| s.version <= until))
            .cloned()
    }

    pub fn should_snapshot(&self, last_snapshot_version: Option<u64>, committed_max_version: u64) -> bool {
        if !self.policy.auto_snapshot {
            return false;
        }
        match last_snapshot_version {
            None => committed_max_version + 1 >= self.policy.interval,
            Some(last) => committed_max_version.saturating_sub(last) >= self.policy.interval,
        }
    }

    pub fn all_for_stream(&self, object_name: &str, object_id: &str, stream_identifier: &str) -> Vec<Snapshot> {
        let key = stream_key(object_name, object_id, stream_identifier);
        self.snapshots.read().get(&key).cloned().unwrap_or_default()
    }

    pub fn stats(&self) -> SnapshotStats {
        self.stats.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_snapshot(version: u64) -> Snapshot {
        Snapshot::capture("order", "order-1", "main", version, &json!({"v": version}), SnapshotType::Automatic).unwrap()
    }

    #[test]
    fn capture_and_restore_round_trips_state() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct State {
            total: i64,
        }
        let state = State { total: 42 };
        let snapshot = Snapshot::capture("order", "order-1", "main", 10, &state, SnapshotType::Manual).unwrap();
        let restored: State = snapshot.restore().unwrap();
        assert_eq!(state, restored);
    }

    #[test]
    fn latest_at_or_before_returns_highest_matching_version() {
        let manager = SnapshotManager::new(SnapshotPolicy::default());
        manager.store(test_snapshot(10)).unwrap();
        manager.store(test_snapshot(50)).unwrap();
        manager.store(test_snapshot(100)).unwrap();

        let found = manager.latest_at_or_before("order", "order-1", "main", 60).unwrap();
        assert_eq!(found.version, 50);
        assert!(manager.latest_at_or_before("order", "order-1", "main", 5).is_none());
    }

    #[test]
    fn store_prunes_beyond_max_snapshots_per_stream() {
        let policy = SnapshotPolicy {
            max_snapshots_per_stream: 2,
            ..Default::default()
        };
        let manager = SnapshotManager::new(policy);
        for v in [10, 20, 30] {
            manager.store(test_snapshot(v)).unwrap();
        }
        let all = manager.all_for_stream("order", "order-1", "main");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].version, 20);
    }

    #[test]
    fn should_snapshot_respects_interval_and_auto_flag() {
        let manager = SnapshotManager::new(SnapshotPolicy {
            interval: 100,
            auto_snapshot: true,
            ..Default::default()
        });
        assert!(!manager.should_snapshot(None, 50));
        assert!(manager.should_snapshot(None, 120));
        assert!(!manager.should_snapshot(Some(100), 150));
        assert!(manager.should_snapshot(Some(100), 220));

        let disabled = SnapshotManager::new(SnapshotPolicy {
            auto_snapshot: false,
            ..Default::default()
        });
        assert!(!disabled.should_snapshot(None, 1000));
    }
}
