//! Migration routing table: every read/write consults this first to decide
//! which stream is authoritative for an object mid-migration.

use crate::error::{EventStoreError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MigrationPhase {
    Normal,
    DualWrite,
    DualRead,
    Cutover,
    BookClosed,
}

impl MigrationPhase {
    /// Index used to enforce monotonic-only advancement.
    fn ordinal(self) -> u8 {
        match self {
            MigrationPhase::Normal => 0,
            MigrationPhase::DualWrite => 1,
            MigrationPhase::DualRead => 2,
            MigrationPhase::Cutover => 3,
            MigrationPhase::BookClosed => 4,
        }
    }

    pub fn reads_from_old(self) -> bool {
        matches!(self, MigrationPhase::Normal | MigrationPhase::DualWrite | MigrationPhase::DualRead)
    }

    pub fn reads_from_new(self) -> bool {
        matches!(self, MigrationPhase::DualRead | MigrationPhase::Cutover | MigrationPhase::BookClosed)
    }

    pub fn writes_to_old(self) -> bool {
        matches!(self, MigrationPhase::Normal | MigrationPhase::DualWrite)
    }

    pub fn writes_to_new(self) -> bool {
        matches!(
            self,
            MigrationPhase::DualWrite | MigrationPhase::DualRead | MigrationPhase::Cutover | MigrationPhase::BookClosed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingEntry {
    pub object_id: String,
    pub phase: MigrationPhase,
    pub old_stream: String,
    pub new_stream: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub migration_id: String,
}

impl RoutingEntry {
    pub fn new(object_id: impl Into<String>, old_stream: impl Into<String>, new_stream: impl Into<String>, migration_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            object_id: object_id.into(),
            phase: MigrationPhase::Normal,
            old_stream: old_stream.into(),
            new_stream: new_stream.into(),
            created_at: now,
            updated_at: now,
            migration_id: migration_id.into(),
        }
    }
}

/// Routing defaults to `Normal` for any object with no entry. Phase
/// advancement is monotonic-only, enforced with a compare-and-swap on the
/// phase ordinal.
pub struct RoutingTable {
    entries: Arc<DashMap<String, RoutingEntry>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn phase_for(&self, object_id: &str) -> MigrationPhase {
        self.entries
            .get(object_id)
            .map(|e| e.phase)
            .unwrap_or(MigrationPhase::Normal)
    }

    pub fn entry_for(&self, object_id: &str) -> Option<RoutingEntry> {
        self.entries.get(object_id).map(|e| e.clone())
    }

    pub fn insert(&self, entry: RoutingEntry) {
        self.entries.insert(entry.object_id.clone(), entry);
    }

    /// Advance `object_id` to `new_phase`. Fails with `PhaseRegression` if
    /// `new_phase` does not strictly follow the current phase.
    pub fn advance(&self, object_id: &str, new_phase: MigrationPhase) -> Result<()> {
        let mut entry = self
            .entries
            .get_mut(object_id)
            .ok_or_else(|| EventStoreError::Internal(format!("no routing entry for {object_id}")))?;

        if new_phase.ordinal() <= entry.phase.ordinal() {
            return Err(EventStoreError::PhaseRegression {
                object_id: object_id.to_string(),
                from: format!("{:?}", entry.phase),
                to: format!("{:?}", new_phase),
            });
        }

        entry.phase = new_phase;
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Remove the routing entry after a successful book-closing or an
    /// aborted rollback.
    pub fn remove(&self, object_id: &str) {
        self.entries.remove(object_id);
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_entry_defaults_to_normal_phase() {
        let table = RoutingTable::new();
        assert_eq!(table.phase_for("order-1"), MigrationPhase::Normal);
    }

    #[test]
    fn advance_moves_through_phases_monotonically() {
        let table = RoutingTable::new();
        table.insert(RoutingEntry::new("order-1", "main", "main#v2", "mig-1"));

        table.advance("order-1", MigrationPhase::DualWrite).unwrap();
        table.advance("order-1", MigrationPhase::DualRead).unwrap();
        assert_eq!(table.phase_for("order-1"), MigrationPhase::DualRead);
    }

    #[test]
    fn advance_rejects_regression() {
        let table = RoutingTable::new();
        table.insert(RoutingEntry::new("order-1", "main", "main#v2", "mig-1"));
        table.advance("order-1", MigrationPhase::Cutover).unwrap();

        let result = table.advance("order-1", MigrationPhase::DualWrite);
        assert!(matches!(result, Err(EventStoreError::PhaseRegression { .. })));
    }

    #[test]
    fn remove_clears_entry_back_to_normal_default() {
        let table = RoutingTable::new();
        table.insert(RoutingEntry::new("order-1", "main", "main#v2", "mig-1"));
        table.remove("order-1");
        assert_eq!(table.phase_for("order-1"), MigrationPhase::Normal);
    }
}
