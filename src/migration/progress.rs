//! Non-blocking progress tracker for a running migration saga. Advisory
//! only: nothing downstream treats its numbers as authoritative.

use super::saga::SagaPhase;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub migration_id: String,
    pub phase: SagaPhase,
    pub events_processed: u64,
    pub total_events: u64,
    pub events_per_second: f64,
    pub elapsed_seconds: f64,
    pub estimated_remaining_seconds: Option<f64>,
    pub is_paused: bool,
    pub error: Option<String>,
}

/// Cheaply updatable from many tasks (copy/transform workers); sampled by
/// whoever is watching the saga without needing to hold a lock on the saga
/// itself.
pub struct ProgressTracker {
    migration_id: String,
    started_at: DateTime<Utc>,
    phase: RwLock<SagaPhase>,
    events_processed: AtomicU64,
    total_events: AtomicU64,
    is_paused: RwLock<bool>,
    error: RwLock<Option<String>>,
}

impl ProgressTracker {
    pub fn new(migration_id: impl Into<String>, total_events: u64) -> Arc<Self> {
        Arc::new(Self {
            migration_id: migration_id.into(),
            started_at: Utc::now(),
            phase: RwLock::new(SagaPhase::Normal),
            events_processed: AtomicU64::new(0),
            total_events: AtomicU64::new(total_events),
            is_paused: RwLock::new(false),
            error: RwLock::new(None),
        })
    }

    pub fn set_phase(&self, phase: SagaPhase) {
        *self.phase.write() = phase;
    }

    pub fn advance(&self, events: u64) {
        self.events_processed.fetch_add(events, Ordering::Relaxed);
    }

    pub fn set_paused(&self, paused: bool) {
        *self.is_paused.write() = paused;
    }

    pub fn set_error(&self, error: impl Into<String>) {
        *self.error.write() = Some(error.into());
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = (Utc::now() - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        let processed = self.events_processed.load(Ordering::Relaxed);
        let total = self.total_events.load(Ordering::Relaxed);
        let rate = if elapsed > 0.0 { processed as f64 / elapsed } else { 0.0 };
        let remaining = if rate > 0.0 && total > processed {
            Some((total - processed) as f64 / rate)
        } else {
            None
        };

        ProgressSnapshot {
            migration_id: self.migration_id.clone(),
            phase: *self.phase.read(),
            events_processed: processed,
            total_events: total,
            events_per_second: rate,
            elapsed_seconds: elapsed,
            estimated_remaining_seconds: remaining,
            is_paused: *self.is_paused.read(),
            error: self.error.read().clone(),
        }
    }
}
