//! Migration saga: moves one object's active stream to a new stream
//! (backend, chunking policy, or schema layout) without stopping writers.

use super::lock::LockManager;
use super::progress::ProgressTracker;
use super::routing::{MigrationPhase, RoutingEntry, RoutingTable};
use crate::backup::BackupManager;
use crate::domain::entities::{Event, ObjectDocument, StreamInformation};
use crate::domain::repositories::{AppendOptions, DataStore};
use crate::error::{EventStoreError, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Saga-internal step, reported via [`ProgressTracker`]. Distinct from
/// [`MigrationPhase`], which tracks the object's routing state and is what
/// readers/writers actually consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SagaPhase {
    Normal,
    Backup,
    Analyze,
    CopyTransform,
    Verify,
    Cutover,
    CloseBooks,
}

/// A pure transformation applied to each source event during copy, e.g. an
/// upcast-and-repartition step specific to this migration.
pub trait MigrationTransform: Send + Sync {
    fn transform(&self, event: &Event) -> Result<Event>;
}

pub struct IdentityTransform;
impl MigrationTransform for IdentityTransform {
    fn transform(&self, event: &Event) -> Result<Event> {
        Ok(event.clone())
    }
}

#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub lock_timeout: Duration,
    pub max_drain_retries: u32,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            max_drain_retries: 5,
        }
    }
}

pub struct MigrationSaga {
    source: Arc<dyn DataStore>,
    target: Arc<dyn DataStore>,
    backups: Arc<BackupManager>,
    routing: Arc<RoutingTable>,
    locks: Arc<LockManager>,
    config: SagaConfig,
}

impl MigrationSaga {
    pub fn new(
        source: Arc<dyn DataStore>,
        target: Arc<dyn DataStore>,
        backups: Arc<BackupManager>,
        routing: Arc<RoutingTable>,
        locks: Arc<LockManager>,
        config: SagaConfig,
    ) -> Self {
        Self {
            source,
            target,
            backups,
            routing,
            locks,
            config,
        }
    }

    /// Run the full saga: backup, analyze, copy-transform, verify, cutover,
    /// close books. On any failure before cutover, rolls back to the backup
    /// and removes the routing entry. On failure at or after cutover, the
    /// new stream is authoritative and a rollback marker is appended to the
    /// routing audit log instead.
    pub async fn run(
        &self,
        mut document: ObjectDocument,
        new_stream: StreamInformation,
        transform: Arc<dyn MigrationTransform>,
    ) -> Result<ObjectDocument> {
        let migration_id = uuid::Uuid::new_v4().to_string();
        let object_id = document.object_id.to_string();
        let guard = self.locks.acquire(&object_id, self.config.lock_timeout).await?;
        let guard = Arc::new(guard);
        let heartbeat = guard.spawn_heartbeat();

        let result = self.run_locked(&mut document, new_stream, transform, &migration_id, &guard).await;

        heartbeat.abort();
        drop(guard);

        result.map(|_| document)
    }

    async fn run_locked(
        &self,
        document: &mut ObjectDocument,
        new_stream: StreamInformation,
        transform: Arc<dyn MigrationTransform>,
        migration_id: &str,
        guard: &Arc<super::lock::LockGuard>,
    ) -> Result<()> {
        let object_id = document.object_id.to_string();
        self.routing.insert(RoutingEntry::new(
            object_id.clone(),
            document.active.stream_identifier.clone(),
            new_stream.stream_identifier.clone(),
            migration_id.to_string(),
        ));

        // Step 1: Backup.
        let source_events = self.source.read(document, 0, None).await?;
        self.backups.freeze(migration_id, document, &source_events)?;

        let tracker = ProgressTracker::new(migration_id, source_events.len() as u64);
        tracker.set_phase(SagaPhase::Backup);

        match self.drive(document, new_stream, transform, migration_id, &tracker, guard).await {
            Ok(()) => {
                self.routing.advance(&object_id, MigrationPhase::BookClosed)?;
                self.routing.remove(&object_id);
                Ok(())
            }
            Err(err) => {
                let phase = self.routing.phase_for(&object_id);
                if phase.ordinal_before_cutover() {
                    tracing::warn!(object_id, %err, "migration failed before cutover, rolling back");
                    self.rollback(document, migration_id).await?;
                    self.routing.remove(&object_id);
                } else {
                    tracing::error!(object_id, %err, "migration failed at or after cutover, forward-fixing");
                    document.active.rollback_history.push(crate::domain::entities::RollbackRecord {
                        rolled_back_at: chrono::Utc::now(),
                        from_version: 0,
                        to_version: document.active.current_stream_version.max(0) as u64,
                        events_removed: 0,
                        original_error: format!("forward-fix after cutover: {err}"),
                    });
                }
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        document: &mut ObjectDocument,
        new_stream: StreamInformation,
        transform: Arc<dyn MigrationTransform>,
        migration_id: &str,
        tracker: &Arc<ProgressTracker>,
        guard: &Arc<super::lock::LockGuard>,
    ) -> Result<()> {
        let object_id = document.object_id.to_string();

        // Step 2: Analyze.
        tracker.set_phase(SagaPhase::Analyze);
        self.routing.advance(&object_id, MigrationPhase::DualWrite)?;
        let mut source_events = self.source.read(document, 0, None).await?;
        tracker.advance(0);

        // Step 3: Copy-transform, with bounded drain retries for writes that
        // land on the source while the copy is in flight.
        tracker.set_phase(SagaPhase::CopyTransform);
        let mut shadow_doc = document.clone();
        shadow_doc.active = new_stream;

        for attempt in 0..=self.config.max_drain_retries {
            if guard.is_lost() {
                return Err(EventStoreError::LockLost(object_id.clone()));
            }

            let transformed: Result<Vec<Event>> = source_events.iter().map(|e| transform.transform(e)).collect();
            let transformed = transformed?;

            let base = shadow_doc.active.current_stream_version;
            let reassigned: Vec<Event> = transformed
                .into_iter()
                .enumerate()
                .map(|(i, e)| e.with_version((base + 1 + i as i64) as u64))
                .collect();

            self.target
                .append(&shadow_doc, &reassigned, AppendOptions { expected_tip: base })
                .await?;
            shadow_doc.active.current_stream_version = base + reassigned.len() as i64;
            tracker.advance(reassigned.len() as u64);

            let current_source_tip = self.source.current_tip(document).await?;
            if current_source_tip == document.active.current_stream_version {
                document.active.current_stream_version = current_source_tip;
                break;
            }
            if attempt == self.config.max_drain_retries {
                return Err(EventStoreError::SagaAborted(format!(
                    "copy did not converge for {object_id} after {} retries",
                    self.config.max_drain_retries
                )));
            }

            let late_from = (document.active.current_stream_version + 1) as u64;
            source_events = self.source.read(document, late_from, None).await?;
            document.active.current_stream_version = current_source_tip;
        }

        self.routing.advance(&object_id, MigrationPhase::DualRead)?;

        // Step 4: Verify.
        tracker.set_phase(SagaPhase::Verify);
        let verify_source = self.source.read(document, 0, None).await?;
        let verify_target = self.target.read(&shadow_doc, 0, None).await?;
        if verify_source.len() != verify_target.len() {
            return Err(EventStoreError::VerificationFailed {
                object_id: object_id.clone(),
                detail: format!(
                    "source has {} events, target has {}",
                    verify_source.len(),
                    verify_target.len()
                ),
            });
        }
        for (src, tgt) in verify_source.iter().zip(verify_target.iter()) {
            let expected = transform.transform(src)?;
            if expected.payload() != tgt.payload() {
                return Err(EventStoreError::VerificationFailed {
                    object_id: object_id.clone(),
                    detail: format!("payload mismatch at version {}", src.event_version()),
                });
            }
        }

        // Step 5: Cutover.
        tracker.set_phase(SagaPhase::Cutover);
        self.routing.advance(&object_id, MigrationPhase::Cutover)?;

        // Step 6: Close books.
        tracker.set_phase(SagaPhase::CloseBooks);
        document.cut_over_to(shadow_doc.active);
        Ok(())
    }

    async fn rollback(&self, document: &mut ObjectDocument, migration_id: &str) -> Result<()> {
        let (backed_up_document, _events) = self.backups.restore(migration_id)?;
        *document = backed_up_document;
        Ok(())
    }
}

impl MigrationPhase {
    fn ordinal_before_cutover(self) -> bool {
        !matches!(self, MigrationPhase::Cutover | MigrationPhase::BookClosed)
    }
}
