//! A durable, schema-versioned event-sourcing engine: append-only per-object
//! streams with optimistic concurrency, chunk rollover, snapshotting, event
//! upcasting, and live stream migration. No HTTP surface, no auth, no
//! multi-tenancy — those are outer adapters a host application builds on top.

pub mod backup;
pub mod config;
pub mod domain;
pub mod error;
pub mod fold;
pub mod index;
pub mod infrastructure;
pub mod metrics;
pub mod migration;
pub mod registry;
pub mod repair;
pub mod session;
pub mod snapshot;
pub mod stream_engine;
pub mod upcast;
pub mod version_token;
pub mod wal;

pub use error::{EventStoreError, Result};
pub use version_token::VersionToken;

pub use domain::entities::{ActionMetadata, BrokenInfo, ChunkSettings, Event, ObjectDocument, RollbackRecord, SnapshotRef, StreamInformation};
pub use domain::repositories::{AppendOptions, DataStore, DataStoreReader, DataStoreWriter, EventStream};
pub use domain::value_objects::{EventType, ObjectId};

pub use registry::{Codec, EventRegistry, EventRegistryBuilder, RegistryEntry};
pub use upcast::{FnUpcaster, UpcastPipeline, Upcaster};
pub use fold::{FoldFn, FoldHost, Projection, UnknownEventPolicy};
pub use stream_engine::{ReadPage, StreamEngine};
pub use session::{CommitFailureMode, CommitOutcome, PostCommitHook, Session};
pub use repair::{RepairReport, RepairService};
pub use snapshot::{Snapshot, SnapshotManager, SnapshotPolicy, SnapshotType};
pub use backup::{BackupBlob, BackupConfig, BackupManager};
pub use index::{EventIndex, IndexEntry, IndexStats};
pub use wal::{WALConfig, WALEntry, WALStats, WriteAheadLog};
pub use config::{EngineSettings, ResilienceSettings, SagaSettings};
pub use metrics::MetricsRegistry;

pub use infrastructure::file_store::FileDataStore;
pub use infrastructure::in_memory_store::InMemoryDataStore;

pub use migration::{
    IdentityTransform, LockGuard, LockManager, MigrationPhase, MigrationSaga, MigrationTransform,
    ProgressSnapshot, ProgressTracker, RoutingEntry, RoutingTable, SagaConfig, SagaPhase,
};
