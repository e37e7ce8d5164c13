//! Live stream migration: moves an object's active stream without stopping
//! writers, via a routing table, a per-object distributed lock, and a saga
//! that walks backup -> analyze -> copy-transform -> verify -> cutover ->
//! close-books.

pub mod lock;
pub mod progress;
pub mod routing;
pub mod saga;

pub use lock::{LockGuard, LockManager};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use routing::{MigrationPhase, RoutingEntry, RoutingTable};
pub use saga::{IdentityTransform, MigrationSaga, MigrationTransform, SagaConfig, SagaPhase};
