//! Error taxonomy for the event store engine.
//!
//! Every public operation returns [`Result<T>`]. Each variant carries a stable
//! operational error code via [`EventStoreError::code`] so logs and dashboards
//! can group failures without parsing message text.

/// Errors produced by the event store engine.
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    // -- Configuration --
    #[error("configuration error: {0}")]
    Configuration(String),

    // -- Validation --
    #[error("malformed version token: {0}")]
    MalformedToken(String),

    #[error("cannot compare version tokens from different streams: {a} vs {b}")]
    StreamMismatch { a: String, b: String },

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // -- Registry / upcasting --
    #[error("event registry is frozen, cannot register new types")]
    RegistryFrozen,

    #[error("duplicate event type registration: {name} v{version}")]
    DuplicateEventType { name: String, version: u32 },

    #[error("no fold handler registered for event type: {0}")]
    UnknownEventType(String),

    #[error("upcast pipeline did not reach a fixed point for event type: {0}")]
    UpcastNonTerminating(String),

    // -- Concurrency --
    #[error("concurrency conflict: expected tip {expected}, actual tip {actual}")]
    ConcurrencyConflict { expected: i64, actual: i64 },

    // -- Partial failure / broken stream --
    #[error("commit partially landed: versions {from}..={to} orphaned")]
    PartialCommit { from: u64, to: u64 },

    #[error("stream is broken and must be repaired before further writes: {0}")]
    StreamBroken(String),

    #[error("repair requested on a stream that is not marked broken: {0}")]
    NotBroken(String),

    // -- Not found --
    #[error("object document not found: {0}")]
    DocumentNotFound(String),

    #[error("snapshot not found for {0}")]
    SnapshotNotFound(String),

    #[error("blob not found: {0}")]
    BlobNotFound(String),

    // -- External / transient --
    #[error("backend I/O error: {0}")]
    Io(String),

    #[error("backend operation timed out after retries: {0}")]
    Transient(String),

    // -- Saga --
    #[error("migration phase regression rejected for {object_id}: {from:?} -> {to:?}")]
    PhaseRegression {
        object_id: String,
        from: String,
        to: String,
    },

    #[error("migration verification failed for {object_id}: {detail}")]
    VerificationFailed { object_id: String, detail: String },

    #[error("failed to acquire distributed lock: {0}")]
    LockTimeout(String),

    #[error("lock heartbeat lost, lease may have expired: {0}")]
    LockLost(String),

    #[error("migration saga aborted: {0}")]
    SagaAborted(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EventStoreError {
    /// Stable operational error code, stable across message wording changes.
    pub fn code(&self) -> &'static str {
        match self {
            EventStoreError::Configuration(_) => "CFG-0001",
            EventStoreError::MalformedToken(_) => "VAL-0001",
            EventStoreError::StreamMismatch { .. } => "VAL-0002",
            EventStoreError::InvalidEvent(_) => "VAL-0003",
            EventStoreError::InvalidInput(_) => "VAL-0004",
            EventStoreError::RegistryFrozen => "VAL-0005",
            EventStoreError::DuplicateEventType { .. } => "VAL-0006",
            EventStoreError::UnknownEventType(_) => "VAL-0007",
            EventStoreError::UpcastNonTerminating(_) => "VAL-0008",
            EventStoreError::ConcurrencyConflict { .. } => "CNC-0001",
            EventStoreError::PartialCommit { .. } => "PRT-0001",
            EventStoreError::StreamBroken(_) => "PRT-0002",
            EventStoreError::NotBroken(_) => "PRT-0003",
            EventStoreError::DocumentNotFound(_) => "NFD-0001",
            EventStoreError::SnapshotNotFound(_) => "NFD-0002",
            EventStoreError::BlobNotFound(_) => "NFD-0003",
            EventStoreError::Io(_) => "EXT-0001",
            EventStoreError::Transient(_) => "EXT-0002",
            EventStoreError::PhaseRegression { .. } => "SGA-0001",
            EventStoreError::VerificationFailed { .. } => "SGA-0002",
            EventStoreError::LockTimeout(_) => "SGA-0003",
            EventStoreError::LockLost(_) => "SGA-0004",
            EventStoreError::SagaAborted(_) => "SGA-0005",
            EventStoreError::Serialization(_) => "VAL-0009",
            EventStoreError::Internal(_) => "INT-0001",
        }
    }

    /// True when the application layer might reasonably retry the operation
    /// after re-reading current state (concurrency conflicts, transient I/O).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            EventStoreError::ConcurrencyConflict { .. } | EventStoreError::Transient(_)
        )
    }
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EventStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_identifiers() {
        let err = EventStoreError::ConcurrencyConflict {
            expected: 1,
            actual: 2,
        };
        assert_eq!(err.code(), "CNC-0001");
        assert!(err.is_retriable());
    }

    #[test]
    fn partial_commit_is_not_retriable() {
        let err = EventStoreError::PartialCommit { from: 5, to: 6 };
        assert!(!err.is_retriable());
        assert_eq!(err.code(), "PRT-0001");
    }
}
