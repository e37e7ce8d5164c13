//! Fold host: replays an ordered event stream through a registered handler
//! table into application state, `(state, event) -> state`.

use crate::domain::entities::Event;
use crate::error::{EventStoreError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// A single fold step: apply one event to the accumulated state.
pub trait FoldFn<S>: Send + Sync {
    fn apply(&self, state: S, event: &Event) -> Result<S>;
}

impl<S, F> FoldFn<S> for F
where
    F: Fn(S, &Event) -> Result<S> + Send + Sync,
{
    fn apply(&self, state: S, event: &Event) -> Result<S> {
        self(state, event)
    }
}

/// How an event whose type has no registered handler is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownEventPolicy {
    /// Fail the fold with `UnknownEventType`. Default.
    Strict,
    /// Leave state unchanged and continue.
    Permissive,
}

/// Dispatch table binding event types (post-upcasting) to fold handlers over
/// a single state type `S`. Events are replayed in ascending version order;
/// callers supply the starting state, either empty or snapshot-restored.
pub struct FoldHost<S> {
    handlers: HashMap<String, Arc<dyn FoldFn<S>>>,
    unknown_policy: UnknownEventPolicy,
}

impl<S> FoldHost<S> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            unknown_policy: UnknownEventPolicy::Strict,
        }
    }

    pub fn with_unknown_policy(mut self, policy: UnknownEventPolicy) -> Self {
        self.unknown_policy = policy;
        self
    }

    pub fn register(&mut self, event_type: impl Into<String>, handler: impl FoldFn<S> + 'static) -> &mut Self {
        self.handlers.insert(event_type.into(), Arc::new(handler));
        self
    }

    /// Fold `events` (already in ascending version order) onto `initial`.
    pub fn replay(&self, initial: S, events: &[Event]) -> Result<S> {
        let mut state = initial;
        for event in events {
            state = self.apply_one(state, event)?;
        }
        Ok(state)
    }

    fn apply_one(&self, state: S, event: &Event) -> Result<S> {
        match self.handlers.get(event.event_type_str()) {
            Some(handler) => handler.apply(state, event),
            None => match self.unknown_policy {
                UnknownEventPolicy::Strict => Err(EventStoreError::UnknownEventType(
                    event.event_type_str().to_string(),
                )),
                UnknownEventPolicy::Permissive => {
                    tracing::warn!(event_type = event.event_type_str(), "skipping unknown event type in fold");
                    Ok(state)
                }
            },
        }
    }
}

impl<S> Default for FoldHost<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// A fold host that additionally tracks an external checkpoint (the highest
/// version token applied), for projections that persist to a sink outside
/// the event store and must resume from where they left off.
pub struct Projection<S> {
    host: FoldHost<S>,
    checkpoint: Option<u64>,
}

impl<S> Projection<S> {
    pub fn new(host: FoldHost<S>) -> Self {
        Self {
            host,
            checkpoint: None,
        }
    }

    pub fn checkpoint(&self) -> Option<u64> {
        self.checkpoint
    }

    /// Apply only events whose version is beyond the current checkpoint,
    /// advancing it as it goes. Idempotent under redelivery.
    pub fn catch_up(&mut self, state: S, events: &[Event]) -> Result<S> {
        let start = self.checkpoint;
        let pending: Vec<&Event> = events
            .iter()
            .filter(|e| start.map(|c| e.event_version() > c).unwrap_or(true))
            .collect();

        let mut state = state;
        for event in &pending {
            state = self.host.apply_one(state, event)?;
            self.checkpoint = Some(event.event_version());
        }
        Ok(state)
    }
}
