//! Session: a single logical unit of work against one aggregate. Wraps the
//! stream engine and fold host so that every appended event is folded into
//! live state in the same call — "appended implies folded" is structural,
//! not a convention callers have to remember.

use crate::domain::entities::{Event, ObjectDocument};
use crate::error::Result;
use crate::fold::FoldHost;
use crate::stream_engine::StreamEngine;
use async_trait::async_trait;
use std::sync::Arc;

/// A side-effect receiver invoked once per committed event, in commit order,
/// after durability is established. Hooks must be idempotent: crash recovery
/// can redeliver the same event at-least-once.
#[async_trait]
pub trait PostCommitHook<S>: Send + Sync {
    async fn handle(&self, state: &S, event: &Event) -> Result<()>;
}

/// What to do with the staged buffer if [`Session::commit`]'s append fails.
/// The caller decides up front, at the call site, rather than the session
/// guessing based on the error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitFailureMode {
    /// Leave the buffer intact so the caller can reload state and retry the
    /// same staged events (appropriate for a retriable error such as
    /// `ConcurrencyConflict`).
    Retain,
    /// Clear the buffer; the caller intends to abandon these staged events.
    Discard,
}

/// Outcome of [`Session::commit`]. `hook_failures` is non-empty only when the
/// append itself succeeded but one or more hooks errored; the commit is not
/// rolled back in that case; see [`PostCommitHook`].
pub struct CommitOutcome {
    pub committed: bool,
    pub new_tip: i64,
    pub hook_failures: Vec<String>,
}

pub struct Session<S> {
    document: ObjectDocument,
    state: S,
    buffer: Vec<Event>,
    engine: Arc<StreamEngine>,
    fold_host: Arc<FoldHost<S>>,
    hooks: Vec<Arc<dyn PostCommitHook<S>>>,
}

impl<S: Clone> Session<S> {
    /// Load the latest state for `document` and open a session on top of it.
    pub async fn begin(
        document: ObjectDocument,
        engine: Arc<StreamEngine>,
        fold_host: Arc<FoldHost<S>>,
        empty_state: S,
        hooks: Vec<Arc<dyn PostCommitHook<S>>>,
    ) -> Result<Self> {
        let tip = document.active.current_stream_version;
        let until = if tip < 0 { None } else { Some((tip + 1) as u64) };
        let page = engine.read(&document, 0, until).await?;
        let state = fold_host.replay(empty_state, &page.events)?;

        Ok(Self {
            document,
            state,
            buffer: Vec::new(),
            engine,
            fold_host,
            hooks,
        })
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn document(&self) -> &ObjectDocument {
        &self.document
    }

    /// Stage `event` and immediately fold it into the live state, using the
    /// same handler table the engine uses for replay.
    pub fn append(&mut self, event: Event) -> Result<()> {
        self.state = self.fold_host.replay(self.state.clone(), std::slice::from_ref(&event))?;
        self.buffer.push(event);
        Ok(())
    }

    /// Commit the staged buffer, with `on_failure` signaling what to do with
    /// the buffer if the append itself fails (e.g. with a retriable
    /// `ConcurrencyConflict`): [`CommitFailureMode::Retain`] leaves the
    /// buffer intact so the caller can reload and retry the same staged
    /// events, [`CommitFailureMode::Discard`] clears it, matching
    /// `discard_buffer`. On success the buffer is always cleared and hooks
    /// run for every committed event in order, regardless of hook outcome
    /// (events are already durable by the time hooks run).
    pub async fn commit(&mut self, on_failure: CommitFailureMode) -> Result<CommitOutcome> {
        if self.buffer.is_empty() {
            return Ok(CommitOutcome {
                committed: true,
                new_tip: self.document.active.current_stream_version,
                hook_failures: Vec::new(),
            });
        }

        let base = self.document.active.current_stream_version;
        let committed_events: Vec<Event> = self
            .buffer
            .iter()
            .enumerate()
            .map(|(i, e)| e.clone().with_version((base + 1 + i as i64) as u64))
            .collect();

        let new_tip = match self.engine.append_batch(&mut self.document, self.buffer.clone()).await {
            Ok(tip) => tip,
            Err(err) => {
                if matches!(on_failure, CommitFailureMode::Discard) {
                    self.buffer.clear();
                }
                return Err(err);
            }
        };
        self.buffer.clear();

        let mut hook_failures = Vec::new();
        for event in &committed_events {
            for hook in &self.hooks {
                if let Err(err) = hook.handle(&self.state, event).await {
                    hook_failures.push(format!(
                        "event v{} hook failed: {err}",
                        event.event_version()
                    ));
                }
            }
        }

        Ok(CommitOutcome {
            committed: true,
            new_tip,
            hook_failures,
        })
    }

    /// Discard everything staged since the last commit, re-folding state
    /// from scratch is not attempted here — callers that need to discard
    /// should drop the session and begin a fresh one.
    pub fn discard_buffer(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repositories::{AppendOptions, DataStore};
    use crate::domain::value_objects::ObjectId;
    use crate::fold::FoldHost;
    use crate::upcast::UpcastPipeline;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MemStore {
        events: Mutex<HashMap<String, Vec<Event>>>,
    }

    impl MemStore {
        fn new() -> Self {
            Self {
                events: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl DataStore for MemStore {
        async fn append(
            &self,
            document: &ObjectDocument,
            events: &[Event],
            options: AppendOptions,
        ) -> Result<i64> {
            let mut store = self.events.lock();
            let key = document.active.stream_identifier.clone();
            let existing = store.entry(key).or_default();
            let actual_tip = existing.len() as i64 - 1;
            if actual_tip != options.expected_tip {
                return Err(crate::error::EventStoreError::ConcurrencyConflict {
                    expected: options.expected_tip,
                    actual: actual_tip,
                });
            }
            existing.extend(events.iter().cloned());
            Ok(existing.len() as i64 - 1)
        }

        async fn read(
            &self,
            document: &ObjectDocument,
            from_version: u64,
            until_version: Option<u64>,
        ) -> Result<Vec<Event>> {
            let store = self.events.lock();
            let events = store
                .get(&document.active.stream_identifier)
                .cloned()
                .unwrap_or_default();
            Ok(events
                .into_iter()
                .filter(|e| {
                    e.event_version() >= from_version
                        && until_version.map(|u| e.event_version() < u).unwrap_or(true)
                })
                .collect())
        }

        async fn remove_events_for_failed_commit(
            &self,
            _document: &ObjectDocument,
            _from_version: u64,
            _to_version: u64,
        ) -> Result<u64> {
            Ok(0)
        }

        async fn current_tip(&self, document: &ObjectDocument) -> Result<i64> {
            let store = self.events.lock();
            Ok(store
                .get(&document.active.stream_identifier)
                .map(|e| e.len() as i64 - 1)
                .unwrap_or(-1))
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Balance {
        total: i64,
    }

    fn fold_host() -> Arc<FoldHost<Balance>> {
        let mut host = FoldHost::new();
        host.register("deposited", |mut s: Balance, e: &Event| {
            s.total += e.payload()["amount"].as_i64().unwrap_or(0);
            Ok(s)
        });
        Arc::new(host)
    }

    struct CountingHook {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PostCommitHook<Balance> for CountingHook {
        async fn handle(&self, _state: &Balance, _event: &Event) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn document() -> ObjectDocument {
        ObjectDocument::new("account", ObjectId::new("acct-1").unwrap(), "main", "in_memory")
    }

    #[tokio::test]
    async fn append_folds_immediately() {
        let engine = Arc::new(StreamEngine::new(Arc::new(MemStore::new()), UpcastPipeline::new()));
        let mut session = Session::begin(document(), engine, fold_host(), Balance::default(), vec![])
            .await
            .unwrap();

        session
            .append(Event::stage("deposited", 1, json!({"amount": 10})).unwrap())
            .unwrap();

        assert_eq!(session.state().total, 10);
    }

    #[tokio::test]
    async fn commit_runs_hooks_once_per_event() {
        let engine = Arc::new(StreamEngine::new(Arc::new(MemStore::new()), UpcastPipeline::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let hook: Arc<dyn PostCommitHook<Balance>> = Arc::new(CountingHook { calls: calls.clone() });

        let mut session = Session::begin(document(), engine, fold_host(), Balance::default(), vec![hook])
            .await
            .unwrap();

        session
            .append(Event::stage("deposited", 1, json!({"amount": 5})).unwrap())
            .unwrap();
        session
            .append(Event::stage("deposited", 1, json!({"amount": 7})).unwrap())
            .unwrap();

        let outcome = session.commit(CommitFailureMode::Retain).await.unwrap();
        assert!(outcome.committed);
        assert_eq!(outcome.new_tip, 1);
        assert!(outcome.hook_failures.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn commit_on_empty_buffer_is_a_no_op() {
        let engine = Arc::new(StreamEngine::new(Arc::new(MemStore::new()), UpcastPipeline::new()));
        let mut session = Session::begin(document(), engine, fold_host(), Balance::default(), vec![])
            .await
            .unwrap();

        let outcome = session.commit(CommitFailureMode::Retain).await.unwrap();
        assert_eq!(outcome.new_tip, -1);
    }

    #[tokio::test]
    async fn retain_on_failure_keeps_buffer_for_a_retry() {
        let engine = Arc::new(StreamEngine::new(Arc::new(MemStore::new()), UpcastPipeline::new()));
        let mut session = Session::begin(document(), engine, fold_host(), Balance::default(), vec![])
            .await
            .unwrap();

        session
            .append(Event::stage("deposited", 1, json!({"amount": 3})).unwrap())
            .unwrap();

        // Force a concurrency conflict by pretending the document is behind.
        session.document.active.current_stream_version = -5;
        let result = session.commit(CommitFailureMode::Retain).await;
        assert!(result.is_err());
        assert_eq!(session.buffer.len(), 1);

        // Restore the true tip and retry with the same buffered event.
        session.document.active.current_stream_version = -1;
        let outcome = session.commit(CommitFailureMode::Retain).await.unwrap();
        assert_eq!(outcome.new_tip, 0);
    }

    #[tokio::test]
    async fn discard_on_failure_clears_the_buffer() {
        let engine = Arc::new(StreamEngine::new(Arc::new(MemStore::new()), UpcastPipeline::new()));
        let mut session = Session::begin(document(), engine, fold_host(), Balance::default(), vec![])
            .await
            .unwrap();

        session
            .append(Event::stage("deposited", 1, json!({"amount": 3})).unwrap())
            .unwrap();

        session.document.active.current_stream_version = -5;
        let result = session.commit(CommitFailureMode::Discard).await;
        assert!(result.is_err());
        assert!(session.buffer.is_empty());
    }
}
