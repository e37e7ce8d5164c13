//! `DataStore`: the contract every storage backend implements.
//!
//! Two reference implementations live under `infrastructure/`: an in-memory
//! store for tests and embedding, and a local file/WAL-backed store for
//! demonstrating durability across process restarts. Neither is privileged;
//! the engine only ever talks to this trait.

use async_trait::async_trait;
use crate::domain::entities::{Event, ObjectDocument};
use crate::error::Result;
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;

/// Options controlling a single append call.
#[derive(Debug, Clone, Copy)]
pub struct AppendOptions {
    /// The tip the caller believes is current. The store must reject the
    /// append with `ConcurrencyConflict` if the stored tip no longer matches.
    pub expected_tip: i64,
}

/// The page size [`DataStore::read_stream`]'s default implementation pulls
/// per underlying `read` call. Callers that stop consuming the stream early
/// never trigger reads past the page they're currently draining.
const READ_STREAM_PAGE_SIZE: u64 = 256;

/// A pull-based, backpressure-aware event stream: the underlying store only
/// does work (and only issues the next page's worth of reads) when the
/// caller polls for more, and dropping the stream before it's exhausted
/// cancels any further reads.
pub type EventStream<'a> = Pin<Box<dyn Stream<Item = Result<Event>> + Send + 'a>>;

/// Append, range-read, and orphan-removal operations against one object's
/// active stream. Implementations must provide read-your-writes consistency:
/// once `append` returns success, a subsequent `read`/`read_stream` call with
/// `from_version <= committed.max` observes all appended events.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Atomically append `events` to `document`'s active stream. On success,
    /// returns the new tip (`expected_tip + events.len()`). `events` must
    /// already carry their final `event_version` values.
    async fn append(
        &self,
        document: &ObjectDocument,
        events: &[Event],
        options: AppendOptions,
    ) -> Result<i64>;

    /// Materialize a version range `[from_version, until_version)` (or to the
    /// tip when `until_version` is `None`) as a plain vector, in ascending
    /// `event_version` order with no gaps.
    async fn read(
        &self,
        document: &ObjectDocument,
        from_version: u64,
        until_version: Option<u64>,
    ) -> Result<Vec<Event>>;

    /// Idempotent deletion of a version range, used only by the repair
    /// service to purge orphaned events from a failed commit. Returns the
    /// number of events actually removed.
    async fn remove_events_for_failed_commit(
        &self,
        document: &ObjectDocument,
        from_version: u64,
        to_version: u64,
    ) -> Result<u64>;

    /// The highest committed version for this stream, or -1 if empty.
    async fn current_tip(&self, document: &ObjectDocument) -> Result<i64>;

    /// Stream `[from_version, until_version)` a page at a time instead of
    /// materializing the whole range, so a caller reading a long-lived
    /// stream can early-exit (drop the stream) without paying for reads it
    /// never consumes. The default implementation paginates through
    /// [`DataStore::read`]; a backend with its own native cursor (e.g. a
    /// database driver's row stream) should override this directly rather
    /// than going through `read` in a loop.
    fn read_stream<'a>(
        &'a self,
        document: &'a ObjectDocument,
        from_version: u64,
        until_version: Option<u64>,
    ) -> EventStream<'a> {
        let initial = (self, document, from_version, until_version, false);
        Box::pin(
            stream::unfold(initial, move |(store, document, cursor, until, done)| async move {
                if done {
                    return None;
                }
                let page_end = match until {
                    Some(u) if u <= cursor => return None,
                    Some(u) => u.min(cursor + READ_STREAM_PAGE_SIZE),
                    None => cursor + READ_STREAM_PAGE_SIZE,
                };

                match store.read(document, cursor, Some(page_end)).await {
                    Ok(events) if events.is_empty() => None,
                    Ok(events) => {
                        let next_cursor = events
                            .last()
                            .map(|e| e.event_version() + 1)
                            .unwrap_or(cursor);
                        let page_was_short = (events.len() as u64) < (page_end - cursor);
                        let exhausted = until.map(|u| next_cursor >= u).unwrap_or(false) || page_was_short;
                        let chunk = stream::iter(events.into_iter().map(Ok)).boxed();
                        Some((chunk, (store, document, next_cursor, until, exhausted)))
                    }
                    Err(err) => {
                        let chunk = stream::iter(vec![Err(err)]).boxed();
                        Some((chunk, (store, document, cursor, until, true)))
                    }
                }
            })
            .flatten(),
        )
    }
}

/// Read-only half of [`DataStore`] (Interface Segregation: query-path code
/// should not need append permissions).
#[async_trait]
pub trait DataStoreReader: Send + Sync {
    async fn read(
        &self,
        document: &ObjectDocument,
        from_version: u64,
        until_version: Option<u64>,
    ) -> Result<Vec<Event>>;

    async fn current_tip(&self, document: &ObjectDocument) -> Result<i64>;
}

/// Write-only half of [`DataStore`].
#[async_trait]
pub trait DataStoreWriter: Send + Sync {
    async fn append(
        &self,
        document: &ObjectDocument,
        events: &[Event],
        options: AppendOptions,
    ) -> Result<i64>;

    async fn remove_events_for_failed_commit(
        &self,
        document: &ObjectDocument,
        from_version: u64,
        to_version: u64,
    ) -> Result<u64>;
}
