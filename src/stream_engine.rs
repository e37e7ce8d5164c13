//! Stream engine: owns the commit protocol (version assignment, chunk
//! rollover, optimistic concurrency) and the read path (upcast + snapshot
//! boundary). Everything else in the crate builds on top of this.

use crate::domain::entities::{Event, ObjectDocument};
use crate::domain::repositories::{AppendOptions, DataStore, EventStream};
use crate::error::{EventStoreError, Result};
use crate::upcast::UpcastPipeline;
use futures::stream::{self, StreamExt};
use std::sync::Arc;

/// A page of events read back from a stream, with an optional synthetic
/// marker indicating a fold should start from a restored snapshot state
/// rather than from empty.
pub struct ReadPage {
    pub snapshot_boundary_version: Option<u64>,
    pub events: Vec<Event>,
}

pub struct StreamEngine {
    store: Arc<dyn DataStore>,
    upcasters: UpcastPipeline,
}

impl StreamEngine {
    pub fn new(store: Arc<dyn DataStore>, upcasters: UpcastPipeline) -> Self {
        Self { store, upcasters }
    }

    /// Assign sequential versions to `staged_events`, roll the chunk boundary
    /// if needed, and append them atomically via the data store. On success,
    /// advances and returns the document's new tip version.
    pub async fn append_batch(
        &self,
        document: &mut ObjectDocument,
        staged_events: Vec<Event>,
    ) -> Result<i64> {
        if staged_events.is_empty() {
            return Ok(document.active.current_stream_version);
        }
        if document.active.is_broken {
            return Err(EventStoreError::StreamBroken(
                document.active.stream_identifier.clone(),
            ));
        }

        let base = document.active.current_stream_version;
        let events: Vec<Event> = staged_events
            .into_iter()
            .enumerate()
            .map(|(i, e)| e.with_version((base + 1 + i as i64) as u64))
            .collect();
        let last_version = base + events.len() as i64;

        self.roll_chunk_if_needed(document, last_version as u64);

        let options = AppendOptions { expected_tip: base };
        match self.store.append(document, &events, options).await {
            Ok(new_tip) => {
                document.active.current_stream_version = new_tip;
                Ok(new_tip)
            }
            Err(EventStoreError::ConcurrencyConflict { expected, actual }) => {
                Err(EventStoreError::ConcurrencyConflict { expected, actual })
            }
            Err(EventStoreError::PartialCommit { from, to }) => {
                document.active.mark_broken(from, to, "partial commit during append_batch")?;
                Err(EventStoreError::PartialCommit { from, to })
            }
            Err(other) => Err(other),
        }
    }

    fn roll_chunk_if_needed(&self, document: &mut ObjectDocument, up_to_version: u64) {
        let settings = document.active.chunk_settings;
        if !settings.enabled {
            return;
        }
        let target_chunk = settings.chunk_index_for(up_to_version.saturating_sub(1));
        if target_chunk > document.active.chunk_index_ceiling {
            tracing::debug!(
                stream = document.active.stream_identifier,
                from = document.active.chunk_index_ceiling,
                to = target_chunk,
                "rolling stream chunk"
            );
            document.active.chunk_index_ceiling = target_chunk;
        }
    }

    /// Read `[from_version, until_version)` (or to the tip when `None`),
    /// applying the upcast pipeline in order. If a snapshot covers the
    /// requested start, the caller is told where to resume replay from.
    pub async fn read(
        &self,
        document: &ObjectDocument,
        from_version: u64,
        until_version: Option<u64>,
    ) -> Result<ReadPage> {
        if document.active.is_broken {
            return Err(EventStoreError::StreamBroken(
                document.active.stream_identifier.clone(),
            ));
        }

        let mut snapshot_boundary_version = None;
        let mut effective_from = from_version;

        if from_version == 0 {
            let ceiling = until_version.unwrap_or(u64::MAX);
            if let Some(snapshot) = document.active.latest_snapshot_at_or_before(ceiling) {
                snapshot_boundary_version = Some(snapshot.version);
                effective_from = snapshot.version + 1;
            }
        }

        let raw = self.store.read(document, effective_from, until_version).await?;
        let events = self.upcasters.apply_all(raw)?;

        Ok(ReadPage {
            snapshot_boundary_version,
            events,
        })
    }

    pub async fn current_tip(&self, document: &ObjectDocument) -> Result<i64> {
        self.store.current_tip(document).await
    }

    /// Backpressure-aware counterpart to [`StreamEngine::read`]: applies the
    /// same upcast pipeline and snapshot-boundary skip, but pulls events from
    /// the store a page at a time instead of materializing the whole range
    /// up front. A caller driving a long replay can stop polling (drop the
    /// stream) without paying for reads past the point it stopped at.
    pub fn read_stream<'a>(
        &'a self,
        document: &'a ObjectDocument,
        from_version: u64,
        until_version: Option<u64>,
    ) -> EventStream<'a> {
        if document.active.is_broken {
            let err = EventStoreError::StreamBroken(document.active.stream_identifier.clone());
            return Box::pin(stream::once(async move { Err(err) }));
        }

        let mut effective_from = from_version;
        if from_version == 0 {
            let ceiling = until_version.unwrap_or(u64::MAX);
            if let Some(snapshot) = document.active.latest_snapshot_at_or_before(ceiling) {
                effective_from = snapshot.version + 1;
            }
        }

        let raw = self.store.read_stream(document, effective_from, until_version);
        let upcasters = self.upcasters.clone();
        Box::pin(raw.flat_map(move |result| match result {
            Ok(event) => match upcasters.apply(event) {
                Ok(events) => stream::iter(events.into_iter().map(Ok)).boxed(),
                Err(err) => stream::iter(vec![Err(err)]).boxed(),
            },
            Err(err) => stream::iter(vec![Err(err)]).boxed(),
        }))
    }
}
