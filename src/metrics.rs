//! Prometheus metrics for the event store engine.
//!
//! `MetricsRegistry` is a capability: constructed once, handed around as an
//! `Arc`, never a global. There is no HTTP `/metrics` endpoint here — that is
//! the excluded outer adapter; callers wire this registry into their own
//! exporter.

use prometheus::{Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

pub struct MetricsRegistry {
    registry: Registry,

    pub commits_total: IntCounter,
    pub commit_duration_seconds: Histogram,
    pub concurrency_conflicts_total: IntCounter,
    pub broken_streams_total: IntCounter,
    pub repairs_total: IntCounter,

    pub upcasts_total: IntCounterVec,
    pub upcast_duration_seconds: Histogram,

    pub snapshots_created_total: IntCounter,
    pub snapshot_duration_seconds: Histogram,

    pub saga_phase_transitions_total: IntCounterVec,
    pub saga_duration_seconds: Histogram,
    pub lock_acquisitions_total: IntCounter,
    pub lock_heartbeat_failures_total: IntCounter,
}

impl MetricsRegistry {
    pub fn new() -> Arc<Self> {
        let registry = Registry::new();

        let commits_total = IntCounter::with_opts(Opts::new(
            "eventstore_commits_total",
            "Total number of successful batch commits",
        ))
        .unwrap();

        let commit_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "eventstore_commit_duration_seconds",
            "Time to append and persist a batch of events",
        ))
        .unwrap();

        let concurrency_conflicts_total = IntCounter::with_opts(Opts::new(
            "eventstore_concurrency_conflicts_total",
            "Total number of expected-tip mismatches rejected by the data store",
        ))
        .unwrap();

        let broken_streams_total = IntCounter::with_opts(Opts::new(
            "eventstore_broken_streams_total",
            "Total number of streams marked broken by a partial commit",
        ))
        .unwrap();

        let repairs_total = IntCounter::with_opts(Opts::new(
            "eventstore_repairs_total",
            "Total number of broken-stream repairs performed",
        ))
        .unwrap();

        let upcasts_total = IntCounterVec::new(
            Opts::new("eventstore_upcasts_total", "Events upcast, by event type"),
            &["event_type"],
        )
        .unwrap();

        let upcast_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "eventstore_upcast_duration_seconds",
            "Time to run an event through the upcast pipeline",
        ))
        .unwrap();

        let snapshots_created_total = IntCounter::with_opts(Opts::new(
            "eventstore_snapshots_created_total",
            "Total number of snapshots captured",
        ))
        .unwrap();

        let snapshot_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "eventstore_snapshot_duration_seconds",
            "Time to capture a snapshot",
        ))
        .unwrap();

        let saga_phase_transitions_total = IntCounterVec::new(
            Opts::new(
                "eventstore_saga_phase_transitions_total",
                "Migration saga phase transitions, by target phase",
            ),
            &["phase"],
        )
        .unwrap();

        let saga_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "eventstore_saga_duration_seconds",
            "Total time for a migration saga to complete or abort",
        ))
        .unwrap();

        let lock_acquisitions_total = IntCounter::with_opts(Opts::new(
            "eventstore_lock_acquisitions_total",
            "Total number of distributed locks acquired",
        ))
        .unwrap();

        let lock_heartbeat_failures_total = IntCounter::with_opts(Opts::new(
            "eventstore_lock_heartbeat_failures_total",
            "Total number of lock heartbeat renewals that failed",
        ))
        .unwrap();

        registry.register(Box::new(commits_total.clone())).unwrap();
        registry.register(Box::new(commit_duration_seconds.clone())).unwrap();
        registry.register(Box::new(concurrency_conflicts_total.clone())).unwrap();
        registry.register(Box::new(broken_streams_total.clone())).unwrap();
        registry.register(Box::new(repairs_total.clone())).unwrap();
        registry.register(Box::new(upcasts_total.clone())).unwrap();
        registry.register(Box::new(upcast_duration_seconds.clone())).unwrap();
        registry.register(Box::new(snapshots_created_total.clone())).unwrap();
        registry.register(Box::new(snapshot_duration_seconds.clone())).unwrap();
        registry.register(Box::new(saga_phase_transitions_total.clone())).unwrap();
        registry.register(Box::new(saga_duration_seconds.clone())).unwrap();
        registry.register(Box::new(lock_acquisitions_total.clone())).unwrap();
        registry.register(Box::new(lock_heartbeat_failures_total.clone())).unwrap();

        Arc::new(Self {
            registry,
            commits_total,
            commit_duration_seconds,
            concurrency_conflicts_total,
            broken_streams_total,
            repairs_total,
            upcasts_total,
            upcast_duration_seconds,
            snapshots_created_total,
            snapshot_duration_seconds,
            saga_phase_transitions_total,
            saga_duration_seconds,
            lock_acquisitions_total,
            lock_heartbeat_failures_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, Box<dyn std::error::Error>> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let metrics = MetricsRegistry::new();
        assert_eq!(metrics.commits_total.get(), 0);
    }

    #[test]
    fn increments_are_observable_through_encode() {
        let metrics = MetricsRegistry::new();
        metrics.commits_total.inc();
        metrics.broken_streams_total.inc_by(2);
        let rendered = metrics.encode().unwrap();
        assert!(rendered.contains("eventstore_commits_total 1"));
        assert!(rendered.contains("eventstore_broken_streams_total 2"));
    }

    #[test]
    fn labeled_counters_track_independent_series() {
        let metrics = MetricsRegistry::new();
        metrics.upcasts_total.with_label_values(&["order.placed"]).inc();
        metrics.upcasts_total.with_label_values(&["order.shipped"]).inc_by(3);
        let rendered = metrics.encode().unwrap();
        assert!(rendered.contains("event_type=\"order.placed\""));
        assert!(rendered.contains("event_type=\"order.shipped\""));
    }

    #[test]
    fn saga_phase_transitions_label_by_phase() {
        let metrics = MetricsRegistry::new();
        metrics.saga_phase_transitions_total.with_label_values(&["DualWrite"]).inc();
        assert_eq!(metrics.saga_phase_transitions_total.with_label_values(&["DualWrite"]).get(), 1);
    }
}
