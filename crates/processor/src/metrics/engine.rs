//! Engine counters and gauges

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use serde::Serialize;

use super::registry::MetricsRegistry;

/// Metrics updated by the ingestion path
///
/// `Default` gives unregistered metrics, handy in tests; [`EngineMetrics::register`]
/// wires them into a registry for export.
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    pub events_ingested: Counter,
    pub decode_errors: Counter,
    pub late_dropped_events: Counter,
    pub replayed_records_skipped: Counter,
    pub windows_finalized: Counter,
    pub results_published: Counter,
    pub subscribers_dropped: Counter,
    pub checkpoints_persisted: Counter,
    pub checkpoint_failures: Counter,
    pub offset_commit_failures: Counter,
    pub open_accumulators: Gauge,
    pub active_subscriptions: Gauge,
    pub last_checkpoint_seq: Gauge,
}

impl EngineMetrics {
    pub fn register(registry: &MetricsRegistry) -> Self {
        let metrics = Self::default();
        let registry = registry.registry();
        let mut registry = registry.write();

        registry.register(
            "playback_events_ingested",
            "Playback events applied to window accumulators",
            metrics.events_ingested.clone(),
        );
        registry.register(
            "playback_decode_errors",
            "Log records that could not be decoded",
            metrics.decode_errors.clone(),
        );
        registry.register(
            "playback_late_dropped_events",
            "Events dropped for arriving behind the watermark or after their windows closed",
            metrics.late_dropped_events.clone(),
        );
        registry.register(
            "playback_replayed_records_skipped",
            "Records skipped because their offset was already applied",
            metrics.replayed_records_skipped.clone(),
        );
        registry.register(
            "playback_windows_finalized",
            "Windows finalized and emitted",
            metrics.windows_finalized.clone(),
        );
        registry.register(
            "playback_results_published",
            "Window results delivered to subscribers",
            metrics.results_published.clone(),
        );
        registry.register(
            "playback_subscribers_dropped",
            "Subscribers removed for overflowing their backlog",
            metrics.subscribers_dropped.clone(),
        );
        registry.register(
            "playback_checkpoints_persisted",
            "Checkpoints durably written",
            metrics.checkpoints_persisted.clone(),
        );
        registry.register(
            "playback_checkpoint_failures",
            "Failed checkpoint write attempts",
            metrics.checkpoint_failures.clone(),
        );
        registry.register(
            "playback_offset_commit_failures",
            "Offset commits rejected by the log",
            metrics.offset_commit_failures.clone(),
        );
        registry.register(
            "playback_open_accumulators",
            "Window accumulators currently open",
            metrics.open_accumulators.clone(),
        );
        registry.register(
            "playback_active_subscriptions",
            "Live result subscriptions",
            metrics.active_subscriptions.clone(),
        );
        registry.register(
            "playback_last_checkpoint_seq",
            "Sequence number of the latest persisted checkpoint",
            metrics.last_checkpoint_seq.clone(),
        );

        metrics
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_ingested: self.events_ingested.get(),
            decode_errors: self.decode_errors.get(),
            late_dropped_events: self.late_dropped_events.get(),
            replayed_records_skipped: self.replayed_records_skipped.get(),
            windows_finalized: self.windows_finalized.get(),
            results_published: self.results_published.get(),
            subscribers_dropped: self.subscribers_dropped.get(),
            checkpoints_persisted: self.checkpoints_persisted.get(),
            checkpoint_failures: self.checkpoint_failures.get(),
            offset_commit_failures: self.offset_commit_failures.get(),
            open_accumulators: self.open_accumulators.get(),
            active_subscriptions: self.active_subscriptions.get(),
        }
    }
}

/// Point-in-time values of [`EngineMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_ingested: u64,
    pub decode_errors: u64,
    pub late_dropped_events: u64,
    pub replayed_records_skipped: u64,
    pub windows_finalized: u64,
    pub results_published: u64,
    pub subscribers_dropped: u64,
    pub checkpoints_persisted: u64,
    pub checkpoint_failures: u64,
    pub offset_commit_failures: u64,
    pub open_accumulators: i64,
    pub active_subscriptions: i64,
}
