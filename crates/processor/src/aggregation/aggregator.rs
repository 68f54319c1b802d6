//! Applying events to window accumulators and finalizing windows

use chrono::{DateTime, Utc};
use playback_types::{AggregationKey, PlaybackEvent, WindowResult};
use tracing::{debug, trace};

use crate::config::WindowConfig;
use crate::error::Result;
use crate::state::StateStore;
use crate::watermark::Watermark;
use crate::window::{millis_to_datetime, WindowAssigner, WindowSpec};

/// What happened to one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Folded into this many window accumulators
    Applied { windows: usize },
    /// Behind its partition watermark; dropped without touching any window
    Late { watermark: Watermark, late_by_ms: i64 },
    /// Every window it belongs to was already finalized
    WindowsClosed,
    /// Its offset was applied before (replay after recovery)
    Replayed,
}

impl ApplyOutcome {
    /// Counted as a late drop
    pub fn is_dropped(&self) -> bool {
        matches!(self, ApplyOutcome::Late { .. } | ApplyOutcome::WindowsClosed)
    }
}

/// Folds playback events into every window covering them
///
/// Finalization is driven by watermarks, never by event volume: a window is
/// emitted once the watermark of every partition that contributed to it has
/// reached the window end.
#[derive(Debug, Clone)]
pub struct WindowAggregator {
    store: StateStore,
    specs: Vec<WindowSpec>,
    grace_ms: i64,
    session_ttl_ms: i64,
}

impl WindowAggregator {
    pub fn new(store: StateStore, config: &WindowConfig) -> Result<Self> {
        config.validate()?;
        let specs = config.enabled.iter().map(|wt| config.spec(*wt)).collect();
        Ok(Self {
            store,
            specs,
            grace_ms: config.grace_period_ms as i64,
            session_ttl_ms: config.session_ttl_ms as i64,
        })
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn specs(&self) -> &[WindowSpec] {
        &self.specs
    }

    /// Apply one event
    ///
    /// Observing the event's watermark, updating accumulators and recording
    /// the offset happen inside one write-lock acquisition.
    pub fn apply(&self, event: &PlaybackEvent) -> ApplyOutcome {
        let mut state = self.store.write();

        if state.is_applied(event.partition, event.offset) {
            trace!(
                partition = event.partition,
                offset = event.offset,
                "Skipping replayed record"
            );
            return ApplyOutcome::Replayed;
        }

        let event_time_ms = event.event_time_ms();
        state.watermarks_mut().observe(
            event.partition,
            event_time_ms,
            event.ingest_time.timestamp_millis(),
        );

        if let Some(watermark) = state.watermarks().watermark(event.partition) {
            let threshold = watermark.timestamp.saturating_sub(self.grace_ms);
            if event_time_ms < threshold {
                state.mark_applied(event.partition, event.offset);
                return ApplyOutcome::Late {
                    watermark,
                    late_by_ms: threshold - event_time_ms,
                };
            }
        }

        let contribution = state.session_mut(&event.session_id).advance(
            event.kind,
            event.position_ms,
            event_time_ms,
        );

        let mut windows = 0;
        for spec in &self.specs {
            for bounds in spec.assign_windows(event.event_time) {
                let key = AggregationKey::new(event.content_id.as_str(), spec.window_type, bounds.start);
                if state.get(&key).is_none() && state.is_closed(&key.content_id, key.window_type, bounds.end) {
                    continue;
                }
                state.get_or_create(&key, bounds.end).apply(event, &contribution);
                windows += 1;
            }
        }

        state.mark_applied(event.partition, event.offset);

        if windows == 0 {
            ApplyOutcome::WindowsClosed
        } else {
            ApplyOutcome::Applied { windows }
        }
    }

    /// Record a consumed record that produced no event (e.g. undecodable)
    pub fn mark_consumed(&self, partition: u32, offset: u64) {
        self.store.write().mark_applied(partition, offset);
    }

    /// Finalize every window whose contributing partitions have all passed its end
    ///
    /// `now` drives idle-partition advancement and stamps the results.
    pub fn finalize_ready(&self, now: DateTime<Utc>) -> Vec<WindowResult> {
        let mut state = self.store.write();
        state.watermarks_mut().advance_idle(now.timestamp_millis());

        let Some(upper) = state.watermarks().max_watermark() else {
            return Vec::new();
        };

        let mut results = Vec::new();
        for key in state.keys_ending_by(upper.to_datetime()) {
            let ready = match state.get(&key) {
                Some(acc) => state
                    .watermarks()
                    .min_watermark(acc.partitions())
                    .is_some_and(|wm| wm.has_passed(acc.window_end())),
                None => false,
            };
            if !ready {
                continue;
            }
            if let Some(acc) = state.remove(&key) {
                let window_end = acc.window_end();
                state.close_window(&key, window_end);
                debug!(
                    content_id = %key.content_id,
                    window_type = %key.window_type,
                    window_start = key.window_start.timestamp_millis(),
                    events = acc.event_count(),
                    "Finalized window"
                );
                results.push(WindowResult {
                    content_id: key.content_id,
                    window_type: key.window_type,
                    window_start: key.window_start,
                    window_end,
                    finalized_at: now,
                    stats: acc.stats(),
                });
            }
        }

        if let Some(global) = state.watermarks().global_watermark() {
            let threshold = global.timestamp.saturating_sub(self.grace_ms);
            state.compact_closed(millis_to_datetime(threshold));
            let expired = state.expire_sessions(global.timestamp.saturating_sub(self.session_ttl_ms));
            if expired > 0 {
                debug!(expired = expired, "Expired idle session cursors");
            }
        }

        results
    }
}
