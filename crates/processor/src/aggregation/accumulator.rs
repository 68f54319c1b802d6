//! Mutable per-window state

use chrono::{DateTime, Utc};
use playback_types::{AccumulatorStats, PlaybackEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::session::SessionContribution;

/// Running counters for one window
///
/// Distinct sessions are tracked exactly. The set of contributing partitions
/// decides which partition watermarks gate finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    window_end: DateTime<Utc>,
    event_count: u64,
    total_watch_ms: u64,
    completions: u64,
    starts: u64,
    error_count: u64,
    sessions: BTreeSet<String>,
    partitions: BTreeSet<u32>,
    last_updated: Option<DateTime<Utc>>,
}

impl Accumulator {
    pub fn new(window_end: DateTime<Utc>) -> Self {
        Self {
            window_end,
            event_count: 0,
            total_watch_ms: 0,
            completions: 0,
            starts: 0,
            error_count: 0,
            sessions: BTreeSet::new(),
            partitions: BTreeSet::new(),
            last_updated: None,
        }
    }

    pub fn apply(&mut self, event: &PlaybackEvent, contribution: &SessionContribution) {
        self.event_count += 1;
        self.total_watch_ms = self.total_watch_ms.saturating_add(contribution.watch_ms);
        if contribution.started {
            self.starts += 1;
        }
        if contribution.completed {
            self.completions += 1;
        }
        if contribution.errored {
            self.error_count += 1;
        }
        if !self.sessions.contains(&event.session_id) {
            self.sessions.insert(event.session_id.clone());
        }
        self.partitions.insert(event.partition);
        self.last_updated = Some(
            self.last_updated
                .map_or(event.event_time, |last| last.max(event.event_time)),
        );
    }

    pub fn window_end(&self) -> DateTime<Utc> {
        self.window_end
    }

    pub fn partitions(&self) -> &BTreeSet<u32> {
        &self.partitions
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn total_watch_ms(&self) -> u64 {
        self.total_watch_ms
    }

    pub fn stats(&self) -> AccumulatorStats {
        AccumulatorStats {
            event_count: self.event_count,
            total_watch_ms: self.total_watch_ms,
            completions: self.completions,
            starts: self.starts,
            error_count: self.error_count,
            distinct_sessions: self.sessions.len() as u64,
            last_updated: self.last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::millis_to_datetime;
    use playback_types::PlaybackKind;

    fn event(session: &str, kind: PlaybackKind, partition: u32, at_ms: i64) -> PlaybackEvent {
        PlaybackEvent {
            event_time: millis_to_datetime(at_ms),
            ingest_time: millis_to_datetime(at_ms),
            partition_key: "c".into(),
            content_id: "c".into(),
            session_id: session.into(),
            kind,
            position_ms: 0,
            partition,
            offset: 0,
        }
    }

    #[test]
    fn test_apply_counts_sessions_exactly() {
        let mut acc = Accumulator::new(millis_to_datetime(60_000));
        let started = SessionContribution {
            started: true,
            ..Default::default()
        };
        acc.apply(&event("s1", PlaybackKind::Play, 0, 1_000), &started);
        acc.apply(&event("s2", PlaybackKind::Play, 1, 2_000), &started);
        acc.apply(
            &event("s1", PlaybackKind::Pause, 0, 3_000),
            &SessionContribution {
                watch_ms: 2_000,
                ..Default::default()
            },
        );

        let stats = acc.stats();
        assert_eq!(stats.event_count, 3);
        assert_eq!(stats.starts, 2);
        assert_eq!(stats.distinct_sessions, 2);
        assert_eq!(stats.total_watch_ms, 2_000);
        assert_eq!(stats.last_updated, Some(millis_to_datetime(3_000)));
        assert_eq!(acc.partitions().iter().copied().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_last_updated_ignores_older_events() {
        let mut acc = Accumulator::new(millis_to_datetime(60_000));
        acc.apply(&event("s", PlaybackKind::Buffer, 0, 9_000), &SessionContribution::default());
        acc.apply(&event("s", PlaybackKind::Buffer, 0, 4_000), &SessionContribution::default());
        assert_eq!(acc.stats().last_updated, Some(millis_to_datetime(9_000)));
    }
}
