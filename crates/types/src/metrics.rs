//! Aggregation results and query views

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::windows::{AggregationKey, WindowType};

/// Counters accumulated for one window
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccumulatorStats {
    pub event_count: u64,
    pub total_watch_ms: u64,
    pub completions: u64,
    pub starts: u64,
    pub error_count: u64,
    /// Exact number of distinct sessions seen in the window
    pub distinct_sessions: u64,
    /// Latest event time applied to the window
    pub last_updated: Option<DateTime<Utc>>,
}

impl AccumulatorStats {
    /// Completions per start, 0 when nothing started
    pub fn completion_rate(&self) -> f64 {
        if self.starts == 0 {
            0.0
        } else {
            self.completions as f64 / self.starts as f64
        }
    }

    /// Error events per event
    pub fn error_rate(&self) -> f64 {
        if self.event_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.event_count as f64
        }
    }

    /// Sessions active in the window
    pub fn concurrent_viewers(&self) -> u64 {
        self.distinct_sessions
    }

    pub fn average_watch_ms(&self) -> f64 {
        if self.distinct_sessions == 0 {
            0.0
        } else {
            self.total_watch_ms as f64 / self.distinct_sessions as f64
        }
    }
}

/// A finalized window
///
/// Consumers treat results as idempotent by content id, window type and
/// window end: a result re-emitted after recovery replaces the earlier one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowResult {
    pub content_id: String,
    pub window_type: WindowType,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub finalized_at: DateTime<Utc>,
    pub stats: AccumulatorStats,
}

impl WindowResult {
    pub fn key(&self) -> AggregationKey {
        AggregationKey::new(self.content_id.clone(), self.window_type, self.window_start)
    }

    /// Key consumers deduplicate on
    pub fn idempotency_key(&self) -> (String, WindowType, i64) {
        (
            self.content_id.clone(),
            self.window_type,
            self.window_end.timestamp_millis(),
        )
    }
}

/// Current state of an open window as returned by queries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccumulatorView {
    pub content_id: String,
    pub window_type: WindowType,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Always true for open windows: values may still change
    pub provisional: bool,
    pub stats: AccumulatorStats,
    pub completion_rate: f64,
    pub error_rate: f64,
    pub concurrent_viewers: u64,
}

impl AccumulatorView {
    pub fn provisional(
        key: &AggregationKey,
        window_end: DateTime<Utc>,
        stats: AccumulatorStats,
    ) -> Self {
        Self {
            content_id: key.content_id.clone(),
            window_type: key.window_type,
            window_start: key.window_start,
            window_end,
            provisional: true,
            completion_rate: stats.completion_rate(),
            error_rate: stats.error_rate(),
            concurrent_viewers: stats.concurrent_viewers(),
            stats,
        }
    }
}

/// Totals over a time range for one content item
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaybackStatistics {
    pub content_id: String,
    pub window_type: Option<WindowType>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub total_plays: u64,
    pub total_watch_ms: u64,
    pub completions: u64,
    pub errors: u64,
    /// Windows that contributed to the totals
    pub windows: u64,
    /// Whether any contributing window is still open
    pub includes_provisional: bool,
}

impl PlaybackStatistics {
    pub fn add(&mut self, stats: &AccumulatorStats) {
        self.total_plays += stats.starts;
        self.total_watch_ms += stats.total_watch_ms;
        self.completions += stats.completions;
        self.errors += stats.error_count;
        self.windows += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_handle_empty_window() {
        let stats = AccumulatorStats::default();
        assert_eq!(stats.completion_rate(), 0.0);
        assert_eq!(stats.error_rate(), 0.0);
        assert_eq!(stats.average_watch_ms(), 0.0);
    }

    #[test]
    fn test_rates() {
        let stats = AccumulatorStats {
            event_count: 10,
            starts: 4,
            completions: 1,
            error_count: 2,
            distinct_sessions: 4,
            total_watch_ms: 8_000,
            ..Default::default()
        };
        assert_eq!(stats.completion_rate(), 0.25);
        assert_eq!(stats.error_rate(), 0.2);
        assert_eq!(stats.average_watch_ms(), 2_000.0);
    }
}
