//! Read-only queries over open windows and recently finalized results

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use playback_types::{AccumulatorView, PlaybackStatistics, WindowResult, WindowType};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use crate::config::QueryConfig;
use crate::error::QueryError;
use crate::state::StateStore;

/// Window type used by statistics queries that do not name one
pub const DEFAULT_STATISTICS_WINDOW: WindowType = WindowType::Tumbling1m;

type HistoryKey = (String, WindowType);

/// Recently finalized results, bounded per content item and window type
///
/// Volatile: not part of checkpoints. A result finalized again after a
/// restart replaces the copy with the same window end. Once more than
/// `max_keys` pairs are tracked, the pair whose newest result ends earliest
/// is dropped.
#[derive(Debug, Clone)]
pub struct ResultHistory {
    per_key: usize,
    max_keys: usize,
    entries: Arc<DashMap<HistoryKey, VecDeque<WindowResult>>>,
}

impl ResultHistory {
    pub fn new(per_key: usize, max_keys: usize) -> Self {
        Self {
            per_key: per_key.max(1),
            max_keys: max_keys.max(1),
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Number of content/window pairs with history
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn record(&self, result: &WindowResult) {
        let key = (result.content_id.clone(), result.window_type);
        let inserted_key = {
            let mut results = self.entries.entry(key.clone()).or_default();
            let inserted_key = results.is_empty();

            // kept ascending by window end
            match results.binary_search_by(|r| r.window_end.cmp(&result.window_end)) {
                Ok(idx) => results[idx] = result.clone(),
                Err(idx) => results.insert(idx, result.clone()),
            }
            while results.len() > self.per_key {
                results.pop_front();
            }
            inserted_key
        };

        // entry guard must be released before scanning the map
        if inserted_key && self.entries.len() > self.max_keys {
            self.evict_stalest(&key);
        }
    }

    fn evict_stalest(&self, keep: &HistoryKey) {
        let stalest = self
            .entries
            .iter()
            .filter(|entry| entry.key() != keep)
            .filter_map(|entry| entry.value().back().map(|r| (r.window_end, entry.key().clone())))
            .min();
        if let Some((newest_end, key)) = stalest {
            debug!(
                content_id = %key.0,
                window_type = %key.1,
                newest_end = %newest_end,
                "Evicting result history"
            );
            self.entries.remove(&key);
        }
    }

    /// Newest first
    pub fn recent(&self, content_id: &str, window_type: WindowType, limit: usize) -> Vec<WindowResult> {
        self.entries
            .get(&(content_id.to_string(), window_type))
            .map(|results| results.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    fn for_each_in_range(
        &self,
        content_id: &str,
        window_type: WindowType,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        mut f: impl FnMut(&WindowResult),
    ) {
        if let Some(results) = self.entries.get(&(content_id.to_string(), window_type)) {
            results
                .iter()
                .filter(|r| in_range(r.window_start, start, end))
                .for_each(|r| f(r));
        }
    }
}

fn in_range(window_start: DateTime<Utc>, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
    start.map_or(true, |s| window_start >= s) && end.map_or(true, |e| window_start < e)
}

/// Serves point-in-time reads without mutating engine state
#[derive(Debug, Clone)]
pub struct QueryService {
    store: StateStore,
    history: ResultHistory,
}

impl QueryService {
    pub fn new(store: StateStore, config: &QueryConfig) -> Self {
        Self {
            store,
            history: ResultHistory::new(config.history_per_key, config.history_max_keys),
        }
    }

    pub fn history(&self) -> &ResultHistory {
        &self.history
    }

    /// The most recent open window, marked provisional
    pub fn query(&self, content_id: &str, window_type: WindowType) -> Result<AccumulatorView, QueryError> {
        let state = self.store.read();
        let result = state
            .open_windows(content_id, window_type)
            .next_back()
            .map(|(key, acc)| AccumulatorView::provisional(key, acc.window_end(), acc.stats()))
            .ok_or_else(|| QueryError::NotFound {
                content_id: content_id.to_string(),
                window_type,
            });
        result
    }

    /// Every open window for the key, oldest first
    pub fn open_windows(&self, content_id: &str, window_type: WindowType) -> Vec<AccumulatorView> {
        let state = self.store.read();
        state
            .open_windows(content_id, window_type)
            .map(|(key, acc)| AccumulatorView::provisional(key, acc.window_end(), acc.stats()))
            .collect()
    }

    pub fn recent_results(&self, content_id: &str, window_type: WindowType, limit: usize) -> Vec<WindowResult> {
        self.history.recent(content_id, window_type, limit)
    }

    /// Totals over finalized and open windows starting in `[start, end)`
    pub fn statistics(
        &self,
        content_id: &str,
        window_type: Option<WindowType>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> PlaybackStatistics {
        let window_type = window_type.unwrap_or(DEFAULT_STATISTICS_WINDOW);
        let mut statistics = PlaybackStatistics {
            content_id: content_id.to_string(),
            window_type: Some(window_type),
            start,
            end,
            ..Default::default()
        };

        self.history
            .for_each_in_range(content_id, window_type, start, end, |result| statistics.add(&result.stats));

        let state = self.store.read();
        for (key, acc) in state.open_windows(content_id, window_type) {
            if in_range(key.window_start, start, end) {
                statistics.add(&acc.stats());
                statistics.includes_provisional = true;
            }
        }
        statistics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatermarkConfig;
    use crate::aggregation::SessionContribution;
    use crate::window::millis_to_datetime;
    use playback_types::{AccumulatorStats, AggregationKey, PlaybackEvent, PlaybackKind};

    fn event(content: &str, time_ms: i64, kind: PlaybackKind) -> PlaybackEvent {
        PlaybackEvent {
            event_time: millis_to_datetime(time_ms),
            ingest_time: millis_to_datetime(time_ms),
            partition_key: content.into(),
            content_id: content.into(),
            session_id: "s1".into(),
            kind,
            position_ms: 0,
            partition: 0,
            offset: 0,
        }
    }

    fn open(store: &StateStore, content: &str, start_ms: i64, kind: PlaybackKind) {
        let key = AggregationKey::new(content, WindowType::Tumbling1m, millis_to_datetime(start_ms));
        let mut state = store.write();
        state
            .get_or_create(&key, millis_to_datetime(start_ms + 60_000))
            .apply(
                &event(content, start_ms, kind),
                &SessionContribution {
                    started: kind == PlaybackKind::Play,
                    ..Default::default()
                },
            );
    }

    fn finalized(content: &str, end_ms: i64, starts: u64) -> WindowResult {
        WindowResult {
            content_id: content.into(),
            window_type: WindowType::Tumbling1m,
            window_start: millis_to_datetime(end_ms - 60_000),
            window_end: millis_to_datetime(end_ms),
            finalized_at: millis_to_datetime(end_ms),
            stats: AccumulatorStats {
                starts,
                event_count: starts,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_query_returns_latest_open_window() {
        let store = StateStore::new(&WatermarkConfig::default());
        let service = QueryService::new(store.clone(), &QueryConfig::default());

        let err = service.query("movie", WindowType::Tumbling1m).unwrap_err();
        assert!(matches!(err, QueryError::NotFound { .. }));

        open(&store, "movie", 0, PlaybackKind::Play);
        open(&store, "movie", 60_000, PlaybackKind::Play);

        let view = service.query("movie", WindowType::Tumbling1m).unwrap();
        assert!(view.provisional);
        assert_eq!(view.window_start, millis_to_datetime(60_000));
        assert_eq!(service.open_windows("movie", WindowType::Tumbling1m).len(), 2);
        assert!(service.query("movie", WindowType::Tumbling1h).is_err());
    }

    #[test]
    fn test_history_is_bounded_and_replaces_by_window_end() {
        let history = ResultHistory::new(2, 100);
        history.record(&finalized("movie", 60_000, 1));
        history.record(&finalized("movie", 120_000, 1));
        history.record(&finalized("movie", 120_000, 5));
        history.record(&finalized("movie", 180_000, 1));

        let recent = history.recent("movie", WindowType::Tumbling1m, 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].window_end, millis_to_datetime(180_000));
        assert_eq!(recent[1].stats.starts, 5);
        assert_eq!(history.recent("movie", WindowType::Tumbling1m, 1).len(), 1);
    }

    #[test]
    fn test_statistics_combine_history_and_open_windows() {
        let store = StateStore::new(&WatermarkConfig::default());
        let service = QueryService::new(store.clone(), &QueryConfig::default());
        service.history().record(&finalized("movie", 60_000, 3));
        service.history().record(&finalized("movie", 120_000, 2));
        open(&store, "movie", 120_000, PlaybackKind::Play);

        let all = service.statistics("movie", None, None, None);
        assert_eq!(all.total_plays, 6);
        assert_eq!(all.windows, 3);
        assert!(all.includes_provisional);

        let finalized_only = service.statistics(
            "movie",
            Some(WindowType::Tumbling1m),
            Some(millis_to_datetime(0)),
            Some(millis_to_datetime(120_000)),
        );
        assert_eq!(finalized_only.total_plays, 5);
        assert!(!finalized_only.includes_provisional);
    }

    #[test]
    fn test_history_evicts_stalest_key_when_full() {
        let history = ResultHistory::new(4, 2);
        history.record(&finalized("old", 60_000, 1));
        history.record(&finalized("busy", 60_000, 1));
        history.record(&finalized("old", 120_000, 1));
        history.record(&finalized("busy", 240_000, 1));

        // new key pushes past the cap; "old" has the earliest newest result
        history.record(&finalized("fresh", 180_000, 1));
        assert_eq!(history.key_count(), 2);
        assert!(history.recent("old", WindowType::Tumbling1m, 10).is_empty());
        assert_eq!(history.recent("busy", WindowType::Tumbling1m, 10).len(), 2);
        assert_eq!(history.recent("fresh", WindowType::Tumbling1m, 10).len(), 1);

        // updating an existing key never evicts
        history.record(&finalized("fresh", 240_000, 1));
        assert_eq!(history.key_count(), 2);
    }

    #[test]
    fn test_just_recorded_key_survives_eviction() {
        let history = ResultHistory::new(4, 1);
        history.record(&finalized("current", 600_000, 1));
        history.record(&finalized("backfill", 60_000, 1));
        assert_eq!(history.key_count(), 1);
        assert_eq!(history.recent("backfill", WindowType::Tumbling1m, 1).len(), 1);
    }
}
