//! Per-partition event-time watermarks
//!
//! A partition's watermark trails the highest event time seen on it by the
//! configured allowed lateness. Windows finalize once the watermark of every
//! partition that contributed to them has passed the window end, so one slow
//! partition holds back only the windows it fed.
//!
//! A partition that stays silent (wall clock) for longer than the idle
//! timeout stops holding windows back: its watermark is lifted towards
//! `now - allowed_lateness`, capped at the highest watermark among the
//! partitions still producing.
//!
//! ```rust
//! use processor::watermark::WatermarkTracker;
//! use std::time::Duration;
//!
//! let mut tracker = WatermarkTracker::new(Duration::from_secs(10), None);
//! tracker.observe(0, 60_000, 0);
//! assert_eq!(tracker.watermark(0).unwrap().timestamp, 50_000);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

use crate::window::millis_to_datetime;

/// Represents a watermark timestamp
///
/// All events with timestamps below the watermark are assumed to have
/// arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark {
    /// The watermark timestamp in milliseconds since epoch
    pub timestamp: i64,
}

impl Watermark {
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp }
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        millis_to_datetime(self.timestamp)
    }

    /// Whether the window ending at `end` is complete under this watermark
    pub fn has_passed(&self, end: DateTime<Utc>) -> bool {
        self.timestamp >= end.timestamp_millis()
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Watermark({})", self.to_datetime())
    }
}

/// Watermark state of one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionWatermark {
    /// Highest event time observed
    pub max_event_time_ms: i64,
    /// Floor raised by idle advancement
    pub idle_floor_ms: i64,
    /// Wall-clock time of the last observed event
    pub last_activity_ms: i64,
}

impl PartitionWatermark {
    fn watermark(&self, lateness_ms: i64) -> Watermark {
        Watermark::new(
            self.max_event_time_ms
                .saturating_sub(lateness_ms)
                .max(self.idle_floor_ms),
        )
    }
}

/// Tracks watermarks for every partition seen so far
///
/// Partition state is part of the state snapshot; the tuning (lateness and
/// idle timeout) always comes from the current configuration.
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    allowed_lateness_ms: i64,
    idle_timeout_ms: Option<i64>,
    partitions: BTreeMap<u32, PartitionWatermark>,
}

impl WatermarkTracker {
    pub fn new(allowed_lateness: Duration, idle_timeout: Option<Duration>) -> Self {
        Self {
            allowed_lateness_ms: allowed_lateness.as_millis() as i64,
            idle_timeout_ms: idle_timeout.map(|t| t.as_millis() as i64),
            partitions: BTreeMap::new(),
        }
    }

    /// Records an event time for a partition
    ///
    /// `now_ms` is the wall-clock time used for idle detection.
    pub fn observe(&mut self, partition: u32, event_time_ms: i64, now_ms: i64) {
        trace!(
            partition = partition,
            event_time = event_time_ms,
            "Observing event for watermark"
        );
        let state = self
            .partitions
            .entry(partition)
            .or_insert(PartitionWatermark {
                max_event_time_ms: event_time_ms,
                idle_floor_ms: i64::MIN,
                last_activity_ms: now_ms,
            });
        state.max_event_time_ms = state.max_event_time_ms.max(event_time_ms);
        state.last_activity_ms = state.last_activity_ms.max(now_ms);
    }

    /// Watermark of a single partition, `None` if never observed
    pub fn watermark(&self, partition: u32) -> Option<Watermark> {
        self.partitions
            .get(&partition)
            .map(|state| state.watermark(self.allowed_lateness_ms))
    }

    /// Minimum watermark over the given partitions
    ///
    /// `None` when any of them has never been observed or the set is empty.
    pub fn min_watermark<'a, I>(&self, partitions: I) -> Option<Watermark>
    where
        I: IntoIterator<Item = &'a u32>,
    {
        let mut min: Option<Watermark> = None;
        for partition in partitions {
            let wm = self.watermark(*partition)?;
            min = Some(min.map_or(wm, |current| current.min(wm)));
        }
        min
    }

    /// Minimum watermark over every known partition
    pub fn global_watermark(&self) -> Option<Watermark> {
        self.min_watermark(self.partitions.keys())
    }

    /// Highest partition watermark, the upper bound for any finalization
    pub fn max_watermark(&self) -> Option<Watermark> {
        self.partitions
            .values()
            .map(|state| state.watermark(self.allowed_lateness_ms))
            .max()
    }

    fn is_idle(&self, state: &PartitionWatermark, now_ms: i64) -> bool {
        match self.idle_timeout_ms {
            Some(timeout) => now_ms.saturating_sub(state.last_activity_ms) > timeout,
            None => false,
        }
    }

    /// Partitions currently considered idle
    pub fn idle_partitions(&self, now_ms: i64) -> Vec<u32> {
        self.partitions
            .iter()
            .filter(|(_, state)| self.is_idle(state, now_ms))
            .map(|(partition, _)| *partition)
            .collect()
    }

    /// Lifts the watermark of idle partitions
    ///
    /// Returns the partitions whose watermark moved.
    pub fn advance_idle(&mut self, now_ms: i64) -> Vec<u32> {
        if self.idle_timeout_ms.is_none() {
            return Vec::new();
        }

        let lateness = self.allowed_lateness_ms;
        let active_max = self
            .partitions
            .values()
            .filter(|state| !self.is_idle(state, now_ms))
            .map(|state| state.watermark(lateness).timestamp)
            .max();

        let mut target = now_ms.saturating_sub(lateness);
        if let Some(active_max) = active_max {
            target = target.min(active_max);
        }

        let idle = self.idle_partitions(now_ms);
        let mut advanced = Vec::new();
        for partition in idle {
            if let Some(state) = self.partitions.get_mut(&partition) {
                let before = state.watermark(lateness);
                state.idle_floor_ms = state.idle_floor_ms.max(target);
                if state.watermark(lateness) > before {
                    debug!(
                        partition = partition,
                        watermark = state.watermark(lateness).timestamp,
                        "Advanced watermark of idle partition"
                    );
                    advanced.push(partition);
                }
            }
        }
        advanced
    }

    /// Marks every partition active as of `now_ms`
    ///
    /// Used after restore so downtime is not mistaken for idleness.
    pub fn touch_all(&mut self, now_ms: i64) {
        for state in self.partitions.values_mut() {
            state.last_activity_ms = now_ms;
        }
    }

    pub fn partitions(&self) -> &BTreeMap<u32, PartitionWatermark> {
        &self.partitions
    }

    /// Replaces partition state wholesale
    pub fn replace_partitions(&mut self, partitions: BTreeMap<u32, PartitionWatermark>) {
        self.partitions = partitions;
    }

    pub fn allowed_lateness_ms(&self) -> i64 {
        self.allowed_lateness_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(lateness_ms: u64, idle_ms: Option<u64>) -> WatermarkTracker {
        WatermarkTracker::new(
            Duration::from_millis(lateness_ms),
            idle_ms.map(Duration::from_millis),
        )
    }

    #[test]
    fn test_watermark_trails_max_event_time() {
        let mut wm = tracker(5_000, None);
        wm.observe(0, 10_000, 0);
        wm.observe(0, 8_000, 0);
        assert_eq!(wm.watermark(0), Some(Watermark::new(5_000)));
        wm.observe(0, 20_000, 0);
        assert_eq!(wm.watermark(0), Some(Watermark::new(15_000)));
    }

    #[test]
    fn test_watermark_never_regresses() {
        let mut wm = tracker(0, None);
        wm.observe(0, 50_000, 0);
        wm.observe(0, 1_000, 0);
        assert_eq!(wm.watermark(0), Some(Watermark::new(50_000)));
    }

    #[test]
    fn test_min_over_partitions() {
        let mut wm = tracker(0, None);
        wm.observe(0, 100_000, 0);
        wm.observe(1, 40_000, 0);
        assert_eq!(wm.min_watermark(&[0, 1]), Some(Watermark::new(40_000)));
        assert_eq!(wm.min_watermark(&[0]), Some(Watermark::new(100_000)));
        assert_eq!(wm.global_watermark(), Some(Watermark::new(40_000)));
        assert_eq!(wm.max_watermark(), Some(Watermark::new(100_000)));
    }

    #[test]
    fn test_unknown_partition_blocks_min() {
        let mut wm = tracker(0, None);
        wm.observe(0, 100_000, 0);
        assert_eq!(wm.min_watermark(&[0, 7]), None);
        assert_eq!(wm.watermark(7), None);
    }

    #[test]
    fn test_idle_partition_lifted_to_active_max() {
        let mut wm = tracker(1_000, Some(10_000));
        wm.observe(0, 500_000, 0);
        wm.observe(1, 100_000, 0);
        wm.observe(0, 600_000, 10_000_000);

        let advanced = wm.advance_idle(10_000_000);
        assert_eq!(advanced, vec![1]);
        // capped at the active partition, not pushed to wall clock
        assert_eq!(wm.watermark(1), Some(Watermark::new(599_000)));
        assert_eq!(wm.global_watermark(), Some(Watermark::new(599_000)));
    }

    #[test]
    fn test_all_idle_follows_wall_clock() {
        let mut wm = tracker(1_000, Some(10_000));
        wm.observe(0, 5_000, 0);
        let advanced = wm.advance_idle(100_000);
        assert_eq!(advanced, vec![0]);
        assert_eq!(wm.watermark(0), Some(Watermark::new(99_000)));
    }

    #[test]
    fn test_idle_disabled() {
        let mut wm = tracker(1_000, None);
        wm.observe(0, 5_000, 0);
        assert!(wm.advance_idle(i64::MAX / 2).is_empty());
        assert_eq!(wm.watermark(0), Some(Watermark::new(4_000)));
    }

    #[test]
    fn test_touch_all_resets_idleness() {
        let mut wm = tracker(0, Some(10_000));
        wm.observe(0, 5_000, 0);
        assert_eq!(wm.idle_partitions(50_000), vec![0]);
        wm.touch_all(50_000);
        assert!(wm.idle_partitions(50_000).is_empty());
    }
}
