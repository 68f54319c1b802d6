//! The single owned state store
//!
//! All mutable aggregation state lives in one [`StoreState`] behind a
//! read-write lock: the accumulator arena, session cursors, partition
//! watermarks, closed-window bookkeeping and the last applied offset per
//! partition. An event is applied under one write-lock acquisition, so a
//! snapshot taken under the read lock always pairs accumulator contents with
//! exactly the offsets that produced them.
//!
//! Accumulators are held as `Arc` entries and mutated copy-on-write, which
//! keeps a snapshot down to pointer copies.

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use playback_types::{AggregationKey, WindowType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::aggregation::{Accumulator, SessionCursor};
use crate::config::WatermarkConfig;
use crate::error::{StateError, StateResult};
use crate::watermark::{PartitionWatermark, WatermarkTracker};

/// Finalized windows of one content item and window type
///
/// Windows ending at or before `horizon` are closed; `recent` holds closed
/// window ends above it until every partition has moved past them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedWindows {
    pub horizon: Option<DateTime<Utc>>,
    pub recent: BTreeSet<DateTime<Utc>>,
}

impl ClosedWindows {
    pub fn is_closed(&self, window_end: DateTime<Utc>) -> bool {
        self.horizon.is_some_and(|h| window_end <= h) || self.recent.contains(&window_end)
    }

    fn close(&mut self, window_end: DateTime<Utc>) {
        if !self.is_closed(window_end) {
            self.recent.insert(window_end);
        }
    }

    /// Fold closed ends at or below `threshold` into the horizon
    fn compact(&mut self, threshold: DateTime<Utc>) {
        let keep = self.recent.split_off(&threshold);
        let folded = std::mem::replace(&mut self.recent, keep);
        // split_off keeps `threshold` itself on the right side
        let mut max_folded = folded.into_iter().max();
        if self.recent.remove(&threshold) {
            max_folded = Some(threshold);
        }
        if let Some(end) = max_folded {
            self.horizon = Some(self.horizon.map_or(end, |h| h.max(end)));
        }
    }
}

/// Closed-window record as stored in snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedWindowEntry {
    pub content_id: String,
    pub window_type: WindowType,
    pub closed: ClosedWindows,
}

/// Point-in-time copy of the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub taken_at: DateTime<Utc>,
    pub accumulators: BTreeMap<AggregationKey, Arc<Accumulator>>,
    pub sessions: BTreeMap<String, SessionCursor>,
    pub watermarks: BTreeMap<u32, PartitionWatermark>,
    pub closed: Vec<ClosedWindowEntry>,
    pub applied_offsets: BTreeMap<u32, u64>,
}

impl StateSnapshot {
    pub fn encode(&self) -> StateResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StateError::SerializationFailed {
            reason: e.to_string(),
        })
    }

    pub fn decode(bytes: &[u8]) -> StateResult<Self> {
        bincode::deserialize(bytes).map_err(|e| StateError::DeserializationFailed {
            reason: e.to_string(),
        })
    }

    pub fn accumulator_count(&self) -> usize {
        self.accumulators.len()
    }
}

/// Mutable contents of the store
#[derive(Debug, Clone)]
pub struct StoreState {
    accumulators: BTreeMap<AggregationKey, Arc<Accumulator>>,
    by_end: BTreeSet<(DateTime<Utc>, AggregationKey)>,
    sessions: BTreeMap<String, SessionCursor>,
    watermarks: WatermarkTracker,
    closed: BTreeMap<(String, WindowType), ClosedWindows>,
    applied_offsets: BTreeMap<u32, u64>,
}

impl StoreState {
    fn new(watermarks: WatermarkTracker) -> Self {
        Self {
            accumulators: BTreeMap::new(),
            by_end: BTreeSet::new(),
            sessions: BTreeMap::new(),
            watermarks,
            closed: BTreeMap::new(),
            applied_offsets: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &AggregationKey) -> Option<&Accumulator> {
        self.accumulators.get(key).map(Arc::as_ref)
    }

    /// Accumulator for `key`, created empty if absent
    pub fn get_or_create(&mut self, key: &AggregationKey, window_end: DateTime<Utc>) -> &mut Accumulator {
        if !self.accumulators.contains_key(key) {
            self.by_end.insert((window_end, key.clone()));
        }
        let entry = self
            .accumulators
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Accumulator::new(window_end)));
        Arc::make_mut(entry)
    }

    pub fn remove(&mut self, key: &AggregationKey) -> Option<Accumulator> {
        let acc = self.accumulators.remove(key)?;
        self.by_end.remove(&(acc.window_end(), key.clone()));
        Some(Arc::try_unwrap(acc).unwrap_or_else(|shared| (*shared).clone()))
    }

    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }

    /// Open windows of one content item and type, oldest first
    pub fn open_windows<'a>(
        &'a self,
        content_id: &str,
        window_type: WindowType,
    ) -> impl DoubleEndedIterator<Item = (&'a AggregationKey, &'a Accumulator)> + 'a {
        let lower = AggregationKey::new(content_id, window_type, DateTime::<Utc>::MIN_UTC);
        let upper = AggregationKey::new(content_id, window_type, DateTime::<Utc>::MAX_UTC);
        self.accumulators
            .range(lower..=upper)
            .map(|(key, acc)| (key, acc.as_ref()))
    }

    /// Keys of windows ending at or before `upper`, by end time
    pub fn keys_ending_by(&self, upper: DateTime<Utc>) -> Vec<AggregationKey> {
        self.by_end
            .iter()
            .take_while(|(end, _)| *end <= upper)
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub fn session_mut(&mut self, session_id: &str) -> &mut SessionCursor {
        self.sessions.entry(session_id.to_string()).or_default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop session cursors whose last event is older than `cutoff_ms`
    pub fn expire_sessions(&mut self, cutoff_ms: i64) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, cursor| cursor.last_event_time_ms() >= cutoff_ms);
        before - self.sessions.len()
    }

    pub fn watermarks(&self) -> &WatermarkTracker {
        &self.watermarks
    }

    pub fn watermarks_mut(&mut self) -> &mut WatermarkTracker {
        &mut self.watermarks
    }

    pub fn is_closed(&self, content_id: &str, window_type: WindowType, window_end: DateTime<Utc>) -> bool {
        self.closed
            .get(&(content_id.to_string(), window_type))
            .is_some_and(|closed| closed.is_closed(window_end))
    }

    pub fn close_window(&mut self, key: &AggregationKey, window_end: DateTime<Utc>) {
        self.closed
            .entry((key.content_id.clone(), key.window_type))
            .or_default()
            .close(window_end);
    }

    /// Compact closed-window bookkeeping at or below `threshold`
    pub fn compact_closed(&mut self, threshold: DateTime<Utc>) {
        for closed in self.closed.values_mut() {
            if closed.recent.first().is_some_and(|first| *first <= threshold) {
                closed.compact(threshold);
            }
        }
    }

    pub fn applied_offset(&self, partition: u32) -> Option<u64> {
        self.applied_offsets.get(&partition).copied()
    }

    /// Whether the record at `offset` has already been applied
    pub fn is_applied(&self, partition: u32, offset: u64) -> bool {
        self.applied_offset(partition).is_some_and(|applied| offset <= applied)
    }

    pub fn mark_applied(&mut self, partition: u32, offset: u64) {
        let applied = self.applied_offsets.entry(partition).or_insert(offset);
        *applied = (*applied).max(offset);
    }

    pub fn applied_offsets(&self) -> &BTreeMap<u32, u64> {
        &self.applied_offsets
    }

    fn snapshot(&self, taken_at: DateTime<Utc>) -> StateSnapshot {
        StateSnapshot {
            taken_at,
            accumulators: self.accumulators.clone(),
            sessions: self.sessions.clone(),
            watermarks: self.watermarks.partitions().clone(),
            closed: self
                .closed
                .iter()
                .map(|((content_id, window_type), closed)| ClosedWindowEntry {
                    content_id: content_id.clone(),
                    window_type: *window_type,
                    closed: closed.clone(),
                })
                .collect(),
            applied_offsets: self.applied_offsets.clone(),
        }
    }
}

/// Handle to the store
///
/// Cloning shares the same state.
#[derive(Debug, Clone)]
pub struct StateStore {
    inner: Arc<RwLock<StoreState>>,
}

impl StateStore {
    pub fn new(watermark: &WatermarkConfig) -> Self {
        let tracker = WatermarkTracker::new(watermark.allowed_lateness(), watermark.idle_timeout());
        Self {
            inner: Arc::new(RwLock::new(StoreState::new(tracker))),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.inner.write()
    }

    /// Consistent copy of the whole store
    pub fn snapshot(&self) -> StateSnapshot {
        let taken_at = Utc::now();
        self.inner.read().snapshot(taken_at)
    }

    /// Replace the store contents with `snapshot`
    ///
    /// Nothing of the current contents survives. Partition activity clocks are
    /// reset to now so downtime does not count as idleness.
    pub fn restore(&self, snapshot: StateSnapshot) {
        let now_ms = Utc::now().timestamp_millis();
        let mut state = self.inner.write();

        state.by_end = snapshot
            .accumulators
            .iter()
            .map(|(key, acc)| (acc.window_end(), key.clone()))
            .collect();
        state.accumulators = snapshot.accumulators;
        state.sessions = snapshot.sessions;
        state.watermarks.replace_partitions(snapshot.watermarks);
        state.watermarks.touch_all(now_ms);
        state.closed = snapshot
            .closed
            .into_iter()
            .map(|entry| ((entry.content_id, entry.window_type), entry.closed))
            .collect();
        state.applied_offsets = snapshot.applied_offsets;

        debug!(
            accumulators = state.accumulators.len(),
            sessions = state.sessions.len(),
            partitions = state.applied_offsets.len(),
            "Restored state store"
        );
    }

    pub fn applied_offsets(&self) -> BTreeMap<u32, u64> {
        self.inner.read().applied_offsets.clone()
    }

    pub fn open_accumulators(&self) -> usize {
        self.inner.read().len()
    }
}
