//! Helpers shared by the engine integration tests

#![allow(dead_code)]

use playback_types::{AccumulatorStats, AggregationKey, WindowType};
use processor::{LogRecord, ProcessorConfig, StateStore};
use serde_json::json;
use std::collections::BTreeMap;

/// 2024-01-01T00:00:00Z, aligned to minutes and hours
pub const T0: i64 = 1_704_067_200_000;

pub const MINUTE: i64 = 60_000;

/// Lateness 0, no idle advancement, checkpoints only when asked for
pub fn config() -> ProcessorConfig {
    let mut config = ProcessorConfig::default();
    config.watermark.allowed_lateness_ms = 0;
    config.watermark.idle_timeout_ms = None;
    config.checkpoint.every_n_events = 1_000_000;
    config.checkpoint.interval_ms = 3_600_000;
    config.checkpoint.retry_backoff_ms = 1;
    config
}

pub fn config_with(enabled: Vec<WindowType>) -> ProcessorConfig {
    let mut config = config();
    config.windows.enabled = enabled;
    config
}

pub fn payload(content: &str, session: &str, kind: &str, time_ms: i64, position_ms: u64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event_time": time_ms,
        "content_id": content,
        "session_id": session,
        "kind": kind,
        "position_ms": position_ms,
    }))
    .unwrap()
}

pub fn record(
    partition: u32,
    offset: u64,
    content: &str,
    session: &str,
    kind: &str,
    time_ms: i64,
    position_ms: u64,
) -> LogRecord {
    LogRecord::new(partition, offset, payload(content, session, kind, time_ms, position_ms))
}

/// Open accumulators reduced to their statistics
pub fn open_stats(store: &StateStore) -> BTreeMap<AggregationKey, AccumulatorStats> {
    store
        .snapshot()
        .accumulators
        .iter()
        .map(|(key, acc)| (key.clone(), acc.stats()))
        .collect()
}
