//! Decoding of raw log records into playback events
//!
//! Records are JSON documents:
//!
//! ```json
//! {"event_time": "2024-05-01T12:00:00Z", "content_id": "show-42",
//!  "session_id": "s-1", "kind": "play", "position_ms": 0}
//! ```
//!
//! `event_time` may also be epoch milliseconds. When absent the record's log
//! timestamp is used.

use chrono::{DateTime, Utc};
use playback_types::{PlaybackEvent, PlaybackKind};
use serde::Deserialize;

use crate::config::DecoderConfig;
use crate::error::{DecodeError, DecodeResult};
use crate::ingest::LogRecord;
use crate::window::{millis_to_datetime, MAX_EVENT_TIME_MS, MIN_EVENT_TIME_MS};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEventTime {
    Millis(i64),
    Text(DateTime<Utc>),
}

impl RawEventTime {
    fn into_datetime(self) -> DateTime<Utc> {
        match self {
            RawEventTime::Millis(ms) => millis_to_datetime(ms),
            RawEventTime::Text(dt) => dt,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPlaybackEvent {
    #[serde(default, alias = "timestamp")]
    event_time: Option<RawEventTime>,
    #[serde(default)]
    content_id: String,
    #[serde(default)]
    session_id: String,
    #[serde(alias = "type")]
    kind: PlaybackKind,
    #[serde(default)]
    position_ms: u64,
    #[serde(default)]
    partition_key: Option<String>,
}

/// Turns log records into validated [`PlaybackEvent`]s
#[derive(Debug, Clone)]
pub struct EventDecoder {
    config: DecoderConfig,
}

impl EventDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    /// Decode one record
    ///
    /// `ingest_time` is stamped onto the event and anchors the clock-skew
    /// check.
    pub fn decode(&self, record: &LogRecord, ingest_time: DateTime<Utc>) -> DecodeResult<PlaybackEvent> {
        if record.payload.len() > self.config.max_payload_bytes {
            return Err(DecodeError::PayloadTooLarge {
                size: record.payload.len(),
                limit: self.config.max_payload_bytes,
            });
        }

        let raw: RawPlaybackEvent =
            serde_json::from_slice(&record.payload).map_err(|e| DecodeError::InvalidPayload {
                partition: record.partition,
                offset: record.offset,
                reason: e.to_string(),
            })?;

        let content_id = raw.content_id.trim();
        if content_id.is_empty() {
            return Err(DecodeError::EmptyField { field: "content_id" });
        }
        let session_id = raw.session_id.trim();
        if session_id.is_empty() {
            return Err(DecodeError::EmptyField { field: "session_id" });
        }

        let event_time = raw
            .event_time
            .map(RawEventTime::into_datetime)
            .or(record.timestamp)
            .ok_or(DecodeError::MissingEventTime {
                partition: record.partition,
                offset: record.offset,
            })?;

        let event_time_ms = event_time.timestamp_millis();
        if !(MIN_EVENT_TIME_MS..=MAX_EVENT_TIME_MS).contains(&event_time_ms) {
            return Err(DecodeError::EventTimeOutOfRange {
                event_time: event_time_ms,
                min: MIN_EVENT_TIME_MS,
                max: MAX_EVENT_TIME_MS,
            });
        }

        if let Some(max_skew) = self.config.max_future_skew_ms {
            let ahead_by = event_time.timestamp_millis() - ingest_time.timestamp_millis();
            if ahead_by > max_skew as i64 {
                return Err(DecodeError::ClockSkew {
                    event_time: event_time.timestamp_millis(),
                    ahead_by,
                });
            }
        }

        let partition_key = raw
            .partition_key
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| content_id.to_string());

        Ok(PlaybackEvent {
            event_time,
            ingest_time,
            partition_key,
            content_id: content_id.to_string(),
            session_id: session_id.to_string(),
            kind: raw.kind,
            position_ms: raw.position_ms,
            partition: record.partition,
            offset: record.offset,
        })
    }
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}
