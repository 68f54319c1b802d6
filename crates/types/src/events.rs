//! Playback event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::TypesError;

/// What happened in a playback session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackKind {
    Play,
    Pause,
    Seek,
    Buffer,
    Complete,
    Error,
}

impl PlaybackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackKind::Play => "play",
            PlaybackKind::Pause => "pause",
            PlaybackKind::Seek => "seek",
            PlaybackKind::Buffer => "buffer",
            PlaybackKind::Complete => "complete",
            PlaybackKind::Error => "error",
        }
    }
}

impl fmt::Display for PlaybackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaybackKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "play" => Ok(PlaybackKind::Play),
            "pause" => Ok(PlaybackKind::Pause),
            "seek" => Ok(PlaybackKind::Seek),
            "buffer" => Ok(PlaybackKind::Buffer),
            "complete" => Ok(PlaybackKind::Complete),
            "error" => Ok(PlaybackKind::Error),
            other => Err(TypesError::UnknownPlaybackKind(other.to_string())),
        }
    }
}

/// A decoded playback event
///
/// Immutable once decoded. `partition` and `offset` identify the log record
/// the event came from and drive replay suppression after recovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackEvent {
    /// When the event happened on the client
    pub event_time: DateTime<Utc>,
    /// When the engine decoded the event
    pub ingest_time: DateTime<Utc>,
    /// Routing key used by the producer (defaults to the content id)
    pub partition_key: String,
    pub content_id: String,
    pub session_id: String,
    pub kind: PlaybackKind,
    /// Playhead position within the content
    pub position_ms: u64,
    /// Log partition the record was read from
    pub partition: u32,
    /// Offset of the record within its partition
    pub offset: u64,
}

impl PlaybackEvent {
    /// Event time in milliseconds since epoch
    pub fn event_time_ms(&self) -> i64 {
        self.event_time.timestamp_millis()
    }
}
