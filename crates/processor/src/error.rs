//! Error types for the playback processor
//!
//! Per-record faults (`DecodeError`) are counted and skipped. Systemic faults
//! (`CheckpointError::PersistenceFailure`, `CheckpointError::RestoreCorruption`)
//! halt ingestion. Late events and subscriber overflow are outcomes, not
//! errors, and never show up here.

use playback_types::WindowType;
use thiserror::Error;

/// Main processor error type
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Record decoding errors
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Window-related errors
    #[error("window error: {0}")]
    Window(#[from] WindowError),

    /// State store errors
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Checkpoint persistence and restore errors
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Subscription errors
    #[error("subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    /// Query errors
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Configuration errors
    #[error("configuration error: {source}")]
    Configuration {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Log transport errors
    #[error("kafka error: {source}")]
    Kafka {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Ingestion stopped after a fatal fault
    #[error("ingestion halted: {reason}")]
    Halted { reason: String },

    /// Generic error for unexpected conditions
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ProcessorError {
    /// Whether the error must stop ingestion
    pub fn is_fatal(&self) -> bool {
        match self {
            ProcessorError::Decode(_) => false,
            ProcessorError::Checkpoint(err) => err.is_fatal(),
            ProcessorError::Subscription(_) | ProcessorError::Query(_) => false,
            _ => true,
        }
    }
}

/// Malformed or unusable log records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is not a valid event document
    #[error("invalid payload at partition {partition} offset {offset}: {reason}")]
    InvalidPayload {
        partition: u32,
        offset: u64,
        reason: String,
    },

    /// Payload exceeds the configured limit
    #[error("payload too large: {size} bytes, limit {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// A required identifier is blank
    #[error("required field '{field}' is empty")]
    EmptyField { field: &'static str },

    /// Neither the payload nor the record carries an event time
    #[error("event missing timestamp at partition {partition} offset {offset}")]
    MissingEventTime { partition: u32, offset: u64 },

    /// Event time is implausibly far ahead of ingest time
    #[error("clock skew detected: event time {event_time} is in the future, ahead by {ahead_by}ms")]
    ClockSkew { event_time: i64, ahead_by: i64 },

    /// Event time lies outside the range windows can be built for
    #[error("event time {event_time}ms outside supported range [{min}, {max}]")]
    EventTimeOutOfRange { event_time: i64, min: i64, max: i64 },
}

/// Window assignment and configuration errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// Window size is invalid
    #[error("invalid window size for {window_type}: {size}ms, must be between 1ms and 366 days")]
    InvalidWindowSize { window_type: WindowType, size: u64 },

    /// Slide size is invalid for sliding windows
    #[error("invalid slide size: {slide}ms, must be greater than 0 and less than or equal to window size {window}ms")]
    InvalidSlideSize { slide: u64, window: u64 },
}

/// State store errors
#[derive(Error, Debug)]
pub enum StateError {
    /// State serialization failed
    #[error("state serialization failed: {reason}")]
    SerializationFailed { reason: String },

    /// State deserialization failed
    #[error("state deserialization failed: {reason}")]
    DeserializationFailed { reason: String },
}

/// Checkpoint persistence and restore errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Durable write failed after all retries
    #[error("checkpoint {seq} could not be persisted after {attempts} attempts: {reason}")]
    PersistenceFailure {
        seq: u64,
        attempts: u32,
        reason: String,
    },

    /// The latest checkpoint is unreadable or fails validation
    #[error("checkpoint at {location} is corrupt: {reason}")]
    RestoreCorruption { location: String, reason: String },

    /// Single I/O failure against the checkpoint store
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding a checkpoint failed
    #[error("checkpoint encoding failed: {reason}")]
    Encoding { reason: String },
}

impl CheckpointError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CheckpointError::PersistenceFailure { .. } | CheckpointError::RestoreCorruption { .. }
        )
    }
}

/// Subscription registration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("subscriber limit reached: {max}")]
    LimitReached { max: usize },
}

/// Unary query errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("no open window for content '{content_id}' and window type {window_type}")]
    NotFound {
        content_id: String,
        window_type: WindowType,
    },
}

/// Result type alias for processor operations
pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Result type alias for decoding
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Result type alias for state operations
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Result type alias for checkpoint operations
pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

impl From<bincode::Error> for ProcessorError {
    fn from(err: bincode::Error) -> Self {
        ProcessorError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ProcessorError {
    fn from(err: serde_json::Error) -> Self {
        ProcessorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ProcessorError {
    fn from(err: anyhow::Error) -> Self {
        ProcessorError::Unexpected(err.to_string())
    }
}

impl From<rdkafka::error::KafkaError> for ProcessorError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        ProcessorError::Kafka {
            source: Box::new(err),
        }
    }
}
