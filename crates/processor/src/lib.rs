//! Playback event aggregation engine
//!
//! Consumes a partitioned, at-least-once log of playback events and keeps
//! windowed statistics per content item. Results become visible exactly once
//! per checkpointed state, are fanned out to live subscribers without
//! blocking ingestion, and can be queried while windows are still open.

pub mod aggregation;
pub mod broker;
pub mod config;
pub mod decoder;
pub mod error;
pub mod ingest;
pub mod kafka;
pub mod metrics;
pub mod query;
pub mod state;
pub mod watermark;
pub mod window;

pub use aggregation::{Accumulator, ApplyOutcome, WindowAggregator};
pub use broker::{
    DropReason, PublishReport, Subscription, SubscriptionBroker, SubscriptionFilter,
    SubscriptionId,
};
pub use config::{
    CheckpointConfig, DecoderConfig, IngestConfig, ProcessorConfig, QueryConfig, SubscriptionConfig,
    WatermarkConfig, WindowConfig,
};
pub use decoder::EventDecoder;
pub use error::{
    CheckpointError, DecodeError, ProcessorError, QueryError, Result as ProcessorResult, StateError,
    SubscriptionError, WindowError,
};
pub use ingest::{BatchReport, EventIngestor, LogClient, LogRecord, MemoryLog, MemoryLogClient};
pub use kafka::{KafkaLogClient, KafkaLogConfig};
pub use metrics::{EngineMetrics, MetricsRegistry};
pub use query::{QueryService, ResultHistory};
pub use state::{
    CheckpointManager, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore, PersistedCheckpoint,
    RecoveredCheckpoint, StateSnapshot, StateStore,
};
pub use watermark::{Watermark, WatermarkTracker};
pub use window::{WindowAssigner, WindowBounds, WindowSpec};
