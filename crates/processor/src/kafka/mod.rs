//! Kafka adapter for the log client seam

mod source;

pub use source::{KafkaLogClient, KafkaLogConfig, PlaybackConsumerContext};
