//! Prometheus metrics for the playback engine
//!
//! Counters and gauges follow Prometheus naming conventions; counters get the
//! `_total` suffix from the encoder.

mod engine;
mod registry;

pub use engine::{EngineMetrics, MetricsSnapshot};
pub use registry::{MetricsRegistry, METRICS_REGISTRY};

use thiserror::Error;

/// Errors that can occur in the metrics subsystem
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Metric encoding error: {0}")]
    EncodingError(String),
}

pub type Result<T> = std::result::Result<T, MetricsError>;
