//! Configuration types for the playback processor
//!
//! Every tunable the engine reads lives here and is passed into the core
//! explicitly. Nothing is read from the environment below this layer.

use crate::error::{ProcessorError, Result};
use crate::window::WindowSpec;
use playback_types::WindowType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main processor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default)]
    pub windows: WindowConfig,

    #[serde(default)]
    pub watermark: WatermarkConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub subscriptions: SubscriptionConfig,

    #[serde(default)]
    pub decoder: DecoderConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub query: QueryConfig,
}

impl ProcessorConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.windows.validate()?;
        self.watermark.validate()?;
        self.checkpoint.validate()?;
        self.subscriptions.validate()?;
        self.decoder.validate()?;
        self.ingest.validate()?;
        self.query.validate()?;
        Ok(())
    }
}

fn config_error(msg: impl Into<String>) -> ProcessorError {
    ProcessorError::Configuration {
        source: msg.into().into(),
    }
}

/// Window sizes and lateness handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window types maintained per content item
    #[serde(default = "default_enabled_windows")]
    pub enabled: Vec<WindowType>,

    /// Size of the short tumbling window
    #[serde(default = "default_tumbling_short_ms")]
    pub tumbling_short_ms: u64,

    /// Size of the long tumbling window
    #[serde(default = "default_tumbling_long_ms")]
    pub tumbling_long_ms: u64,

    /// Size of the sliding window
    #[serde(default = "default_sliding_size_ms")]
    pub sliding_size_ms: u64,

    /// Slide (sampling) interval of the sliding window
    #[serde(default = "default_sliding_slide_ms")]
    pub sliding_slide_ms: u64,

    /// Extra tolerance below the watermark before an event counts as late
    #[serde(default)]
    pub grace_period_ms: u64,

    /// Session cursors this far behind the watermark are discarded
    #[serde(default = "default_session_ttl_ms")]
    pub session_ttl_ms: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_windows(),
            tumbling_short_ms: default_tumbling_short_ms(),
            tumbling_long_ms: default_tumbling_long_ms(),
            sliding_size_ms: default_sliding_size_ms(),
            sliding_slide_ms: default_sliding_slide_ms(),
            grace_period_ms: 0,
            session_ttl_ms: default_session_ttl_ms(),
        }
    }
}

impl WindowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled.is_empty() {
            return Err(config_error("at least one window type must be enabled"));
        }
        for window_type in &self.enabled {
            self.spec(*window_type).validate()?;
        }
        if self.session_ttl_ms == 0 {
            return Err(config_error("session_ttl_ms must be greater than 0"));
        }
        Ok(())
    }

    /// Size and slide for a window type
    pub fn spec(&self, window_type: WindowType) -> WindowSpec {
        match window_type {
            WindowType::Tumbling1m => WindowSpec::tumbling(window_type, self.tumbling_short_ms),
            WindowType::Tumbling1h => WindowSpec::tumbling(window_type, self.tumbling_long_ms),
            WindowType::Sliding5m => {
                WindowSpec::sliding(window_type, self.sliding_size_ms, self.sliding_slide_ms)
            }
        }
    }

    pub fn is_enabled(&self, window_type: WindowType) -> bool {
        self.enabled.contains(&window_type)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Watermark configuration
///
/// Lateness and the idle timeout are independent: lateness bounds how far
/// behind the newest event time a watermark trails, the idle timeout decides
/// when a silent partition stops holding the watermark back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkConfig {
    #[serde(default = "default_allowed_lateness_ms")]
    pub allowed_lateness_ms: u64,

    /// `None` disables idle advancement
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: Option<u64>,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            allowed_lateness_ms: default_allowed_lateness_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl WatermarkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout_ms == Some(0) {
            return Err(config_error(
                "idle_timeout_ms must be greater than 0 (use null to disable)",
            ));
        }
        Ok(())
    }

    pub fn allowed_lateness(&self) -> Duration {
        Duration::from_millis(self.allowed_lateness_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}

/// Checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding checkpoint files
    #[serde(default = "default_checkpoint_dir")]
    pub directory: PathBuf,

    /// Time-based trigger
    #[serde(default = "default_checkpoint_interval_ms")]
    pub interval_ms: u64,

    /// Count-based trigger
    #[serde(default = "default_every_n_events")]
    pub every_n_events: u64,

    /// Attempts per checkpoint before ingestion halts
    #[serde(default = "default_max_persist_retries")]
    pub max_persist_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Checkpoint files kept on disk
    #[serde(default = "default_retention")]
    pub retention: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            directory: default_checkpoint_dir(),
            interval_ms: default_checkpoint_interval_ms(),
            every_n_events: default_every_n_events(),
            max_persist_retries: default_max_persist_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            retention: default_retention(),
        }
    }
}

impl CheckpointConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(config_error("checkpoint interval_ms must be greater than 0"));
        }
        if self.every_n_events == 0 {
            return Err(config_error("checkpoint every_n_events must be greater than 0"));
        }
        if self.max_persist_retries == 0 {
            return Err(config_error("max_persist_retries must be greater than 0"));
        }
        if self.retention == 0 {
            return Err(config_error("checkpoint retention must keep at least one file"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Subscription fan-out configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Undelivered results buffered per subscriber before it is dropped
    #[serde(default = "default_backlog_limit")]
    pub backlog_limit: usize,

    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            backlog_limit: default_backlog_limit(),
            max_subscribers: default_max_subscribers(),
        }
    }
}

impl SubscriptionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backlog_limit == 0 {
            return Err(config_error("backlog_limit must be greater than 0"));
        }
        if self.max_subscribers == 0 {
            return Err(config_error("max_subscribers must be greater than 0"));
        }
        Ok(())
    }
}

/// Record decoding limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Reject events this far ahead of ingest time; `None` disables the check
    #[serde(default = "default_max_future_skew_ms")]
    pub max_future_skew_ms: Option<u64>,

    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_future_skew_ms: default_max_future_skew_ms(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

impl DecoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_bytes == 0 {
            return Err(config_error("max_payload_bytes must be greater than 0"));
        }
        Ok(())
    }
}

/// Polling configuration for the ingestion loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long a poll waits for the first record of a batch
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(config_error("batch_size must be greater than 0"));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Query-side configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Finalized results remembered per content item and window type
    #[serde(default = "default_history_per_key")]
    pub history_per_key: usize,

    /// Content/window pairs kept in history; the stalest pair is evicted first
    #[serde(default = "default_history_max_keys")]
    pub history_max_keys: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            history_per_key: default_history_per_key(),
            history_max_keys: default_history_max_keys(),
        }
    }
}

impl QueryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.history_per_key == 0 {
            return Err(config_error("history_per_key must be greater than 0"));
        }
        if self.history_max_keys == 0 {
            return Err(config_error("history_max_keys must be greater than 0"));
        }
        Ok(())
    }
}

// Default value functions

fn default_enabled_windows() -> Vec<WindowType> {
    WindowType::ALL.to_vec()
}

fn default_tumbling_short_ms() -> u64 {
    60_000
}

fn default_tumbling_long_ms() -> u64 {
    3_600_000
}

fn default_sliding_size_ms() -> u64 {
    300_000
}

fn default_sliding_slide_ms() -> u64 {
    60_000
}

fn default_session_ttl_ms() -> u64 {
    1_800_000
}

fn default_allowed_lateness_ms() -> u64 {
    30_000
}

fn default_idle_timeout_ms() -> Option<u64> {
    Some(60_000)
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("/tmp/playback-checkpoints")
}

fn default_checkpoint_interval_ms() -> u64 {
    10_000
}

fn default_every_n_events() -> u64 {
    10_000
}

fn default_max_persist_retries() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_retention() -> usize {
    5
}

fn default_backlog_limit() -> usize {
    256
}

fn default_max_subscribers() -> usize {
    10_000
}

fn default_max_future_skew_ms() -> Option<u64> {
    Some(300_000)
}

fn default_max_payload_bytes() -> usize {
    64 * 1024
}

fn default_batch_size() -> usize {
    500
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_history_per_key() -> usize {
    64
}

fn default_history_max_keys() -> usize {
    10_000
}
