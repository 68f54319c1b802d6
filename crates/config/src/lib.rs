//! Configuration management for the playback analytics service
//!
//! Settings come from an optional YAML file, overridden by environment
//! variables prefixed `PLAYBACK_` with `__` between nesting levels, e.g.
//! `PLAYBACK_PROCESSOR__WATERMARK__ALLOWED_LATENESS_MS=60000`.

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use processor::{KafkaLogConfig, ProcessorConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub service: ServiceSettings,

    #[serde(default)]
    pub kafka: KafkaLogConfig,

    /// Engine settings passed into the processor
    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl ServiceConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }

        figment = figment.merge(Env::prefixed("PLAYBACK_").split("__"));

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.port == 0 {
            return Err(ConfigError::ValidationError("Invalid service port".to_string()));
        }
        self.bind_addr()?;
        self.kafka
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        self.processor
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(())
    }

    /// Address the HTTP server listens on
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.service.bind_address, self.service.port)
            .parse()
            .map_err(|e| {
                ConfigError::ValidationError(format!(
                    "invalid bind address {}: {e}",
                    self.service.bind_address
                ))
            })
    }
}

/// HTTP service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub name: String,
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "playback-analytics".to_string(),
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive; `RUST_LOG` wins when set
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.service.port, 8080);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ServiceConfig::default();
        config.service.port = 0;
        assert!(config.validate().is_err());

        config.service.port = 8080;
        config.service.bind_address = "not an address".to_string();
        assert!(config.validate().is_err());

        config.service.bind_address = "127.0.0.1".to_string();
        config.processor.subscriptions.backlog_limit = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_load_yaml_with_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "playback.yaml",
                r#"
service:
  port: 9100
kafka:
  brokers: "kafka-1:9092,kafka-2:9092"
  topic: playback
processor:
  watermark:
    allowed_lateness_ms: 120000
    idle_timeout_ms: null
  windows:
    enabled: [tumbling-1m, sliding-5m]
observability:
  log_format: json
"#,
            )?;
            jail.set_env("PLAYBACK_PROCESSOR__CHECKPOINT__INTERVAL_MS", "2500");
            jail.set_env("PLAYBACK_SERVICE__NAME", "edge-analytics");

            let config = ServiceConfig::load(Some("playback.yaml".into())).map_err(|e| e.to_string())?;
            assert_eq!(config.service.port, 9100);
            assert_eq!(config.service.name, "edge-analytics");
            assert_eq!(config.kafka.topic, "playback");
            assert_eq!(config.kafka.group_id, "playback-analytics");
            assert_eq!(config.processor.watermark.allowed_lateness_ms, 120_000);
            assert_eq!(config.processor.watermark.idle_timeout_ms, None);
            assert_eq!(config.processor.windows.enabled.len(), 2);
            assert_eq!(config.processor.checkpoint.interval_ms, 2_500);
            assert_eq!(config.observability.log_format, LogFormat::Json);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        Jail::expect_with(|jail| {
            jail.create_file("playback.yaml", "processor:\n  ingest:\n    batch_size: 0\n")?;
            let err = ServiceConfig::load(Some("playback.yaml".into())).unwrap_err();
            assert!(matches!(err, ConfigError::ValidationError(_)));
            Ok(())
        });
    }
}
