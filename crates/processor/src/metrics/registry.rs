//! Metrics registry for Prometheus metrics

use parking_lot::RwLock;
use prometheus_client::registry::Registry;
use std::sync::{Arc, OnceLock};

/// Process-wide registry used by the binary
pub static METRICS_REGISTRY: OnceLock<Arc<MetricsRegistry>> = OnceLock::new();

/// Thread-safe registry for Prometheus metrics
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    registry: Arc<RwLock<Registry>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the global metrics registry, initializing it if necessary
    pub fn global() -> Arc<MetricsRegistry> {
        METRICS_REGISTRY
            .get_or_init(|| Arc::new(MetricsRegistry::new()))
            .clone()
    }

    pub fn registry(&self) -> Arc<RwLock<Registry>> {
        self.registry.clone()
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> Result<String, super::MetricsError> {
        let registry = self.registry.read();
        let mut buffer = String::new();

        prometheus_client::encoding::text::encode(&mut buffer, &registry)
            .map_err(|e| super::MetricsError::EncodingError(e.to_string()))?;

        Ok(buffer)
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}
