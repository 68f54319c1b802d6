//! Shared handler state

use processor::{MetricsRegistry, QueryService, SubscriptionBroker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub query: QueryService,
    pub broker: Arc<SubscriptionBroker>,
    pub registry: Arc<MetricsRegistry>,
    ready: Arc<AtomicBool>,
}

impl ApiState {
    pub fn new(query: QueryService, broker: Arc<SubscriptionBroker>, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            query,
            broker,
            registry,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flipped once recovery has finished and ingestion is running
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
