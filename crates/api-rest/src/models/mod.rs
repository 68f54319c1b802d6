//! Request and response models

pub mod common;

pub use common::{ApiResponse, HealthResponse, HistoryParams, ReadinessResponse, StatisticsParams, SubscribeParams};
