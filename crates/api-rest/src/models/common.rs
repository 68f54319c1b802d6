//! Common request/response models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Response data
    pub data: T,
    /// Request ID for tracking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data, request_id: None }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Query parameters for finalized result history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    100
}

impl Default for HistoryParams {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
        }
    }
}

/// Query parameters for range statistics
///
/// `start` and `end` are RFC 3339 timestamps; either may be omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatisticsParams {
    pub content_id: String,
    #[serde(default)]
    pub window_type: Option<String>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

/// Query parameters for a live subscription
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeParams {
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub window_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub active_subscriptions: usize,
}
