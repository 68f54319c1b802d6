//! Timeout for unary endpoints
//!
//! Streaming endpoints are deliberately left out; a subscription lives as
//! long as its client.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Duration;

use crate::error::ErrorResponse;

pub const UNARY_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn timeout_middleware(request: Request, next: Next) -> Response {
    match tokio::time::timeout(UNARY_TIMEOUT, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(timeout_ms = UNARY_TIMEOUT.as_millis() as u64, "Request timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(ErrorResponse::new("timeout", "Request timed out")),
            )
                .into_response()
        }
    }
}
