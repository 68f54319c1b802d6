//! HTTP surface of the playback analytics engine
//!
//! Unary query endpoints are bounded by a request timeout. The live
//! subscription endpoint streams server-sent events for as long as the
//! client stays connected.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use state::ApiState;

use axum::{middleware::from_fn, routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

/// Build the application router
pub fn router(state: ApiState) -> Router {
    let unary = Router::new()
        .route("/v1/windows/:content_id/:window_type", get(handlers::get_window))
        .route("/v1/windows/:content_id/:window_type/history", get(handlers::get_history))
        .route("/v1/statistics", get(handlers::get_statistics))
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        .route_layer(from_fn(middleware::timeout_middleware));

    let streaming = Router::new().route("/v1/subscribe", get(handlers::subscribe));

    unary
        .merge(streaming)
        .layer(from_fn(middleware::logging_middleware))
        .layer(from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, state: ApiState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "HTTP server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
