//! Route handlers

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Extension, Json,
};
use futures::{Stream, StreamExt};
use playback_types::{AccumulatorView, PlaybackStatistics, WindowResult, WindowType};
use processor::SubscriptionFilter;
use std::time::Duration;

use crate::error::{ApiError, ApiResult};
use crate::middleware::RequestId;
use crate::models::{
    ApiResponse, HealthResponse, HistoryParams, ReadinessResponse, StatisticsParams, SubscribeParams,
};
use crate::state::ApiState;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

fn parse_window_type(raw: &str) -> ApiResult<WindowType> {
    Ok(raw.parse::<WindowType>()?)
}

fn request_id(id: Option<Extension<RequestId>>) -> Option<String> {
    id.map(|Extension(id)| id.0)
}

/// Current open window for a content item
pub async fn get_window(
    State(state): State<ApiState>,
    Path((content_id, window_type)): Path<(String, String)>,
    id: Option<Extension<RequestId>>,
) -> ApiResult<Json<ApiResponse<AccumulatorView>>> {
    let window_type = parse_window_type(&window_type)?;
    let view = state.query.query(&content_id, window_type)?;
    Ok(Json(ApiResponse::new(view).with_request_id(request_id(id))))
}

/// Finalized results, newest first
pub async fn get_history(
    State(state): State<ApiState>,
    Path((content_id, window_type)): Path<(String, String)>,
    Query(params): Query<HistoryParams>,
    id: Option<Extension<RequestId>>,
) -> ApiResult<Json<ApiResponse<Vec<WindowResult>>>> {
    let window_type = parse_window_type(&window_type)?;
    let results = state.query.recent_results(&content_id, window_type, params.limit);
    Ok(Json(ApiResponse::new(results).with_request_id(request_id(id))))
}

pub async fn get_statistics(
    State(state): State<ApiState>,
    Query(params): Query<StatisticsParams>,
    id: Option<Extension<RequestId>>,
) -> ApiResult<Json<ApiResponse<PlaybackStatistics>>> {
    if params.content_id.is_empty() {
        return Err(ApiError::BadRequest("content_id must not be empty".to_string()));
    }
    if let (Some(start), Some(end)) = (params.start, params.end) {
        if start >= end {
            return Err(ApiError::BadRequest("start must be before end".to_string()));
        }
    }
    let window_type = params.window_type.as_deref().map(parse_window_type).transpose()?;
    let statistics = state
        .query
        .statistics(&params.content_id, window_type, params.start, params.end);
    Ok(Json(ApiResponse::new(statistics).with_request_id(request_id(id))))
}

/// Live finalized results as server-sent events
///
/// The subscription ends when the client goes away or the broker drops it
/// for falling behind.
pub async fn subscribe(
    State(state): State<ApiState>,
    Query(params): Query<SubscribeParams>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let window_type = params.window_type.as_deref().map(parse_window_type).transpose()?;
    let filter = SubscriptionFilter::new(params.content_id, window_type);
    let subscription = state.broker.subscribe(filter)?;
    tracing::info!(subscription = %subscription.id(), "Live subscription opened");

    let stream = subscription
        .into_stream()
        .map(|result| Event::default().event("window_result").json_data(&*result));

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn ready(State(state): State<ApiState>) -> Response {
    let body = ReadinessResponse {
        ready: state.is_ready(),
        active_subscriptions: state.broker.len(),
    };
    let status = if body.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

pub async fn metrics(State(state): State<ApiState>) -> ApiResult<Response> {
    let body = state
        .registry
        .encode()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], body).into_response())
}
