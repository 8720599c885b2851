//! HTTP binding.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::context::AuthorizerContext;
use crate::observability::ProxyMetrics;
use crate::proxy::{ProxyStream, SigningProxy};
use crate::relay::RUNTIME_SESSION_HEADER;

/// NDJSON media type.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Correlation header returned on every chat response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Request pipeline
    pub proxy: Arc<SigningProxy>,
    /// Metrics registry
    pub metrics: Arc<ProxyMetrics>,
}

/// Builds the service router.
///
/// Layer order (outermost to innermost): HTTP tracing, then the handlers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/api/chat", post(chat_handler))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn chat_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let context = AuthorizerContext::from_headers(&headers);

    let mut response = match state.proxy.handle(&body, context, &request_id).await {
        Ok(stream) => ndjson_response(stream),
        Err(err) => err.into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn ndjson_response(stream: ProxyStream) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(NDJSON_CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&stream.session_id) {
        headers.insert(HeaderName::from_static(RUNTIME_SESSION_HEADER), value);
    }
    (StatusCode::OK, headers, Body::from_stream(stream.frames)).into_response()
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
