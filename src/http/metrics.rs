//! Prometheus scrape endpoint.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

use crate::metrics::RateLimitMetrics;

/// Header carrying the scrape key.
pub const X_METRICS_API_KEY: &str = "x-metrics-api-key";

#[derive(Clone)]
struct MetricsState {
    metrics: Arc<RateLimitMetrics>,
    api_key: Option<Arc<str>>,
}

/// Route for `GET /metrics`.
///
/// Requests must present `api_key` in `X-Metrics-API-Key`; with no key
/// configured every request is refused.
pub fn metrics_routes(metrics: Arc<RateLimitMetrics>, api_key: Option<String>) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .with_state(MetricsState {
            metrics,
            api_key: api_key.map(Arc::from),
        })
}

async fn scrape(State(state): State<MetricsState>, headers: HeaderMap) -> Response {
    let presented = headers.get(X_METRICS_API_KEY).and_then(|v| v.to_str().ok());
    let authorized = matches!(
        (state.api_key.as_deref(), presented),
        (Some(expected), Some(given)) if expected == given
    );
    if !authorized {
        warn!("Unauthorized metrics access attempt");
        return (StatusCode::FORBIDDEN, Json(json!({"detail": "Forbidden"}))).into_response();
    }

    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
