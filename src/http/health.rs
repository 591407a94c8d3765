//! Liveness and readiness endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::error::WayfarerError;
use crate::store::CoordinationStore;

#[derive(Clone)]
struct HealthState {
    store: Arc<dyn CoordinationStore>,
    timeout: Duration,
}

/// Routes for `GET /healthcheck` and `GET /readiness`.
///
/// Readiness pings the coordination store, bounded by `timeout`.
pub fn health_routes(store: Arc<dyn CoordinationStore>, timeout: Duration) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/readiness", get(readiness))
        .with_state(HealthState { store, timeout })
}

async fn healthcheck() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn readiness(State(state): State<HealthState>) -> impl IntoResponse {
    let failure = match tokio::time::timeout(state.timeout, state.store.ping()).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            error!(error = %e, "Coordination store readiness check failed");
            Some(probe_failure(&e))
        }
        Err(_) => {
            error!(timeout = ?state.timeout, "Coordination store readiness check timed out");
            Some("timeout")
        }
    };

    match failure {
        None => (StatusCode::OK, Json(json!({"status": "ready"}))),
        Some(reason) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unready", "errors": {"redis": reason}})),
        ),
    }
}

fn probe_failure(err: &WayfarerError) -> &'static str {
    match err {
        WayfarerError::StoreTimeout(_) => "timeout",
        WayfarerError::Store(e) if e.is_timeout() => "timeout",
        _ => "unavailable",
    }
}
