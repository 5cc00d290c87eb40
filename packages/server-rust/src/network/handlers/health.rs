//! Health, liveness, and readiness endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Detailed health as JSON.
///
/// Always 200; the `state` field says whether the server is serving,
/// draining or stopped.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.coordinator().stats();

    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "schema_version": state.schema().active_version().map(|v| v.0),
        "open_scopes": state.coordinator().open_scopes(),
        "commits": stats.commits(),
        "rollbacks": stats.rollbacks(),
    }))
}

/// Liveness probe: 200 while the process answers at all.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 when ready, 503 while starting, draining or
/// stopped.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
