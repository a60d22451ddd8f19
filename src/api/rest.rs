// =============================================================================
// REST API — health, readiness, liveness, metrics
// =============================================================================
//
// The scanner worker has no dashboard or trading surface to authenticate;
// every route here is a standard operational endpoint an orchestrator (or a
// human with curl) hits unauthenticated, same shape as the teacher's public
// `/api/v1/health` route, just without the authenticated trading endpoints
// that have no counterpart in this system.
// =============================================================================

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::ScannerState;

pub fn router(state: Arc<ScannerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/metrics", get(metrics_endpoint))
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<Arc<ScannerState>>) -> impl IntoResponse {
    Json(state.build_health_report())
}

/// Readiness: 200 iff the state store holds at least one symbol. A worker
/// with nothing rehydrated yet (or owning no partitioned symbols) has
/// nothing to scan and should stay out of load balancing.
async fn ready(State(state): State<Arc<ScannerState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, Json(serde_json::json!({ "ready": true })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "ready": false })),
        )
    }
}

/// Liveness: whether the process itself is still running its main loops.
/// Always OK as long as the HTTP server can answer — an orchestrator uses
/// this to decide whether to kill and restart the container.
async fn live() -> impl IntoResponse {
    StatusCode::OK
}

async fn metrics_endpoint(State(state): State<Arc<ScannerState>>) -> impl IntoResponse {
    state.metrics_handle.render()
}
