//! Health check (no auth required).

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub service: &'static str,
    pub status: &'static str,
    pub version: &'static str,
    /// Sessions currently connected.
    pub active_sessions: usize,
}

/// GET /health - Liveness plus the number of connected sessions.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "msgdeck",
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: state.sessions.registry().connected_count(),
    })
}
