//! Session status and teardown handlers.
//!
//! Endpoints:
//! - GET  /api/v1/{platform}/account/status/{phone_number}     - Current session phase
//! - POST /api/v1/{platform}/account/disconnect/{phone_number} - Log out and tear down
//! - GET  /api/v1/{platform}/accounts/active                   - Sessions of one platform

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use serde::Serialize;

use msgdeck_types::session::{SessionPhase, SessionSummary, UserInfo};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::path::{parse_account_key, parse_platform};
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub phase: SessionPhase,
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
    /// Stored transport credentials exist, so the account can reconnect
    /// without scanning again.
    pub has_session_file: bool,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct ActiveSessionsResponse {
    pub sessions: Vec<SessionSummary>,
    pub total: usize,
}

/// GET /api/v1/{platform}/account/status/{phone_number} - Session status.
pub async fn get_status(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path((platform, phone_number)): Path<(String, String)>,
) -> Result<Json<ApiResponse<StatusResponse>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let key = parse_account_key(&platform, &phone_number)?;
    let status = state.sessions.get_status(&key);
    let has_session_file = state.sessions.has_stored_credentials(&key).await;
    let elapsed = start.elapsed().as_millis() as u64;

    let credential = status.pending_credential.as_ref();
    let data = StatusResponse {
        phase: status.phase,
        is_connected: status.is_connected,
        qr: credential.and_then(|c| c.qr()).map(str::to_string),
        pairing_code: credential.and_then(|c| c.pairing_code()).map(str::to_string),
        user_info: status.user_info,
        last_event_at: status.last_event_at,
        has_session_file,
    };

    Ok(Json(ApiResponse::success(data, request_id, elapsed)))
}

/// POST /api/v1/{platform}/account/disconnect/{phone_number} - Log out.
///
/// Idempotent: disconnecting an account without a session still clears its
/// stored credentials and succeeds.
pub async fn disconnect(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path((platform, phone_number)): Path<(String, String)>,
) -> Result<Json<ApiResponse<DisconnectResponse>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let key = parse_account_key(&platform, &phone_number)?;
    state.sessions.disconnect(&key).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    Ok(Json(ApiResponse::success(
        DisconnectResponse { success: true },
        request_id,
        elapsed,
    )))
}

/// GET /api/v1/{platform}/accounts/active - Live sessions and accounts with
/// stored credentials on one platform.
pub async fn list_active(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(platform): Path<String>,
) -> Result<Json<ApiResponse<ActiveSessionsResponse>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let platform = parse_platform(&platform)?;
    let sessions = state.sessions.list_sessions(Some(platform)).await;
    let elapsed = start.elapsed().as_millis() as u64;

    let total = sessions.len();
    Ok(Json(ApiResponse::success(
        ActiveSessionsResponse { sessions, total },
        request_id,
        elapsed,
    )))
}
