//! Messaging handlers for connected accounts.
//!
//! Endpoints:
//! - POST /api/v1/{platform}/message/send          - Send a text message
//! - GET  /api/v1/{platform}/chats/{phone_number}  - Recent chats

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use msgdeck_core::session::controller::DEFAULT_CHAT_LIMIT;
use msgdeck_types::message::{ChatSummary, SendReceipt};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::path::parse_account_key;
use crate::http::extractors::query::ChatListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Upper bound for `?limit=` on the chat list.
const MAX_CHAT_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub phone_number: String,
    pub chat_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatsResponse {
    pub chats: Vec<ChatSummary>,
}

/// POST /api/v1/{platform}/message/send - Send a message from a connected account.
pub async fn send_message(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(platform): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<ApiResponse<SendReceipt>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let key = parse_account_key(&platform, &body.phone_number)?;
    if body.chat_id.trim().is_empty() {
        return Err(AppError::Validation("chat_id must not be empty".to_string()));
    }
    if body.message.is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()));
    }

    let receipt = state
        .sessions
        .send_message(&key, body.chat_id.trim(), &body.message)
        .await?;
    let elapsed = start.elapsed().as_millis() as u64;

    Ok(Json(ApiResponse::success(receipt, request_id, elapsed)))
}

/// GET /api/v1/{platform}/chats/{phone_number}?limit= - Recent chats.
pub async fn list_chats(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path((platform, phone_number)): Path<(String, String)>,
    Query(query): Query<ChatListQuery>,
) -> Result<Json<ApiResponse<ChatsResponse>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let key = parse_account_key(&platform, &phone_number)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_CHAT_LIMIT)
        .clamp(1, MAX_CHAT_LIMIT);

    let chats = state.sessions.list_chats(&key, limit).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    Ok(Json(ApiResponse::success(
        ChatsResponse { chats },
        request_id,
        elapsed,
    )))
}
