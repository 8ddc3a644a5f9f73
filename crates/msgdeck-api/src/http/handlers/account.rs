//! Account management handlers for the REST API.
//!
//! Endpoints:
//! - POST   /api/v1/accounts       - Register an account
//! - GET    /api/v1/accounts       - List accounts (platform/status filters)
//! - GET    /api/v1/accounts/{id}  - Get one account
//! - PUT    /api/v1/accounts/{id}  - Partial update (suspend, keep-alive, notes)
//! - DELETE /api/v1/accounts/{id}  - Disconnect and delete

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};

use msgdeck_core::repository::SortOrder;
use msgdeck_core::repository::account::AccountFilter;
use msgdeck_types::account::{
    Account, AccountId, AccountStatus, CreateAccountRequest, UpdateAccountRequest,
};
use msgdeck_types::error::AccountError;

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::path::parse_platform;
use crate::http::extractors::query::AccountListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

fn parse_account_id(raw: &str) -> Result<AccountId, AppError> {
    raw.parse::<AccountId>()
        .map_err(|_| AppError::Account(AccountError::NotFound))
}

fn account_links(resp: ApiResponse<Account>) -> ApiResponse<Account> {
    let Some(account) = resp.data.as_ref() else {
        return resp;
    };
    let self_link = format!("/api/v1/accounts/{}", account.id);
    let status_link = format!(
        "/api/v1/{}/account/status/{}",
        account.platform, account.phone_number
    );
    resp.with_link("self", &self_link)
        .with_link("status", &status_link)
}

/// POST /api/v1/accounts - Register a new account.
pub async fn create_account(
    State(state): State<AppState>,
    _auth: Authenticated,
    Json(body): Json<CreateAccountRequest>,
) -> Result<Json<ApiResponse<Account>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let account = state.account_service.create_account(body).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    Ok(Json(account_links(ApiResponse::success(
        account, request_id, elapsed,
    ))))
}

/// GET /api/v1/accounts - List accounts with filtering and pagination.
pub async fn list_accounts(
    State(state): State<AppState>,
    _auth: Authenticated,
    Query(query): Query<AccountListQuery>,
) -> Result<Json<ApiResponse<Vec<Account>>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let platform = query.platform.as_deref().map(parse_platform).transpose()?;
    let status = match &query.status {
        Some(s) => Some(s.parse::<AccountStatus>().map_err(AppError::Validation)?),
        None => None,
    };
    let sort_order = match query.order.to_lowercase().as_str() {
        "asc" => SortOrder::Asc,
        _ => SortOrder::Desc,
    };

    let filter = AccountFilter {
        platform,
        status,
        sort_order: Some(sort_order),
        limit: query.limit,
        offset: query.offset,
    };

    let accounts = state.account_service.list_accounts(filter).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    Ok(Json(
        ApiResponse::success(accounts, request_id, elapsed).with_link("self", "/api/v1/accounts"),
    ))
}

/// GET /api/v1/accounts/{id} - Get an account by ID.
pub async fn get_account(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Account>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let id = parse_account_id(&id)?;
    let account = state.account_service.get_account(&id).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    Ok(Json(account_links(ApiResponse::success(
        account, request_id, elapsed,
    ))))
}

/// PUT /api/v1/accounts/{id} - Update an account.
pub async fn update_account(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<String>,
    Json(body): Json<UpdateAccountRequest>,
) -> Result<Json<ApiResponse<Account>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let id = parse_account_id(&id)?;
    let account = state.account_service.update_account(&id, body).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    Ok(Json(account_links(ApiResponse::success(
        account, request_id, elapsed,
    ))))
}

/// DELETE /api/v1/accounts/{id} - Disconnect and delete an account.
pub async fn delete_account(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let id = parse_account_id(&id)?;
    state.account_service.delete_account(&id).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    Ok(Json(ApiResponse::success(
        serde_json::json!({ "deleted": true, "id": id.to_string() }),
        request_id,
        elapsed,
    )))
}
