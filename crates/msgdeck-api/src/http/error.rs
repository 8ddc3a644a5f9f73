//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use msgdeck_types::error::{AccountError, SessionError};

use super::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Session lifecycle errors.
    Session(SessionError),
    /// Account management errors.
    Account(AccountError),
    /// Authentication failure.
    Unauthorized(String),
    /// Validation error.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        AppError::Session(e)
    }
}

impl From<AccountError> for AppError {
    fn from(e: AccountError) -> Self {
        AppError::Account(e)
    }
}

fn classify_session(e: &SessionError) -> (StatusCode, &'static str) {
    match e {
        SessionError::NotConnected => (StatusCode::CONFLICT, "NOT_CONNECTED"),
        SessionError::ProviderUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "PROVIDER_UNAVAILABLE")
        }
        SessionError::CredentialRejected(_) => (StatusCode::UNAUTHORIZED, "CREDENTIAL_REJECTED"),
        SessionError::NoPendingCredential(_) => (StatusCode::CONFLICT, "NO_PENDING_CREDENTIAL"),
        SessionError::InvalidAccountKey(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        SessionError::AccountSuspended => (StatusCode::FORBIDDEN, "ACCOUNT_SUSPENDED"),
        SessionError::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
        SessionError::LogoutFailure(_) | SessionError::Directory(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "SESSION_ERROR")
        }
    }
}

impl AppError {
    /// Status code, machine-readable code, and message for this error.
    pub fn classify(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Session(e) => {
                let (status, code) = classify_session(e);
                (status, code, e.to_string())
            }
            AppError::Account(AccountError::NotFound) => (
                StatusCode::NOT_FOUND,
                "ACCOUNT_NOT_FOUND",
                "Account not found".to_string(),
            ),
            AppError::Account(AccountError::Conflict(msg)) => {
                (StatusCode::CONFLICT, "ACCOUNT_CONFLICT", format!("Account {msg} already exists"))
            }
            AppError::Account(AccountError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Account(AccountError::Session(e)) => {
                let (status, code) = classify_session(e);
                (status, code, e.to_string())
            }
            AppError::Account(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ACCOUNT_ERROR", e.to_string())
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.classify();

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), code, "{message}");
        } else {
            tracing::debug!(status = status.as_u16(), code, "{message}");
        }

        let body = ApiResponse::error(code, &message, uuid::Uuid::now_v7().to_string(), 0);
        (status, Json(body)).into_response()
    }
}
