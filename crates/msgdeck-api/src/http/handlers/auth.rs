//! Authentication flow handlers.
//!
//! Endpoints:
//! - POST /api/v1/{platform}/auth/start           - Begin authentication
//! - POST /api/v1/{platform}/auth/verify-code     - Submit the verification code
//! - POST /api/v1/{platform}/auth/verify-password - Submit the 2FA password

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};

use msgdeck_types::account::Platform;
use msgdeck_types::session::{AuthMethod, PendingCredential, SessionPhase, UserInfo};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::extractors::path::parse_account_key;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartAuthRequest {
    pub phone_number: String,
    /// `qr`, `pairing` or `phone_code`. Defaults per platform.
    pub method: Option<AuthMethod>,
}

#[derive(Debug, Serialize)]
pub struct StartAuthResponse {
    pub phase: SessionPhase,
    /// False when a session for the account was already in progress.
    pub started: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    /// The platform sent a verification code to the phone.
    pub code_requested: bool,
}

#[derive(Debug, Deserialize)]
pub struct VerifyCodeRequest {
    pub phone_number: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyPasswordRequest {
    pub phone_number: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct VerificationResponse {
    pub phase: SessionPhase,
    pub requires_password: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
}

fn default_method(platform: Platform) -> AuthMethod {
    match platform {
        Platform::Whatsapp => AuthMethod::Qr,
        Platform::Telegram => AuthMethod::PhoneCode,
    }
}

/// POST /api/v1/{platform}/auth/start - Begin authentication for an account.
pub async fn start_auth(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(platform): Path<String>,
    Json(body): Json<StartAuthRequest>,
) -> Result<Json<ApiResponse<StartAuthResponse>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let key = parse_account_key(&platform, &body.phone_number)?;
    let method = body.method.unwrap_or_else(|| default_method(key.platform));

    let outcome = state.sessions.start_auth(&key, method).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    let credential = outcome.pending_credential.as_ref();
    let data = StartAuthResponse {
        phase: outcome.phase,
        started: outcome.started,
        qr: credential.and_then(|c| c.qr()).map(str::to_string),
        pairing_code: credential.and_then(|c| c.pairing_code()).map(str::to_string),
        code_requested: matches!(
            credential,
            Some(PendingCredential::VerificationCode { .. })
        ),
    };

    let resp = ApiResponse::success(data, request_id, elapsed).with_link(
        "status",
        &format!("/api/v1/{}/account/status/{}", key.platform, key.phone_number),
    );

    Ok(Json(resp))
}

/// POST /api/v1/{platform}/auth/verify-code - Submit the code sent to the phone.
pub async fn verify_code(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(platform): Path<String>,
    Json(body): Json<VerifyCodeRequest>,
) -> Result<Json<ApiResponse<VerificationResponse>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let key = parse_account_key(&platform, &body.phone_number)?;
    let code = body.code.trim();
    if code.is_empty() {
        return Err(AppError::Validation("code must not be empty".to_string()));
    }

    let outcome = state.sessions.submit_verification_code(&key, code).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    Ok(Json(ApiResponse::success(
        VerificationResponse {
            phase: outcome.phase,
            requires_password: outcome.requires_password,
            user_info: outcome.user_info,
        },
        request_id,
        elapsed,
    )))
}

/// POST /api/v1/{platform}/auth/verify-password - Submit the 2FA password.
pub async fn verify_password(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(platform): Path<String>,
    Json(body): Json<VerifyPasswordRequest>,
) -> Result<Json<ApiResponse<VerificationResponse>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let key = parse_account_key(&platform, &body.phone_number)?;
    if body.password.is_empty() {
        return Err(AppError::Validation("password must not be empty".to_string()));
    }

    let outcome = state.sessions.submit_password(&key, &body.password).await?;
    let elapsed = start.elapsed().as_millis() as u64;

    Ok(Json(ApiResponse::success(
        VerificationResponse {
            phase: outcome.phase,
            requires_password: outcome.requires_password,
            user_info: outcome.user_info,
        },
        request_id,
        elapsed,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use msgdeck_types::error::SessionError;

    #[test]
    fn test_default_method_per_platform() {
        assert_eq!(default_method(Platform::Whatsapp), AuthMethod::Qr);
        assert_eq!(default_method(Platform::Telegram), AuthMethod::PhoneCode);
    }

    #[test]
    fn test_start_request_accepts_method_names() {
        let body: StartAuthRequest =
            serde_json::from_str(r#"{"phone_number":"+1 555 0100","method":"pairing"}"#).unwrap();
        assert_eq!(body.method, Some(AuthMethod::Pairing));
        let body: StartAuthRequest = serde_json::from_str(r#"{"phone_number":"15550100"}"#).unwrap();
        assert!(body.method.is_none());
    }

    #[tokio::test]
    async fn test_start_auth_without_bridge_is_unavailable() {
        let (state, _dir) = test_state(Default::default()).await;
        let result = start_auth(
            State(state),
            Authenticated,
            Path("whatsapp".to_string()),
            Json(StartAuthRequest {
                phone_number: "15550100".to_string(),
                method: None,
            }),
        )
        .await;
        assert!(matches!(
            result,
            Err(AppError::Session(SessionError::ProviderUnavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_verify_code_without_session() {
        let (state, _dir) = test_state(Default::default()).await;
        let result = verify_code(
            State(state),
            Authenticated,
            Path("telegram".to_string()),
            Json(VerifyCodeRequest {
                phone_number: "15550100".to_string(),
                code: "12345".to_string(),
            }),
        )
        .await;
        assert!(matches!(
            result,
            Err(AppError::Session(SessionError::NoPendingCredential(_)))
        ));
    }
}
