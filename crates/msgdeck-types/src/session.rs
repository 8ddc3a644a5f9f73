//! Session phase, authentication method, and status read models.
//!
//! A session is the live, in-memory connection of one account to its
//! platform. These types describe it from the outside; the session itself
//! (with its transport handle) lives in `msgdeck-core`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

use crate::account::{AccountKey, AccountStatus};

/// Phase of an account's session state machine.
///
/// ```text
/// idle -> authenticating -> awaiting_credential_scan -> connected
///                                   connected <-> reconnecting
///                           connected -> closing -> idle
/// any non-idle phase -> logged_out
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Authenticating,
    AwaitingCredentialScan,
    Connected,
    Reconnecting,
    Closing,
    LoggedOut,
}

impl SessionPhase {
    /// True while authentication or connection is in progress or active.
    pub fn is_live(&self) -> bool {
        !matches!(self, SessionPhase::Idle | SessionPhase::LoggedOut)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionPhase::Connected)
    }

    /// The account status this phase projects to.
    pub fn account_status(&self) -> AccountStatus {
        match self {
            SessionPhase::Connected => AccountStatus::Active,
            SessionPhase::Authenticating
            | SessionPhase::AwaitingCredentialScan
            | SessionPhase::Reconnecting => AccountStatus::Pending,
            SessionPhase::Idle | SessionPhase::Closing | SessionPhase::LoggedOut => {
                AccountStatus::Inactive
            }
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        match (self, next) {
            (_, LoggedOut) => *self != Idle,
            (Idle | LoggedOut, Authenticating) => true,
            (Authenticating, AwaitingCredentialScan | Connected | Reconnecting) => true,
            (AwaitingCredentialScan, AwaitingCredentialScan | Connected | Reconnecting) => true,
            (Connected, Reconnecting) => true,
            (Reconnecting, Authenticating | AwaitingCredentialScan | Connected | Reconnecting) => {
                true
            }
            (Authenticating | AwaitingCredentialScan | Connected | Reconnecting, Closing) => true,
            (Authenticating | AwaitingCredentialScan | Reconnecting | Closing, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Authenticating => "authenticating",
            SessionPhase::AwaitingCredentialScan => "awaiting_credential_scan",
            SessionPhase::Connected => "connected",
            SessionPhase::Reconnecting => "reconnecting",
            SessionPhase::Closing => "closing",
            SessionPhase::LoggedOut => "logged_out",
        };
        f.write_str(s)
    }
}

/// How the operator proves ownership of the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Scan a QR code from the phone app (WhatsApp).
    Qr,
    /// Enter a pairing code on the phone (WhatsApp).
    Pairing,
    /// Receive a verification code and submit it, optionally followed by a
    /// 2FA password (Telegram).
    PhoneCode,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Qr => write!(f, "qr"),
            AuthMethod::Pairing => write!(f, "pairing"),
            AuthMethod::PhoneCode => write!(f, "phone_code"),
        }
    }
}

impl FromStr for AuthMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qr" => Ok(AuthMethod::Qr),
            "pairing" => Ok(AuthMethod::Pairing),
            "phone_code" | "code" => Ok(AuthMethod::PhoneCode),
            other => Err(format!("invalid auth method: '{other}'")),
        }
    }
}

/// Short-lived credential the operator must act on to finish authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingCredential {
    /// QR payload (typically a `data:image/png;base64,...` URL).
    Qr { data: String },
    /// Code to type into the phone's "link device" screen.
    PairingCode { code: String },
    /// A verification code was sent to the phone; submit it.
    VerificationCode { phone_code_hash: String },
    /// The account has 2FA enabled; submit its password.
    Password { hint: Option<String> },
}

impl PendingCredential {
    pub fn qr(&self) -> Option<&str> {
        match self {
            PendingCredential::Qr { data } => Some(data),
            _ => None,
        }
    }

    pub fn pairing_code(&self) -> Option<&str> {
        match self {
            PendingCredential::PairingCode { code } => Some(code),
            _ => None,
        }
    }
}

/// Profile of the signed-in platform user, as reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: Option<String>,
    pub name: Option<String>,
    pub username: Option<String>,
}

/// Point-in-time view of one account's session, returned by `get_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub account_key: AccountKey,
    pub phase: SessionPhase,
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_credential: Option<PendingCredential>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
}

impl SessionStatus {
    /// Status of a key with no session.
    pub fn idle(account_key: AccountKey) -> Self {
        Self {
            account_key,
            phase: SessionPhase::Idle,
            is_connected: false,
            pending_credential: None,
            user_info: None,
            last_event_at: None,
        }
    }
}

/// Entry of the dashboard session listing.
///
/// Includes keys that have stored credentials on disk but no live session
/// (`has_session_file` without `is_connected`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub account_key: AccountKey,
    pub phase: SessionPhase,
    pub is_connected: bool,
    pub has_credential_pending: bool,
    pub has_session_file: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_credential: Option<PendingCredential>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
}

/// Result of `start_auth`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStart {
    pub phase: SessionPhase,
    /// False when an existing session was returned instead of a new one.
    pub started: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_credential: Option<PendingCredential>,
}

/// Outcome of submitting a verification code or password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub phase: SessionPhase,
    pub requires_password: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
}
