//! Lifecycle events broadcast to UI observers.
//!
//! `LifecycleEvent` is Clone + Send + Sync for use with tokio broadcast
//! channels. Events are transient: nothing stores them, and a subscriber only
//! sees events published after it subscribed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::AccountKey;
use crate::message::InboundMessage;
use crate::session::UserInfo;

/// Why a session stopped being connected without a logout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The transport dropped (network loss, server restart, stream error).
    Transport { message: String },
    /// Reconnect attempts ran out.
    RetriesExhausted { attempts: u32 },
    /// A QR/pairing/verification credential was never acted on.
    CredentialExpired,
}

/// One state change of one account's session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub account_key: AccountKey,
    #[serde(flatten)]
    pub kind: LifecycleEventKind,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(account_key: AccountKey, kind: LifecycleEventKind) -> Self {
        Self {
            account_key,
            kind,
            timestamp: Utc::now(),
        }
    }
}

/// Payload of a lifecycle event, tagged by `kind` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// A QR code is ready to be scanned.
    QrIssued { qr: String },

    /// A pairing code is ready to be entered on the phone.
    PairingIssued { code: String },

    /// A verification code was sent to the phone.
    CodeRequested,

    /// The session is connected and usable.
    Connected { user_info: Option<UserInfo> },

    /// The session lost its connection.
    Disconnected {
        reason: DisconnectReason,
        will_retry: bool,
        /// Delay before the next attempt, when one is scheduled.
        retry_in_ms: Option<u64>,
    },

    /// The session was logged out and its credentials removed.
    LoggedOut,

    /// A user-chat message arrived.
    MessageReceived { message: InboundMessage },
}

impl LifecycleEventKind {
    /// Short wire name of the kind (matches the serde tag).
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEventKind::QrIssued { .. } => "qr_issued",
            LifecycleEventKind::PairingIssued { .. } => "pairing_issued",
            LifecycleEventKind::CodeRequested => "code_requested",
            LifecycleEventKind::Connected { .. } => "connected",
            LifecycleEventKind::Disconnected { .. } => "disconnected",
            LifecycleEventKind::LoggedOut => "logged_out",
            LifecycleEventKind::MessageReceived { .. } => "message_received",
        }
    }
}
