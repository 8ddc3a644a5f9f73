//! TransportProvider and TransportSession trait definitions.
//!
//! Implementations live in msgdeck-infra (e.g. `SubprocessTransportProvider`)
//! or in tests. Uses native async fn in traits (RPITIT, Rust 2024 edition).

use tokio::sync::mpsc;

use msgdeck_types::account::{AccountKey, Platform};
use msgdeck_types::error::TransportError;
use msgdeck_types::message::{ChatSummary, InboundMessage, SendReceipt};
use msgdeck_types::session::{AuthMethod, UserInfo};

use super::box_transport::BoxTransportSession;

/// Something that happened on a transport connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A QR payload to show the operator. May repeat as codes rotate.
    Qr { data: String },
    /// A pairing code to type on the phone.
    PairingCode { code: String },
    /// A verification code was sent by the platform.
    CodeSent { phone_code_hash: String },
    /// The account is signed in and the connection is usable.
    ConnectionOpen { user_info: Option<UserInfo> },
    /// The connection closed. `logged_out` means the credentials are no
    /// longer valid (user logout or revocation); anything else is transient.
    ConnectionClose { reason: String, logged_out: bool },
    /// A message arrived.
    MessageReceived(InboundMessage),
}

/// Result of submitting a verification code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    Complete(UserInfo),
    /// The account has 2FA enabled.
    PasswordRequired { hint: Option<String> },
}

/// A freshly opened connection: its command handle plus its event stream.
///
/// When the provider drops the event sender the connection is considered
/// closed.
pub struct TransportConnection {
    pub session: BoxTransportSession,
    pub events: mpsc::Receiver<TransportEvent>,
}

impl std::fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnection").finish_non_exhaustive()
    }
}

/// Per-platform connection factory.
pub trait TransportProvider: Send + Sync {
    fn platform(&self) -> Platform;

    /// Open a new connection for `key`. Authentication progress (QR,
    /// pairing code, verification code) is reported on the event stream.
    fn connect(
        &self,
        key: &AccountKey,
        method: AuthMethod,
    ) -> impl std::future::Future<Output = Result<TransportConnection, TransportError>> + Send;
}

/// Command handle of one open connection.
pub trait TransportSession: Send + Sync {
    fn send(
        &self,
        chat_id: &str,
        text: &str,
    ) -> impl std::future::Future<Output = Result<SendReceipt, TransportError>> + Send;

    fn list_chats(
        &self,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<ChatSummary>, TransportError>> + Send;

    fn submit_code(
        &self,
        code: &str,
    ) -> impl std::future::Future<Output = Result<SignInOutcome, TransportError>> + Send;

    fn submit_password(
        &self,
        password: &str,
    ) -> impl std::future::Future<Output = Result<UserInfo, TransportError>> + Send;

    /// Log out remotely, invalidating the credentials.
    fn logout(&self) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Drop the connection, keeping credentials. Must tolerate repeat calls.
    fn close(&self) -> impl std::future::Future<Output = ()> + Send;
}
