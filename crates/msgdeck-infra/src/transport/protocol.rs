//! Newline-delimited JSON protocol spoken with a bridge process.
//!
//! msgdeck writes one [`BridgeRequest`] per line to the bridge's stdin and
//! reads one [`BridgeMessage`] per line from its stdout. Every request
//! carries an id that the bridge echoes in exactly one `response`; every
//! other message is an unsolicited connection event.

use serde::{Deserialize, Serialize};

use msgdeck_core::transport::TransportEvent;
use msgdeck_types::error::TransportError;
use msgdeck_types::message::InboundMessage;
use msgdeck_types::session::{AuthMethod, UserInfo};

/// A command for the bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    Connect {
        phone_number: String,
        method: AuthMethod,
        /// Directory where the bridge keeps its auth state.
        session_dir: String,
    },
    Send {
        chat_id: String,
        text: String,
    },
    ListChats {
        limit: usize,
    },
    SubmitCode {
        code: String,
    },
    SubmitPassword {
        password: String,
    },
    Logout,
}

impl BridgeCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeCommand::Connect { .. } => "connect",
            BridgeCommand::Send { .. } => "send",
            BridgeCommand::ListChats { .. } => "list_chats",
            BridgeCommand::SubmitCode { .. } => "submit_code",
            BridgeCommand::SubmitPassword { .. } => "submit_password",
            BridgeCommand::Logout => "logout",
        }
    }
}

/// One request line.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeRequest {
    pub id: u64,
    #[serde(flatten)]
    pub command: BridgeCommand,
}

/// One line read from the bridge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    Qr {
        data: String,
    },
    PairingCode {
        code: String,
    },
    CodeSent {
        #[serde(default)]
        phone_code_hash: String,
    },
    ConnectionOpen {
        #[serde(default)]
        user: Option<UserInfo>,
    },
    ConnectionClose {
        #[serde(default)]
        reason: String,
        #[serde(default)]
        logged_out: bool,
    },
    Message(InboundMessage),
    Response(BridgeResponse),
}

/// Reply to a request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BridgeResponse {
    pub id: u64,
    pub ok: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Machine-readable failure class, e.g. `credential_rejected`.
    #[serde(default)]
    pub code: Option<String>,
}

impl BridgeResponse {
    /// Turn the reply into the request's result value.
    pub fn into_result(self) -> Result<serde_json::Value, TransportError> {
        if self.ok {
            return Ok(self.result.unwrap_or(serde_json::Value::Null));
        }
        let message = self.error.unwrap_or_else(|| "bridge request failed".to_string());
        Err(match self.code.as_deref() {
            Some("credential_rejected") => TransportError::CredentialRejected(message),
            Some("unavailable") => TransportError::Unavailable(message),
            Some("closed") => TransportError::Closed,
            _ => TransportError::Other(message),
        })
    }
}

/// Sign-in reply to `submit_code`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignInReply {
    Complete {
        #[serde(default)]
        user: UserInfo,
    },
    PasswordRequired {
        #[serde(default)]
        hint: Option<String>,
    },
}

/// Parsed bridge line: either a reply to route or an event to forward.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response(BridgeResponse),
    Event(TransportEvent),
}

/// Parse one stdout line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Inbound>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let message: BridgeMessage = serde_json::from_str(line)?;
    let inbound = match message {
        BridgeMessage::Qr { data } => Inbound::Event(TransportEvent::Qr { data }),
        BridgeMessage::PairingCode { code } => Inbound::Event(TransportEvent::PairingCode { code }),
        BridgeMessage::CodeSent { phone_code_hash } => {
            Inbound::Event(TransportEvent::CodeSent { phone_code_hash })
        }
        BridgeMessage::ConnectionOpen { user } => {
            Inbound::Event(TransportEvent::ConnectionOpen { user_info: user })
        }
        BridgeMessage::ConnectionClose { reason, logged_out } => {
            Inbound::Event(TransportEvent::ConnectionClose { reason, logged_out })
        }
        BridgeMessage::Message(message) => Inbound::Event(TransportEvent::MessageReceived(message)),
        BridgeMessage::Response(response) => Inbound::Response(response),
    };
    Ok(Some(inbound))
}

/// Serialize a request as one line, newline included.
pub fn encode_request(request: &BridgeRequest) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    Ok(line)
}
