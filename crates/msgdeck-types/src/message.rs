//! Inbound/outbound message payloads exchanged with transport providers.
//!
//! Messages are relayed, never stored: an inbound message becomes a
//! `message_received` lifecycle event and is gone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// WhatsApp JID suffix used by broadcast lists and status updates.
const BROADCAST_JID_SUFFIX: &str = "@broadcast";

/// A message received by a connected account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub chat_id: String,
    pub message_id: String,
    pub sender_id: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    /// Text body or media caption.
    pub text: Option<String>,
    /// What the message carries. Media without a caption still has content.
    #[serde(default)]
    pub kind: MessageKind,
    /// Raw message body as the transport reported it, relayed untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Set by transports that know the message came from a broadcast
    /// channel rather than a user chat.
    #[serde(default)]
    pub is_broadcast: bool,
    pub timestamp: DateTime<Utc>,
}

/// Content carried by an inbound message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Contact,
    Other,
}

impl InboundMessage {
    /// False only for messages with nothing in them: no text, no media and
    /// no raw payload (protocol notices, receipts).
    pub fn has_content(&self) -> bool {
        self.kind != MessageKind::Text
            || self.payload.as_ref().is_some_and(|p| !p.is_null())
            || self.text.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// True for broadcast/status/system traffic that is not addressed to a
    /// specific user chat and must not be surfaced to observers.
    pub fn is_system_traffic(&self) -> bool {
        self.is_broadcast
            || self.chat_id.is_empty()
            || self.chat_id.ends_with(BROADCAST_JID_SUFFIX)
            || !self.has_content()
    }
}

/// Provider acknowledgement of a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Kind of conversation a chat represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

impl Default for ChatKind {
    fn default() -> Self {
        ChatKind::Private
    }
}

/// One entry of an account's recent chat list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: ChatKind,
    #[serde(default)]
    pub unread_count: u32,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}
