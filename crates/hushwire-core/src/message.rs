//! Display-layer message types.
//!
//! Local optimistic entries and server-confirmed entries live in the same log.
//! [`MessageId`] keeps the two id spaces apart so a temporary id can never
//! collide with a server id.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Conversation identifier assigned by the server
pub type ChatId = u64;

/// User identifier assigned by the server
pub type UserId = u64;

/// Client-local id of a message that has not been confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(pub u64);

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "temp_{}", self.0)
    }
}

/// Identity of an entry in the display log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Optimistic local entry
    Temp(TempId),
    /// Server-confirmed entry
    Server(u64),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temp(temp) => temp.fmt(f),
            Self::Server(id) => write!(f, "{id}"),
        }
    }
}

/// Payload kind carried alongside the ciphertext.
///
/// Image payloads are data URLs encrypted exactly like text. Unknown kinds are
/// preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// Plain text
    #[default]
    Text,
    /// Image as a data URL
    Image,
    /// Any other kind sent by a newer peer
    Other(String),
}

impl MessageType {
    /// Wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Other(kind) => kind,
        }
    }
}

impl From<String> for MessageType {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "text" | "" => Self::Text,
            "image" => Self::Image,
            _ => Self::Other(kind),
        }
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of a local message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Submit in flight
    Sending,
    /// Confirmed by the server
    Sent,
    /// Last submit failed
    Failed,
}

/// Entry in the display log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Temp or server id
    pub id: MessageId,
    /// Conversation
    pub chat_id: ChatId,
    /// Author
    pub sender_id: UserId,
    /// Wire ciphertext (`base64(nonce ‖ ciphertext)`)
    pub ciphertext: String,
    /// Payload kind
    pub message_type: MessageType,
    /// Server timestamp. `None` until confirmed.
    pub created_at: Option<String>,
    /// Present only on local optimistic entries
    pub status: Option<SendStatus>,
}

/// Message submitted locally that the server has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    /// Local id
    pub temp_id: TempId,
    /// Conversation
    pub chat_id: ChatId,
    /// Plaintext, kept for re-encryption on retry
    pub content: String,
    /// Payload kind
    pub message_type: MessageType,
    /// Wall-clock seconds at creation
    pub created_at: u64,
    /// Current status
    pub status: SendStatus,
    /// Automatic retries used so far (never above the configured maximum)
    pub retry_count: u32,
}

/// Server acknowledgement of a submitted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Server-assigned id
    pub message_id: u64,
    /// Server timestamp
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_ids_render_with_prefix() {
        assert_eq!(TempId(7).to_string(), "temp_7");
        assert_eq!(MessageId::Temp(TempId(7)).to_string(), "temp_7");
        assert_eq!(MessageId::Server(7).to_string(), "7");
    }

    #[test]
    fn temp_and_server_ids_never_collide() {
        assert_ne!(MessageId::Temp(TempId(5)), MessageId::Server(5));
    }

    #[test]
    fn message_type_preserves_unknown_kinds() {
        assert_eq!(MessageType::from("image".to_string()), MessageType::Image);
        assert_eq!(MessageType::from(String::new()), MessageType::Text);

        let voice = MessageType::from("voice".to_string());
        assert_eq!(voice, MessageType::Other("voice".to_string()));
        assert_eq!(String::from(voice), "voice");
    }

    #[test]
    fn message_type_serde_uses_wire_names() {
        let json = serde_json::to_string(&MessageType::Image).unwrap();
        assert_eq!(json, "\"image\"");

        let parsed: MessageType = serde_json::from_str("\"text\"").unwrap();
        assert_eq!(parsed, MessageType::Text);
    }
}
