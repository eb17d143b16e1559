//! Inbound server events.
//!
//! Every frame on the socket is a JSON envelope:
//!
//! ```text
//! { "type": "<kind>", "data": { ... } }
//! ```
//!
//! Unknown kinds decode to `None` so newer servers never break older clients.

use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::FrameError,
    message::{ChatId, Message, MessageId, MessageType, UserId},
};

/// A message as sent by the server, either pushed or loaded from history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Server id
    pub id: u64,
    /// Conversation
    pub chat_id: ChatId,
    /// Author
    pub sender_id: UserId,
    /// Wire ciphertext
    pub ciphertext: String,
    /// Payload kind
    pub message_type: MessageType,
    /// Server timestamp
    pub created_at: Option<String>,
}

impl InboundMessage {
    /// Canonical display-log entry for this message.
    pub fn into_message(self) -> Message {
        Message {
            id: MessageId::Server(self.id),
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            ciphertext: self.ciphertext,
            message_type: self.message_type,
            created_at: self.created_at,
            status: None,
        }
    }
}

/// Wire shape of a message payload. Older servers put the ciphertext under
/// `content` instead of `encrypted_content`.
#[derive(Debug, Deserialize)]
struct RawMessage {
    id: u64,
    chat_id: ChatId,
    sender_id: UserId,
    #[serde(default)]
    encrypted_content: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    message_type: Option<MessageType>,
    #[serde(default)]
    created_at: Option<String>,
}

impl TryFrom<RawMessage> for InboundMessage {
    type Error = FrameError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let Some(ciphertext) = raw.encrypted_content.or(raw.content) else {
            return Err(FrameError::MissingCiphertext { id: raw.id });
        };

        Ok(Self {
            id: raw.id,
            chat_id: raw.chat_id,
            sender_id: raw.sender_id,
            ciphertext,
            message_type: raw.message_type.unwrap_or_default(),
            created_at: raw.created_at,
        })
    }
}

impl<'de> Deserialize<'de> for InboundMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawMessage::deserialize(deserializer)?;
        Self::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// `message` / `new_message`
    NewMessage(InboundMessage),

    /// `chat_request`: someone wants to start a conversation
    ChatRequest,

    /// `chat_accepted`
    ChatAccepted {
        /// Newly created chat, if the server includes it
        chat_id: Option<ChatId>,
    },

    /// `verification_required`: a periodic re-verification is due
    VerificationRequired {
        /// Chat needing verification
        chat_id: ChatId,
        /// Server deadline, if given
        deadline: Option<String>,
    },

    /// `chat_verified`
    ChatVerified {
        /// Verified chat
        chat_id: ChatId,
    },

    /// `chat_destroyed`: the server tore the chat down (e.g. missed
    /// verification)
    ChatDestroyed {
        /// Destroyed chat
        chat_id: ChatId,
        /// Server-provided reason
        reason: Option<String>,
    },

    /// `chat_cleared`: history was erased
    ChatCleared {
        /// Cleared chat
        chat_id: ChatId,
    },

    /// `chat_deleted`: deleted by mutual consent
    ChatDeleted {
        /// Deleted chat
        chat_id: ChatId,
    },

    /// `delete_requested` / `deletion_request`: the peer asked to delete
    DeleteRequested {
        /// Chat in question
        chat_id: ChatId,
        /// Display name of the requester, if known
        requester: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ChatRef {
    chat_id: ChatId,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    deadline: Option<String>,
    #[serde(default)]
    requester_username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OptionalChatRef {
    #[serde(default)]
    chat_id: Option<ChatId>,
}

impl ServerEvent {
    /// Decode one text frame.
    ///
    /// Returns `Ok(None)` for event kinds this client does not know.
    ///
    /// # Errors
    ///
    /// - `FrameError::Malformed` if the frame is not a valid envelope or a
    ///   known kind carries an invalid payload
    /// - `FrameError::MissingCiphertext` for a message without ciphertext
    pub fn parse(text: &str) -> Result<Option<Self>, FrameError> {
        let envelope: Envelope = serde_json::from_str(text)?;

        let event = match envelope.kind.as_str() {
            "message" | "new_message" => {
                let raw: RawMessage = serde_json::from_value(envelope.data)?;
                Self::NewMessage(InboundMessage::try_from(raw)?)
            },
            "chat_request" => Self::ChatRequest,
            "chat_accepted" => {
                let data: OptionalChatRef =
                    serde_json::from_value(envelope.data).unwrap_or_default();
                Self::ChatAccepted { chat_id: data.chat_id }
            },
            "verification_required" => {
                let data: ChatRef = serde_json::from_value(envelope.data)?;
                Self::VerificationRequired { chat_id: data.chat_id, deadline: data.deadline }
            },
            "chat_verified" => {
                let data: ChatRef = serde_json::from_value(envelope.data)?;
                Self::ChatVerified { chat_id: data.chat_id }
            },
            "chat_destroyed" => {
                let data: ChatRef = serde_json::from_value(envelope.data)?;
                Self::ChatDestroyed { chat_id: data.chat_id, reason: data.reason }
            },
            "chat_cleared" => {
                let data: ChatRef = serde_json::from_value(envelope.data)?;
                Self::ChatCleared { chat_id: data.chat_id }
            },
            "chat_deleted" => {
                let data: ChatRef = serde_json::from_value(envelope.data)?;
                Self::ChatDeleted { chat_id: data.chat_id }
            },
            "delete_requested" | "deletion_request" => {
                let data: ChatRef = serde_json::from_value(envelope.data)?;
                Self::DeleteRequested { chat_id: data.chat_id, requester: data.requester_username }
            },
            _ => return Ok(None),
        };

        Ok(Some(event))
    }

    /// Event kind name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "message",
            Self::ChatRequest => "chat_request",
            Self::ChatAccepted { .. } => "chat_accepted",
            Self::VerificationRequired { .. } => "verification_required",
            Self::ChatVerified { .. } => "chat_verified",
            Self::ChatDestroyed { .. } => "chat_destroyed",
            Self::ChatCleared { .. } => "chat_cleared",
            Self::ChatDeleted { .. } => "chat_deleted",
            Self::DeleteRequested { .. } => "delete_requested",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_with_encrypted_content() {
        let frame = r#"{"type":"message","data":{"id":9,"chat_id":42,"sender_id":3,
            "encrypted_content":"AAAA","message_type":"image","created_at":"2024-01-01T00:00:00"}}"#;

        let Some(ServerEvent::NewMessage(msg)) = ServerEvent::parse(frame).unwrap() else {
            panic!("expected message");
        };
        assert_eq!(msg.id, 9);
        assert_eq!(msg.chat_id, 42);
        assert_eq!(msg.ciphertext, "AAAA");
        assert_eq!(msg.message_type, MessageType::Image);
        assert_eq!(msg.created_at.as_deref(), Some("2024-01-01T00:00:00"));
    }

    #[test]
    fn falls_back_to_content_field() {
        let frame =
            r#"{"type":"new_message","data":{"id":1,"chat_id":2,"sender_id":3,"content":"BBBB"}}"#;

        let Some(ServerEvent::NewMessage(msg)) = ServerEvent::parse(frame).unwrap() else {
            panic!("expected message");
        };
        assert_eq!(msg.ciphertext, "BBBB");
        assert_eq!(msg.message_type, MessageType::Text);
    }

    #[test]
    fn message_without_ciphertext_is_rejected() {
        let frame = r#"{"type":"message","data":{"id":1,"chat_id":2,"sender_id":3}}"#;
        assert_eq!(ServerEvent::parse(frame), Err(FrameError::MissingCiphertext { id: 1 }));
    }

    #[test]
    fn unknown_kind_is_ignored() {
        assert_eq!(ServerEvent::parse(r#"{"type":"typing","data":{}}"#), Ok(None));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(ServerEvent::parse("{not json"), Err(FrameError::Malformed(_))));
        assert!(matches!(ServerEvent::parse(r#"{"data":{}}"#), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn parses_destructive_events() {
        let destroyed =
            r#"{"type":"chat_destroyed","data":{"chat_id":5,"reason":"Verification timeout"}}"#;
        assert_eq!(
            ServerEvent::parse(destroyed).unwrap(),
            Some(ServerEvent::ChatDestroyed {
                chat_id: 5,
                reason: Some("Verification timeout".to_string())
            })
        );

        let deleted = r#"{"type":"chat_deleted","data":{"chat_id":5}}"#;
        assert_eq!(
            ServerEvent::parse(deleted).unwrap(),
            Some(ServerEvent::ChatDeleted { chat_id: 5 })
        );
    }

    #[test]
    fn both_deletion_request_spellings() {
        for kind in ["delete_requested", "deletion_request"] {
            let frame = format!(r#"{{"type":"{kind}","data":{{"chat_id":8,"requester_id":2}}}}"#);
            assert_eq!(
                ServerEvent::parse(&frame).unwrap(),
                Some(ServerEvent::DeleteRequested { chat_id: 8, requester: None })
            );
        }
    }

    #[test]
    fn chat_request_needs_no_payload() {
        assert_eq!(
            ServerEvent::parse(r#"{"type":"chat_request"}"#).unwrap(),
            Some(ServerEvent::ChatRequest)
        );
    }

    #[test]
    fn history_entries_deserialize_directly() {
        let entry = r#"{"id":4,"chat_id":1,"sender_id":2,"encrypted_content":"CCCC","email":"x"}"#;
        let msg: InboundMessage = serde_json::from_str(entry).unwrap();
        assert_eq!(msg.into_message().id, MessageId::Server(4));
    }
}
