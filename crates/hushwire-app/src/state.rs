//! Server-side records and the renderable message view.

use hushwire_core::{ChatId, MessageId, MessageType, SendStatus, UserId};
use serde::{Deserialize, Serialize};

/// Public profile of another user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    /// Server user id
    pub id: UserId,
    /// Login email
    #[serde(default)]
    pub email: Option<String>,
    /// Display name
    #[serde(default)]
    pub username: Option<String>,
}

impl UserSummary {
    /// Best available name for display.
    pub fn display_name(&self) -> String {
        self.username
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| format!("user {}", self.id))
    }
}

/// One entry of the active chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    /// Conversation id
    pub id: ChatId,
    /// The peer
    pub other_user: UserSummary,
    /// Creation time as sent by the server
    #[serde(default)]
    pub created_at: Option<String>,
    /// Server expects a verification code soon
    #[serde(default)]
    pub verification_pending: bool,
}

/// A chat request awaiting acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Request id
    pub id: u64,
    /// Who asked
    pub from_user_id: UserId,
    /// Who was asked
    pub to_user_id: UserId,
    /// Server-side status string
    #[serde(default)]
    pub status: Option<String>,
    /// Requester display name
    #[serde(default)]
    pub username: Option<String>,
    /// Requester email
    #[serde(default)]
    pub email: Option<String>,
}

/// A display-log entry after decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    /// Temporary or server id
    pub id: MessageId,
    /// Author
    pub sender_id: UserId,
    /// Plaintext, or the undecryptable placeholder
    pub text: String,
    /// Payload kind
    pub message_type: MessageType,
    /// Server timestamp, absent while unconfirmed
    pub created_at: Option<String>,
    /// Delivery status of local messages
    pub status: Option<SendStatus>,
    /// Sent by the local user
    pub mine: bool,
    /// Ephemeral file holding a decoded image payload
    pub attachment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_list_tolerates_missing_fields() {
        let chat: ChatSummary =
            serde_json::from_str(r#"{"id":4,"other_user":{"id":9,"email":"a@b.c"}}"#).unwrap();

        assert_eq!(chat.id, 4);
        assert!(!chat.verification_pending);
        assert_eq!(chat.other_user.display_name(), "a@b.c");
    }

    #[test]
    fn display_name_fallbacks() {
        let mut user = UserSummary { id: 3, email: None, username: None };
        assert_eq!(user.display_name(), "user 3");
        user.username = Some("kit".into());
        assert_eq!(user.display_name(), "kit");
    }
}
