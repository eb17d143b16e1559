//! Slash-command parsing for stdin lines.
//!
//! Anything not starting with `/` is a message for the active chat.

use hushwire_core::{ChatId, MessageType, TempId, UserId};

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineCommand {
    /// `/login <token> <user-id> [expires-at]`
    Login {
        /// Bearer token
        token: String,
        /// Own user id
        user_id: UserId,
        /// Unix seconds when the login ends
        expires_at: Option<u64>,
    },
    /// `/renew <token> [expires-at]`: swap in a fresh token
    Renew {
        /// New bearer token
        token: String,
        /// New expiry, Unix seconds
        expires_at: Option<u64>,
    },
    /// `/logout`
    Logout,
    /// `/chat <id>`
    Open {
        /// Chat to show
        chat_id: ChatId,
    },
    /// `/close`
    Close,
    /// `/image <text>`: send with message type `image`
    Image {
        /// Payload
        content: String,
    },
    /// `/retry <temp-id>`
    Retry {
        /// Failed message
        temp_id: TempId,
    },
    /// `/session <peer-public-key>`: exchange keys for the active chat
    Session {
        /// Peer key, base64
        peer_public_key: String,
    },
    /// `/refresh`
    Refresh,
    /// `/search <query>`
    Search {
        /// Email or name fragment
        query: String,
    },
    /// `/request <user-id> <code>`
    Request {
        /// Peer
        user_id: UserId,
        /// Code the peer must present
        code: String,
    },
    /// `/accept <request-id> <code>`
    Accept {
        /// Pending request
        request_id: u64,
        /// Code the requester must present
        code: String,
    },
    /// `/verify <code>`: keep the active chat alive
    Verify {
        /// The peer's code
        code: String,
    },
    /// `/clear`: delete the active chat's history
    Clear,
    /// `/delete`: vote to delete the active chat
    Delete,
    /// `/wipe`
    Wipe,
    /// `/quit`
    Quit,
    /// Plain text for the active chat
    Message {
        /// Text to send
        content: String,
    },
    /// Unrecognised `/command`
    Unknown {
        /// Raw line
        input: String,
    },
    /// Known command with bad arguments
    InvalidArgs {
        /// Command name
        command: String,
        /// What was wrong
        error: String,
    },
}

impl LineCommand {
    /// Message type for a send, if this is one.
    pub fn message(&self) -> Option<(String, MessageType)> {
        match self {
            Self::Message { content } => Some((content.clone(), MessageType::Text)),
            Self::Image { content } => Some((content.clone(), MessageType::Image)),
            _ => None,
        }
    }
}

/// Parse one line of input.
pub fn parse(line: &str) -> LineCommand {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return LineCommand::Message { content: line.to_string() };
    };

    let mut words = rest.split_whitespace();
    let command = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    match (command, args.as_slice()) {
        ("login", [token, user_id]) => {
            number(command, user_id, "user id")
                .map(|user_id| LineCommand::Login {
                    token: (*token).to_string(),
                    user_id,
                    expires_at: None,
                })
                .unwrap_or_else(|e| e)
        },
        ("login", [token, user_id, expires_at]) => {
            match (number(command, user_id, "user id"), number(command, expires_at, "expiry")) {
                (Ok(user_id), Ok(expires_at)) => LineCommand::Login {
                    token: (*token).to_string(),
                    user_id,
                    expires_at: Some(expires_at),
                },
                (Err(e), _) | (_, Err(e)) => e,
            }
        },
        ("login", _) => invalid(command, "usage: /login <token> <user-id> [expires-at]"),
        ("renew", [token]) => LineCommand::Renew { token: (*token).to_string(), expires_at: None },
        ("renew", [token, expires_at]) => {
            number(command, expires_at, "expiry")
                .map(|expires_at| LineCommand::Renew {
                    token: (*token).to_string(),
                    expires_at: Some(expires_at),
                })
                .unwrap_or_else(|e| e)
        },
        ("renew", _) => invalid(command, "usage: /renew <token> [expires-at]"),
        ("logout", []) => LineCommand::Logout,
        ("chat", [chat_id]) => {
            number(command, chat_id, "chat id")
                .map(|chat_id| LineCommand::Open { chat_id })
                .unwrap_or_else(|e| e)
        },
        ("chat", _) => invalid(command, "usage: /chat <id>"),
        ("close", []) => LineCommand::Close,
        ("image", [_, ..]) => LineCommand::Image { content: args.join(" ") },
        ("image", []) => invalid(command, "usage: /image <content>"),
        ("retry", [temp_id]) => {
            let digits = temp_id.strip_prefix("temp_").unwrap_or(temp_id);
            number(command, digits, "temp id")
                .map(|id| LineCommand::Retry { temp_id: TempId(id) })
                .unwrap_or_else(|e| e)
        },
        ("retry", _) => invalid(command, "usage: /retry <temp-id>"),
        ("session", [key]) => LineCommand::Session { peer_public_key: (*key).to_string() },
        ("session", _) => invalid(command, "usage: /session <peer-public-key>"),
        ("refresh", []) => LineCommand::Refresh,
        ("search", [_, ..]) => LineCommand::Search { query: args.join(" ") },
        ("search", []) => invalid(command, "usage: /search <query>"),
        ("request", [user_id, code]) => {
            number(command, user_id, "user id")
                .map(|user_id| LineCommand::Request { user_id, code: (*code).to_string() })
                .unwrap_or_else(|e| e)
        },
        ("request", _) => invalid(command, "usage: /request <user-id> <code>"),
        ("accept", [request_id, code]) => {
            number(command, request_id, "request id")
                .map(|request_id| LineCommand::Accept { request_id, code: (*code).to_string() })
                .unwrap_or_else(|e| e)
        },
        ("accept", _) => invalid(command, "usage: /accept <request-id> <code>"),
        ("verify", [code]) => LineCommand::Verify { code: (*code).to_string() },
        ("verify", _) => invalid(command, "usage: /verify <code>"),
        ("clear", []) => LineCommand::Clear,
        ("delete", []) => LineCommand::Delete,
        ("wipe", []) => LineCommand::Wipe,
        ("quit" | "q", []) => LineCommand::Quit,
        _ => LineCommand::Unknown { input: line.to_string() },
    }
}

fn number(command: &str, raw: &str, what: &str) -> Result<u64, LineCommand> {
    raw.parse().map_err(|_| invalid(command, &format!("{what} must be a number, got {raw:?}")))
}

fn invalid(command: &str, error: &str) -> LineCommand {
    LineCommand::InvalidArgs { command: command.to_string(), error: error.to_string() }
}
