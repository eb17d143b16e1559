//! Commands into the runtime and events out of it.
//!
//! A front end (the CLI, a GUI, a test) holds a [`ClientHandle`], pushes
//! [`Command`]s and renders the [`ClientEvent`]s that come back.

use hushwire_core::{ChatId, ConnectionState, MessageType, TempId, UserId, WipeReport};
use tokio::sync::mpsc;

use crate::state::{ChatRequest, ChatSummary, DisplayMessage, UserSummary};

/// User intents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start an authenticated session.
    Login {
        /// Bearer token from the auth endpoint
        token: String,
        /// Local user id
        user_id: UserId,
        /// Session expiry, Unix seconds, if the server sent one
        expires_at: Option<u64>,
    },

    /// Swap in a fresh token for the running session.
    ///
    /// Restarts the countdown and reconnects the stream; chat state is kept.
    Renew {
        /// New bearer token
        token: String,
        /// New expiry, Unix seconds
        expires_at: Option<u64>,
    },

    /// End the session. Runs the panic wipe.
    Logout,

    /// Switch the active chat. `None` deselects.
    SelectChat(Option<ChatId>),

    /// Send a message to `chat_id`.
    Send {
        /// Conversation
        chat_id: ChatId,
        /// Plaintext
        text: String,
        /// Payload kind
        message_type: MessageType,
    },

    /// Resend a failed message.
    Resubmit(TempId),

    /// Replace a chat's session with one from an X25519 exchange.
    EstablishSession {
        /// Conversation
        chat_id: ChatId,
        /// Peer public key, base64
        peer_public_key: String,
    },

    /// Refetch the chat and request lists.
    Refresh,

    /// Look up users to start a chat with.
    SearchUsers {
        /// Email or name fragment
        query: String,
    },

    /// Ask another user for a chat.
    RequestChat {
        /// Peer
        user_id: UserId,
        /// Verification code the peer must present
        code: String,
    },

    /// Accept a pending chat request.
    AcceptRequest {
        /// Request to accept
        request_id: u64,
        /// Verification code we expect from the requester
        code: String,
    },

    /// Keep a chat alive with the peer's verification code.
    VerifyChat {
        /// Conversation
        chat_id: ChatId,
        /// The peer's code
        code: String,
    },

    /// Delete a chat's history for both participants.
    ClearChat(ChatId),

    /// Vote to delete a chat.
    DeleteChat(ChatId),

    /// Destroy all local state now.
    Wipe,

    /// Stop the runtime.
    Quit,
}

/// Why a wipe ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipeReason {
    /// User logged out
    Logout,
    /// User asked for it
    Requested,
    /// Session countdown reached zero
    Expired,
    /// Server rejected the token
    SessionRejected,
}

/// Everything a front end needs to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Identity public key, base64. Sent once per login.
    Identity {
        /// Key to publish to peers
        public_key: String,
    },

    /// Event stream state changed.
    Connection(ConnectionState),

    /// Display log of the active chat.
    Log {
        /// Chat the log belongs to
        chat_id: Option<ChatId>,
        /// Entries in arrival order
        messages: Vec<DisplayMessage>,
    },

    /// Something the user should read.
    Notice(String),

    /// Fresh chat list.
    Chats(Vec<ChatSummary>),

    /// Fresh request list.
    Requests(Vec<ChatRequest>),

    /// User search results.
    Users(Vec<UserSummary>),

    /// Session countdown.
    Countdown {
        /// Seconds left
        remaining: u64,
        /// `mm:ss`
        display: String,
    },

    /// An exchanged session replaced the pre-shared one.
    SessionEstablished {
        /// Conversation
        chat_id: ChatId,
    },

    /// Local state was destroyed.
    Wiped {
        /// Trigger
        reason: WipeReason,
        /// Per-step outcome
        report: WipeReport,
    },

    /// A command could not be carried out.
    Error(String),
}

/// Front end side of a running [`crate::Runtime`].
#[derive(Debug)]
pub struct ClientHandle {
    commands: mpsc::Sender<Command>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
}

impl ClientHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        events: mpsc::UnboundedReceiver<ClientEvent>,
    ) -> Self {
        Self { commands, events }
    }

    /// Queue a command. Returns false if the runtime has stopped.
    pub async fn send(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Next event. `None` once the runtime has stopped.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Sender half, for feeding commands from another task.
    pub fn commands(&self) -> mpsc::Sender<Command> {
        self.commands.clone()
    }
}
