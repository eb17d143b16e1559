//! Driver traits for the runtime's I/O.
//!
//! [`Transport`] opens the server event stream, [`ChatApi`] performs REST
//! calls, [`Platform`] is the local device state the panic wipe destroys. The
//! generic [`crate::Runtime`] owns all orchestration, so the same loop runs
//! against the real network (feature `network`) and against the in-memory
//! drivers used in tests.

use std::{future::Future, sync::Arc};

use hushwire_core::{
    ChatId, ConnectionError, DeliveryError, InboundMessage, MessageType, SendReceipt,
    StorageError, TrackedConnection, UserId, WipePlatform,
};

use crate::{
    error::ApiError,
    state::{ChatRequest, ChatSummary, UserSummary},
};

/// What an open event stream reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Stream established
    Opened,
    /// Text frame from the server
    Frame(String),
    /// Stream-level error; a close follows
    Error(String),
    /// Stream closed
    Closed {
        /// Close code (1006 when the peer vanished without one)
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// Close code used when a stream ends without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Opens event streams.
pub trait Transport: Clone + Send + Sync + 'static {
    /// An open stream.
    type Connection: TransportConnection;

    /// Connect to `url`.
    ///
    /// # Errors
    ///
    /// `ConnectionError::Unauthorized` if the server refused the token during
    /// the handshake, `ConnectionError::Transport` for everything else.
    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Self::Connection, ConnectionError>> + Send;
}

/// One open event stream.
pub trait TransportConnection: Send + 'static {
    /// Next event. `None` once the stream is finished.
    fn next_event(&mut self) -> impl Future<Output = Option<TransportEvent>> + Send;

    /// Close gracefully with `code` and `reason`.
    fn close(&mut self, code: u16, reason: &str) -> impl Future<Output = ()> + Send;

    /// Handle the panic wipe can use to force this stream closed.
    fn closer(&self) -> Arc<dyn TrackedConnection>;
}

/// Authenticated REST API.
pub trait ChatApi: Clone + Send + Sync + 'static {
    /// Submit an encrypted message.
    ///
    /// # Errors
    ///
    /// `DeliveryError::Unauthorized` on 401, `Rejected` on any other
    /// non-success status, `Transport` if no response arrived.
    fn send_message(
        &self,
        token: &str,
        chat_id: ChatId,
        ciphertext: &str,
        message_type: &MessageType,
    ) -> impl Future<Output = Result<SendReceipt, DeliveryError>> + Send;

    /// Chats the user is part of.
    fn active_chats(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Vec<ChatSummary>, ApiError>> + Send;

    /// Chat requests addressed to the user.
    fn pending_requests(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Vec<ChatRequest>, ApiError>> + Send;

    /// Stored history of `chat_id`, oldest first.
    fn messages(
        &self,
        token: &str,
        chat_id: ChatId,
    ) -> impl Future<Output = Result<Vec<InboundMessage>, ApiError>> + Send;

    /// Users whose email or name matches `query`, excluding the caller.
    fn search_users(
        &self,
        token: &str,
        query: &str,
    ) -> impl Future<Output = Result<Vec<UserSummary>, ApiError>> + Send;

    /// Ask `to_user` for a chat, proposing `code`. Returns the request id.
    fn send_chat_request(
        &self,
        token: &str,
        to_user: UserId,
        code: &str,
    ) -> impl Future<Output = Result<u64, ApiError>> + Send;

    /// Accept request `request_id` with our own `code`. Returns the new chat.
    fn accept_chat_request(
        &self,
        token: &str,
        request_id: u64,
        code: &str,
    ) -> impl Future<Output = Result<ChatId, ApiError>> + Send;

    /// Keep `chat_id` alive by presenting the peer's `code`.
    fn verify_chat(
        &self,
        token: &str,
        chat_id: ChatId,
        code: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Delete the stored history of `chat_id` for both participants.
    fn clear_chat(
        &self,
        token: &str,
        chat_id: ChatId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Vote to delete `chat_id`. Deleted once both participants voted.
    ///
    /// Returns the server's description of the outcome.
    fn request_delete_chat(
        &self,
        token: &str,
        chat_id: ChatId,
    ) -> impl Future<Output = Result<String, ApiError>> + Send;
}

/// Local device state.
pub trait Platform: WipePlatform + Send + 'static {
    /// Write `bytes` to a short-lived file named `name`.
    ///
    /// Returns the handle [`WipePlatform::revoke_handle`] removes it by. The
    /// caller registers it for the panic wipe.
    ///
    /// # Errors
    ///
    /// `StorageError::Io` if the file cannot be written.
    fn ephemeral_file(&mut self, name: &str, bytes: &[u8]) -> Result<String, StorageError>;
}
