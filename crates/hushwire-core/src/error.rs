//! Error types for the hushwire client core.
//!
//! Each layer has its own enum. [`Failure`] is the cross-cutting taxonomy the
//! runtime uses to decide between retrying, reconnecting and logging out.

use hushwire_crypto::CryptoError;
use thiserror::Error;

use crate::message::ChatId;

/// Cross-cutting failure classification.
///
/// - `AuthenticationFailure`: a message cannot be decrypted; shown as a
///   placeholder, never retried
/// - `TransportFailure`: network or server trouble; drives reconnect and resend
/// - `SessionExpired`: credentials rejected; forces logout and panic wipe
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Message failed AEAD verification
    #[error("authentication failure")]
    AuthenticationFailure,

    /// Network or server failure
    #[error("transport failure: {reason}")]
    TransportFailure {
        /// Underlying cause
        reason: String,
    },

    /// Session credentials are no longer accepted
    #[error("session expired")]
    SessionExpired,
}

impl Failure {
    /// Returns true if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportFailure { .. })
    }
}

/// Errors reported by the transport layer to the connection machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Server rejected our credentials (HTTP 401 during upgrade, or no token)
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// Reason given by the server or driver
        reason: String,
    },

    /// Socket could not be established or broke
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Map to the cross-cutting taxonomy.
    pub fn failure(&self) -> Failure {
        match self {
            Self::Unauthorized { .. } => Failure::SessionExpired,
            Self::Transport(reason) => Failure::TransportFailure { reason: reason.clone() },
        }
    }

    /// Returns true if the credentials were rejected.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Errors from submitting a message to the server.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Server answered with a non-success status
    #[error("server rejected message with status {status}")]
    Rejected {
        /// HTTP status code
        status: u16,
    },

    /// Request did not complete
    #[error("send failed: {0}")]
    Transport(String),

    /// Server answered 401
    #[error("unauthorized")]
    Unauthorized,

    /// Message could not be encrypted
    #[error("encryption failed: {0}")]
    Crypto(#[from] CryptoError),

    /// No usable key for the chat
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl DeliveryError {
    /// Map to the cross-cutting taxonomy.
    pub fn failure(&self) -> Failure {
        match self {
            Self::Unauthorized => Failure::SessionExpired,
            Self::Crypto(_) | Self::Session(_) => Failure::AuthenticationFailure,
            Self::Rejected { status } => {
                Failure::TransportFailure { reason: format!("status {status}") }
            },
            Self::Transport(reason) => Failure::TransportFailure { reason: reason.clone() },
        }
    }
}

/// Errors from the session cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The chat's exchanged session lapsed and must be exchanged again
    #[error("session of chat {chat_id} expired, a new key exchange is required")]
    ExchangeRequired {
        /// Locked chat
        chat_id: ChatId,
    },
}

/// Errors from decoding an inbound frame.
///
/// Logged and dropped by the connection machine, never surfaced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame is not valid JSON or does not match the event schema
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Message payload carries no ciphertext
    #[error("message {id} has no ciphertext")]
    MissingCiphertext {
        /// Message id
        id: u64,
    },
}

impl From<serde_json::Error> for FrameError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Errors from key-value persistence.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backing store I/O failed
    #[error("storage I/O failed: {0}")]
    Io(String),

    /// Stored value could not be parsed
    #[error("corrupt stored value for {key}: {reason}")]
    Corrupt {
        /// Storage key
        key: String,
        /// Parse failure
        reason: String,
    },

    /// Stored key material was rejected by the crypto layer
    #[error("stored key rejected: {0}")]
    Crypto(#[from] CryptoError),
}

/// A single failed step of a panic wipe.
///
/// Never escalated: collected into [`crate::WipeReport`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WipeError {
    /// Clearing the key-value store failed
    #[error("failed to clear key-value state: {0}")]
    Storage(#[from] StorageError),

    /// Deleting a cache store failed
    #[error("failed to delete cache {name}: {reason}")]
    Cache {
        /// Cache name
        name: String,
        /// Failure reason
        reason: String,
    },

    /// Deleting a local database failed
    #[error("failed to delete database {name}: {reason}")]
    Database {
        /// Database name
        name: String,
        /// Failure reason
        reason: String,
    },

    /// Revoking an ephemeral handle failed
    #[error("failed to revoke {handle}: {reason}")]
    Handle {
        /// Handle that could not be revoked
        handle: String,
        /// Failure reason
        reason: String,
    },

    /// Navigation and reload both failed
    #[error("failed to leave the session: {0}")]
    Navigation(String),
}
