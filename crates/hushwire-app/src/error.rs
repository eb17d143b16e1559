//! Error types for the runtime and its drivers.

use std::path::PathBuf;

use hushwire_core::{Failure, StorageError};
use hushwire_crypto::CryptoError;
use thiserror::Error;

/// Errors from REST calls other than sending a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// 401: the session token is no longer accepted
    #[error("unauthorized")]
    Unauthorized,

    /// Any other non-success status
    #[error("server returned status {status}")]
    Status {
        /// HTTP status code
        status: u16,
    },

    /// Non-success status with an explanation from the server
    #[error("{detail} (status {status})")]
    Refused {
        /// HTTP status code
        status: u16,
        /// Server's `detail` field
        detail: String,
    },

    /// Request never completed
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body did not have the expected shape
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Map to the cross-cutting taxonomy.
    pub fn failure(&self) -> Failure {
        match self {
            Self::Unauthorized => Failure::SessionExpired,
            other => Failure::TransportFailure { reason: other.to_string() },
        }
    }
}

/// Fatal runtime errors.
///
/// Everything recoverable is handled inside the event loop; these abort
/// [`crate::Runtime::run`] or fail construction.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration file missing or invalid
    #[error("config {path}: {reason}")]
    Config {
        /// File that failed to load
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// No usable data directory
    #[error("no data directory: {0}")]
    DataDir(String),

    /// Persisted state could not be read or written
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Identity key material was unusable
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A network driver could not be built
    #[error("driver setup failed: {0}")]
    Driver(String),
}
