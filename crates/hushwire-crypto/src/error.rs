//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from key handling, AEAD and wire decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD tag verification failed (wrong key, tampered nonce or ciphertext).
    ///
    /// Non-recoverable for the affected message. Callers show the message as
    /// undecryptable and never attempt a partial decode.
    #[error("authentication failed")]
    AuthenticationFailure,

    /// Key material was read after it had been wiped
    #[error("key material has been wiped")]
    Wiped,

    /// Invalid key material length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },

    /// Wire payload could not be decoded into nonce and ciphertext
    #[error("malformed wire payload: {reason}")]
    MalformedWire {
        /// What was wrong with the payload
        reason: String,
    },

    /// Peer public key is malformed or produced a non-contributory exchange
    #[error("invalid public key: {reason}")]
    InvalidPublicKey {
        /// Why the key was rejected
        reason: String,
    },
}

impl CryptoError {
    /// Returns true if this error means "cannot display message".
    ///
    /// Both tag failures and undecodable wire payloads leave the message
    /// unreadable without affecting the session.
    pub fn is_undecryptable(&self) -> bool {
        matches!(self, Self::AuthenticationFailure | Self::MalformedWire { .. })
    }
}
