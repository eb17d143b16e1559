//! hushwire Cryptographic Primitives
//!
//! Cryptographic building blocks for hushwire. Pure functions with
//! deterministic outputs. Callers provide random bytes (nonces, master seeds,
//! private keys) so that every operation can be replayed in tests.
//!
//! # Key Lifecycle
//!
//! ```text
//! shared secret / X25519 output        chat_{id}_secret
//!        │                                    │
//!        ▼                                    ▼
//! XOR into master seed                 HMAC-SHA256 (fixed label)
//!        │                                    │
//!        ▼                                    ▼
//! HKDF → root / send / recv keys       per-chat key
//!        │                                    │
//!        └──────────────┬─────────────────────┘
//!                       ▼
//!        XChaCha20-Poly1305 (random 24-byte nonce)
//!                       │
//!                       ▼
//!        base64(nonce ‖ ciphertext) on the wire
//! ```
//!
//! # Security
//!
//! Authenticity:
//! - XChaCha20-Poly1305 AEAD rejects any modified ciphertext, nonce or
//!   associated data with [`CryptoError::AuthenticationFailure`]
//! - No partial plaintext is ever returned
//!
//! Nonce uniqueness:
//! - Nonces are 24 random bytes; the birthday bound for 192 bits is far beyond
//!   any realistic per-key message volume
//!
//! Weaknesses (kept for compatibility):
//! - The per-chat mode derives its key from a public chat identifier. Anyone
//!   able to compute `chat_{id}_secret` (including the server) can decrypt.
//!   The exchange mode ([`KeyPair`]) is the stronger alternative.
//!
//! Memory hygiene:
//! - [`SecretBuffer`] zeroizes on drop and can be wiped in place by its
//!   holder; wiped buffers refuse reads

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod aead;
mod error;
mod exchange;
mod kdf;
mod material;
pub mod wire;

pub use aead::{Sealed, TAG_SIZE, open, seal};
pub use error::CryptoError;
pub use exchange::{KeyPair, decode_public_key};
pub use kdf::{
    RECV_KEY_INDEX, RECV_KEY_LABEL, ROOT_KEY_INDEX, ROOT_KEY_LABEL, SEND_KEY_INDEX,
    SEND_KEY_LABEL, SessionKeys, chat_key, chat_secret, derive_session_keys, derive_subkey,
    mix_master_key,
};
pub use material::{BufferId, KEY_SIZE, NONCE_SIZE, SecretBuffer};
