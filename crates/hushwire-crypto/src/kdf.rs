//! Key derivation for conversation sessions using HKDF
//!
//! Two derivations exist:
//!
//! - Session keys: the input secret is XOR-mixed into a 32-byte master seed,
//!   then HKDF-SHA256 expands three independent subkeys with distinct labels
//!   and subkey indices.
//! - Per-chat key: HMAC-SHA256 under an application-fixed key over the textual
//!   chat secret. This mirrors the pre-shared-secret convention and is only as
//!   strong as the secrecy of the chat identifier (i.e. not at all).

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::KEY_SIZE;

type HmacSha256 = Hmac<Sha256>;

/// Label for the root key
pub const ROOT_KEY_LABEL: &str = "root-key";

/// Label for the sending key
pub const SEND_KEY_LABEL: &str = "send-key";

/// Label for the receiving key
pub const RECV_KEY_LABEL: &str = "recv-key";

/// Subkey index of the root key
pub const ROOT_KEY_INDEX: u64 = 1;

/// Subkey index of the sending key
pub const SEND_KEY_INDEX: u64 = 2;

/// Subkey index of the receiving key
pub const RECV_KEY_INDEX: u64 = 3;

/// Fixed HMAC key for the per-chat keyed hash
const CHAT_KEY_LABEL: &[u8] = b"hushwire chat key v1";

/// The three subkeys of a conversation session.
///
/// Each key is zeroized when dropped.
pub struct SessionKeys {
    /// Root key (reserved for re-keying)
    pub root: Zeroizing<[u8; KEY_SIZE]>,
    /// Key for outbound messages
    pub send: Zeroizing<[u8; KEY_SIZE]>,
    /// Key for inbound messages
    pub recv: Zeroizing<[u8; KEY_SIZE]>,
}

/// Textual pre-shared secret for a chat: `chat_{id}_secret`.
pub fn chat_secret(chat_id: u64) -> String {
    format!("chat_{chat_id}_secret")
}

/// Derive the per-chat symmetric key from a textual shared secret.
///
/// Deterministic: every participant computing the same secret gets the same
/// key.
pub fn chat_key(shared_secret: &str) -> Zeroizing<[u8; KEY_SIZE]> {
    keyed_hash(shared_secret.as_bytes())
}

/// XOR `secret` into `seed` across the overlapping length.
///
/// Secrets longer than [`KEY_SIZE`] are condensed with the keyed hash first so
/// that no input byte is silently ignored.
pub fn mix_master_key(seed: &[u8; KEY_SIZE], secret: &[u8]) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut master = Zeroizing::new(*seed);

    let condensed;
    let input: &[u8] = if secret.len() > KEY_SIZE {
        condensed = keyed_hash(secret);
        &condensed[..]
    } else {
        secret
    };

    for (m, s) in master.iter_mut().zip(input) {
        *m ^= s;
    }

    master
}

/// Expand one 32-byte subkey from the master key.
///
/// The HKDF info is `label || index` (index little-endian), so both the label
/// and the index separate domains.
pub fn derive_subkey(
    master: &[u8; KEY_SIZE],
    index: u64,
    label: &str,
) -> Zeroizing<[u8; KEY_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(None, master);

    // Capacity: label + 8 (index)
    let mut info = Vec::with_capacity(label.len() + 8);
    info.extend_from_slice(label.as_bytes());
    info.extend_from_slice(&index.to_le_bytes());

    let mut subkey = Zeroizing::new([0u8; KEY_SIZE]);
    let Ok(()) = hkdf.expand(&info, &mut subkey[..]) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    subkey
}

/// Derive root, send and recv keys from a secret and a master seed.
///
/// Same `(secret, seed)` always yields the same keys.
pub fn derive_session_keys(secret: &[u8], seed: &[u8; KEY_SIZE]) -> SessionKeys {
    let master = mix_master_key(seed, secret);

    SessionKeys {
        root: derive_subkey(&master, ROOT_KEY_INDEX, ROOT_KEY_LABEL),
        send: derive_subkey(&master, SEND_KEY_INDEX, SEND_KEY_LABEL),
        recv: derive_subkey(&master, RECV_KEY_INDEX, RECV_KEY_LABEL),
    }
}

fn keyed_hash(input: &[u8]) -> Zeroizing<[u8; KEY_SIZE]> {
    let Ok(mut mac) = HmacSha256::new_from_slice(CHAT_KEY_LABEL) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(input);
    let result = mac.finalize().into_bytes();

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&result);
    key
}
