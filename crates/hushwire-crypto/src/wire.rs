//! Ciphertext wire format.
//!
//! ```text
//! base64( nonce (24 bytes) ‖ ciphertext (plaintext + 16-byte tag) )
//! ```
//!
//! Standard base64 alphabet with padding.

use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::{CryptoError, NONCE_SIZE, Sealed, TAG_SIZE};

/// Encode a sealed message for transmission.
pub fn encode(sealed: &Sealed) -> String {
    let mut combined = Vec::with_capacity(NONCE_SIZE + sealed.ciphertext.len());
    combined.extend_from_slice(&sealed.nonce);
    combined.extend_from_slice(&sealed.ciphertext);
    STANDARD.encode(combined)
}

/// Split a wire string back into nonce and ciphertext.
///
/// # Errors
///
/// - `MalformedWire` if the string is not base64 or too short to hold a nonce
///   and a tag
pub fn decode(wire: &str) -> Result<Sealed, CryptoError> {
    let combined = STANDARD
        .decode(wire.trim())
        .map_err(|e| CryptoError::MalformedWire { reason: format!("invalid base64: {e}") })?;

    if combined.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::MalformedWire {
            reason: format!(
                "payload is {} bytes, need at least {}",
                combined.len(),
                NONCE_SIZE + TAG_SIZE
            ),
        });
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);

    Ok(Sealed { nonce, ciphertext: ciphertext.to_vec() })
}
