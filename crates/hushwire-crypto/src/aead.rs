//! Message encryption using `XChaCha20-Poly1305`
//!
//! All functions are pure - the nonce must be provided by the caller.
//! Production callers draw it from a CSPRNG for every call.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::{CryptoError, KEY_SIZE, NONCE_SIZE};

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Output of [`seal`]: the nonce used and the ciphertext with its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// The 24-byte `XChaCha20` nonce
    pub nonce: [u8; NONCE_SIZE],
    /// The ciphertext including 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

impl Sealed {
    /// Plaintext length (ciphertext length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }
}

/// Encrypt `plaintext` under `key` with `nonce`, binding `aad`.
///
/// # Security
///
/// - The caller MUST never reuse `nonce` under the same key
/// - Associated data is authenticated but not encrypted
pub fn seal(
    key: &[u8; KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: Option<&[u8]>,
) -> Sealed {
    let cipher = XChaCha20Poly1305::new(key.into());
    let payload = Payload { msg: plaintext, aad: aad.unwrap_or_default() };

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), payload) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    Sealed { nonce, ciphertext }
}

/// Decrypt and authenticate.
///
/// # Errors
///
/// - `AuthenticationFailure`: wrong key, modified nonce, ciphertext or `aad`
pub fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let payload = Payload { msg: ciphertext, aad: aad.unwrap_or_default() };

    cipher
        .decrypt(XNonce::from_slice(nonce), payload)
        .map_err(|_| CryptoError::AuthenticationFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_SIZE] = [0x24; KEY_SIZE];

    #[test]
    fn seal_open_roundtrip() {
        let sealed = seal(&KEY, [0xAB; NONCE_SIZE], b"Hello, World!", None);
        let opened = open(&KEY, &sealed.nonce, &sealed.ciphertext, None).unwrap();
        assert_eq!(opened, b"Hello, World!");
    }

    #[test]
    fn empty_plaintext() {
        let sealed = seal(&KEY, [0; NONCE_SIZE], b"", None);
        assert_eq!(sealed.ciphertext.len(), TAG_SIZE);
        assert_eq!(open(&KEY, &sealed.nonce, &sealed.ciphertext, None).unwrap(), b"");
    }

    #[test]
    fn ciphertext_is_plaintext_plus_tag() {
        let sealed = seal(&KEY, [0; NONCE_SIZE], b"test message", None);
        assert_eq!(sealed.ciphertext.len(), b"test message".len() + TAG_SIZE);
        assert_eq!(sealed.plaintext_len(), b"test message".len());
    }

    #[test]
    fn different_nonces_produce_different_ciphertexts() {
        let a = seal(&KEY, [0x00; NONCE_SIZE], b"same", None);
        let b = seal(&KEY, [0xFF; NONCE_SIZE], b"same", None);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(&KEY, [1; NONCE_SIZE], b"secret", None);
        let result = open(&[0x25; KEY_SIZE], &sealed.nonce, &sealed.ciphertext, None);
        assert_eq!(result, Err(CryptoError::AuthenticationFailure));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut sealed = seal(&KEY, [1; NONCE_SIZE], b"original message", None);
        sealed.ciphertext[0] ^= 0xFF;
        assert_eq!(
            open(&KEY, &sealed.nonce, &sealed.ciphertext, None),
            Err(CryptoError::AuthenticationFailure)
        );
    }

    #[test]
    fn tampered_nonce_fails() {
        let mut sealed = seal(&KEY, [1; NONCE_SIZE], b"original message", None);
        sealed.nonce[23] ^= 0x01;
        assert_eq!(
            open(&KEY, &sealed.nonce, &sealed.ciphertext, None),
            Err(CryptoError::AuthenticationFailure)
        );
    }

    #[test]
    fn associated_data_is_bound() {
        let sealed = seal(&KEY, [2; NONCE_SIZE], b"payload", Some(b"chat:42"));

        assert!(open(&KEY, &sealed.nonce, &sealed.ciphertext, Some(b"chat:42")).is_ok());
        assert_eq!(
            open(&KEY, &sealed.nonce, &sealed.ciphertext, Some(b"chat:43")),
            Err(CryptoError::AuthenticationFailure)
        );
        assert_eq!(
            open(&KEY, &sealed.nonce, &sealed.ciphertext, None),
            Err(CryptoError::AuthenticationFailure)
        );
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let sealed = seal(&KEY, [3; NONCE_SIZE], b"payload", None);
        let truncated = &sealed.ciphertext[..TAG_SIZE - 1];
        assert_eq!(
            open(&KEY, &sealed.nonce, truncated, None),
            Err(CryptoError::AuthenticationFailure)
        );
    }
}
