//! X25519 identity keys and shared-secret computation.
//!
//! Public and private halves are persisted as standard base64 strings. The
//! shared secret feeds session derivation; how the public key reaches the peer
//! is out of scope here.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::{CryptoError, KEY_SIZE, SecretBuffer};

/// Long-lived X25519 key pair.
///
/// The secret scalar zeroizes on drop. No `Clone` to keep one owner.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Build a key pair from 32 caller-provided random bytes.
    ///
    /// Clamping is applied internally by `x25519-dalek`.
    pub fn from_secret_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Restore a key pair from its persisted base64 private half.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyLength` if the decoded key is not 32 bytes
    /// - `MalformedWire` if the string is not base64
    pub fn from_base64(private_key: &str) -> Result<Self, CryptoError> {
        let bytes = decode_key(private_key)?;
        Ok(Self::from_secret_bytes(*bytes))
    }

    /// Raw public key bytes.
    pub fn public_key(&self) -> [u8; KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// Public half as base64, the `publicKey` storage entry.
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.public.as_bytes())
    }

    /// Private half as base64, the `privateKey` storage entry.
    pub fn secret_key_base64(&self) -> Zeroizing<String> {
        let bytes = Zeroizing::new(self.secret.to_bytes());
        Zeroizing::new(STANDARD.encode(&bytes[..]))
    }

    /// Compute the shared secret with a peer's base64 public key.
    ///
    /// # Errors
    ///
    /// - `InvalidPublicKey` if the key cannot be decoded or the exchange is
    ///   non-contributory (low-order peer point)
    pub fn diffie_hellman(&self, peer_public: &str) -> Result<SecretBuffer, CryptoError> {
        let peer = decode_public_key(peer_public)?;
        let shared = self.secret.diffie_hellman(&peer);

        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPublicKey {
                reason: "non-contributory key exchange".to_string(),
            });
        }

        Ok(SecretBuffer::from_slice(shared.as_bytes()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key_base64())
            .finish_non_exhaustive()
    }
}

/// Decode a base64 X25519 public key.
///
/// # Errors
///
/// - `InvalidPublicKey` if it is not base64 or not 32 bytes
pub fn decode_public_key(encoded: &str) -> Result<PublicKey, CryptoError> {
    let bytes = decode_key(encoded)
        .map_err(|e| CryptoError::InvalidPublicKey { reason: e.to_string() })?;
    Ok(PublicKey::from(*bytes))
}

fn decode_key(encoded: &str) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let raw = Zeroizing::new(
        STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::MalformedWire { reason: format!("invalid base64: {e}") })?,
    );

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    if raw.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: raw.len() });
    }
    key.copy_from_slice(&raw);
    Ok(key)
}
