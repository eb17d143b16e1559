//! Per-conversation key material.
//!
//! [`SessionCrypto`] derives keys and encrypts; every buffer it hands out is
//! registered with the [`WipeRegistry`] first. [`SessionStore`] caches one
//! [`Session`] per conversation with a time-to-live.
//!
//! # Key sources
//!
//! - Pre-shared convention: the secret is the textual `chat_{id}_secret`. Any
//!   party knowing the chat id derives the same keys. Weak, kept for wire
//!   compatibility.
//! - Exchange: the secret is an X25519 shared secret. Established explicitly
//!   with [`SessionStore::establish`].
//!
//! A session is only ever renewed from the source it was made from. Once an
//! exchanged session lapses the chat stays locked until the next exchange.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use hushwire_crypto::{
    CryptoError, KEY_SIZE, KeyPair, NONCE_SIZE, Sealed, SecretBuffer, chat_key, chat_secret,
    derive_session_keys, open, seal, wire,
};

use crate::{env::Environment, error::SessionError, message::ChatId, wipe::WipeRegistry};

/// Default lifetime of a cached session
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Master seed of deterministic derivation
const FIXED_SEED: [u8; KEY_SIZE] = [0u8; KEY_SIZE];

/// Where a session's secret came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// The public `chat_{id}_secret` convention
    PreShared,
    /// An X25519 exchange with the peer
    Exchanged,
}

/// Key material of one conversation.
#[derive(Debug, Clone)]
pub struct Session {
    /// Conversation the keys belong to
    pub conversation_id: ChatId,
    /// Origin of the secret the keys were derived from
    pub source: KeySource,
    /// Root key (reserved for re-keying)
    pub root_key: SecretBuffer,
    /// Outbound key
    pub send_key: SecretBuffer,
    /// Inbound key
    pub recv_key: SecretBuffer,
    /// Key for wire payloads of this conversation
    pub message_key: SecretBuffer,
    /// Creation time, Unix seconds
    pub created_at: u64,
    /// Expiry time, Unix seconds
    pub expires_at: u64,
}

impl Session {
    /// True once `now` has reached `expires_at`.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// True if any key of this session has been wiped.
    pub fn is_wiped(&self) -> bool {
        self.buffers().iter().any(|b| b.is_wiped())
    }

    fn buffers(&self) -> [&SecretBuffer; 4] {
        [&self.root_key, &self.send_key, &self.recv_key, &self.message_key]
    }
}

/// A nonce and ciphertext, both tracked for wipe.
#[derive(Debug, Clone)]
pub struct Ciphertext {
    /// 24-byte nonce
    pub nonce: SecretBuffer,
    /// Ciphertext with tag
    pub ciphertext: SecretBuffer,
}

impl Ciphertext {
    /// Encode as `base64(nonce ‖ ciphertext)`.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Wiped` if either buffer has been wiped
    pub fn to_wire(&self) -> Result<String, CryptoError> {
        let nonce = nonce_array(&self.nonce)?;
        let ciphertext = self.ciphertext.to_vec()?;
        Ok(wire::encode(&Sealed { nonce, ciphertext }))
    }
}

/// Derivation and encryption service.
///
/// Stateless apart from the injected environment and registry.
#[derive(Debug, Clone)]
pub struct SessionCrypto<E> {
    env: E,
    registry: WipeRegistry,
}

impl<E: Environment> SessionCrypto<E> {
    /// Create a service drawing randomness from `env`, registering buffers in
    /// `registry`.
    pub fn new(env: E, registry: WipeRegistry) -> Self {
        Self { env, registry }
    }

    /// The registry buffers are tracked in.
    pub fn registry(&self) -> &WipeRegistry {
        &self.registry
    }

    /// Current wall-clock time from the environment, Unix seconds.
    pub fn wall_clock_secs(&self) -> u64 {
        self.env.wall_clock_secs()
    }

    /// Derive a conversation's keys deterministically from `secret`.
    ///
    /// The message key is the send key: both peers derive identical keys.
    pub fn derive_session(&self, conversation_id: ChatId, secret: &[u8], ttl: Duration) -> Session {
        self.derive_with_seed(conversation_id, secret, &FIXED_SEED, ttl)
    }

    /// Derive keys mixed with a fresh random master seed.
    ///
    /// Output is unique per call, so the session is only usable locally.
    #[cfg(test)]
    pub fn derive_session_with_random_seed(
        &self,
        conversation_id: ChatId,
        secret: &[u8],
        ttl: Duration,
    ) -> Session {
        let mut seed = [0u8; KEY_SIZE];
        self.env.random_bytes(&mut seed);
        let session = self.derive_with_seed(conversation_id, secret, &seed, ttl);
        seed.fill(0);
        session
    }

    /// Session for the pre-shared `chat_{id}_secret` convention.
    ///
    /// The message key is the keyed hash of the chat secret, matching the
    /// wire format of existing clients.
    pub fn derive_chat_session(&self, chat_id: ChatId, ttl: Duration) -> Session {
        let secret = chat_secret(chat_id);
        let mut session = self.derive_session(chat_id, secret.as_bytes(), ttl);
        session.message_key = self.chat_key(chat_id);
        session
    }

    /// Simplified-mode key of `chat_id`. Registered for wipe.
    pub fn chat_key(&self, chat_id: ChatId) -> SecretBuffer {
        let key = chat_key(&chat_secret(chat_id));
        self.track(SecretBuffer::from_slice(&key[..]))
    }

    /// Shared secret with a peer. Registered for wipe.
    ///
    /// # Errors
    ///
    /// - `CryptoError::InvalidPublicKey` for undecodable or low-order keys
    pub fn shared_secret(
        &self,
        identity: &KeyPair,
        peer_public: &str,
    ) -> Result<SecretBuffer, CryptoError> {
        let secret = identity.diffie_hellman(peer_public)?;
        Ok(self.track(secret))
    }

    /// Encrypt under `key` with a fresh random nonce.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Wiped` if the key has been wiped
    /// - `CryptoError::InvalidKeyLength` if the key is not 32 bytes
    pub fn encrypt(
        &self,
        key: &SecretBuffer,
        plaintext: &[u8],
        aad: Option<&[u8]>,
    ) -> Result<Ciphertext, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        self.env.random_bytes(&mut nonce);

        let sealed = key.with_key(|key| seal(key, nonce, plaintext, aad))?;

        Ok(Ciphertext {
            nonce: self.track(SecretBuffer::from_slice(&sealed.nonce)),
            ciphertext: self.track(SecretBuffer::new(sealed.ciphertext)),
        })
    }

    /// Decrypt and authenticate.
    ///
    /// # Errors
    ///
    /// - `CryptoError::AuthenticationFailure` on any tampering or wrong key
    /// - `CryptoError::Wiped` if the key has been wiped
    pub fn decrypt(
        &self,
        key: &SecretBuffer,
        nonce: &[u8; NONCE_SIZE],
        ciphertext: &[u8],
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        key.with_key(|key| open(key, nonce, ciphertext, aad))?
    }

    /// Encrypt text to the wire format under `key`.
    ///
    /// The intermediate nonce and ciphertext buffers are wiped and released
    /// once encoded; only the wire string leaves.
    pub fn encrypt_wire(&self, key: &SecretBuffer, plaintext: &str) -> Result<String, CryptoError> {
        let encrypted = self.encrypt(key, plaintext.as_bytes(), None)?;
        let encoded = encrypted.to_wire();
        for buffer in [&encrypted.nonce, &encrypted.ciphertext] {
            buffer.wipe(|bytes| self.env.random_bytes(bytes));
            self.registry.release_buffer(buffer.id());
        }
        encoded
    }

    /// Decrypt a wire string under `key`.
    ///
    /// # Errors
    ///
    /// - `CryptoError::MalformedWire` if the string cannot be decoded or the
    ///   plaintext is not UTF-8
    /// - `CryptoError::AuthenticationFailure` on tampering or wrong key
    pub fn decrypt_wire(&self, key: &SecretBuffer, encoded: &str) -> Result<String, CryptoError> {
        let sealed = wire::decode(encoded)?;
        let plaintext = self.decrypt(key, &sealed.nonce, &sealed.ciphertext, None)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::MalformedWire {
            reason: "plaintext is not UTF-8".to_string(),
        })
    }

    /// Simplified mode: encrypt `plaintext` for `chat_id`.
    pub fn encrypt_for_chat(
        &self,
        chat_id: ChatId,
        plaintext: &str,
    ) -> Result<String, CryptoError> {
        let key = self.chat_key(chat_id);
        let encoded = self.encrypt_wire(&key, plaintext);
        self.discard(&key);
        encoded
    }

    /// Simplified mode: decrypt a wire string of `chat_id`.
    pub fn decrypt_for_chat(&self, chat_id: ChatId, encoded: &str) -> Result<String, CryptoError> {
        let key = self.chat_key(chat_id);
        let plaintext = self.decrypt_wire(&key, encoded);
        self.discard(&key);
        plaintext
    }

    /// Wipe a buffer now and stop tracking it.
    pub fn discard(&self, buffer: &SecretBuffer) {
        buffer.wipe(|bytes| self.env.random_bytes(bytes));
        self.registry.release_buffer(buffer.id());
    }

    fn derive_with_seed(
        &self,
        conversation_id: ChatId,
        secret: &[u8],
        seed: &[u8; KEY_SIZE],
        ttl: Duration,
    ) -> Session {
        let keys = derive_session_keys(secret, seed);
        let created_at = self.env.wall_clock_secs();
        let send_key = self.track(SecretBuffer::from_slice(&keys.send[..]));

        Session {
            conversation_id,
            source: KeySource::PreShared,
            root_key: self.track(SecretBuffer::from_slice(&keys.root[..])),
            recv_key: self.track(SecretBuffer::from_slice(&keys.recv[..])),
            message_key: send_key.clone(),
            send_key,
            created_at,
            expires_at: created_at.saturating_add(ttl.as_secs()),
        }
    }

    fn track(&self, buffer: SecretBuffer) -> SecretBuffer {
        self.registry.register_buffer(&buffer);
        buffer
    }
}

/// Cache of one session per conversation.
#[derive(Debug)]
pub struct SessionStore<E> {
    crypto: SessionCrypto<E>,
    sessions: HashMap<ChatId, Session>,
    /// Chats whose exchanged session expired
    lapsed: HashSet<ChatId>,
    ttl: Duration,
}

impl<E: Environment> SessionStore<E> {
    /// Create an empty store.
    pub fn new(crypto: SessionCrypto<E>, ttl: Duration) -> Self {
        Self { crypto, sessions: HashMap::new(), lapsed: HashSet::new(), ttl }
    }

    /// Crypto service used for derivation.
    pub fn crypto(&self) -> &SessionCrypto<E> {
        &self.crypto
    }

    /// Cached session of `chat_id`, if live.
    pub fn get(&self, chat_id: ChatId, now: u64) -> Option<&Session> {
        self.sessions.get(&chat_id).filter(|s| !s.is_expired(now) && !s.is_wiped())
    }

    /// Session of `chat_id`, deriving it from the pre-shared convention on
    /// first use or after a pre-shared session expired.
    ///
    /// # Errors
    ///
    /// - `SessionError::ExchangeRequired` once an exchanged session of the
    ///   chat has expired or been wiped, until [`Self::establish`] runs again
    pub fn get_or_derive(&mut self, chat_id: ChatId) -> Result<&Session, SessionError> {
        let now = self.crypto.wall_clock_secs();
        let stale = self
            .sessions
            .get(&chat_id)
            .filter(|s| s.is_expired(now) || s.is_wiped())
            .map(|s| s.source);

        if let Some(source) = stale {
            self.remove(chat_id);
            if source == KeySource::Exchanged {
                tracing::warn!(chat_id, "exchanged session expired, new exchange required");
                self.lapsed.insert(chat_id);
            } else {
                tracing::debug!(chat_id, "session expired, re-deriving");
            }
        }

        if self.lapsed.contains(&chat_id) {
            return Err(SessionError::ExchangeRequired { chat_id });
        }

        let crypto = &self.crypto;
        let ttl = self.ttl;
        Ok(self.sessions.entry(chat_id).or_insert_with(|| crypto.derive_chat_session(chat_id, ttl)))
    }

    /// Replace `chat_id`'s session with one derived from an exchanged secret.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Wiped` if the shared secret has been wiped
    pub fn establish(
        &mut self,
        chat_id: ChatId,
        shared_secret: &SecretBuffer,
    ) -> Result<&Session, CryptoError> {
        let mut session = shared_secret
            .with_bytes(|secret| self.crypto.derive_session(chat_id, secret, self.ttl))?;
        session.source = KeySource::Exchanged;
        self.remove(chat_id);
        tracing::info!(chat_id, "session established from key exchange");
        Ok(self.sessions.entry(chat_id).or_insert(session))
    }

    /// True if `chat_id` waits for a new key exchange.
    pub fn needs_exchange(&self, chat_id: ChatId) -> bool {
        self.lapsed.contains(&chat_id)
    }

    /// Drop `chat_id`'s session, wiping its keys now.
    ///
    /// Returns true if a session existed.
    pub fn remove(&mut self, chat_id: ChatId) -> bool {
        self.lapsed.remove(&chat_id);
        let Some(session) = self.sessions.remove(&chat_id) else {
            return false;
        };
        for buffer in session.buffers() {
            self.crypto.discard(buffer);
        }
        true
    }

    /// Drop every session, wiping its keys now.
    pub fn remove_all(&mut self) {
        let chats: Vec<ChatId> = self.sessions.keys().copied().collect();
        for chat_id in chats {
            self.remove(chat_id);
        }
        self.lapsed.clear();
    }

    /// Forget every session without wiping (the panic wipe already did).
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.lapsed.clear();
    }

    /// Number of cached sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True if no session is cached.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn nonce_array(buffer: &SecretBuffer) -> Result<[u8; NONCE_SIZE], CryptoError> {
    buffer.with_bytes(|bytes| {
        <[u8; NONCE_SIZE]>::try_from(bytes).map_err(|_| CryptoError::InvalidKeyLength {
            expected: NONCE_SIZE,
            actual: bytes.len(),
        })
    })?
}
