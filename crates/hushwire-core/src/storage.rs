//! Key-value persistence of identity keys and the session token.
//!
//! The layout is fixed:
//!
//! | key          | value                          |
//! |--------------|--------------------------------|
//! | `publicKey`  | base64 X25519 public key       |
//! | `privateKey` | base64 X25519 private key      |
//! | `token`      | bearer token of the session    |
//!
//! Everything here is erased by step 3 of the panic wipe.

use std::collections::BTreeMap;

use hushwire_crypto::{KEY_SIZE, KeyPair};

use crate::{env::Environment, error::StorageError};

/// Storage key of the base64 public key
pub const PUBLIC_KEY: &str = "publicKey";

/// Storage key of the base64 private key
pub const PRIVATE_KEY: &str = "privateKey";

/// Storage key of the session token
pub const TOKEN: &str = "token";

/// String key-value store.
pub trait KeyValueStore: Send {
    /// Read a value. `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or replace a value.
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a value. Deleting an absent key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;

    /// Delete every value.
    fn clear(&mut self) -> Result<(), StorageError>;
}

/// In-memory store for ephemeral sessions and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.entries.clear();
        Ok(())
    }
}

/// Typed access to the persisted identity and token.
#[derive(Debug)]
pub struct PersistedKeys<S> {
    store: S,
}

impl<S: KeyValueStore> PersistedKeys<S> {
    /// Wrap a store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load the identity key pair if one was persisted.
    ///
    /// # Errors
    ///
    /// - `StorageError::Crypto` if the private key cannot be decoded
    /// - `StorageError::Corrupt` if the stored public key does not belong to
    ///   the private key
    pub fn load_key_pair(&self) -> Result<Option<KeyPair>, StorageError> {
        let Some(private) = self.store.get(PRIVATE_KEY)? else {
            return Ok(None);
        };
        let pair = KeyPair::from_base64(&private)?;

        if let Some(public) = self.store.get(PUBLIC_KEY)?
            && public != pair.public_key_base64()
        {
            return Err(StorageError::Corrupt {
                key: PUBLIC_KEY.to_string(),
                reason: "does not match stored private key".to_string(),
            });
        }

        Ok(Some(pair))
    }

    /// Persist both halves of `pair`.
    pub fn store_key_pair(&mut self, pair: &KeyPair) -> Result<(), StorageError> {
        self.store.set(PUBLIC_KEY, &pair.public_key_base64())?;
        self.store.set(PRIVATE_KEY, &pair.secret_key_base64())
    }

    /// Load the stored identity, generating and persisting a fresh one if
    /// absent.
    pub fn load_or_generate<E: Environment>(&mut self, env: &E) -> Result<KeyPair, StorageError> {
        if let Some(pair) = self.load_key_pair()? {
            return Ok(pair);
        }

        let mut secret = [0u8; KEY_SIZE];
        env.random_bytes(&mut secret);
        let pair = KeyPair::from_secret_bytes(secret);
        secret.fill(0);

        self.store_key_pair(&pair)?;
        tracing::info!(public_key = %pair.public_key_base64(), "generated identity key pair");
        Ok(pair)
    }

    /// Session token, if logged in.
    pub fn token(&self) -> Result<Option<String>, StorageError> {
        self.store.get(TOKEN)
    }

    /// Store the session token.
    pub fn set_token(&mut self, token: &str) -> Result<(), StorageError> {
        self.store.set(TOKEN, token)
    }

    /// Forget the session token (logout).
    pub fn clear_token(&mut self) -> Result<(), StorageError> {
        self.store.remove(TOKEN)
    }

    /// Erase identity and token together.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.store.clear()
    }
}
