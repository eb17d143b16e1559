//! Shared, wipeable key material.
//!
//! A [`SecretBuffer`] is a reference-counted handle to a byte buffer. The
//! crypto layer hands one clone to the caller and another to the wipe
//! registry; when the registry wipes the buffer every clone observes it.
//!
//! # Invariants
//!
//! - Reads after a wipe fail with [`CryptoError::Wiped`]
//! - Wiping overwrites with caller-provided random bytes, then zeros
//! - The backing storage is zeroized when the last handle drops

use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use zeroize::Zeroize;

use crate::CryptoError;

/// Size of every symmetric key (root, send, recv, chat) in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an `XChaCha20-Poly1305` nonce in bytes
pub const NONCE_SIZE: usize = 24;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`SecretBuffer`].
///
/// Clones of a buffer share the id, which makes registration idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    /// Raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

struct Inner {
    bytes: Vec<u8>,
    wiped: bool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// Sensitive bytes (keys, nonces, ciphertexts) that can be wiped in place.
#[derive(Clone)]
pub struct SecretBuffer {
    id: BufferId,
    inner: Arc<Mutex<Inner>>,
}

impl SecretBuffer {
    /// Take ownership of `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        let id = BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed));
        Self { id, inner: Arc::new(Mutex::new(Inner { bytes, wiped: false })) }
    }

    /// Copy `bytes` into a new buffer.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }

    /// Identity shared by all clones of this buffer.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Length in bytes (0 once wiped).
    pub fn len(&self) -> usize {
        let inner = self.lock();
        if inner.wiped { 0 } else { inner.bytes.len() }
    }

    /// True if the buffer holds no readable bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once [`wipe`](Self::wipe) has run on any clone.
    pub fn is_wiped(&self) -> bool {
        self.lock().wiped
    }

    /// Run `f` over the contents.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Wiped` if the buffer has been wiped
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, CryptoError> {
        let inner = self.lock();
        if inner.wiped {
            return Err(CryptoError::Wiped);
        }
        Ok(f(&inner.bytes))
    }

    /// Run `f` over the contents viewed as a 32-byte key.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Wiped` if the buffer has been wiped
    /// - `CryptoError::InvalidKeyLength` if the buffer is not [`KEY_SIZE`]
    ///   bytes
    pub fn with_key<R>(&self, f: impl FnOnce(&[u8; KEY_SIZE]) -> R) -> Result<R, CryptoError> {
        let inner = self.lock();
        if inner.wiped {
            return Err(CryptoError::Wiped);
        }
        let key: &[u8; KEY_SIZE] = inner.bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: KEY_SIZE, actual: inner.bytes.len() }
        })?;
        Ok(f(key))
    }

    /// Copy the contents out.
    pub fn to_vec(&self) -> Result<Vec<u8>, CryptoError> {
        self.with_bytes(<[u8]>::to_vec)
    }

    /// Constant-shape equality check against another buffer's contents.
    ///
    /// Returns false if either side has been wiped.
    pub fn ct_eq(&self, other: &Self) -> bool {
        if self.id == other.id {
            return !self.is_wiped();
        }
        let Ok(mine) = self.to_vec() else {
            return false;
        };
        other
            .with_bytes(|theirs| {
                mine.len() == theirs.len()
                    && mine.iter().zip(theirs).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
            })
            .unwrap_or(false)
    }

    /// Destroy the contents.
    ///
    /// `fill_random` overwrites the live bytes first, then the bytes are
    /// zeroed and the buffer is marked wiped. Wiping twice is a no-op.
    pub fn wipe(&self, fill_random: impl FnOnce(&mut [u8])) {
        let mut inner = self.lock();
        if inner.wiped {
            return;
        }
        fill_random(inner.bytes.as_mut_slice());
        inner.bytes.as_mut_slice().zeroize();
        inner.wiped = true;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBuffer")
            .field("id", &self.id.0)
            .field("len", &self.len())
            .field("wiped", &self.is_wiped())
            .finish_non_exhaustive()
    }
}
