//! Panic wipe: deterministic destruction of everything sensitive.
//!
//! [`WipeRegistry`] is an injected, cheaply clonable handle. The crypto layer
//! registers every key, nonce and ciphertext buffer it produces; the runtime
//! registers live connections and ephemeral resource handles. [`PanicWipe`]
//! then tears all of it down in a fixed order:
//!
//! ```text
//! 1. generate + discard a throwaway 256-bit key
//! 2. overwrite tracked buffers (random, then zeros), release them
//! 3. clear persisted key-value state
//! 4. delete every cache store and local database
//! 5. revoke tracked ephemeral handles
//! 6. force-close tracked connections (code 4000, reason "wipe")
//! 7. navigate to the wiped state, falling back to a reload
//! ```
//!
//! Each step is independently fault tolerant: a failure is logged and
//! recorded in the [`WipeReport`], and the next step still runs. After a wipe
//! all three registries are empty regardless of failures.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use hushwire_crypto::{BufferId, KEY_SIZE, SecretBuffer};
use tracing::{info, warn};

use crate::{
    env::Environment,
    error::{StorageError, WipeError},
};

/// Close code sent to the server when a connection is torn down by a wipe
pub const WIPE_CLOSE_CODE: u16 = 4000;

/// Close reason sent alongside [`WIPE_CLOSE_CODE`]
pub const WIPE_CLOSE_REASON: &str = "wipe";

/// Identity of a tracked connection
pub type ConnectionHandleId = u64;

/// A live connection that can be force-closed.
pub trait TrackedConnection: Send + Sync {
    /// Close immediately with the given code and reason. Best effort.
    fn force_close(&self, code: u16, reason: &str);
}

/// Platform side of a wipe: persisted state and navigation.
pub trait WipePlatform {
    /// Erase all persisted key-value state.
    fn clear_key_value(&mut self) -> Result<(), StorageError>;

    /// Names of every cache store.
    fn cache_names(&self) -> Result<Vec<String>, WipeError>;

    /// Delete one cache store.
    fn delete_cache(&mut self, name: &str) -> Result<(), WipeError>;

    /// Names of every local database.
    fn database_names(&self) -> Result<Vec<String>, WipeError>;

    /// Delete one local database.
    fn delete_database(&mut self, name: &str) -> Result<(), WipeError>;

    /// Revoke an ephemeral handle (blob URL, temp file path).
    fn revoke_handle(&mut self, handle: &str) -> Result<(), WipeError>;

    /// Leave the session for the neutral "expired" state.
    fn navigate_wiped(&mut self) -> Result<(), WipeError>;

    /// Hard reload, used when navigation fails.
    fn reload(&mut self) -> Result<(), WipeError>;
}

#[derive(Default)]
struct Tracked {
    buffers: BTreeMap<BufferId, SecretBuffer>,
    handles: BTreeSet<String>,
    connections: BTreeMap<ConnectionHandleId, Arc<dyn TrackedConnection>>,
}

/// Shared registry of everything a wipe must destroy.
///
/// Registration is additive and idempotent. Clones share state.
#[derive(Clone, Default)]
pub struct WipeRegistry {
    inner: Arc<Mutex<Tracked>>,
}

impl WipeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a key, nonce or ciphertext buffer.
    pub fn register_buffer(&self, buffer: &SecretBuffer) {
        self.lock().buffers.entry(buffer.id()).or_insert_with(|| buffer.clone());
    }

    /// Stop tracking a buffer that its owner already wiped.
    pub fn release_buffer(&self, id: BufferId) {
        self.lock().buffers.remove(&id);
    }

    /// Track an ephemeral resource handle.
    pub fn register_handle(&self, handle: impl Into<String>) {
        self.lock().handles.insert(handle.into());
    }

    /// Track a live connection.
    pub fn register_connection(&self, id: ConnectionHandleId, conn: Arc<dyn TrackedConnection>) {
        self.lock().connections.entry(id).or_insert(conn);
    }

    /// Stop tracking a connection that closed on its own.
    pub fn unregister_connection(&self, id: ConnectionHandleId) {
        self.lock().connections.remove(&id);
    }

    /// Number of tracked buffers.
    pub fn buffer_count(&self) -> usize {
        self.lock().buffers.len()
    }

    /// Number of tracked handles.
    pub fn handle_count(&self) -> usize {
        self.lock().handles.len()
    }

    /// Number of tracked connections.
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// True if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        let tracked = self.lock();
        tracked.buffers.is_empty() && tracked.handles.is_empty() && tracked.connections.is_empty()
    }

    fn take(&self) -> Tracked {
        mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Tracked> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for WipeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked = self.lock();
        f.debug_struct("WipeRegistry")
            .field("buffers", &tracked.buffers.len())
            .field("handles", &tracked.handles.len())
            .field("connections", &tracked.connections.len())
            .finish()
    }
}

/// Wipe step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WipeStep {
    /// Throwaway key generation
    DiscardKey,
    /// Buffer overwrite
    Buffers,
    /// Key-value state
    KeyValue,
    /// Caches and databases
    LocalStores,
    /// Ephemeral handles
    Handles,
    /// Connection teardown
    Connections,
    /// Navigation or reload
    Navigate,
}

/// Outcome of one wipe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WipeReport {
    /// Buffers overwritten
    pub buffers_wiped: usize,
    /// Handles revoked successfully
    pub handles_revoked: usize,
    /// Connections force-closed
    pub connections_closed: usize,
    /// True if navigation failed and a reload was used instead
    pub reloaded: bool,
    /// Every step failure, in order
    pub failures: Vec<(WipeStep, WipeError)>,
}

impl WipeReport {
    /// True if every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, step: WipeStep, err: WipeError) {
        warn!(?step, error = %err, "wipe step failed");
        self.failures.push((step, err));
    }
}

/// Executes the wipe sequence over a registry.
#[derive(Debug, Clone)]
pub struct PanicWipe<E> {
    registry: WipeRegistry,
    env: E,
}

impl<E: Environment> PanicWipe<E> {
    /// Create a wiper over `registry`, drawing overwrite bytes from `env`.
    pub fn new(registry: WipeRegistry, env: E) -> Self {
        Self { registry, env }
    }

    /// The registry this wiper drains.
    pub fn registry(&self) -> &WipeRegistry {
        &self.registry
    }

    /// Run the full wipe sequence. Irreversible; safe to repeat.
    pub fn wipe<P: WipePlatform + ?Sized>(&self, platform: &mut P) -> WipeReport {
        let mut report = WipeReport::default();
        let tracked = self.registry.take();

        // 1. Throwaway key
        {
            let mut throwaway = [0u8; KEY_SIZE];
            self.env.random_bytes(&mut throwaway);
            SecretBuffer::new(throwaway.to_vec()).wipe(|bytes| self.env.random_bytes(bytes));
            throwaway.fill(0);
        }

        // 2. Buffers
        for buffer in tracked.buffers.into_values() {
            if !buffer.is_wiped() {
                buffer.wipe(|bytes| self.env.random_bytes(bytes));
                report.buffers_wiped += 1;
            }
        }

        // 3. Key-value state
        if let Err(err) = platform.clear_key_value() {
            report.record(WipeStep::KeyValue, err.into());
        }

        // 4. Caches and databases, each deletion independent
        match platform.cache_names() {
            Ok(names) => {
                for name in names {
                    if let Err(err) = platform.delete_cache(&name) {
                        report.record(WipeStep::LocalStores, err);
                    }
                }
            },
            Err(err) => report.record(WipeStep::LocalStores, err),
        }
        match platform.database_names() {
            Ok(names) => {
                for name in names {
                    if let Err(err) = platform.delete_database(&name) {
                        report.record(WipeStep::LocalStores, err);
                    }
                }
            },
            Err(err) => report.record(WipeStep::LocalStores, err),
        }

        // 5. Ephemeral handles
        for handle in &tracked.handles {
            match platform.revoke_handle(handle) {
                Ok(()) => report.handles_revoked += 1,
                Err(err) => report.record(WipeStep::Handles, err),
            }
        }

        // 6. Connections
        for conn in tracked.connections.values() {
            conn.force_close(WIPE_CLOSE_CODE, WIPE_CLOSE_REASON);
            report.connections_closed += 1;
        }

        // 7. Navigate, fall back to reload
        if let Err(err) = platform.navigate_wiped() {
            warn!(error = %err, "navigation after wipe failed, reloading");
            report.reloaded = true;
            if let Err(err) = platform.reload() {
                report.record(WipeStep::Navigate, err);
            }
        }

        info!(
            buffers = report.buffers_wiped,
            handles = report.handles_revoked,
            connections = report.connections_closed,
            failures = report.failures.len(),
            "panic wipe complete"
        );

        report
    }
}
