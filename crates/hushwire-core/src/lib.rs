//! Hushwire Core
//!
//! Sans-IO state machines for the hushwire chat client: per-conversation
//! session keys, the event connection, optimistic message delivery, session
//! expiry and the panic wipe.
//!
//! # Architecture
//!
//! Every state machine takes inputs (user intents, transport outcomes, timer
//! firings) and returns actions for a driver to execute. Nothing here touches
//! the network, the filesystem or a real clock; time and randomness come
//! through [`Environment`].
//!
//! # Components
//!
//! - [`SessionStore`]: Session cache keyed by conversation
//! - [`ConnectionManager`]: Event stream lifecycle and reconnect policy
//! - [`DeliveryPipeline`]: Optimistic send, retry and reconciliation
//! - [`SessionExpiry`]: Countdown to the end of the login
//! - [`PanicWipe`]: Ordered best-effort destruction of local state
//! - [`PersistedKeys`]: Identity key pair and token on a [`KeyValueStore`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod delivery;
pub mod env;
pub mod error;
pub mod event;
pub mod expiry;
pub mod message;
pub mod session;
pub mod storage;
pub mod wipe;

pub use connection::{
    AttemptId, ConnectionAction, ConnectionManager, ConnectionState, ReconnectPolicy, TimerId,
};
pub use delivery::{DeliveryAction, DeliveryConfig, DeliveryPipeline, DisplayText};
pub use env::Environment;
pub use error::{
    ConnectionError, DeliveryError, Failure, FrameError, SessionError, StorageError, WipeError,
};
pub use event::{InboundMessage, ServerEvent};
pub use expiry::{ExpiryAction, SessionExpiry};
pub use message::{
    ChatId, Message, MessageId, MessageType, PendingMessage, SendReceipt, SendStatus, TempId,
    UserId,
};
pub use session::{Ciphertext, KeySource, Session, SessionCrypto, SessionStore};
pub use storage::{KeyValueStore, MemoryStore, PersistedKeys};
pub use wipe::{PanicWipe, TrackedConnection, WipePlatform, WipeRegistry, WipeReport, WipeStep};
