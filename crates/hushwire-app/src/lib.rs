//! Hushwire App
//!
//! Async runtime that drives the `hushwire-core` state machines against real
//! (or simulated) I/O.
//!
//! # Architecture
//!
//! [`Runtime`] is generic over its drivers ([`Transport`], [`ChatApi`], a
//! [`hushwire_core::KeyValueStore`], a [`Platform`] and an
//! [`hushwire_core::Environment`]). A front end talks to it only through
//! [`ClientHandle`]: it sends [`Command`]s and renders [`ClientEvent`]s.
//!
//! # Components
//!
//! - [`Runtime`]: Event loop owning every state machine
//! - [`ClientConfig`]: Endpoints, timings and data directory
//! - [`FileStore`] / [`FilePlatform`]: On-disk state and its wipe
//! - [`SystemEnv`]: Production clock and randomness
//! - `network`: reqwest and tokio-tungstenite drivers (feature `network`)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod attachment;
pub mod config;
pub mod driver;
pub mod error;
pub mod event;
#[cfg(feature = "network")]
pub mod network;
pub mod runtime;
pub mod state;
pub mod storage;
pub mod system_env;

pub use config::ClientConfig;
pub use driver::{ChatApi, Platform, Transport, TransportConnection, TransportEvent};
pub use error::{ApiError, RuntimeError};
pub use event::{ClientEvent, ClientHandle, Command, WipeReason};
pub use runtime::Runtime;
pub use state::{ChatRequest, ChatSummary, DisplayMessage, UserSummary};
pub use storage::{FilePlatform, FileStore};
pub use system_env::SystemEnv;
