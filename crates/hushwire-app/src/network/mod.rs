//! Network drivers (feature `network`).
//!
//! - [`HttpApi`]: REST over reqwest with bearer auth
//! - [`WsTransport`]: event stream over tokio-tungstenite

mod http;
mod websocket;

pub use http::HttpApi;
pub use websocket::{WsConnection, WsTransport};
