//! Client configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all) is a
//! valid configuration. Durations are stored as whole milliseconds or seconds
//! to keep the file hand-editable.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use directories::ProjectDirs;
use hushwire_core::{
    DeliveryConfig, ReconnectPolicy,
    connection::{CLOSE_POLICY_VIOLATION, CLOSE_SESSION_EXPIRED},
    delivery::MAX_RETRIES,
    session::DEFAULT_SESSION_TTL,
};
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

const APP_QUALIFIER: &str = "net";
const APP_ORG: &str = "hushwire";
const APP_NAME: &str = "hushwire";

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// REST base URL, no trailing slash
    pub api_base_url: String,
    /// WebSocket base URL, no trailing slash
    pub ws_base_url: String,
    /// Reconnect delay after a clean close
    pub reconnect_delay_ms: u64,
    /// Reconnect delay after a failed connect
    pub connect_failure_delay_ms: u64,
    /// Close codes that mean the token was rejected
    pub auth_close_codes: Vec<u16>,
    /// Automatic resends per message
    pub max_retries: u32,
    /// Delay before the first resend
    pub first_retry_delay_ms: u64,
    /// Delay before later resends
    pub retry_delay_ms: u64,
    /// Lifetime of derived conversation sessions
    pub session_ttl_secs: u64,
    /// Where persisted state lives. Platform data dir when unset.
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            ws_base_url: "ws://localhost:8000".to_string(),
            reconnect_delay_ms: 2_000,
            connect_failure_delay_ms: 3_000,
            auth_close_codes: vec![CLOSE_POLICY_VIOLATION, CLOSE_SESSION_EXPIRED],
            max_retries: MAX_RETRIES,
            first_retry_delay_ms: 2_000,
            retry_delay_ms: 3_000,
            session_ttl_secs: DEFAULT_SESSION_TTL.as_secs(),
            data_dir: None,
        }
    }
}

impl ClientConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let config_error =
            |reason: String| RuntimeError::Config { path: path.to_path_buf(), reason };

        let text = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| config_error(e.to_string()))
    }

    /// Reconnect behaviour for the connection machine.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            close_delay: Duration::from_millis(self.reconnect_delay_ms),
            connect_failure_delay: Duration::from_millis(self.connect_failure_delay_ms),
            auth_close_codes: self.auth_close_codes.clone(),
        }
    }

    /// Retry schedule for the delivery pipeline.
    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            max_retries: self.max_retries,
            first_retry_delay: Duration::from_millis(self.first_retry_delay_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    /// Session lifetime.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Event stream URL carrying `token`.
    pub fn websocket_url(&self, token: &str) -> String {
        format!("{}/chat/ws?token={token}", self.ws_base_url.trim_end_matches('/'))
    }

    /// Configured data directory, or the platform default.
    pub fn resolve_data_dir(&self) -> Result<PathBuf, RuntimeError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
            .ok_or_else(|| RuntimeError::DataDir("cannot determine home directory".into()))?;
        Ok(dirs.data_dir().to_path_buf())
    }
}
