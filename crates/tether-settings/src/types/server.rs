//! Listener, connection and authentication settings.

use serde::{Deserialize, Serialize};

/// Listener and per-connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Bounded outbound command queue per agent connection.
    pub max_send_queue: usize,
    /// Interval between keepalive pings.
    pub ping_interval_secs: u64,
    /// Read deadline, refreshed on every pong.
    pub read_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_send_queue: 100,
            ping_interval_secs: 54,
            read_timeout_secs: 60,
        }
    }
}

/// Agent connection authentication.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Shared runner token. When unset any non-empty bearer token is accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner_token: Option<String>,
}
