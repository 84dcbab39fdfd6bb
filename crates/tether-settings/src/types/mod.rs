//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON is accepted and missing fields keep their compiled default.

mod server;
mod sync;

pub use server::*;
pub use sync::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "sync": { "writeThrottleMs": 500 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Listener and connection settings.
    pub server: ServerSettings,
    /// Reconciliation and queue timing.
    pub sync: SyncSettings,
    /// Agent connection authentication.
    pub auth: AuthSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl TetherSettings {
    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.server.ping_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "pingIntervalSecs must be at least 1".into(),
            ));
        }
        if self.server.ping_interval_secs >= self.server.read_timeout_secs {
            return Err(SettingsError::InvalidValue(format!(
                "pingIntervalSecs ({}) must be less than readTimeoutSecs ({})",
                self.server.ping_interval_secs, self.server.read_timeout_secs
            )));
        }
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "maxSendQueue must be at least 1".into(),
            ));
        }
        if self.sync.thread_scan_page_size == 0 {
            return Err(SettingsError::InvalidValue(
                "threadScanPageSize must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_must_be_shorter_than_read_timeout() {
        let mut settings = TetherSettings::default();
        settings.server.ping_interval_secs = 60;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("pingIntervalSecs"));
    }

    #[test]
    fn zero_ping_interval_is_rejected() {
        let mut settings = TetherSettings::default();
        settings.server.ping_interval_secs = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("pingIntervalSecs must be at least 1"));
    }

    #[test]
    fn zero_queue_is_rejected() {
        let mut settings = TetherSettings::default();
        settings.server.max_send_queue = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(TetherSettings::default()).unwrap();
        assert_eq!(value["server"]["maxSendQueue"], 100);
        assert_eq!(value["sync"]["commentResponseTimeoutSecs"], 120);
        assert!(value["auth"].get("runnerToken").is_none());
    }
}
