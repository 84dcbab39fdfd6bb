//! Runtime configuration derived from [`TetherSettings`].

use std::time::Duration;

use tether_settings::TetherSettings;

/// Listener and per-connection transport configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Bounded outbound queue per agent connection.
    pub max_send_queue: usize,
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// Read deadline, refreshed on every pong.
    pub read_timeout: Duration,
    /// Shared runner token, if configured.
    pub runner_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_send_queue: 100,
            ping_interval: Duration::from_secs(54),
            read_timeout: Duration::from_secs(60),
            runner_token: None,
        }
    }
}

impl From<&TetherSettings> for ServerConfig {
    fn from(settings: &TetherSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_send_queue: settings.server.max_send_queue,
            ping_interval: Duration::from_secs(settings.server.ping_interval_secs),
            read_timeout: Duration::from_secs(settings.server.read_timeout_secs),
            runner_token: settings.auth.runner_token.clone(),
        }
    }
}

/// Reconciliation and queue timing used by the engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Minimum spacing between durable writes of one streaming turn.
    pub write_throttle: Duration,
    /// Minimum spacing between published patches of one streaming turn.
    pub publish_throttle: Duration,
    /// Fallback after which a connected session counts as ready.
    pub readiness_timeout: Duration,
    /// How long a sent review comment may wait for an answer.
    pub comment_response_timeout: Duration,
    /// Page size for the durable thread-ID scan.
    pub thread_scan_page_size: usize,
    /// Model for sessions created for fresh agent threads.
    pub default_model: String,
    /// Agent type tag of externally hosted agents.
    pub agent_type: String,
    /// Upper bound on waiting for background work at shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            write_throttle: Duration::from_millis(200),
            publish_throttle: Duration::from_millis(50),
            readiness_timeout: Duration::from_secs(60),
            comment_response_timeout: Duration::from_secs(120),
            thread_scan_page_size: 100,
            default_model: "external-agent".into(),
            agent_type: "zed_external".into(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&TetherSettings> for EngineConfig {
    fn from(settings: &TetherSettings) -> Self {
        let sync = &settings.sync;
        Self {
            write_throttle: Duration::from_millis(sync.write_throttle_ms),
            publish_throttle: Duration::from_millis(sync.publish_throttle_ms),
            readiness_timeout: Duration::from_secs(sync.readiness_timeout_secs),
            comment_response_timeout: Duration::from_secs(sync.comment_response_timeout_secs),
            thread_scan_page_size: sync.thread_scan_page_size,
            default_model: sync.default_model.clone(),
            agent_type: sync.agent_type.clone(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_zero() {
        assert_eq!(ServerConfig::default().port, 0);
    }

    #[test]
    fn ping_is_shorter_than_read_deadline() {
        let cfg = ServerConfig::default();
        assert!(cfg.ping_interval < cfg.read_timeout);
    }

    #[test]
    fn server_config_from_settings() {
        let mut settings = TetherSettings::default();
        settings.server.port = 9001;
        settings.server.ping_interval_secs = 5;
        settings.auth.runner_token = Some("secret".into());
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.port, 9001);
        assert_eq!(cfg.ping_interval, Duration::from_secs(5));
        assert_eq!(cfg.runner_token.as_deref(), Some("secret"));
    }

    #[test]
    fn engine_defaults_match_settings_defaults() {
        let from_settings = EngineConfig::from(&TetherSettings::default());
        let defaults = EngineConfig::default();
        assert_eq!(from_settings.write_throttle, defaults.write_throttle);
        assert_eq!(from_settings.publish_throttle, defaults.publish_throttle);
        assert_eq!(from_settings.readiness_timeout, defaults.readiness_timeout);
        assert_eq!(
            from_settings.comment_response_timeout,
            defaults.comment_response_timeout
        );
        assert_eq!(from_settings.agent_type, "zed_external");
    }

    #[test]
    fn engine_config_custom_throttle() {
        let mut settings = TetherSettings::default();
        settings.sync.write_throttle_ms = 500;
        let cfg = EngineConfig::from(&settings);
        assert_eq!(cfg.write_throttle, Duration::from_millis(500));
    }
}
