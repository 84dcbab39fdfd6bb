//! # tether
//!
//! Sync server binary. Loads settings, starts the engine over the in-memory
//! store and serves agent connections until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tether_server::{EngineConfig, ServerConfig, SyncEngine, SyncServer};
use tether_settings::TetherSettings;
use tether_store::InMemoryStore;

/// External agent sync server.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "External agent sync server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file. Defaults to `~/.tether/settings.json`.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `tether_server=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn load_settings(&self) -> Result<TetherSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(tether_settings::settings_path);
        let mut settings = tether_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        self.apply(&mut settings);
        Ok(settings)
    }

    /// Command-line flags win over every settings layer.
    fn apply(&self, settings: &mut TetherSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn build_server(settings: &TetherSettings) -> SyncServer {
    let config = ServerConfig::from(settings);
    let engine = Arc::new(SyncEngine::new(
        Arc::new(InMemoryStore::new()),
        EngineConfig::from(settings),
        config.max_send_queue,
    ));
    SyncServer::new(config, engine)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;
    tether_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let server = build_server(&settings);
    let engine = Arc::clone(server.engine());
    engine
        .resume_comment_queues()
        .await
        .context("Failed to resume review comment queues")?;

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("tether listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    engine.shutdown().await;
    if tokio::time::timeout(Duration::from_secs(10), handle).await.is_err() {
        tracing::warn!("server did not stop in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings() {
        let cli = Cli::try_parse_from([
            "tether",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--log-level",
            "debug",
            "--json-logs",
        ])
        .unwrap();
        let mut settings = TetherSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn absent_flags_keep_settings() {
        let cli = Cli::try_parse_from(["tether"]).unwrap();
        let mut settings = TetherSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
    }

    #[test]
    fn settings_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 7001}}"#).unwrap();

        let cli = Cli::try_parse_from(["tether", "--settings", path.to_str().unwrap()]).unwrap();
        let settings = cli.load_settings().unwrap();
        assert_eq!(settings.server.port, 7001);
    }

    #[test]
    fn invalid_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let cli = Cli::try_parse_from(["tether", "--settings", path.to_str().unwrap()]).unwrap();
        let err = cli.load_settings().unwrap_err();
        assert!(err.to_string().contains("Failed to load settings"));
    }

    #[tokio::test]
    async fn server_boots_and_shuts_down() {
        let mut settings = TetherSettings::default();
        settings.server.port = 0;
        let server = build_server(&settings);
        let engine = Arc::clone(server.engine());
        engine.resume_comment_queues().await.unwrap();

        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        engine.shutdown().await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("shutdown timed out")
            .unwrap();
    }
}
