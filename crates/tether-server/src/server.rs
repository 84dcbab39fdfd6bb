//! `SyncServer`: axum HTTP and WebSocket surface over a [`SyncEngine`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::engine::SyncEngine;
use crate::health::HealthResponse;
use crate::websocket::auth::{RunnerTokenValidator, TokenValidator};
use crate::websocket::handler::sync_handler;
use crate::websocket::session::SessionParams;

/// Agent sync endpoint.
pub const SYNC_PATH: &str = "/api/v1/external-agents/sync";

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The sync engine.
    pub engine: Arc<SyncEngine>,
    /// Connection authentication.
    pub validator: Arc<dyn TokenValidator>,
    /// Keepalive timing for new connections.
    pub session: SessionParams,
    /// When the server started.
    pub start_time: Instant,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    engine: Arc<SyncEngine>,
    validator: Arc<dyn TokenValidator>,
    start_time: Instant,
}

impl SyncServer {
    /// Serve `engine`, authenticating with the configured runner token.
    pub fn new(config: ServerConfig, engine: Arc<SyncEngine>) -> Self {
        let validator = Arc::new(RunnerTokenValidator::new(config.runner_token.clone()));
        Self {
            config,
            engine,
            validator,
            start_time: Instant::now(),
        }
    }

    /// Replace the token validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            engine: self.engine.clone(),
            validator: self.validator.clone(),
            session: SessionParams::from(&self.config),
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route(SYNC_PATH, get(sync_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until the engine shuts down.
    /// Returns the bound address and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let shutdown = self.engine.shutdown_token();

        info!(%addr, "sync server listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        Ok((addr, handle))
    }

    /// The sync engine.
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::snapshot(&state.engine, state.start_time))
}
