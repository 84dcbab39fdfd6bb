//! One agent connection from upgrade through disconnect.
//!
//! A writer task drains the bounded outbound queue and sends keepalive
//! pings. The reader loop decodes frames into [`SyncMessage`]s for the
//! engine. Both share a cancellation token. Teardown cancels it, joins the
//! writer and unregisters the connection.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tether_core::{AgentId, SyncMessage};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::ServerConfig;
use crate::engine::SyncEngine;
use crate::errors::SyncError;

/// Keepalive timing for a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionParams {
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// Read deadline, measured from the last pong.
    pub read_timeout: Duration,
}

impl From<&ServerConfig> for SessionParams {
    fn from(config: &ServerConfig) -> Self {
        Self {
            ping_interval: config.ping_interval,
            read_timeout: config.read_timeout,
        }
    }
}

/// Run the connection until the peer leaves, the read deadline lapses or
/// the engine shuts down.
#[instrument(skip_all, fields(agent_id = %agent_id))]
pub async fn run_agent_session(
    ws: WebSocket,
    agent_id: AgentId,
    engine: Arc<SyncEngine>,
    params: SessionParams,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (conn, mut send_rx) = engine.connections().register(agent_id.clone());
    let cancel = engine.shutdown_token().child_token();
    info!(connection_id = %conn.id, "agent connected");

    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(params.ping_interval);
        // Skip the immediate first tick
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                () = writer_cancel.cancelled() => break,
                frame = send_rx.recv() => match frame {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
        writer_cancel.cancel();
    });

    engine.on_agent_connected(&agent_id).await;

    let reason = loop {
        let deadline = conn.last_pong() + params.read_timeout;
        let next = tokio::select! {
            () = cancel.cancelled() => break "cancelled",
            next = tokio::time::timeout_at(deadline, ws_rx.next()) => next,
        };
        let msg = match next {
            Err(_) => {
                warn!(
                    silent_secs = conn.last_pong_elapsed().as_secs(),
                    "no keepalive response before read deadline"
                );
                break "read deadline expired";
            }
            Ok(None) => break "stream ended",
            Ok(Some(Err(e))) => {
                let err = SyncError::Transport(e.to_string());
                warn!(error = %err, kind = %err.kind(), "socket error");
                break "socket error";
            }
            Ok(Some(Ok(msg))) => msg,
        };

        let text = match msg {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!(len = data.len(), "non-UTF-8 binary frame");
                    break "decode failure";
                }
            },
            Message::Ping(_) | Message::Pong(_) => {
                conn.mark_alive();
                trace!("keepalive");
                continue;
            }
            Message::Close(_) => break "close frame",
        };

        let message = match SyncMessage::parse(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "undecodable frame");
                break "decode failure";
            }
        };
        debug!(event_type = %message.event_type, "sync event received");
        if let Err(e) = engine.process_sync_message(&agent_id, message).await {
            error!(error = %e, kind = %e.kind(), "sync event failed");
        }
    };

    cancel.cancel();
    let _ = writer.await;
    engine.on_agent_disconnected(&agent_id, &conn.id);
    info!(
        connection_id = %conn.id,
        reason,
        age_secs = conn.age().as_secs(),
        dropped_commands = conn.drop_count(),
        "agent session ended"
    );
}
