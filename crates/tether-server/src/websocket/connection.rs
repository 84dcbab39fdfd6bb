//! Agent connection handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::{AgentId, DeliveryError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;

/// One live agent socket, as seen by the send path.
pub struct AgentConnection {
    /// Unique connection ID. Distinguishes reconnects of the same agent.
    pub id: String,
    /// Agent ID presented on connect.
    pub agent_id: AgentId,
    /// Bounded queue drained by the connection's writer task.
    tx: mpsc::Sender<String>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// When the last Pong was received.
    last_pong: Mutex<Instant>,
    /// Commands rejected because the queue was full or closed.
    dropped_commands: AtomicU64,
}

impl AgentConnection {
    /// Create a connection handle around the writer's queue.
    pub fn new(id: String, agent_id: AgentId, tx: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            agent_id,
            tx,
            connected_at: now,
            last_pong: Mutex::new(now),
            dropped_commands: AtomicU64::new(0),
        }
    }

    /// Queue an encoded frame without waiting.
    pub fn try_send(&self, frame: String) -> Result<(), DeliveryError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = self.dropped_commands.fetch_add(1, Ordering::Relaxed);
                Err(match err {
                    TrySendError::Full(_) => DeliveryError::QueueFull(self.agent_id.to_string()),
                    TrySendError::Closed(_) => {
                        DeliveryError::NoConnection(self.agent_id.to_string())
                    }
                })
            }
        }
    }

    /// Total commands rejected on this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_commands.load(Ordering::Relaxed)
    }

    /// Record a keepalive response.
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Time of the last keepalive response (or of connection).
    pub fn last_pong(&self) -> Instant {
        *self.last_pong.lock()
    }

    /// Duration since the last pong.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Whether the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn make_connection(capacity: usize) -> (AgentConnection, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = AgentConnection::new("conn_1".into(), AgentId::from("ses_1"), tx);
        (conn, rx)
    }

    #[tokio::test]
    async fn try_send_delivers() {
        let (conn, mut rx) = make_connection(4);
        conn.try_send("hello".into()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), "hello");
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn full_queue_is_rejected() {
        let (conn, _rx) = make_connection(1);
        conn.try_send("a".into()).unwrap();
        assert_matches!(conn.try_send("b".into()), Err(DeliveryError::QueueFull(id)) if id == "ses_1");
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn closed_queue_is_no_connection() {
        let (conn, rx) = make_connection(1);
        drop(rx);
        assert!(conn.is_closed());
        assert_matches!(conn.try_send("a".into()), Err(DeliveryError::NoConnection(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn mark_alive_refreshes_last_pong() {
        let (conn, _rx) = make_connection(1);
        let before = conn.last_pong();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(conn.last_pong_elapsed() >= Duration::from_secs(10));
        conn.mark_alive();
        assert!(conn.last_pong() > before);
        assert!(conn.last_pong_elapsed() < Duration::from_secs(1));
        assert!(conn.age() >= Duration::from_secs(10));
    }
}
