//! Registry of live agent connections, keyed by agent ID.

use std::sync::Arc;

use dashmap::DashMap;
use tether_core::{AgentId, DeliveryError, ExternalAgentCommand, SessionId};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::connection::AgentConnection;

/// Live connections and the non-blocking send primitive.
pub struct ConnectionRegistry {
    connections: DashMap<AgentId, Arc<AgentConnection>>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry whose connections queue at most
    /// `max_send_queue` commands.
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Register a connection for `agent_id`, replacing any previous one.
    /// Returns the handle and the receiving end of its outbound queue.
    pub fn register(&self, agent_id: AgentId) -> (Arc<AgentConnection>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let connection = Arc::new(AgentConnection::new(
            format!("conn_{}", Uuid::now_v7()),
            agent_id.clone(),
            tx,
        ));
        if let Some(previous) = self.connections.insert(agent_id, connection.clone()) {
            debug!(
                agent_id = %previous.agent_id,
                previous_connection = %previous.id,
                "replaced existing agent connection"
            );
        }
        (connection, rx)
    }

    /// Remove the registration for `agent_id` if it still belongs to
    /// `connection_id`. Returns whether it was removed.
    pub fn unregister(&self, agent_id: &AgentId, connection_id: &str) -> bool {
        self.connections
            .remove_if(agent_id, |_, conn| conn.id == connection_id)
            .is_some()
    }

    /// The live connection for `agent_id`.
    pub fn get(&self, agent_id: &AgentId) -> Option<Arc<AgentConnection>> {
        self.connections.get(agent_id).map(|c| c.value().clone())
    }

    /// Whether a session's agent is connected and its writer still running.
    pub fn is_connected(&self, session_id: &SessionId) -> bool {
        self.get(&AgentId::from(session_id))
            .is_some_and(|connection| !connection.is_closed())
    }

    /// Send a command to a session's agent without waiting. The session ID is
    /// written into the command payload.
    pub fn send_command(
        &self,
        session_id: &SessionId,
        mut command: ExternalAgentCommand,
    ) -> Result<(), DeliveryError> {
        command.set_session(session_id);
        let frame = command.encode()?;
        let Some(connection) = self.get(&AgentId::from(session_id)) else {
            return Err(DeliveryError::NoConnection(session_id.to_string()));
        };
        connection.try_send(frame).inspect_err(|e| {
            warn!(
                session_id = %session_id,
                command_type = %command.kind,
                error = %e,
                "failed to queue command for agent"
            );
        })
    }

    /// Agent IDs with a live connection.
    pub fn connected_agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<_> = self.connections.iter().map(|c| c.key().clone()).collect();
        agents.sort();
        agents
    }

    /// Live connection count.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no agent is connected.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
