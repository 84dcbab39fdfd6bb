//! Connection restore, agent readiness and disconnect.

use std::sync::Arc;

use tether_core::{AgentId, ChatMessage, RequestId, SessionId, ThreadId};
use tether_store::ListInteractionsQuery;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{SyncEngine, agent_name};
use crate::errors::{Result, StoreContext};

/// Sent after a restart when the agent left a turn half answered.
pub const CONTINUE_PROMPT: &str = "The sandbox was restarted. Please continue working on your current task.\n\n\
If you were in the middle of something, please resume from where you left off.\n\
If you need to verify the current state, check the git status and any running processes.";

impl SyncEngine {
    /// A connection was registered for `agent_id`. Connections bound to a
    /// session restore its mappings and start readiness tracking.
    #[instrument(skip_all, fields(agent_id = %agent_id))]
    pub async fn on_agent_connected(self: &Arc<Self>, agent_id: &AgentId) {
        let Some(session_id) = agent_id.as_session_id() else {
            debug!("connection not bound to a session");
            return;
        };
        if let Err(e) = self.restore_session(&session_id).await {
            warn!(session_id = %session_id, error = %e, "session restore failed");
        }
    }

    async fn restore_session(self: &Arc<Self>, session_id: &SessionId) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)
            .await
            .op("get_session")?;
        if let Some(thread_id) = session.thread_id() {
            self.state.map_thread(thread_id.clone(), session.id.clone());
        }
        let interactions = self
            .store
            .list_interactions(&ListInteractionsQuery::current(&session))
            .await
            .op("list_interactions")?;
        let waiting = interactions.iter().rev().find(|i| i.is_waiting());
        let initial = waiting.and_then(|w| {
            self.state
                .request_for_session(session_id)
                .map(|request_id| (w, request_id))
        });
        let needs_continue = initial.is_none() && waiting.is_some_and(|w| !w.response.is_empty());

        let timer = self.readiness.init(session_id.clone(), needs_continue);
        self.arm_readiness_timeout(session_id.clone(), timer);

        let initial_message = initial.is_some();
        if let Some((waiting, request_id)) = initial {
            self.state
                .set_waiting(session.id.clone(), waiting.id.clone());
            let command = ChatMessage::new(waiting.prompt.clone(), request_id.as_str())
                .thread(session.thread_id().cloned())
                .agent_name(agent_name(&session))
                .into_command();
            if let Err(e) = self.queue_or_send(&session.id, command) {
                warn!(error = %e, "failed to queue initial message");
            }
        }
        info!(
            session_id = %session_id,
            needs_continue,
            initial_message,
            "agent readiness tracking started"
        );
        Ok(())
    }

    fn arm_readiness_timeout(self: &Arc<Self>, session_id: SessionId, timer: CancellationToken) {
        let engine = Arc::clone(self);
        let deadline = Instant::now() + self.config.readiness_timeout;
        self.spawn("readiness_timeout", async move {
            tokio::select! {
                () = timer.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    warn!(session_id = %session_id, "no agent_ready before timeout, marking ready");
                    engine.mark_session_ready(&session_id).await;
                }
            }
        });
    }

    /// Transition to ready: flush held commands, then owe the resume prompt
    /// if one is due. No-op when untracked or already ready.
    pub(crate) async fn mark_session_ready(&self, session_id: &SessionId) {
        let Some(transition) = self.readiness.mark_ready(session_id) else {
            return;
        };
        let held = transition.pending.len();
        for command in transition.pending {
            if let Err(e) = self.connections.send_command(session_id, command) {
                warn!(session_id = %session_id, error = %e, "dropped held command");
            }
        }
        if transition.needs_continue {
            self.send_continue_prompt(session_id).await;
        }
        info!(
            session_id = %session_id,
            held,
            ready_at = ?self.readiness.ready_at(session_id),
            "agent ready"
        );
    }

    async fn send_continue_prompt(&self, session_id: &SessionId) {
        let session = match self.store.get_session(session_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "continue prompt skipped");
                return;
            }
        };
        let command = ChatMessage::new(CONTINUE_PROMPT, RequestId::new().as_str())
            .thread(session.thread_id().cloned())
            .agent_name(agent_name(&session))
            .continuation()
            .into_command();
        match self.connections.send_command(session_id, command) {
            Ok(()) => info!(session_id = %session_id, "sent continue prompt"),
            Err(e) => warn!(session_id = %session_id, error = %e, "continue prompt not delivered"),
        }
    }

    /// `agent_ready`: release held work and wake the agent with any pending
    /// prompt.
    #[instrument(skip_all, fields(agent_id = %agent_id, agent_name = ?agent_name, thread_id = ?thread_id))]
    pub(crate) async fn handle_agent_ready(
        self: &Arc<Self>,
        agent_id: &AgentId,
        agent_name: Option<&str>,
        thread_id: Option<&ThreadId>,
    ) -> Result<()> {
        let Some(session_id) = agent_id.as_session_id() else {
            debug!("ready signal from unbound connection");
            return Ok(());
        };
        if !self.readiness.is_tracked(&session_id) {
            debug!(session_id = %session_id, "no readiness state");
            return Ok(());
        }
        if self.readiness.is_ready(&session_id) {
            debug!(session_id = %session_id, "agent already ready");
        } else {
            self.mark_session_ready(&session_id).await;
        }

        let engine = Arc::clone(self);
        self.spawn("pending_prompt", async move {
            engine.process_any_pending_prompt(&session_id).await;
        });
        Ok(())
    }

    /// A connection ended. State is dropped only if the registry still held
    /// this connection.
    #[instrument(skip_all, fields(agent_id = %agent_id, connection_id))]
    pub fn on_agent_disconnected(&self, agent_id: &AgentId, connection_id: &str) {
        if !self.connections.unregister(agent_id, connection_id) {
            debug!("superseded connection closed");
            return;
        }
        if let Some(session_id) = agent_id.as_session_id() {
            self.readiness.remove(&session_id);
        }
        info!("agent disconnected");
    }
}
