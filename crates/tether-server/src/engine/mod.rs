//! The sync engine: event dispatch and the work it triggers.
//!
//! [`SyncEngine::process_sync_message`] is the single ingestion entry point.
//! Handlers live in submodules by concern:
//!
//! - `resolution`: thread creation, title changes, thread → session lookup
//! - `messages`: streamed content, turn completion, thread load errors
//! - `lifecycle`: connection restore, readiness, disconnect
//! - `prompts`: durable prompt queue dispatch and outbound notifications
//! - `comments`: the per-planning-session review comment queue

mod comments;
mod lifecycle;
mod messages;
mod prompts;
mod resolution;

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tether_core::{
    AgentId, DeliveryError, ExternalAgentCommand, FrontendEvent, InteractionId, RequestId,
    Session, SessionId, SyncEvent, SyncMessage,
};
use tether_store::SyncStore;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::config::EngineConfig;
use crate::errors::Result;
use crate::shutdown::ShutdownCoordinator;
use crate::sync::{
    Dispatch, EventPublisher, ReadinessTracker, StreamingCache, SyncState,
};
use crate::websocket::registry::ConnectionRegistry;

/// Title for sessions created by `thread_created` without a title.
pub const DEFAULT_THREAD_TITLE: &str = "New Conversation";
/// Title for sessions created by `user_created_thread` without a title.
pub const USER_THREAD_TITLE: &str = "New Chat";
/// Title for sessions created on the fly for an unmapped user message.
pub const ON_THE_FLY_TITLE: &str = "External Chat";
/// Owner of fresh-thread sessions when the connection has no known user.
pub const FALLBACK_OWNER: &str = "external-agent-user";

/// Callback invoked for every inbound message before dispatch.
pub type SyncEventHook = Arc<dyn Fn(&AgentId, &SyncMessage) + Send + Sync>;

/// Synchronizes external agent events into durable sessions.
pub struct SyncEngine {
    store: Arc<dyn SyncStore>,
    config: EngineConfig,
    state: SyncState,
    streaming: StreamingCache,
    readiness: ReadinessTracker,
    connections: ConnectionRegistry,
    publisher: EventPublisher,
    shutdown: ShutdownCoordinator,
    /// Response timers for in-flight review comments, by planning session.
    comment_timers: Mutex<HashMap<SessionId, CancellationToken>>,
    /// Serializes comment dispatch per planning session.
    comment_gates: DashMap<SessionId, Arc<tokio::sync::Mutex<()>>>,
    hook: RwLock<Option<SyncEventHook>>,
}

impl SyncEngine {
    /// Build an engine over `store`. Agent connections queue at most
    /// `max_send_queue` outbound commands.
    pub fn new(store: Arc<dyn SyncStore>, config: EngineConfig, max_send_queue: usize) -> Self {
        Self {
            store,
            config,
            state: SyncState::new(),
            streaming: StreamingCache::new(),
            readiness: ReadinessTracker::new(),
            connections: ConnectionRegistry::new(max_send_queue),
            publisher: EventPublisher::default(),
            shutdown: ShutdownCoordinator::new(),
            comment_timers: Mutex::new(HashMap::new()),
            comment_gates: DashMap::new(),
            hook: RwLock::new(None),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process-local mapping tables.
    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Live agent connections.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Readiness tracking.
    pub fn readiness(&self) -> &ReadinessTracker {
        &self.readiness
    }

    /// Sessions with an in-flight streaming turn.
    pub fn streaming_sessions(&self) -> usize {
        self.streaming.len()
    }

    /// Subscribe to frontend events.
    pub fn subscribe(&self) -> broadcast::Receiver<FrontendEvent> {
        self.publisher.subscribe()
    }

    /// Token cancelled when the engine shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    /// Install a hook that observes every inbound message before dispatch.
    pub fn set_sync_event_hook(&self, hook: impl Fn(&AgentId, &SyncMessage) + Send + Sync + 'static) {
        *self.hook.write() = Some(Arc::new(hook));
    }

    // ── Platform-facing mapping entry points ────────────────────────

    /// Correlate a platform-initiated request with the session it targets.
    pub fn register_request(&self, request_id: RequestId, session_id: SessionId) {
        self.state.register_request(request_id, session_id);
    }

    /// Record the user an agent connection acts for.
    pub fn register_agent_user(&self, agent_id: AgentId, user_id: impl Into<String>) {
        self.state.register_agent_user(agent_id, user_id);
    }

    // ── Ingestion ───────────────────────────────────────────────────

    /// Decode and apply one inbound message from `agent_id`.
    #[instrument(skip_all, fields(agent_id = %agent_id, event_type = %message.event_type))]
    pub async fn process_sync_message(
        self: &Arc<Self>,
        agent_id: &AgentId,
        message: SyncMessage,
    ) -> Result<()> {
        let hook = self.hook.read().clone();
        if let Some(hook) = hook {
            hook(agent_id, &message);
        }

        let event = message.decode()?;
        trace!(event_type = %message.event_type, thread_id = ?event.thread_id(), "dispatching sync event");
        match event {
            SyncEvent::ThreadCreated {
                thread_id,
                title,
                request_id,
            } => {
                self.handle_thread_created(agent_id, message.session_hint(), thread_id, title, request_id)
                    .await
            }
            SyncEvent::UserCreatedThread { thread_id, title } => {
                self.handle_user_created_thread(agent_id, thread_id, title).await
            }
            SyncEvent::ThreadTitleChanged { thread_id, title } => {
                self.handle_thread_title_changed(&thread_id, title).await
            }
            SyncEvent::MessageAdded(added) => self.handle_message_added(agent_id, added).await,
            SyncEvent::MessageCompleted {
                thread_id,
                request_id,
            } => self.handle_message_completed(&thread_id, request_id).await,
            SyncEvent::ThreadLoadError {
                thread_id,
                request_id,
                error,
            } => {
                self.handle_thread_load_error(thread_id.as_ref(), request_id.as_ref(), &error)
                    .await
            }
            SyncEvent::AgentReady {
                agent_name,
                thread_id,
            } => {
                self.handle_agent_ready(agent_id, agent_name.as_deref(), thread_id.as_ref())
                    .await
            }
            SyncEvent::Ping => {
                trace!("application ping");
                Ok(())
            }
            SyncEvent::Ignored { event_type } => {
                debug!(event_type, "legacy event ignored");
                Ok(())
            }
            SyncEvent::Unknown { event_type } => {
                warn!(event_type, "unknown sync event type");
                Ok(())
            }
        }
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Send a command to a session's agent now, bypassing readiness.
    pub fn send_command(
        &self,
        session_id: &SessionId,
        command: ExternalAgentCommand,
    ) -> std::result::Result<(), DeliveryError> {
        self.connections.send_command(session_id, command)
    }

    /// Send a command, or hold it until the session's agent is ready.
    pub fn queue_or_send(
        &self,
        session_id: &SessionId,
        command: ExternalAgentCommand,
    ) -> std::result::Result<(), DeliveryError> {
        match self.readiness.queue_or_send(session_id, command) {
            Dispatch::Send(command) => self.connections.send_command(session_id, command),
            Dispatch::Queued => {
                debug!(session_id = %session_id, "agent not ready, command queued");
                Ok(())
            }
        }
    }

    // ── Shared helpers ──────────────────────────────────────────────

    /// Point assistant content at a new turn. A cached context for the
    /// previous turn is flushed if dirty and dropped.
    pub(crate) async fn begin_turn(&self, session_id: &SessionId, interaction_id: InteractionId) {
        self.state.set_waiting(session_id.clone(), interaction_id);
        let Some(slot) = self.streaming.remove(session_id) else {
            return;
        };
        let mut guard = slot.lock().await;
        if let Some(ctx) = guard.as_mut().filter(|ctx| ctx.dirty) {
            if let Err(e) = self.store.update_interaction(ctx.interaction.clone()).await {
                warn!(
                    session_id = %session_id,
                    interaction_id = %ctx.interaction.id,
                    error = %e,
                    "failed to flush previous turn"
                );
            }
        }
        *guard = None;
    }

    pub(crate) fn publish_session(&self, session: &Session, interaction_id: Option<InteractionId>) {
        let _ = self
            .publisher
            .publish(FrontendEvent::session_update(session, interaction_id));
    }

    /// Spawn owned background work.
    pub(crate) fn spawn<F>(&self, name: &'static str, work: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.shutdown.spawn(name, work);
    }

    /// Cancel background work and wait for it, bounded by the configured
    /// shutdown timeout.
    pub async fn shutdown(&self) {
        for (_, timer) in self.comment_timers.lock().drain() {
            timer.cancel();
        }
        self.shutdown
            .graceful_shutdown(self.config.shutdown_timeout)
            .await;
    }
}

/// Agent implementation named in a session's launch configuration.
pub(crate) fn agent_name(session: &Session) -> Option<String> {
    session
        .metadata
        .agent_config
        .as_ref()
        .and_then(|config| config.get("agent_name"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}
