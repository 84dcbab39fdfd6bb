//! Thread → session resolution.

use std::sync::Arc;

use chrono::Utc;
use tether_core::{AgentId, Interaction, RequestId, Session, SessionId, ThreadId};
use tether_store::ListSessionsQuery;
use tracing::{debug, info, instrument, warn};

use super::{DEFAULT_THREAD_TITLE, FALLBACK_OWNER, SyncEngine, USER_THREAD_TITLE};
use crate::errors::{Result, StoreContext, SyncError};

/// Prompt recorded on the first interaction of an agent-originated thread.
pub const FRESH_THREAD_PROMPT: &str = "New conversation started by the agent";

impl SyncEngine {
    /// `thread_created`: bind the thread to a session, creating one if no
    /// platform request or session hint names it.
    #[instrument(skip_all, fields(thread_id = %thread_id))]
    pub(crate) async fn handle_thread_created(
        self: &Arc<Self>,
        agent_id: &AgentId,
        hint: Option<SessionId>,
        thread_id: ThreadId,
        title: Option<String>,
        request_id: Option<RequestId>,
    ) -> Result<()> {
        let requested = request_id
            .as_ref()
            .and_then(|req| self.state.request_session(req));
        let from_request = requested.is_some();

        if let Some(session_id) = requested.or(hint) {
            let mut session = self
                .store
                .get_session(&session_id)
                .await
                .op("get_session")?;
            session.metadata.thread_id = Some(thread_id.clone());
            session.updated = Utc::now();
            let session = self
                .store
                .update_session(session)
                .await
                .op("update_session")?;

            if from_request {
                if let Some(req) = &request_id {
                    let _ = self.state.take_request(req);
                }
            }
            self.state.map_thread(thread_id, session.id.clone());
            info!(session_id = %session.id, from_request, "thread bound to existing session");
            return Ok(());
        }

        if self.state.session_for_thread(&thread_id).is_some() {
            debug!("thread already mapped");
            return Ok(());
        }
        if self.find_session_by_thread(&thread_id).await?.is_some() {
            debug!("thread found in store, mapping repaired");
            return Ok(());
        }

        let owner = self
            .state
            .user_for_agent(agent_id)
            .unwrap_or_else(|| FALLBACK_OWNER.to_owned());
        let name = title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_THREAD_TITLE.to_owned());
        let mut session = Session::new(owner, name, self.config.default_model.clone());
        session.metadata.thread_id = Some(thread_id.clone());
        session.metadata.agent_type = Some(self.config.agent_type.clone());
        let session = self
            .store
            .create_session(session)
            .await
            .op("create_session")?;

        let interaction = Interaction::waiting(
            session.id.clone(),
            session.owner.clone(),
            session.generation,
            FRESH_THREAD_PROMPT,
        );
        let interaction = self
            .store
            .create_interaction(interaction)
            .await
            .op("create_interaction")?;

        self.state
            .bind_thread(thread_id, session.id.clone(), interaction.id.clone());
        info!(session_id = %session.id, interaction_id = %interaction.id, "created session for new thread");

        if let Some(parent) = agent_id.as_session_id() {
            self.spawn_task_linkage(parent, session.id.clone());
        }
        Ok(())
    }

    /// Copy the parent session's task onto a follow-up thread's session.
    fn spawn_task_linkage(self: &Arc<Self>, parent: SessionId, child: SessionId) {
        let engine = Arc::clone(self);
        self.spawn("task_linkage", async move {
            if let Err(e) = engine.link_task(&parent, &child).await {
                warn!(parent = %parent, session_id = %child, error = %e, "task linkage failed");
            }
        });
    }

    async fn link_task(&self, parent: &SessionId, child: &SessionId) -> Result<()> {
        let parent = self.store.get_session(parent).await.op("get_session")?;
        let Some(task_id) = parent.metadata.task_id else {
            return Ok(());
        };
        let mut session = self.store.get_session(child).await.op("get_session")?;
        session.metadata.task_id = Some(task_id.clone());
        session.updated = Utc::now();
        let _ = self
            .store
            .update_session(session)
            .await
            .op("update_session")?;
        debug!(session_id = %child, task_id = %task_id, "linked thread session to task");
        Ok(())
    }

    /// `user_created_thread`: materialize a session for a thread the user
    /// opened in the agent. Replays are no-ops.
    #[instrument(skip_all, fields(thread_id = %thread_id))]
    pub(crate) async fn handle_user_created_thread(
        &self,
        agent_id: &AgentId,
        thread_id: ThreadId,
        title: Option<String>,
    ) -> Result<()> {
        if self.state.session_for_thread(&thread_id).is_some() {
            debug!("thread already mapped");
            return Ok(());
        }
        if self.find_session_by_thread(&thread_id).await?.is_some() {
            debug!("thread found in store, mapping repaired");
            return Ok(());
        }

        let reference = self.reference_session(agent_id).await?;
        let name = title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| USER_THREAD_TITLE.to_owned());
        let mut session = reference.derive_for_thread(thread_id.clone(), name);
        session.metadata.user_created = true;
        let session = self
            .store
            .create_session(session)
            .await
            .op("create_session")?;
        self.state.map_thread(thread_id, session.id.clone());
        info!(session_id = %session.id, "created session for user thread");
        Ok(())
    }

    /// `thread_title_changed`: rename the mirrored session.
    #[instrument(skip_all, fields(thread_id = %thread_id))]
    pub(crate) async fn handle_thread_title_changed(
        &self,
        thread_id: &ThreadId,
        title: String,
    ) -> Result<()> {
        let Some(session_id) = self.state.session_for_thread(thread_id) else {
            debug!("title change for unmapped thread");
            return Ok(());
        };
        let mut session = self
            .store
            .get_session(&session_id)
            .await
            .op("get_session")?;
        session.rename(title);
        let session = self
            .store
            .update_session(session)
            .await
            .op("update_session")?;
        self.publish_session(&session, None);
        debug!(session_id = %session.id, "session renamed");
        Ok(())
    }

    /// Mapping first, then the durable scan.
    pub(crate) async fn resolve_thread(&self, thread_id: &ThreadId) -> Result<Option<SessionId>> {
        if let Some(session_id) = self.state.session_for_thread(thread_id) {
            return Ok(Some(session_id));
        }
        Ok(self
            .find_session_by_thread(thread_id)
            .await?
            .map(|session| session.id))
    }

    /// Durable scan by the thread ID in session metadata. Repairs the
    /// mapping on success.
    pub async fn find_session_by_thread(&self, thread_id: &ThreadId) -> Result<Option<Session>> {
        let query = ListSessionsQuery::by_thread(thread_id, self.config.thread_scan_page_size);
        let sessions = self
            .store
            .list_sessions(&query)
            .await
            .op("list_sessions")?;
        let found = sessions
            .into_iter()
            .find(|s| s.thread_id() == Some(thread_id));
        if let Some(session) = &found {
            self.state.map_thread(thread_id.clone(), session.id.clone());
            debug!(thread_id = %thread_id, session_id = %session.id, "repaired thread mapping");
        }
        Ok(found)
    }

    /// The session the connection speaks for.
    pub(crate) async fn reference_session(&self, agent_id: &AgentId) -> Result<Session> {
        let Some(session_id) = agent_id.as_session_id() else {
            return Err(SyncError::InvalidState(format!(
                "connection {agent_id} is not bound to a session"
            )));
        };
        self.store.get_session(&session_id).await.op("get_session")
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tether_core::{InteractionState, TaskId};
    use tether_store::{StoreOp, SyncStore};

    #[tokio::test]
    async fn fresh_thread_creates_session_and_waiting_interaction() {
        let h = harness();
        let agent = AgentId::from("external-agent-1");
        h.engine.register_agent_user(agent.clone(), "user-7");

        h.engine
            .process_sync_message(
                &agent,
                message("thread_created", json!({"acp_thread_id": "t-1", "title": "Fix tests"})),
            )
            .await
            .unwrap();

        let session_id = h.engine.state.session_for_thread(&ThreadId::from("t-1")).unwrap();
        let session = h.store.get_session(&session_id).await.unwrap();
        assert_eq!(session.owner, "user-7");
        assert_eq!(session.name, "Fix tests");
        assert_eq!(session.metadata.agent_type.as_deref(), Some("zed_external"));

        let waiting = h.engine.state.waiting_interaction(&session_id).unwrap();
        let interaction = h.store.get_interaction(&waiting).await.unwrap();
        assert_eq!(interaction.state, InteractionState::Waiting);
        assert_eq!(interaction.prompt, FRESH_THREAD_PROMPT);
    }

    #[tokio::test]
    async fn fresh_thread_defaults() {
        let h = harness();
        h.engine
            .process_sync_message(
                &AgentId::from("external-agent-1"),
                message("thread_created", json!({"acp_thread_id": "t-1"})),
            )
            .await
            .unwrap();
        let session_id = h.engine.state.session_for_thread(&ThreadId::from("t-1")).unwrap();
        let session = h.store.get_session(&session_id).await.unwrap();
        assert_eq!(session.owner, FALLBACK_OWNER);
        assert_eq!(session.name, DEFAULT_THREAD_TITLE);
    }

    #[tokio::test]
    async fn redelivered_thread_created_keeps_one_session() {
        let h = harness();
        let agent = AgentId::from("external-agent-1");
        for _ in 0..2 {
            h.engine
                .process_sync_message(&agent, message("thread_created", json!({"acp_thread_id": "t-dup"})))
                .await
                .unwrap();
        }
        assert_eq!(h.store.calls(StoreOp::CreateSession), 1);
        assert_eq!(h.store.calls(StoreOp::CreateInteraction), 1);
        assert_eq!(h.store.snapshot_sessions().len(), 1);
    }

    #[tokio::test]
    async fn thread_created_for_stored_thread_repairs_mapping() {
        let h = harness();
        let mut session = Session::new("u", "existing", "m");
        session.metadata.thread_id = Some(ThreadId::from("t-known"));
        let session = h.store.create_session(session).await.unwrap();
        h.store.reset_calls();

        h.engine
            .process_sync_message(
                &AgentId::from("external-agent-1"),
                message("thread_created", json!({"acp_thread_id": "t-known"})),
            )
            .await
            .unwrap();

        assert_eq!(
            h.engine.state.session_for_thread(&ThreadId::from("t-known")),
            Some(session.id)
        );
        assert_eq!(h.store.calls(StoreOp::CreateSession), 0);
        assert_eq!(h.store.calls(StoreOp::ListSessions), 1);
    }

    #[tokio::test]
    async fn request_mapping_wins_over_session_hint() {
        let h = harness();
        let requested = h.store.create_session(Session::new("u", "requested", "m")).await.unwrap();
        let hinted = h.store.create_session(Session::new("u", "hinted", "m")).await.unwrap();
        let req = RequestId::from("req_1");
        h.engine.register_request(req.clone(), requested.id.clone());

        let msg = message(
            "thread_created",
            json!({"acp_thread_id": "t-9", "request_id": "req_1"}),
        )
        .with_session(hinted.id.as_str());
        h.engine
            .process_sync_message(&AgentId::from("external-agent-1"), msg)
            .await
            .unwrap();

        assert_eq!(
            h.engine.state.session_for_thread(&ThreadId::from("t-9")),
            Some(requested.id.clone())
        );
        let stored = h.store.get_session(&requested.id).await.unwrap();
        assert_eq!(stored.thread_id(), Some(&ThreadId::from("t-9")));
        assert!(h.store.get_session(&hinted.id).await.unwrap().thread_id().is_none());
        assert!(h.engine.state.request_session(&req).is_none());
        assert_eq!(h.store.calls(StoreOp::CreateSession), 2);
    }

    #[tokio::test]
    async fn session_hint_reused_without_request() {
        let h = harness();
        let hinted = h.store.create_session(Session::new("u", "hinted", "m")).await.unwrap();
        h.store.reset_calls();
        let msg = message("thread_created", json!({"acp_thread_id": "t-2"}))
            .with_session(hinted.id.as_str());
        h.engine
            .process_sync_message(&AgentId::from("x"), msg)
            .await
            .unwrap();
        assert_eq!(h.engine.state.session_for_thread(&ThreadId::from("t-2")), Some(hinted.id));
        assert_eq!(h.store.calls(StoreOp::CreateSession), 0);
        assert_eq!(h.store.calls(StoreOp::CreateInteraction), 0);
    }

    #[tokio::test]
    async fn resolution_failure_leaves_mappings_untouched() {
        let h = harness();
        let session = h.store.create_session(Session::new("u", "s", "m")).await.unwrap();
        let req = RequestId::from("req_1");
        h.engine.register_request(req.clone(), session.id.clone());
        h.store.fail_on(StoreOp::UpdateSession);

        let err = h
            .engine
            .process_sync_message(
                &AgentId::from("x"),
                message("thread_created", json!({"acp_thread_id": "t-3", "request_id": "req_1"})),
            )
            .await
            .unwrap_err();
        assert_matches!(err, SyncError::Store { op: "update_session", .. });
        assert_eq!(h.engine.state.request_session(&req), Some(session.id));
        assert!(h.engine.state.session_for_thread(&ThreadId::from("t-3")).is_none());
    }

    #[tokio::test]
    async fn missing_thread_id_is_validation_error() {
        let h = harness();
        let err = h
            .engine
            .process_sync_message(&AgentId::from("x"), message("thread_created", json!({"title": "x"})))
            .await
            .unwrap_err();
        assert_matches!(err, SyncError::Validation(_));
        assert_eq!(h.store.calls(StoreOp::CreateSession), 0);
    }

    #[tokio::test]
    async fn follow_up_thread_inherits_parent_task() {
        let h = harness();
        let mut parent = Session::new("u", "planning", "m");
        parent.metadata.task_id = Some(TaskId::from("tsk_1"));
        let parent = h.store.create_session(parent).await.unwrap();

        h.engine
            .process_sync_message(
                &AgentId::from(&parent.id),
                message("thread_created", json!({"acp_thread_id": "t-child"})),
            )
            .await
            .unwrap();
        settle().await;

        let child_id = h.engine.state.session_for_thread(&ThreadId::from("t-child")).unwrap();
        let child = h.store.get_session(&child_id).await.unwrap();
        assert_eq!(child.metadata.task_id, Some(TaskId::from("tsk_1")));
    }

    #[tokio::test]
    async fn task_linkage_failure_does_not_fail_event() {
        let h = harness();
        let parent = h.store.create_session(Session::new("u", "p", "m")).await.unwrap();
        h.store.fail_on(StoreOp::UpdateSession);
        h.engine
            .process_sync_message(
                &AgentId::from(&parent.id),
                message("thread_created", json!({"acp_thread_id": "t-c"})),
            )
            .await
            .unwrap();
        settle().await;
        assert!(h.engine.state.session_for_thread(&ThreadId::from("t-c")).is_some());
    }

    #[tokio::test]
    async fn user_created_thread_is_idempotent() {
        let h = harness();
        let mut reference = Session::new("user-1", "ref", "model-x");
        reference.metadata.agent_type = Some("zed_external".into());
        reference.organization_id = Some("org-1".into());
        let reference = h.store.create_session(reference).await.unwrap();
        let agent = AgentId::from(&reference.id);
        let msg = message("user_created_thread", json!({"acp_thread_id": "t-u"}));

        h.engine.process_sync_message(&agent, msg.clone()).await.unwrap();
        let created = h.engine.state.session_for_thread(&ThreadId::from("t-u")).unwrap();
        let session = h.store.get_session(&created).await.unwrap();
        assert_eq!(session.name, USER_THREAD_TITLE);
        assert_eq!(session.owner, "user-1");
        assert_eq!(session.model_name, "model-x");
        assert_eq!(session.organization_id.as_deref(), Some("org-1"));
        assert!(session.metadata.user_created);

        h.store.reset_calls();
        h.engine.process_sync_message(&agent, msg).await.unwrap();
        assert_eq!(h.store.calls(StoreOp::CreateSession), 0);
        assert_eq!(h.store.calls(StoreOp::UpdateSession), 0);
        assert_eq!(h.store.calls(StoreOp::CreateInteraction), 0);
    }

    #[tokio::test]
    async fn user_created_thread_without_reference_fails() {
        let h = harness();
        let err = h
            .engine
            .process_sync_message(
                &AgentId::from("external-agent-1"),
                message("user_created_thread", json!({"acp_thread_id": "t-u"})),
            )
            .await
            .unwrap_err();
        assert_matches!(err, SyncError::InvalidState(_));
    }

    #[tokio::test]
    async fn durable_scan_repairs_mapping() {
        let h = harness();
        let mut session = Session::new("u", "s", "m");
        session.metadata.thread_id = Some(ThreadId::from("t-lost"));
        let session = h.store.create_session(session).await.unwrap();

        let thread = ThreadId::from("t-lost");
        assert_eq!(h.engine.resolve_thread(&thread).await.unwrap(), Some(session.id.clone()));
        assert_eq!(h.store.calls(StoreOp::ListSessions), 1);
        assert_eq!(h.engine.resolve_thread(&thread).await.unwrap(), Some(session.id));
        assert_eq!(h.store.calls(StoreOp::ListSessions), 1);
    }

    #[tokio::test]
    async fn title_change_renames_and_publishes() {
        let h = harness();
        let session = h.mapped_session("t-1").await;
        let mut events = h.engine.subscribe();

        h.engine
            .process_sync_message(
                &AgentId::from("x"),
                message("thread_title_changed", json!({"acp_thread_id": "t-1", "title": "Renamed"})),
            )
            .await
            .unwrap();

        let stored = h.store.get_session(&session.id).await.unwrap();
        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.metadata.title_history[0].title, "Renamed");
        let event = events.try_recv().unwrap();
        assert_eq!(event.session_id(), &session.id);
    }

    #[tokio::test]
    async fn title_change_for_unmapped_thread_is_noop() {
        let h = harness();
        h.engine
            .process_sync_message(
                &AgentId::from("x"),
                message("thread_title_changed", json!({"acp_thread_id": "nope", "title": "T"})),
            )
            .await
            .unwrap();
        assert_eq!(h.store.calls(StoreOp::GetSession), 0);
    }
}
