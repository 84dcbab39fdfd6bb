//! Durable prompt queue dispatch and platform notifications.

use tether_core::{ChatMessage, Interaction, PromptHistoryEntry, PromptStatus, SessionId};
use tracing::{debug, info, instrument, warn};

use super::{SyncEngine, agent_name};
use crate::errors::{Result, StoreContext, SyncError};

impl SyncEngine {
    /// Deliver the oldest pending prompt queued for `session_id`.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn process_prompt_queue(&self, session_id: &SessionId) {
        let entry = match self.store.next_pending_prompt(session_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "prompt queue lookup failed");
                return;
            }
        };
        self.set_prompt_status(&entry, PromptStatus::Pending).await;

        match self.send_queued_prompt(session_id, &entry).await {
            Ok(()) => {
                self.set_prompt_status(&entry, PromptStatus::Sent).await;
                info!(prompt_id = %entry.id, "queued prompt sent");
            }
            Err(e) => {
                warn!(prompt_id = %entry.id, error = %e, kind = %e.kind(), "queued prompt delivery failed");
                self.set_prompt_status(&entry, PromptStatus::Failed).await;
            }
        }
    }

    /// Wake an idle agent with any pending or failed prompt, interrupts
    /// included.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn process_any_pending_prompt(&self, session_id: &SessionId) {
        let entry = match self.store.any_pending_prompt(session_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!("no pending prompts");
                return;
            }
            Err(e) => {
                warn!(error = %e, "prompt queue lookup failed");
                return;
            }
        };
        self.set_prompt_status(&entry, PromptStatus::Sent).await;

        if let Err(e) = self.send_queued_prompt(session_id, &entry).await {
            warn!(prompt_id = %entry.id, retry = entry.is_retry(), error = %e, "pending prompt delivery failed");
            self.set_prompt_status(&entry, PromptStatus::Failed).await;
        } else {
            info!(prompt_id = %entry.id, interrupt = entry.interrupt, "pending prompt sent");
        }
    }

    async fn set_prompt_status(&self, entry: &PromptHistoryEntry, status: PromptStatus) {
        if let Err(e) = self.store.set_prompt_status(&entry.id, status).await {
            warn!(prompt_id = %entry.id, ?status, error = %e, "failed to record prompt status");
        }
    }

    async fn send_queued_prompt(&self, session_id: &SessionId, entry: &PromptHistoryEntry) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)
            .await
            .op("get_session")?;
        let Some(thread_id) = session.thread_id().cloned() else {
            return Err(SyncError::InvalidState(format!(
                "session {session_id} has no agent thread"
            )));
        };

        let interaction = Interaction::waiting(
            session.id.clone(),
            session.owner.clone(),
            session.generation,
            entry.content.clone(),
        );
        let interaction = self
            .store
            .create_interaction(interaction)
            .await
            .op("create_interaction")?;
        self.begin_turn(&session.id, interaction.id.clone()).await;

        let command = ChatMessage::new(entry.content.clone(), interaction.id.as_str())
            .thread(Some(thread_id))
            .agent_name(agent_name(&session))
            .from_queue()
            .into_command();
        self.queue_or_send(&session.id, command)?;
        Ok(())
    }

    /// Forward a platform-created interaction to the session's agent.
    /// Sessions not driven by an external agent are skipped.
    #[instrument(skip_all, fields(session_id = %session_id, interaction_id = %interaction.id))]
    pub async fn notify_new_interaction(
        &self,
        session_id: &SessionId,
        interaction: &Interaction,
    ) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)
            .await
            .op("get_session")?;
        if session.metadata.agent_type.as_deref() != Some(self.config.agent_type.as_str()) {
            debug!("session is not driven by an external agent");
            return Ok(());
        }

        self.begin_turn(&session.id, interaction.id.clone()).await;
        let command = ChatMessage::new(interaction.prompt.clone(), interaction.id.as_str())
            .role("user")
            .thread(session.thread_id().cloned())
            .agent_name(agent_name(&session))
            .into_command();
        self.queue_or_send(&session.id, command)?;
        debug!("interaction forwarded to agent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use assert_matches::assert_matches;
    use tether_core::{DeliveryError, InteractionState, Session};
    use tether_store::{StoreOp, SyncStore};

    #[tokio::test]
    async fn session_scoped_dispatch_creates_interaction_and_sends() {
        let h = harness();
        let session = h.mapped_session("t-1").await;
        let mut rx = h.connect(&session.id);
        let entry = h
            .store
            .create_prompt(PromptHistoryEntry::pending(session.id.clone(), "run the tests"))
            .await
            .unwrap();

        h.engine.process_prompt_queue(&session.id).await;

        assert_eq!(h.store.snapshot_prompt(&entry.id).unwrap().status, PromptStatus::Sent);
        let interactions = h.store.snapshot_interactions(&session.id);
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].prompt, "run the tests");
        assert_eq!(interactions[0].state, InteractionState::Waiting);
        assert_eq!(
            h.engine.state.waiting_interaction(&session.id),
            Some(interactions[0].id.clone())
        );

        let frame = decode_frame(&rx.try_recv().unwrap());
        assert_eq!(frame["data"]["request_id"], interactions[0].id.as_str());
        assert_eq!(frame["data"]["acp_thread_id"], "t-1");
        assert_eq!(frame["data"]["session_id"], session.id.as_str());
    }

    #[tokio::test]
    async fn delivery_failure_marks_failed_but_keeps_interaction() {
        let h = harness();
        let session = h.mapped_session("t-1").await;
        let entry = h
            .store
            .create_prompt(PromptHistoryEntry::pending(session.id.clone(), "hello"))
            .await
            .unwrap();

        h.engine.process_prompt_queue(&session.id).await;

        assert_eq!(h.store.snapshot_prompt(&entry.id).unwrap().status, PromptStatus::Failed);
        assert_eq!(h.store.snapshot_interactions(&session.id).len(), 1);
    }

    #[tokio::test]
    async fn session_load_failure_marks_failed() {
        let h = harness();
        let session = h.mapped_session("t-1").await;
        let entry = h
            .store
            .create_prompt(PromptHistoryEntry::pending(session.id.clone(), "hello"))
            .await
            .unwrap();
        h.store.fail_on(StoreOp::GetSession);

        h.engine.process_prompt_queue(&session.id).await;

        assert_eq!(h.store.snapshot_prompt(&entry.id).unwrap().status, PromptStatus::Failed);
        assert_eq!(h.store.calls(StoreOp::CreateInteraction), 0);
    }

    #[tokio::test]
    async fn session_scoped_dispatch_skips_interrupts() {
        let h = harness();
        let session = h.mapped_session("t-1").await;
        let _rx = h.connect(&session.id);
        let entry = h
            .store
            .create_prompt(PromptHistoryEntry::pending(session.id.clone(), "stop").interrupting())
            .await
            .unwrap();

        h.engine.process_prompt_queue(&session.id).await;
        assert_eq!(h.store.snapshot_prompt(&entry.id).unwrap().status, PromptStatus::Pending);

        h.engine.process_any_pending_prompt(&session.id).await;
        assert_eq!(h.store.snapshot_prompt(&entry.id).unwrap().status, PromptStatus::Sent);
    }

    #[tokio::test]
    async fn session_without_thread_fails_prompt() {
        let h = harness();
        let session = h.store.create_session(Session::new("u", "s", "m")).await.unwrap();
        let _rx = h.connect(&session.id);
        let entry = h
            .store
            .create_prompt(PromptHistoryEntry::pending(session.id.clone(), "x"))
            .await
            .unwrap();

        h.engine.process_any_pending_prompt(&session.id).await;
        assert_eq!(h.store.snapshot_prompt(&entry.id).unwrap().status, PromptStatus::Failed);
    }

    #[tokio::test]
    async fn notify_forwards_user_turn() {
        let h = harness();
        let session = h.mapped_session("t-1").await;
        let mut rx = h.connect(&session.id);
        let interaction = h.waiting_interaction(&session, "platform prompt").await;

        h.engine
            .notify_new_interaction(&session.id, &interaction)
            .await
            .unwrap();

        let frame = decode_frame(&rx.try_recv().unwrap());
        assert_eq!(frame["data"]["role"], "user");
        assert_eq!(frame["data"]["message"], "platform prompt");
        assert_eq!(frame["data"]["request_id"], interaction.id.as_str());
    }

    #[tokio::test]
    async fn notify_skips_other_agent_types() {
        let h = harness();
        let session = h.store.create_session(Session::new("u", "s", "m")).await.unwrap();
        let mut rx = h.connect(&session.id);
        let interaction = h.waiting_interaction(&session, "p").await;

        h.engine
            .notify_new_interaction(&session.id, &interaction)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn notify_without_connection_is_delivery_error() {
        let h = harness();
        let session = h.mapped_session("t-1").await;
        let interaction = h.waiting_interaction(&session, "p").await;
        let err = h
            .engine
            .notify_new_interaction(&session.id, &interaction)
            .await
            .unwrap_err();
        assert_matches!(err, SyncError::Delivery(DeliveryError::NoConnection(_)));
    }
}
