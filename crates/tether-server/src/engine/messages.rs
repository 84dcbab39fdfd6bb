//! Streamed content reconciliation and turn completion.

use std::sync::Arc;

use tether_core::{
    AgentId, FrontendEvent, Interaction, MessageAdded, MessageRole, RequestId, SessionId, ThreadId,
};
use tether_store::ListInteractionsQuery;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

use super::{ON_THE_FLY_TITLE, SyncEngine};
use crate::errors::{Result, StoreContext, SyncError};
use crate::sync::StreamingContext;

impl SyncEngine {
    /// `message_added`: a user turn starts a new interaction, assistant
    /// content is reconciled into the current one.
    #[instrument(skip_all, fields(thread_id = %added.thread_id, message_id = %added.message_id, role = ?added.role))]
    pub(crate) async fn handle_message_added(
        &self,
        agent_id: &AgentId,
        added: MessageAdded,
    ) -> Result<()> {
        let session_id = match self.resolve_thread(&added.thread_id).await? {
            Some(session_id) => session_id,
            None => match added.role {
                MessageRole::User => self.create_session_on_the_fly(agent_id, &added.thread_id).await?,
                MessageRole::Assistant => {
                    return Err(SyncError::SessionNotFound(added.thread_id.to_string()));
                }
            },
        };

        match added.role {
            MessageRole::User => self.apply_user_message(&session_id, added.content).await,
            MessageRole::Assistant => {
                self.apply_assistant_message(&session_id, &added.message_id, &added.content)
                    .await
            }
        }
    }

    async fn create_session_on_the_fly(
        &self,
        agent_id: &AgentId,
        thread_id: &ThreadId,
    ) -> Result<SessionId> {
        let reference = self.reference_session(agent_id).await?;
        let session = reference.derive_for_thread(thread_id.clone(), ON_THE_FLY_TITLE);
        let session = self
            .store
            .create_session(session)
            .await
            .op("create_session")?;
        self.state.map_thread(thread_id.clone(), session.id.clone());
        info!(session_id = %session.id, "created session for unmapped thread");
        Ok(session.id)
    }

    async fn apply_user_message(&self, session_id: &SessionId, content: String) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)
            .await
            .op("get_session")?;
        let interaction = Interaction::waiting(
            session.id.clone(),
            session.owner.clone(),
            session.generation,
            content,
        );
        let interaction = self
            .store
            .create_interaction(interaction)
            .await
            .op("create_interaction")?;
        self.begin_turn(&session.id, interaction.id.clone()).await;
        info!(session_id = %session.id, interaction_id = %interaction.id, "user turn recorded");
        Ok(())
    }

    async fn apply_assistant_message(
        &self,
        session_id: &SessionId,
        message_id: &str,
        content: &str,
    ) -> Result<()> {
        let slot = self.streaming.slot(session_id);
        let mut guard = slot.lock().await;

        if guard.is_none() {
            match self.load_streaming_target(session_id).await {
                Ok(Some(ctx)) => *guard = Some(ctx),
                Ok(None) => {
                    drop(guard);
                    self.streaming.discard(session_id, &slot);
                    debug!(session_id = %session_id, "no interaction to stream into");
                    return Ok(());
                }
                Err(e) => {
                    drop(guard);
                    self.streaming.discard(session_id, &slot);
                    return Err(e);
                }
            }
        }
        let Some(ctx) = guard.as_mut() else {
            return Ok(());
        };

        ctx.interaction.apply_message(message_id, content);
        ctx.dirty = true;

        let now = Instant::now();
        if ctx.write_due(now, self.config.write_throttle) {
            let _ = self
                .store
                .update_interaction(ctx.interaction.clone())
                .await
                .op("update_interaction")?;
            ctx.mark_written(now);
            trace!(interaction_id = %ctx.interaction.id, len = ctx.interaction.response.len(), "streaming write");
            if let Err(e) = self.link_agent_response_to_comment(&ctx.interaction).await {
                trace!(error = %e, "no comment linked to streaming turn");
            }
        } else {
            trace!(interaction_id = %ctx.interaction.id, "streaming write throttled");
        }

        if ctx.publish_due(now, self.config.publish_throttle) {
            if let Some(patch) = ctx.take_patch(now) {
                let _ = self.publisher.publish(FrontendEvent::InteractionPatch {
                    session_id: ctx.session.id.clone(),
                    interaction_id: ctx.interaction.id.clone(),
                    owner: ctx.session.owner.clone(),
                    offset: patch.offset,
                    patch: patch.patch,
                    total_length: patch.total_length,
                });
            }
        }
        Ok(())
    }

    /// First token of a turn: one session read and one interaction list.
    async fn load_streaming_target(&self, session_id: &SessionId) -> Result<Option<StreamingContext>> {
        let session = self
            .store
            .get_session(session_id)
            .await
            .op("get_session")?;
        let interactions = self
            .store
            .list_interactions(&ListInteractionsQuery::current(&session))
            .await
            .op("list_interactions")?;

        // A turn completed before any content arrived still takes the content.
        let target = self
            .current_waiting(session_id, &interactions)
            .or_else(|| {
                interactions
                    .iter()
                    .rev()
                    .find(|i| !i.is_waiting() && i.error.is_none() && i.response.is_empty())
            })
            .cloned();

        Ok(target.map(|interaction| {
            debug!(session_id = %session_id, interaction_id = %interaction.id, "streaming context loaded");
            StreamingContext::new(session, interaction)
        }))
    }

    /// The mapped waiting interaction if it is still waiting, else the
    /// newest waiting one.
    fn current_waiting<'a>(
        &self,
        session_id: &SessionId,
        interactions: &'a [Interaction],
    ) -> Option<&'a Interaction> {
        let mapped = self.state.waiting_interaction(session_id);
        mapped
            .and_then(|id| interactions.iter().find(|i| i.id == id && i.is_waiting()))
            .or_else(|| interactions.iter().rev().find(|i| i.is_waiting()))
    }

    /// `message_completed`: flush, complete, clear the cache, then advance
    /// the comment and prompt queues.
    #[instrument(skip_all, fields(thread_id = %thread_id))]
    pub(crate) async fn handle_message_completed(
        self: &Arc<Self>,
        thread_id: &ThreadId,
        request_id: Option<RequestId>,
    ) -> Result<()> {
        let Some(session_id) = self.resolve_thread(thread_id).await? else {
            warn!("completion for unknown thread");
            return Ok(());
        };
        if let Some(req) = &request_id {
            let _ = self.state.take_request(req);
        }

        let result = self.finish_turn(&session_id).await;
        let _ = self.streaming.remove(&session_id);
        let completed = result?;

        self.spawn_after_completion(session_id, request_id, completed);
        Ok(())
    }

    async fn finish_turn(&self, session_id: &SessionId) -> Result<Option<Interaction>> {
        let slot = self.streaming.existing(session_id);
        let mut guard = match &slot {
            Some(slot) => Some(slot.lock().await),
            None => None,
        };

        if let Some(ctx) = guard
            .as_mut()
            .and_then(|g| g.as_mut())
            .filter(|ctx| ctx.dirty)
        {
            let _ = self
                .store
                .update_interaction(ctx.interaction.clone())
                .await
                .op("update_interaction")?;
            ctx.mark_written(Instant::now());
            debug!(interaction_id = %ctx.interaction.id, "flushed pending streaming write");
        }

        let session = self
            .store
            .get_session(session_id)
            .await
            .op("get_session")?;
        let interactions = self
            .store
            .list_interactions(&ListInteractionsQuery::current(&session))
            .await
            .op("list_interactions")?;
        let Some(waiting) = self.current_waiting(session_id, &interactions) else {
            debug!(session_id = %session_id, "no waiting interaction to complete");
            return Ok(None);
        };

        let mut interaction = self
            .store
            .get_interaction(&waiting.id)
            .await
            .op("get_interaction")?;
        if !interaction.is_waiting() {
            debug!(interaction_id = %interaction.id, "interaction already settled");
            return Ok(None);
        }
        interaction.complete();
        let interaction = self
            .store
            .update_interaction(interaction)
            .await
            .op("update_interaction")?;
        if let Some(g) = guard.as_mut() {
            **g = None;
        }
        drop(guard);

        info!(
            session_id = %session_id,
            interaction_id = %interaction.id,
            response_len = interaction.response.len(),
            "turn completed"
        );
        self.publish_session(&session, Some(interaction.id.clone()));
        Ok(Some(interaction))
    }

    fn spawn_after_completion(
        self: &Arc<Self>,
        session_id: SessionId,
        request_id: Option<RequestId>,
        completed: Option<Interaction>,
    ) {
        let engine = Arc::clone(self);
        self.spawn("after_completion", async move {
            if let Some(interaction) = &completed {
                if let Err(e) = engine.link_agent_response_to_comment(interaction).await {
                    debug!(error = %e, "completed turn not linked to a comment");
                }
            }

            let request_id = match request_id {
                Some(req) => Some(req),
                None => match engine.store.in_flight_comment(&session_id).await {
                    Ok(comment) => comment.and_then(|c| c.request_id),
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "in-flight comment lookup failed");
                        None
                    }
                },
            };
            if let Some(req) = request_id {
                if let Err(e) = engine.finalize_comment_response(&req).await {
                    debug!(request_id = %req, error = %e, "no comment to finalize");
                }
            }

            engine.process_prompt_queue(&session_id).await;
        });
    }

    /// `thread_load_error`: fail the waiting interaction.
    #[instrument(skip_all, fields(thread_id = ?thread_id, request_id = ?request_id))]
    pub(crate) async fn handle_thread_load_error(
        &self,
        thread_id: Option<&ThreadId>,
        request_id: Option<&RequestId>,
        error: &str,
    ) -> Result<()> {
        let mapped = thread_id.and_then(|t| self.state.session_for_thread(t));
        let session_id = mapped.or_else(|| request_id.and_then(|r| self.state.take_request(r)));
        let Some(session_id) = session_id else {
            warn!(error, "thread load error for unknown session");
            return Ok(());
        };

        let session = self
            .store
            .get_session(&session_id)
            .await
            .op("get_session")?;
        let interactions = self
            .store
            .list_interactions(&ListInteractionsQuery::current(&session))
            .await
            .op("list_interactions")?;
        let Some(waiting) = self.current_waiting(&session_id, &interactions).cloned() else {
            debug!(session_id = %session_id, "no waiting interaction to fail");
            return Ok(());
        };

        let mut interaction = waiting;
        interaction.fail(format!("Thread load failed: {error}"));
        let interaction = self
            .store
            .update_interaction(interaction)
            .await
            .op("update_interaction")?;
        let _ = self.streaming.remove(&session_id);
        warn!(session_id = %session_id, interaction_id = %interaction.id, error, "agent failed to load thread");
        self.publish_session(&session, Some(interaction.id));
        Ok(())
    }
}
