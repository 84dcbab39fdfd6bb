//! Design review comments, answered one at a time per planning session.
//!
//! A comment is `queued` once `queued_at` is set and `in flight` once it
//! carries a `request_id`. At most one comment per planning session is in
//! flight. It leaves flight when the agent completes the turn
//! ([`SyncEngine::finalize_comment_response`]) or when the response timer
//! fires.

use std::sync::Arc;

use chrono::Utc;
use tether_core::{
    ChatMessage, CommentId, DeliveryError, DesignReviewComment, Interaction, RequestId, SessionId,
    SpecTask,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{SyncEngine, agent_name};
use crate::errors::{Result, StoreContext, SyncError};

/// Recorded as the response when the agent never answers a comment.
pub const NO_RESPONSE_TEXT: &str = "[Agent did not respond - try sending your comment again]";

impl SyncEngine {
    /// Queue `comment` for the task's planning session and kick the queue.
    /// Tasks without a planning session have nobody to ask.
    #[instrument(skip_all, fields(task_id = %task.id, comment_id = %comment.id))]
    pub async fn queue_comment(
        self: &Arc<Self>,
        task: &SpecTask,
        mut comment: DesignReviewComment,
    ) -> Result<()> {
        let Some(planning) = task.planning_session_id.clone() else {
            debug!("task has no planning session");
            return Ok(());
        };
        comment.queued_at = Some(Utc::now());
        let _ = self
            .store
            .update_comment(comment)
            .await
            .op("update_comment")?;
        self.spawn_comment_processing(planning);
        Ok(())
    }

    fn spawn_comment_processing(self: &Arc<Self>, planning: SessionId) {
        let engine = Arc::clone(self);
        self.spawn("comment_queue", async move {
            engine.process_next_comment(&planning).await;
        });
    }

    /// Send the oldest queued comment unless one is already in flight.
    ///
    /// Runs under the planning session's gate, so the in-flight check and
    /// the send that marks the next comment in flight never interleave with
    /// another pass for the same session.
    #[instrument(skip_all, fields(session_id = %planning))]
    pub async fn process_next_comment(self: &Arc<Self>, planning: &SessionId) {
        let gate = self.comment_gate(planning);
        let _pass = gate.lock().await;
        loop {
            match self.store.in_flight_comment(planning).await {
                Ok(None) => {}
                Ok(Some(comment)) => {
                    debug!(comment_id = %comment.id, "comment already in flight");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "in-flight comment lookup failed");
                    return;
                }
            }
            let comment = match self.store.next_queued_comment(planning).await {
                Ok(Some(comment)) => comment,
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "comment queue lookup failed");
                    return;
                }
            };

            let comment_id = comment.id.clone();
            match self.send_comment(planning, comment.clone()).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(comment_id = %comment_id, error = %e, kind = %e.kind(), "review comment not sent, skipping");
                    let mut comment = comment;
                    comment.queued_at = None;
                    if let Err(e) = self.store.update_comment(comment).await {
                        warn!(comment_id = %comment_id, error = %e, "failed to dequeue comment");
                        return;
                    }
                }
            }
        }
    }

    fn comment_gate(&self, planning: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.comment_gates.entry(planning.clone()).or_default().value())
    }

    async fn send_comment(
        self: &Arc<Self>,
        planning: &SessionId,
        mut comment: DesignReviewComment,
    ) -> Result<()> {
        let review = self
            .store
            .get_review(&comment.review_id)
            .await
            .op("get_review")?;
        let task = self
            .store
            .get_task(&review.task_id)
            .await
            .op("get_task")?;
        let target = self.connected_session_for_task(&task).await?;
        let session = self.store.get_session(&target).await.op("get_session")?;

        let prompt = comment.agent_prompt(&task);
        let interaction = Interaction::waiting(
            session.id.clone(),
            session.owner.clone(),
            session.generation,
            prompt.clone(),
        );
        let interaction = self
            .store
            .create_interaction(interaction)
            .await
            .op("create_interaction")?;
        self.begin_turn(&session.id, interaction.id.clone()).await;

        let request_id = RequestId::new();
        self.state
            .register_request(request_id.clone(), session.id.clone());
        let command = ChatMessage::new(prompt, request_id.as_str())
            .thread(session.thread_id().cloned())
            .agent_name(agent_name(&session))
            .into_command();
        if let Err(e) = self.queue_or_send(&session.id, command) {
            let _ = self.state.take_request(&request_id);
            return Err(e.into());
        }

        comment.request_id = Some(request_id.clone());
        comment.interaction_id = Some(interaction.id.clone());
        let comment_id = comment.id.clone();
        if let Err(e) = self.store.update_comment(comment).await {
            warn!(comment_id = %comment_id, error = %e, "sent comment but failed to mark it in flight");
        }
        info!(
            comment_id = %comment_id,
            session_id = %session.id,
            request_id = %request_id,
            "review comment sent to agent"
        );
        self.arm_comment_timeout(planning.clone(), comment_id);
        Ok(())
    }

    /// The planning session if its agent is connected, else any connected
    /// session linked to the same task.
    async fn connected_session_for_task(&self, task: &SpecTask) -> Result<SessionId> {
        if let Some(planning) = &task.planning_session_id {
            if self.connections.is_connected(planning) {
                return Ok(planning.clone());
            }
        }
        for agent in self.connections.connected_agents() {
            let Some(session_id) = agent.as_session_id() else {
                continue;
            };
            match self.store.get_session(&session_id).await {
                Ok(session) if session.metadata.task_id.as_ref() == Some(&task.id) => {
                    return Ok(session_id);
                }
                Ok(_) => {}
                Err(e) => debug!(session_id = %session_id, error = %e, "skipping unreadable session"),
            }
        }
        Err(DeliveryError::NoConnection(format!("task {}", task.id)).into())
    }

    fn arm_comment_timeout(self: &Arc<Self>, planning: SessionId, comment_id: CommentId) {
        let token = CancellationToken::new();
        if let Some(previous) = self
            .comment_timers
            .lock()
            .insert(planning.clone(), token.clone())
        {
            previous.cancel();
        }
        let engine = Arc::clone(self);
        let deadline = Instant::now() + self.config.comment_response_timeout;
        self.spawn("comment_timeout", async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    engine.expire_comment(&planning, &comment_id).await;
                }
            }
        });
    }

    async fn expire_comment(self: &Arc<Self>, planning: &SessionId, comment_id: &CommentId) {
        let mut comment = match self.store.get_comment(comment_id).await {
            Ok(comment) => comment,
            Err(e) => {
                warn!(comment_id = %comment_id, error = %e, "timed out comment not found");
                return;
            }
        };
        if !comment.is_in_flight() || comment.agent_response.is_some() {
            return;
        }
        if let Some(req) = &comment.request_id {
            let _ = self.state.take_request(req);
        }
        comment.record_response(NO_RESPONSE_TEXT);
        comment.settle();
        if let Err(e) = self.store.update_comment(comment).await {
            warn!(comment_id = %comment_id, error = %e, "failed to record comment timeout");
            return;
        }
        warn!(comment_id = %comment_id, session_id = %planning, "agent did not answer review comment");
        self.process_next_comment(planning).await;
    }

    /// Mark the comment awaiting `request_id` answered and advance its
    /// planning session's queue.
    #[instrument(skip_all, fields(request_id = %request_id))]
    pub async fn finalize_comment_response(self: &Arc<Self>, request_id: &RequestId) -> Result<()> {
        if request_id.is_empty() {
            return Err(SyncError::InvalidState("request id is empty".into()));
        }
        let Some(mut comment) = self
            .store
            .comment_by_request(request_id)
            .await
            .op("comment_by_request")?
        else {
            return Err(SyncError::CommentNotFound(format!("request {request_id}")));
        };
        let comment_id = comment.id.clone();
        let review_id = comment.review_id.clone();
        comment.settle();
        let _ = self
            .store
            .update_comment(comment)
            .await
            .op("update_comment")?;
        info!(comment_id = %comment_id, "review comment answered");

        let planning = match self.store.get_review(&review_id).await {
            Ok(review) => match self.store.get_task(&review.task_id).await {
                Ok(task) => task.planning_session_id,
                Err(e) => {
                    debug!(error = %e, "task for answered comment not found");
                    None
                }
            },
            Err(e) => {
                debug!(error = %e, "review for answered comment not found");
                None
            }
        };
        let Some(planning) = planning else {
            return Ok(());
        };

        if let Some(timer) = self.comment_timers.lock().remove(&planning) {
            timer.cancel();
        }
        self.process_next_comment(&planning).await;
        Ok(())
    }

    /// Stamp a turn's response onto the comment it answers.
    pub async fn link_agent_response_to_comment(&self, interaction: &Interaction) -> Result<()> {
        if interaction.id.is_empty() {
            return Err(SyncError::InvalidState("interaction id is empty".into()));
        }
        let Some(mut comment) = self
            .store
            .comment_by_interaction(&interaction.id)
            .await
            .op("comment_by_interaction")?
        else {
            return Err(SyncError::CommentNotFound(format!(
                "interaction {}",
                interaction.id
            )));
        };
        comment.record_response(interaction.response.clone());
        let _ = self
            .store
            .update_comment(comment)
            .await
            .op("update_comment")?;
        Ok(())
    }

    /// Startup recovery: release comments left in flight by a previous
    /// process and restart every queue that still has work.
    pub async fn resume_comment_queues(self: &Arc<Self>) -> Result<()> {
        let reset = self
            .store
            .reset_stuck_comments()
            .await
            .op("reset_stuck_comments")?;
        if reset > 0 {
            info!(reset, "released comments stuck in flight");
        }
        let sessions = self
            .store
            .sessions_with_pending_comments()
            .await
            .op("sessions_with_pending_comments")?;
        for planning in sessions {
            self.spawn_comment_processing(planning);
        }
        Ok(())
    }
}
