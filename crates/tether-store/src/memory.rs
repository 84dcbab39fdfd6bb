//! In-memory [`SyncStore`] implementation.
//!
//! Every trait call is counted per [`StoreOp`], and any operation can be made
//! to fail with [`InMemoryStore::fail_on`]. Tests use both to assert how many
//! durable reads and writes a sequence of events costs. With
//! [`InMemoryStore::yield_on_calls`] every call suspends once, like a networked
//! store would.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tether_core::{
    CommentId, DesignReview, DesignReviewComment, Interaction, InteractionId, PromptHistoryEntry,
    PromptId, PromptStatus, RequestId, ReviewId, Session, SessionId, SpecTask, TaskId,
};
use tracing::{debug, instrument};

use crate::error::{Result, StoreError};
use crate::store::{ListInteractionsQuery, ListSessionsQuery, SyncStore};

/// A [`SyncStore`] operation, for call counting and fault injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StoreOp {
    GetSession,
    CreateSession,
    UpdateSession,
    ListSessions,
    CreateInteraction,
    GetInteraction,
    UpdateInteraction,
    ListInteractions,
    CreatePrompt,
    NextPendingPrompt,
    AnyPendingPrompt,
    SetPromptStatus,
    CreateTask,
    GetTask,
    CreateReview,
    GetReview,
    CreateComment,
    GetComment,
    UpdateComment,
    CommentByInteraction,
    CommentByRequest,
    InFlightComment,
    NextQueuedComment,
    SessionsWithPendingComments,
    ResetStuckComments,
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionId, Session>,
    interactions: HashMap<InteractionId, Interaction>,
    prompts: HashMap<PromptId, PromptHistoryEntry>,
    tasks: HashMap<TaskId, SpecTask>,
    reviews: HashMap<ReviewId, DesignReview>,
    comments: HashMap<CommentId, DesignReviewComment>,
}

impl Tables {
    fn planning_session_of(&self, comment: &DesignReviewComment) -> Option<&SessionId> {
        let review = self.reviews.get(&comment.review_id)?;
        self.tasks.get(&review.task_id)?.planning_session_id.as_ref()
    }

    fn comments_for<'a>(
        &'a self,
        planning_session_id: &'a SessionId,
    ) -> impl Iterator<Item = &'a DesignReviewComment> + 'a {
        self.comments
            .values()
            .filter(move |c| self.planning_session_of(c) == Some(planning_session_id))
    }
}

/// Process-local store backed by hash maps.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    calls: Mutex<HashMap<StoreOp, u64>>,
    faults: Mutex<HashSet<StoreOp>>,
    yielding: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `op` has been invoked.
    pub fn calls(&self, op: StoreOp) -> u64 {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Reset every call counter to zero.
    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    /// Make every subsequent `op` call fail with [`StoreError::Database`].
    pub fn fail_on(&self, op: StoreOp) {
        let _ = self.faults.lock().insert(op);
    }

    /// Stop failing `op`.
    pub fn heal(&self, op: StoreOp) {
        let _ = self.faults.lock().remove(&op);
    }

    /// Suspend once at the start of every call so concurrent callers
    /// interleave at each store access.
    pub fn yield_on_calls(&self, enabled: bool) {
        self.yielding.store(enabled, Ordering::Relaxed);
    }

    /// All sessions, oldest first. Not counted.
    pub fn snapshot_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<_> = self.tables.read().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| (a.created, &a.id).cmp(&(b.created, &b.id)));
        sessions
    }

    /// All interactions of a session across generations, oldest first. Not counted.
    pub fn snapshot_interactions(&self, session_id: &SessionId) -> Vec<Interaction> {
        let mut list: Vec<_> = self
            .tables
            .read()
            .interactions
            .values()
            .filter(|i| &i.session_id == session_id)
            .cloned()
            .collect();
        sort_interactions(&mut list);
        list
    }

    /// A prompt entry by ID. Not counted.
    pub fn snapshot_prompt(&self, id: &PromptId) -> Option<PromptHistoryEntry> {
        self.tables.read().prompts.get(id).cloned()
    }

    /// A comment by ID. Not counted.
    pub fn snapshot_comment(&self, id: &CommentId) -> Option<DesignReviewComment> {
        self.tables.read().comments.get(id).cloned()
    }

    async fn record(&self, op: StoreOp) -> Result<()> {
        if self.yielding.load(Ordering::Relaxed) {
            tokio::task::yield_now().await;
        }
        *self.calls.lock().entry(op).or_default() += 1;
        if self.faults.lock().contains(&op) {
            debug!(?op, "injected store failure");
            return Err(StoreError::Database(format!("injected failure: {op:?}")));
        }
        Ok(())
    }
}

fn sort_interactions(list: &mut [Interaction]) {
    list.sort_by(|a, b| (a.created, &a.id).cmp(&(b.created, &b.id)));
}

fn oldest_by_queue(list: &mut [DesignReviewComment]) {
    list.sort_by(|a, b| (a.queued_at, a.created, &a.id).cmp(&(b.queued_at, b.created, &b.id)));
}

#[async_trait]
impl SyncStore for InMemoryStore {
    // ── Sessions ────────────────────────────────────────────────────

    async fn get_session(&self, id: &SessionId) -> Result<Session> {
        self.record(StoreOp::GetSession).await?;
        self.tables
            .read()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("session", id))
    }

    #[instrument(skip(self, session), fields(session_id = %session.id))]
    async fn create_session(&self, session: Session) -> Result<Session> {
        self.record(StoreOp::CreateSession).await?;
        let mut tables = self.tables.write();
        if tables.sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!("session {} exists", session.id)));
        }
        let _ = tables.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn update_session(&self, session: Session) -> Result<Session> {
        self.record(StoreOp::UpdateSession).await?;
        let mut tables = self.tables.write();
        match tables.sessions.get_mut(&session.id) {
            Some(slot) => {
                *slot = session.clone();
                Ok(session)
            }
            None => Err(StoreError::not_found("session", &session.id)),
        }
    }

    async fn list_sessions(&self, query: &ListSessionsQuery) -> Result<Vec<Session>> {
        self.record(StoreOp::ListSessions).await?;
        let mut matching: Vec<_> = self
            .tables
            .read()
            .sessions
            .values()
            .filter(|s| query.thread_id.is_none() || s.thread_id() == query.thread_id.as_ref())
            .cloned()
            .collect();
        matching.sort_by(|a, b| (a.created, &a.id).cmp(&(b.created, &b.id)));
        if query.per_page == 0 {
            return Ok(matching);
        }
        Ok(matching
            .into_iter()
            .skip(query.page * query.per_page)
            .take(query.per_page)
            .collect())
    }

    // ── Interactions ────────────────────────────────────────────────

    #[instrument(skip(self, interaction), fields(session_id = %interaction.session_id, interaction_id = %interaction.id))]
    async fn create_interaction(&self, interaction: Interaction) -> Result<Interaction> {
        self.record(StoreOp::CreateInteraction).await?;
        let mut tables = self.tables.write();
        let session = tables
            .sessions
            .get(&interaction.session_id)
            .ok_or_else(|| StoreError::not_found("session", &interaction.session_id))?;
        if interaction.generation < session.generation {
            return Err(StoreError::Conflict(format!(
                "stale generation {} for session {} (current {})",
                interaction.generation, session.id, session.generation
            )));
        }
        let _ = tables
            .interactions
            .insert(interaction.id.clone(), interaction.clone());
        Ok(interaction)
    }

    async fn get_interaction(&self, id: &InteractionId) -> Result<Interaction> {
        self.record(StoreOp::GetInteraction).await?;
        self.tables
            .read()
            .interactions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("interaction", id))
    }

    async fn update_interaction(&self, interaction: Interaction) -> Result<Interaction> {
        self.record(StoreOp::UpdateInteraction).await?;
        let mut tables = self.tables.write();
        match tables.interactions.get_mut(&interaction.id) {
            Some(slot) => {
                *slot = interaction.clone();
                Ok(interaction)
            }
            None => Err(StoreError::not_found("interaction", &interaction.id)),
        }
    }

    async fn list_interactions(&self, query: &ListInteractionsQuery) -> Result<Vec<Interaction>> {
        self.record(StoreOp::ListInteractions).await?;
        let mut list: Vec<_> = self
            .tables
            .read()
            .interactions
            .values()
            .filter(|i| i.session_id == query.session_id && i.generation == query.generation)
            .cloned()
            .collect();
        sort_interactions(&mut list);
        Ok(list)
    }

    // ── Prompt queue ────────────────────────────────────────────────

    async fn create_prompt(&self, entry: PromptHistoryEntry) -> Result<PromptHistoryEntry> {
        self.record(StoreOp::CreatePrompt).await?;
        let _ = self
            .tables
            .write()
            .prompts
            .insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn next_pending_prompt(&self, session_id: &SessionId) -> Result<Option<PromptHistoryEntry>> {
        self.record(StoreOp::NextPendingPrompt).await?;
        Ok(self
            .tables
            .read()
            .prompts
            .values()
            .filter(|p| {
                &p.session_id == session_id && p.status == PromptStatus::Pending && !p.interrupt
            })
            .min_by(|a, b| (a.created, &a.id).cmp(&(b.created, &b.id)))
            .cloned())
    }

    async fn any_pending_prompt(&self, session_id: &SessionId) -> Result<Option<PromptHistoryEntry>> {
        self.record(StoreOp::AnyPendingPrompt).await?;
        Ok(self
            .tables
            .read()
            .prompts
            .values()
            .filter(|p| &p.session_id == session_id && p.status != PromptStatus::Sent)
            .min_by(|a, b| (a.created, &a.id).cmp(&(b.created, &b.id)))
            .cloned())
    }

    async fn set_prompt_status(&self, id: &PromptId, status: PromptStatus) -> Result<()> {
        self.record(StoreOp::SetPromptStatus).await?;
        let mut tables = self.tables.write();
        let entry = tables
            .prompts
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("prompt", id))?;
        entry.status = status;
        entry.updated = chrono::Utc::now();
        Ok(())
    }

    // ── Tasks and reviews ───────────────────────────────────────────

    async fn create_task(&self, task: SpecTask) -> Result<SpecTask> {
        self.record(StoreOp::CreateTask).await?;
        let _ = self.tables.write().tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: &TaskId) -> Result<SpecTask> {
        self.record(StoreOp::GetTask).await?;
        self.tables
            .read()
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("task", id))
    }

    async fn create_review(&self, review: DesignReview) -> Result<DesignReview> {
        self.record(StoreOp::CreateReview).await?;
        let _ = self
            .tables
            .write()
            .reviews
            .insert(review.id.clone(), review.clone());
        Ok(review)
    }

    async fn get_review(&self, id: &ReviewId) -> Result<DesignReview> {
        self.record(StoreOp::GetReview).await?;
        self.tables
            .read()
            .reviews
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("review", id))
    }

    // ── Review comments ─────────────────────────────────────────────

    async fn create_comment(&self, comment: DesignReviewComment) -> Result<DesignReviewComment> {
        self.record(StoreOp::CreateComment).await?;
        let _ = self
            .tables
            .write()
            .comments
            .insert(comment.id.clone(), comment.clone());
        Ok(comment)
    }

    async fn get_comment(&self, id: &CommentId) -> Result<DesignReviewComment> {
        self.record(StoreOp::GetComment).await?;
        self.tables
            .read()
            .comments
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("comment", id))
    }

    #[instrument(skip(self, comment), fields(comment_id = %comment.id))]
    async fn update_comment(&self, comment: DesignReviewComment) -> Result<DesignReviewComment> {
        self.record(StoreOp::UpdateComment).await?;
        let mut tables = self.tables.write();
        match tables.comments.get_mut(&comment.id) {
            Some(slot) => {
                *slot = comment.clone();
                Ok(comment)
            }
            None => Err(StoreError::not_found("comment", &comment.id)),
        }
    }

    async fn comment_by_interaction(
        &self,
        interaction_id: &InteractionId,
    ) -> Result<Option<DesignReviewComment>> {
        self.record(StoreOp::CommentByInteraction).await?;
        Ok(self
            .tables
            .read()
            .comments
            .values()
            .find(|c| c.interaction_id.as_ref() == Some(interaction_id))
            .cloned())
    }

    async fn comment_by_request(&self, request_id: &RequestId) -> Result<Option<DesignReviewComment>> {
        self.record(StoreOp::CommentByRequest).await?;
        Ok(self
            .tables
            .read()
            .comments
            .values()
            .find(|c| c.request_id.as_ref() == Some(request_id))
            .cloned())
    }

    async fn in_flight_comment(
        &self,
        planning_session_id: &SessionId,
    ) -> Result<Option<DesignReviewComment>> {
        self.record(StoreOp::InFlightComment).await?;
        let tables = self.tables.read();
        let mut in_flight: Vec<_> = tables
            .comments_for(planning_session_id)
            .filter(|c| c.is_in_flight())
            .cloned()
            .collect();
        oldest_by_queue(&mut in_flight);
        Ok(in_flight.into_iter().next())
    }

    async fn next_queued_comment(
        &self,
        planning_session_id: &SessionId,
    ) -> Result<Option<DesignReviewComment>> {
        self.record(StoreOp::NextQueuedComment).await?;
        let tables = self.tables.read();
        let mut queued: Vec<_> = tables
            .comments_for(planning_session_id)
            .filter(|c| c.is_queued())
            .cloned()
            .collect();
        oldest_by_queue(&mut queued);
        Ok(queued.into_iter().next())
    }

    async fn sessions_with_pending_comments(&self) -> Result<Vec<SessionId>> {
        self.record(StoreOp::SessionsWithPendingComments).await?;
        let tables = self.tables.read();
        let mut sessions: Vec<SessionId> = tables
            .comments
            .values()
            .filter(|c| c.is_queued())
            .filter_map(|c| tables.planning_session_of(c).cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        sessions.sort();
        Ok(sessions)
    }

    async fn reset_stuck_comments(&self) -> Result<u64> {
        self.record(StoreOp::ResetStuckComments).await?;
        let mut reset = 0;
        for comment in self.tables.write().comments.values_mut() {
            if comment.is_in_flight() && comment.agent_response.is_none() {
                comment.request_id = None;
                reset += 1;
            }
        }
        Ok(reset)
    }
}
