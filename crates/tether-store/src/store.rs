//! The durable-store boundary.
//!
//! Implementations must be safe for concurrent invocation. The engine never
//! holds its own locks across these calls.

use async_trait::async_trait;
use tether_core::{
    CommentId, DesignReview, DesignReviewComment, Interaction, InteractionId, PromptHistoryEntry,
    PromptId, PromptStatus, RequestId, ReviewId, Session, SessionId, SpecTask, TaskId, ThreadId,
};

use crate::error::Result;

/// Session listing filter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListSessionsQuery {
    /// Only sessions whose metadata carries this thread ID.
    pub thread_id: Option<ThreadId>,
    /// Zero-based page index.
    pub page: usize,
    /// Page size. Zero means unbounded.
    pub per_page: usize,
}

impl ListSessionsQuery {
    /// First page of sessions mirroring `thread_id`.
    pub fn by_thread(thread_id: &ThreadId, per_page: usize) -> Self {
        Self {
            thread_id: Some(thread_id.clone()),
            page: 0,
            per_page,
        }
    }
}

/// Interaction listing filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListInteractionsQuery {
    /// Owning session.
    pub session_id: SessionId,
    /// Only interactions of this generation.
    pub generation: u64,
}

impl ListInteractionsQuery {
    /// Interactions of the session's current generation.
    pub fn current(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            generation: session.generation,
        }
    }
}

/// Durable persistence consumed by the sync engine.
#[async_trait]
pub trait SyncStore: Send + Sync {
    // ── Sessions ────────────────────────────────────────────────────

    /// Load a session. Missing sessions are [`StoreError::NotFound`](crate::StoreError::NotFound).
    async fn get_session(&self, id: &SessionId) -> Result<Session>;

    /// Insert a new session.
    async fn create_session(&self, session: Session) -> Result<Session>;

    /// Replace an existing session.
    async fn update_session(&self, session: Session) -> Result<Session>;

    /// List sessions ordered by creation time.
    async fn list_sessions(&self, query: &ListSessionsQuery) -> Result<Vec<Session>>;

    // ── Interactions ────────────────────────────────────────────────

    /// Insert a new interaction. Interactions for a generation older than the
    /// session's current one are rejected.
    async fn create_interaction(&self, interaction: Interaction) -> Result<Interaction>;

    /// Load an interaction.
    async fn get_interaction(&self, id: &InteractionId) -> Result<Interaction>;

    /// Replace an existing interaction.
    async fn update_interaction(&self, interaction: Interaction) -> Result<Interaction>;

    /// List interactions oldest first.
    async fn list_interactions(&self, query: &ListInteractionsQuery) -> Result<Vec<Interaction>>;

    // ── Prompt queue ────────────────────────────────────────────────

    /// Queue a prompt.
    async fn create_prompt(&self, entry: PromptHistoryEntry) -> Result<PromptHistoryEntry>;

    /// Oldest pending non-interrupt prompt for a session.
    async fn next_pending_prompt(&self, session_id: &SessionId) -> Result<Option<PromptHistoryEntry>>;

    /// Oldest pending or failed prompt of any kind for a session.
    async fn any_pending_prompt(&self, session_id: &SessionId) -> Result<Option<PromptHistoryEntry>>;

    /// Transition a prompt's status.
    async fn set_prompt_status(&self, id: &PromptId, status: PromptStatus) -> Result<()>;

    // ── Tasks and reviews ───────────────────────────────────────────

    /// Insert a task.
    async fn create_task(&self, task: SpecTask) -> Result<SpecTask>;

    /// Load a task.
    async fn get_task(&self, id: &TaskId) -> Result<SpecTask>;

    /// Insert a design review.
    async fn create_review(&self, review: DesignReview) -> Result<DesignReview>;

    /// Load a design review.
    async fn get_review(&self, id: &ReviewId) -> Result<DesignReview>;

    // ── Review comments ─────────────────────────────────────────────

    /// Insert a comment.
    async fn create_comment(&self, comment: DesignReviewComment) -> Result<DesignReviewComment>;

    /// Load a comment.
    async fn get_comment(&self, id: &CommentId) -> Result<DesignReviewComment>;

    /// Replace an existing comment.
    async fn update_comment(&self, comment: DesignReviewComment) -> Result<DesignReviewComment>;

    /// The comment whose answer is streamed into `interaction_id`.
    async fn comment_by_interaction(
        &self,
        interaction_id: &InteractionId,
    ) -> Result<Option<DesignReviewComment>>;

    /// The comment awaiting `request_id`.
    async fn comment_by_request(&self, request_id: &RequestId) -> Result<Option<DesignReviewComment>>;

    /// The comment currently in flight for a planning session.
    async fn in_flight_comment(
        &self,
        planning_session_id: &SessionId,
    ) -> Result<Option<DesignReviewComment>>;

    /// Oldest queued, not yet sent comment for a planning session.
    async fn next_queued_comment(
        &self,
        planning_session_id: &SessionId,
    ) -> Result<Option<DesignReviewComment>>;

    /// Planning sessions with at least one queued comment.
    async fn sessions_with_pending_comments(&self) -> Result<Vec<SessionId>>;

    /// Clear the in-flight marker of every comment left unanswered by a
    /// previous process. Returns the number of comments reset.
    async fn reset_stuck_comments(&self) -> Result<u64>;
}
