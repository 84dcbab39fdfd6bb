//! Tasks, design reviews and the comments the agent answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CommentId, InteractionId, RequestId, ReviewId, SessionId, TaskId};

/// A unit of work with an associated planning session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecTask {
    /// Unique ID.
    pub id: TaskId,
    /// Task name.
    pub name: String,
    /// Session whose agent answers design review comments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planning_session_id: Option<SessionId>,
}

/// A design review document attached to a task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignReview {
    /// Unique ID.
    pub id: ReviewId,
    /// Owning task.
    pub task_id: TaskId,
}

/// A reviewer question the agent is asked to answer.
///
/// Queue state lives on the record itself: `queued_at` set means waiting,
/// `request_id` set means in flight, both cleared means answered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignReviewComment {
    /// Unique ID.
    pub id: CommentId,
    /// Owning review.
    pub review_id: ReviewId,
    /// Comment text.
    pub body: String,
    /// Section or passage the comment refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_text: Option<String>,
    /// Who wrote the comment.
    pub commented_by: String,
    /// Interaction created when the comment was sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction_id: Option<InteractionId>,
    /// Request awaiting the agent's answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// When the comment entered the queue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    /// The agent's answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_response: Option<String>,
    /// When the answer was last updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_response_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created: DateTime<Utc>,
}

impl DesignReviewComment {
    /// Create an unqueued comment.
    pub fn new(review_id: ReviewId, commented_by: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: CommentId::new(),
            review_id,
            body: body.into(),
            quoted_text: None,
            commented_by: commented_by.into(),
            interaction_id: None,
            request_id: None,
            queued_at: None,
            agent_response: None,
            agent_response_at: None,
            created: Utc::now(),
        }
    }

    /// Sent to the agent and awaiting an answer.
    pub fn is_in_flight(&self) -> bool {
        self.request_id.is_some()
    }

    /// Waiting in the queue, not yet sent.
    pub fn is_queued(&self) -> bool {
        self.queued_at.is_some() && self.request_id.is_none()
    }

    /// Stamp the agent's (possibly partial) answer.
    pub fn record_response(&mut self, response: impl Into<String>) {
        self.agent_response = Some(response.into());
        self.agent_response_at = Some(Utc::now());
    }

    /// Mark answered: leave the queue and clear the in-flight marker.
    pub fn settle(&mut self) {
        self.request_id = None;
        self.queued_at = None;
    }

    /// The prompt sent to the agent for this comment.
    pub fn agent_prompt(&self, task: &SpecTask) -> String {
        let mut prompt = format!(
            "A reviewer left a comment on the design for \"{}\".\n\n",
            task.name
        );
        if let Some(quoted) = &self.quoted_text {
            prompt.push_str("Regarding:\n> ");
            prompt.push_str(&quoted.replace('\n', "\n> "));
            prompt.push_str("\n\n");
        }
        prompt.push_str(&format!("Comment from {}:\n{}\n\n", self.commented_by, self.body));
        prompt.push_str("Please respond to the comment and update the design documents if needed.");
        prompt
    }
}
