//! Platform sessions and their metadata bag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, TaskId, ThreadId};

/// Maximum retained title history entries.
pub const MAX_TITLE_HISTORY: usize = 20;

/// Who owns a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    /// An individual user.
    #[default]
    User,
    /// A service account or runner.
    System,
}

/// One entry in a session's title history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleHistoryEntry {
    /// The title as reported by the agent.
    pub title: String,
    /// When the title was applied.
    pub changed_at: DateTime<Utc>,
}

/// Extensible metadata carried by every session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMetadata {
    /// The external agent thread this session mirrors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    /// Agent type tag (e.g. `zed_external`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    /// Linked unit of work.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// Newest first, bounded by [`MAX_TITLE_HISTORY`].
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub title_history: Vec<TitleHistoryEntry>,
    /// Set when the thread was opened by the user inside the agent.
    pub user_created: bool,
    /// Opaque agent launch configuration, copied to derived sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_config: Option<serde_json::Value>,
}

impl SessionMetadata {
    /// Record a new title at the head of the history.
    pub fn push_title(&mut self, title: impl Into<String>, at: DateTime<Utc>) {
        self.title_history.insert(
            0,
            TitleHistoryEntry {
                title: title.into(),
                changed_at: at,
            },
        );
        self.title_history.truncate(MAX_TITLE_HISTORY);
    }
}

/// A durable conversation record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique ID.
    pub id: SessionId,
    /// Display name.
    pub name: String,
    /// Owning user (or service) ID.
    pub owner: String,
    /// Kind of owner.
    pub owner_type: OwnerType,
    /// Organization scope, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    /// Parent app reference, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_app: Option<String>,
    /// Model name.
    pub model_name: String,
    /// Current generation. Interactions created for an older generation are
    /// invisible to listing.
    pub generation: u64,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Last update time.
    pub updated: DateTime<Utc>,
    /// Metadata bag.
    pub metadata: SessionMetadata,
}

impl Session {
    /// Create a session with a fresh ID and empty metadata.
    pub fn new(owner: impl Into<String>, name: impl Into<String>, model_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            name: name.into(),
            owner: owner.into(),
            owner_type: OwnerType::User,
            organization_id: None,
            parent_app: None,
            model_name: model_name.into(),
            generation: 0,
            created: now,
            updated: now,
            metadata: SessionMetadata::default(),
        }
    }

    /// Derive a new session for `thread_id` that inherits ownership and
    /// configuration from `self`.
    #[must_use]
    pub fn derive_for_thread(&self, thread_id: ThreadId, name: impl Into<String>) -> Self {
        let mut session = Self::new(self.owner.clone(), name, self.model_name.clone());
        session.owner_type = self.owner_type;
        session.organization_id.clone_from(&self.organization_id);
        session.parent_app.clone_from(&self.parent_app);
        session.metadata = SessionMetadata {
            thread_id: Some(thread_id),
            agent_type: self.metadata.agent_type.clone(),
            agent_config: self.metadata.agent_config.clone(),
            ..SessionMetadata::default()
        };
        session
    }

    /// The thread ID recorded in metadata, if any.
    pub fn thread_id(&self) -> Option<&ThreadId> {
        self.metadata.thread_id.as_ref()
    }

    /// Apply a new title and record it in history.
    pub fn rename(&mut self, title: impl Into<String>) {
        let title = title.into();
        let now = Utc::now();
        self.metadata.push_title(title.clone(), now);
        self.name = title;
        self.updated = now;
    }
}
