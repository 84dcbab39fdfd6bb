//! Events published to frontend observers after reconciliation.
//!
//! [`FrontendEvent::SessionUpdate`] carries a full session snapshot and is sent
//! on coarse changes (turn completion, title change, load errors).
//! [`FrontendEvent::InteractionPatch`] carries an incremental response patch
//! for in-flight streaming turns.

use serde::{Deserialize, Serialize};

use crate::ids::{InteractionId, SessionId};
use crate::session::Session;

/// An update for a session's subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrontendEvent {
    /// Full session snapshot.
    SessionUpdate {
        /// Updated session.
        session_id: SessionId,
        /// Interaction that triggered the update, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        interaction_id: Option<InteractionId>,
        /// Session owner. Used for topic routing.
        owner: String,
        /// The snapshot.
        session: Box<Session>,
    },
    /// Incremental response content for a streaming turn.
    InteractionPatch {
        /// Owning session.
        session_id: SessionId,
        /// Interaction being streamed.
        interaction_id: InteractionId,
        /// Session owner. Used for topic routing.
        owner: String,
        /// Byte offset at which `patch` replaces the previous content.
        offset: usize,
        /// Replacement tail.
        patch: String,
        /// Byte length of the full content after applying the patch.
        total_length: usize,
    },
}

impl FrontendEvent {
    /// Build a session snapshot event.
    pub fn session_update(session: &Session, interaction_id: Option<InteractionId>) -> Self {
        Self::SessionUpdate {
            session_id: session.id.clone(),
            interaction_id,
            owner: session.owner.clone(),
            session: Box::new(session.clone()),
        }
    }

    /// Session the event concerns.
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::SessionUpdate { session_id, .. } | Self::InteractionPatch { session_id, .. } => {
                session_id
            }
        }
    }

    /// Pub/sub topic: `session-updates.<owner>.<session>`.
    pub fn topic(&self) -> String {
        let (owner, session_id) = match self {
            Self::SessionUpdate {
                owner, session_id, ..
            }
            | Self::InteractionPatch {
                owner, session_id, ..
            } => (owner, session_id),
        };
        format!("session-updates.{owner}.{session_id}")
    }
}
