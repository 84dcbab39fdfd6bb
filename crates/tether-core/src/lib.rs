//! # tether-core
//!
//! Shared vocabulary for the external agent synchronization engine.
//!
//! - **Branded IDs**: `SessionId`, `InteractionId`, `RequestId`, ... as newtypes
//! - **Model**: [`Session`], [`Interaction`], [`PromptHistoryEntry`], design review comments
//! - **Wire types**: [`SyncMessage`] decoded into the typed [`SyncEvent`], and
//!   outbound [`ExternalAgentCommand`]
//! - **Frontend events**: [`FrontendEvent`] published after reconciliation
//! - **Errors**: [`ValidationError`] and [`DeliveryError`]
//! - **Logging**: [`logging::init_subscriber`]

#![deny(unsafe_code)]

pub mod command;
pub mod errors;
pub mod events;
pub mod ids;
pub mod interaction;
pub mod logging;
pub mod prompt;
pub mod review;
pub mod session;
pub mod sync;

pub use command::{CHAT_MESSAGE, ChatMessage, ExternalAgentCommand};
pub use errors::{DeliveryError, ValidationError};
pub use events::FrontendEvent;
pub use ids::{
    AgentId, CommentId, InteractionId, PromptId, RequestId, ReviewId, SessionId, TaskId, ThreadId,
};
pub use interaction::{Interaction, InteractionState};
pub use prompt::{PromptHistoryEntry, PromptStatus};
pub use review::{DesignReview, DesignReviewComment, SpecTask};
pub use session::{OwnerType, Session, SessionMetadata, TitleHistoryEntry};
pub use sync::{MessageAdded, MessageRole, SyncEvent, SyncMessage};
