//! In-memory synchronization state shared by all connections.

pub mod patch;
pub mod publisher;
pub mod readiness;
pub mod state;
pub mod streaming;

pub use patch::{Patch, compute_patch};
pub use publisher::EventPublisher;
pub use readiness::{Dispatch, ReadinessTracker, ReadyTransition};
pub use state::SyncState;
pub use streaming::{StreamingCache, StreamingContext, StreamingSlot};
