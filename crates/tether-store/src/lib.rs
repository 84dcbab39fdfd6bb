//! # tether-store
//!
//! The durable-store collaborator consumed by the sync engine.
//!
//! - [`SyncStore`]: async get/list/create/update boundary for sessions,
//!   interactions, queued prompts, and design review comments
//! - [`InMemoryStore`]: reference implementation with per-operation call
//!   counters and fault injection
//! - [`StoreError`]: failure taxonomy shared by implementations

#![deny(unsafe_code)]

pub mod error;
pub mod memory;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, StoreOp};
pub use store::{ListInteractionsQuery, ListSessionsQuery, SyncStore};
