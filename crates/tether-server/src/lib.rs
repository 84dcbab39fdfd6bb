//! # tether-server
//!
//! External agent synchronization engine.
//!
//! - **Transport**: one WebSocket per agent, bounded outbound queue, keepalive
//!   pings, read deadline refreshed on pong
//! - **Resolution**: thread ↔ session mapping with durable fallback
//! - **Streaming**: per-session cached turns, throttled writes, patch publishing
//! - **Queues**: prompt dispatch and the one-at-a-time review comment queue
//! - **Readiness**: commands held until the agent reports ready
//! - **Shutdown**: all background work tracked and cancellable

#![deny(unsafe_code)]

pub mod config;
pub mod engine;
pub mod errors;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod sync;
pub mod websocket;

pub use config::{EngineConfig, ServerConfig};
pub use engine::{SyncEngine, SyncEventHook};
pub use errors::{ErrorKind, Result, SyncError};
pub use server::{AppState, SYNC_PATH, SyncServer};
