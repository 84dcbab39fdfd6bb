//! Agent WebSocket transport: connection registry, bearer authentication,
//! the upgrade handler and the per-connection session loop.

pub mod auth;
pub mod connection;
pub mod handler;
pub mod registry;
pub mod session;
