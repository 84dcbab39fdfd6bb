//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

use crate::engine::SyncEngine;

/// Engine liveness counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"` whenever the server answers.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered agent connections.
    pub connections: usize,
    /// Sessions with a cached streaming turn.
    pub streaming_sessions: usize,
    /// Threads with an in-memory session mapping.
    pub mapped_threads: usize,
}

impl HealthResponse {
    /// Read the engine's counters now.
    pub fn snapshot(engine: &SyncEngine, started: Instant) -> Self {
        Self {
            status: "ok",
            uptime_secs: started.elapsed().as_secs(),
            connections: engine.connections().len(),
            streaming_sessions: engine.streaming_sessions(),
            mapped_threads: engine.state().thread_count(),
        }
    }
}
