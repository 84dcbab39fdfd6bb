//! Reconciliation and queue timing.

use serde::{Deserialize, Serialize};

/// Timing and naming used by the sync engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Minimum spacing between durable writes of one streaming turn.
    pub write_throttle_ms: u64,
    /// Minimum spacing between published patches of one streaming turn.
    pub publish_throttle_ms: u64,
    /// Fallback after which a connected session is treated as ready.
    pub readiness_timeout_secs: u64,
    /// How long a sent review comment may wait for an answer.
    pub comment_response_timeout_secs: u64,
    /// Page size for the durable thread-ID scan.
    pub thread_scan_page_size: usize,
    /// Model name for sessions created for fresh agent threads.
    pub default_model: String,
    /// Agent type tag stamped on created sessions.
    pub agent_type: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            write_throttle_ms: 200,
            publish_throttle_ms: 50,
            readiness_timeout_secs: 60,
            comment_response_timeout_secs: 120,
            thread_scan_page_size: 100,
            default_model: "external-agent".to_string(),
            agent_type: "zed_external".to_string(),
        }
    }
}
