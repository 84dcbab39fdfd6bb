//! Process-local mapping tables.
//!
//! All four tables sit behind one lock. The lock is only held for in-memory
//! lookups and inserts, never across a store call. Any entry may be missing
//! after a restart and is repaired from durable state on demand.

use std::collections::HashMap;

use parking_lot::Mutex;
use tether_core::{AgentId, InteractionId, RequestId, SessionId, ThreadId};

#[derive(Default)]
struct Tables {
    threads: HashMap<ThreadId, SessionId>,
    waiting: HashMap<SessionId, InteractionId>,
    requests: HashMap<RequestId, SessionId>,
    agent_users: HashMap<AgentId, String>,
}

/// Thread, waiting-interaction, request and agent-user mappings.
#[derive(Default)]
pub struct SyncState {
    tables: Mutex<Tables>,
}

impl SyncState {
    /// Empty mapping tables.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Threads ─────────────────────────────────────────────────────

    /// Session mirroring `thread_id`.
    pub fn session_for_thread(&self, thread_id: &ThreadId) -> Option<SessionId> {
        self.tables.lock().threads.get(thread_id).cloned()
    }

    /// Record that `session_id` mirrors `thread_id`.
    pub fn map_thread(&self, thread_id: ThreadId, session_id: SessionId) {
        let _ = self.tables.lock().threads.insert(thread_id, session_id);
    }

    /// Number of mapped threads.
    pub fn thread_count(&self) -> usize {
        self.tables.lock().threads.len()
    }

    // ── Waiting interactions ────────────────────────────────────────

    /// The interaction a session's next assistant content is meant for.
    pub fn waiting_interaction(&self, session_id: &SessionId) -> Option<InteractionId> {
        self.tables.lock().waiting.get(session_id).cloned()
    }

    /// Point a session's assistant content at `interaction_id`.
    pub fn set_waiting(&self, session_id: SessionId, interaction_id: InteractionId) {
        let _ = self.tables.lock().waiting.insert(session_id, interaction_id);
    }

    /// Register a fresh thread: its session and first waiting interaction in
    /// one step.
    pub fn bind_thread(
        &self,
        thread_id: ThreadId,
        session_id: SessionId,
        interaction_id: InteractionId,
    ) {
        let mut tables = self.tables.lock();
        let _ = tables.threads.insert(thread_id, session_id.clone());
        let _ = tables.waiting.insert(session_id, interaction_id);
    }

    // ── Requests ────────────────────────────────────────────────────

    /// Correlate a platform-initiated request with its session.
    pub fn register_request(&self, request_id: RequestId, session_id: SessionId) {
        let _ = self.tables.lock().requests.insert(request_id, session_id);
    }

    /// Session a request was made for, without consuming the mapping.
    pub fn request_session(&self, request_id: &RequestId) -> Option<SessionId> {
        self.tables.lock().requests.get(request_id).cloned()
    }

    /// Consume a request mapping.
    pub fn take_request(&self, request_id: &RequestId) -> Option<SessionId> {
        self.tables.lock().requests.remove(request_id)
    }

    /// Any outstanding request made for `session_id`.
    pub fn request_for_session(&self, session_id: &SessionId) -> Option<RequestId> {
        self.tables
            .lock()
            .requests
            .iter()
            .filter(|(_, s)| *s == session_id)
            .map(|(r, _)| r.clone())
            .min()
    }

    // ── Agent users ─────────────────────────────────────────────────

    /// Record the user an agent connection acts for.
    pub fn register_agent_user(&self, agent_id: AgentId, user_id: impl Into<String>) {
        let _ = self.tables.lock().agent_users.insert(agent_id, user_id.into());
    }

    /// User an agent connection acts for.
    pub fn user_for_agent(&self, agent_id: &AgentId) -> Option<String> {
        self.tables.lock().agent_users.get(agent_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_mapping() {
        let state = SyncState::new();
        let thread = ThreadId::from("thread-1");
        assert!(state.session_for_thread(&thread).is_none());
        state.map_thread(thread.clone(), SessionId::from("ses_1"));
        assert_eq!(state.session_for_thread(&thread), Some(SessionId::from("ses_1")));
        assert_eq!(state.thread_count(), 1);
    }

    #[test]
    fn bind_thread_sets_both_tables() {
        let state = SyncState::new();
        state.bind_thread(
            ThreadId::from("t"),
            SessionId::from("ses_1"),
            InteractionId::from("int_1"),
        );
        assert_eq!(
            state.session_for_thread(&ThreadId::from("t")),
            Some(SessionId::from("ses_1"))
        );
        assert_eq!(
            state.waiting_interaction(&SessionId::from("ses_1")),
            Some(InteractionId::from("int_1"))
        );
    }

    #[test]
    fn request_mapping_is_consumed_once() {
        let state = SyncState::new();
        let req = RequestId::from("req_1");
        state.register_request(req.clone(), SessionId::from("ses_1"));
        assert_eq!(state.request_for_session(&SessionId::from("ses_1")), Some(req.clone()));
        assert_eq!(state.request_session(&req), Some(SessionId::from("ses_1")));
        assert_eq!(state.take_request(&req), Some(SessionId::from("ses_1")));
        assert!(state.take_request(&req).is_none());
        assert!(state.request_for_session(&SessionId::from("ses_1")).is_none());
    }

    #[test]
    fn agent_users() {
        let state = SyncState::new();
        let agent = AgentId::from("ses_agent");
        assert!(state.user_for_agent(&agent).is_none());
        state.register_agent_user(agent.clone(), "user-1");
        assert_eq!(state.user_for_agent(&agent).as_deref(), Some("user-1"));
    }
}
