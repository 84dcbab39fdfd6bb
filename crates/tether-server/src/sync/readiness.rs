//! Agent readiness tracking.
//!
//! A session connected by its own ID is "not ready" until the agent reports
//! `agent_ready` (or a fallback timer fires). Commands for a session that is
//! not ready are held and flushed, in order, on the transition.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tether_core::{ExternalAgentCommand, SessionId};
use tokio_util::sync::CancellationToken;

struct ReadinessState {
    ready: bool,
    ready_at: Option<DateTime<Utc>>,
    pending: Vec<ExternalAgentCommand>,
    needs_continue: bool,
    timer: CancellationToken,
}

/// Outcome of [`ReadinessTracker::queue_or_send`].
#[derive(Debug)]
pub enum Dispatch {
    /// Deliver now.
    Send(ExternalAgentCommand),
    /// Held until the session becomes ready.
    Queued,
}

/// What to do on the not-ready → ready transition.
#[derive(Debug, Default)]
pub struct ReadyTransition {
    /// Held commands, oldest first.
    pub pending: Vec<ExternalAgentCommand>,
    /// Whether to send a resume prompt.
    pub needs_continue: bool,
}

/// Per-session readiness state.
#[derive(Default)]
pub struct ReadinessTracker {
    sessions: Mutex<HashMap<SessionId, ReadinessState>>,
}

impl ReadinessTracker {
    /// No tracked sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a session as not ready. Replaces (and cancels the timer
    /// of) any previous state. Returns the token guarding the new fallback
    /// timer.
    pub fn init(&self, session_id: SessionId, needs_continue: bool) -> CancellationToken {
        let timer = CancellationToken::new();
        let state = ReadinessState {
            ready: false,
            ready_at: None,
            pending: Vec::new(),
            needs_continue,
            timer: timer.clone(),
        };
        if let Some(previous) = self.sessions.lock().insert(session_id, state) {
            previous.timer.cancel();
        }
        timer
    }

    /// Hold `command` if the session is tracked and not ready.
    pub fn queue_or_send(&self, session_id: &SessionId, command: ExternalAgentCommand) -> Dispatch {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(session_id) {
            Some(state) if !state.ready => {
                state.pending.push(command);
                Dispatch::Queued
            }
            _ => Dispatch::Send(command),
        }
    }

    /// Mark a session ready. `None` when it is untracked or already ready.
    pub fn mark_ready(&self, session_id: &SessionId) -> Option<ReadyTransition> {
        let mut sessions = self.sessions.lock();
        let state = sessions.get_mut(session_id)?;
        if state.ready {
            return None;
        }
        state.ready = true;
        state.ready_at = Some(Utc::now());
        state.timer.cancel();
        Some(ReadyTransition {
            pending: std::mem::take(&mut state.pending),
            needs_continue: std::mem::take(&mut state.needs_continue),
        })
    }

    /// Whether the session has readiness state.
    pub fn is_tracked(&self, session_id: &SessionId) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    /// Whether the session may receive commands. Untracked sessions may.
    pub fn is_ready(&self, session_id: &SessionId) -> bool {
        self.sessions
            .lock()
            .get(session_id)
            .is_none_or(|state| state.ready)
    }

    /// When the session became ready.
    pub fn ready_at(&self, session_id: &SessionId) -> Option<DateTime<Utc>> {
        self.sessions.lock().get(session_id).and_then(|s| s.ready_at)
    }

    /// Number of held commands.
    pub fn pending_len(&self, session_id: &SessionId) -> usize {
        self.sessions
            .lock()
            .get(session_id)
            .map_or(0, |s| s.pending.len())
    }

    /// Whether a resume prompt is owed.
    pub fn needs_continue(&self, session_id: &SessionId) -> bool {
        self.sessions
            .lock()
            .get(session_id)
            .is_some_and(|s| s.needs_continue)
    }

    /// Stop tracking a session and cancel its timer.
    pub fn remove(&self, session_id: &SessionId) {
        if let Some(state) = self.sessions.lock().remove(session_id) {
            state.timer.cancel();
        }
    }
}
