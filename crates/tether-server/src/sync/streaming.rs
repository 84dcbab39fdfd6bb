//! Per-session cache for in-flight assistant turns.
//!
//! The map lock is held only for lookup, insert and removal. Each entry has
//! its own async lock, held for the whole reconciliation of one event so
//! that updates for a session apply in arrival order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tether_core::{Interaction, Session, SessionId};
use tokio::time::Instant;

use super::patch::{Patch, compute_patch};

/// A cached streaming turn.
#[derive(Debug)]
pub struct StreamingContext {
    /// Owning session snapshot.
    pub session: Session,
    /// The interaction receiving content.
    pub interaction: Interaction,
    /// Content changed since the last durable write.
    pub dirty: bool,
    /// Time of the last durable write.
    pub last_write: Option<Instant>,
    /// Time of the last published patch.
    pub last_publish: Option<Instant>,
    /// Content as last published.
    pub published: String,
}

impl StreamingContext {
    /// Cache a turn loaded from the store.
    pub fn new(session: Session, interaction: Interaction) -> Self {
        let published = interaction.response.clone();
        Self {
            session,
            interaction,
            dirty: false,
            last_write: None,
            last_publish: None,
            published,
        }
    }

    /// Whether a durable write is allowed at `now`.
    pub fn write_due(&self, now: Instant, throttle: Duration) -> bool {
        self.last_write
            .is_none_or(|at| now.saturating_duration_since(at) >= throttle)
    }

    /// Record a durable write at `now`.
    pub fn mark_written(&mut self, now: Instant) {
        self.last_write = Some(now);
        self.dirty = false;
    }

    /// Whether a publish is allowed at `now`.
    pub fn publish_due(&self, now: Instant, throttle: Duration) -> bool {
        self.last_publish
            .is_none_or(|at| now.saturating_duration_since(at) >= throttle)
    }

    /// Patch from the last published content to the current response, or
    /// `None` when nothing changed. Records the publish at `now`.
    pub fn take_patch(&mut self, now: Instant) -> Option<Patch> {
        if self.published == self.interaction.response {
            return None;
        }
        let patch = compute_patch(&self.published, &self.interaction.response);
        self.published.clone_from(&self.interaction.response);
        self.last_publish = Some(now);
        Some(patch)
    }
}

/// A session's cache slot. Empty until the first token is reconciled.
pub type StreamingSlot = Arc<tokio::sync::Mutex<Option<StreamingContext>>>;

/// Session → streaming slot.
#[derive(Default)]
pub struct StreamingCache {
    entries: Mutex<HashMap<SessionId, StreamingSlot>>,
}

impl StreamingCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot for `session_id`, created empty if absent.
    pub fn slot(&self, session_id: &SessionId) -> StreamingSlot {
        self.entries
            .lock()
            .entry(session_id.clone())
            .or_default()
            .clone()
    }

    /// The slot for `session_id`, if one exists.
    pub fn existing(&self, session_id: &SessionId) -> Option<StreamingSlot> {
        self.entries.lock().get(session_id).cloned()
    }

    /// Drop the slot for `session_id`.
    pub fn remove(&self, session_id: &SessionId) -> Option<StreamingSlot> {
        self.entries.lock().remove(session_id)
    }

    /// Drop the slot for `session_id` only if it is still `slot`.
    pub fn discard(&self, session_id: &SessionId, slot: &StreamingSlot) {
        let mut entries = self.entries.lock();
        if entries.get(session_id).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            let _ = entries.remove(session_id);
        }
    }

    /// Number of sessions with a slot.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no session has a slot.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> StreamingContext {
        let session = Session::new("user-1", "chat", "model");
        let interaction = Interaction::waiting(session.id.clone(), "user-1", 0, "hi");
        StreamingContext::new(session, interaction)
    }

    #[tokio::test(start_paused = true)]
    async fn first_write_is_always_due() {
        let ctx = context();
        assert!(ctx.write_due(Instant::now(), Duration::from_millis(200)));
    }

    #[tokio::test(start_paused = true)]
    async fn write_throttle_window() {
        let mut ctx = context();
        let throttle = Duration::from_millis(200);
        ctx.mark_written(Instant::now());
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!ctx.write_due(Instant::now(), throttle));
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(ctx.write_due(Instant::now(), throttle));
    }

    #[tokio::test(start_paused = true)]
    async fn mark_written_clears_dirty() {
        let mut ctx = context();
        ctx.dirty = true;
        ctx.mark_written(Instant::now());
        assert!(!ctx.dirty);
    }

    #[tokio::test(start_paused = true)]
    async fn take_patch_tracks_published_content() {
        let mut ctx = context();
        assert!(ctx.take_patch(Instant::now()).is_none());

        ctx.interaction.apply_message("m", "Hello");
        let p = ctx.take_patch(Instant::now()).unwrap();
        assert_eq!((p.offset, p.patch.as_str()), (0, "Hello"));

        ctx.interaction.apply_message("m", "Hello, world!");
        let p = ctx.take_patch(Instant::now()).unwrap();
        assert_eq!((p.offset, p.patch.as_str()), (5, ", world!"));
        assert_eq!(ctx.published, "Hello, world!");
        assert!(ctx.take_patch(Instant::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn publish_throttle_independent_of_writes() {
        let mut ctx = context();
        let now = Instant::now();
        ctx.mark_written(now);
        assert!(ctx.publish_due(now, Duration::from_millis(50)));
        ctx.interaction.apply_message("m", "x");
        let _ = ctx.take_patch(now);
        assert!(!ctx.publish_due(now, Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn cache_slots() {
        let cache = StreamingCache::new();
        let id = SessionId::from("ses_1");
        assert!(cache.existing(&id).is_none());
        let slot = cache.slot(&id);
        assert!(slot.lock().await.is_none());
        *slot.lock().await = Some(context());
        assert!(cache.slot(&id).lock().await.is_some());
        assert_eq!(cache.len(), 1);
        assert!(cache.remove(&id).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn discard_ignores_replaced_slot() {
        let cache = StreamingCache::new();
        let id = SessionId::from("ses_1");
        let stale = cache.slot(&id);
        let _ = cache.remove(&id);
        let current = cache.slot(&id);
        cache.discard(&id, &stale);
        assert_eq!(cache.len(), 1);
        cache.discard(&id, &current);
        assert!(cache.is_empty());
    }
}
