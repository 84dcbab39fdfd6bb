//! Fan-out of [`FrontendEvent`]s to platform observers.

use tether_core::FrontendEvent;
use tokio::sync::broadcast;
use tracing::trace;

/// Default broadcast buffer per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast publisher for session updates and streaming patches.
pub struct EventPublisher {
    tx: broadcast::Sender<FrontendEvent>,
}

impl EventPublisher {
    /// Create a publisher with the given per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<FrontendEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Returns the number of subscribers reached; having
    /// none is not an error.
    pub fn publish(&self, event: FrontendEvent) -> usize {
        let topic = event.topic();
        match self.tx.send(event) {
            Ok(receivers) => {
                trace!(topic, receivers, "published frontend event");
                receivers
            }
            Err(_) => {
                trace!(topic, "no frontend subscribers");
                0
            }
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
