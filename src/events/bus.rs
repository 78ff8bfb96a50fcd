//! Event bus for broadcasting sync events to the rendering surface

use super::SyncEvent;
use tokio::sync::broadcast;
use tracing::trace;

/// Default broadcast channel capacity
const DEFAULT_CAPACITY: usize = 256;

/// Event bus that distributes `SyncEvent`s via `tokio::sync::broadcast`
///
/// Fire-and-forget: emitting never blocks, never panics.
/// If no subscribers are connected, events are silently dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn emit(&self, event: SyncEvent) {
        let event_type = event.event_type();
        if let Ok(n) = self.sender.send(event) {
            trace!(event_type, subscribers = n, "SyncEvent emitted");
        }
        // Err = no subscribers, which is fine
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
