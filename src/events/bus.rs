//! Event bus for fanning out avatar events to the orchestrator and tests

use super::{AvatarEvent, EventEmitter};
use tokio::sync::broadcast;
use tracing::trace;

/// Default broadcast channel capacity
const DEFAULT_CAPACITY: usize = 1024;

/// Event bus that distributes AvatarEvents via `tokio::sync::broadcast`
///
/// Fire-and-forget: emitting never blocks, never panics.
/// If no subscribers are connected, events are silently dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AvatarEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<AvatarEvent> {
        self.sender.subscribe()
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventEmitter for EventBus {
    fn emit(&self, event: AvatarEvent) {
        if let Ok(n) = self.sender.send(event) {
            trace!(subscribers = n, "AvatarEvent emitted");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, EventSource};

    #[test]
    fn test_emit_without_subscriber_no_panic() {
        let bus = EventBus::default();
        bus.emit_log("Starting minecraft server");
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_emit_with_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit_error(EventSource::Session, "connection reset");

        let event = rx.try_recv().unwrap();
        assert_eq!(event.source, EventSource::Session);
        assert_eq!(
            event.kind,
            EventKind::Error {
                message: "connection reset".into()
            }
        );
    }

    #[test]
    fn test_clone_shares_channel() {
        let bus = EventBus::default();
        let bus2 = bus.clone();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus2.emit_log("Done (3.2s)!");

        assert_eq!(rx1.try_recv().unwrap().kind, rx2.try_recv().unwrap().kind);
    }
}
