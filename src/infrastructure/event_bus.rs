//! Typed event bus between the core and its external observers.
//!
//! Components publish [`EngineEvent`]s; the dashboard sender (out of scope
//! here) and the logging listener subscribe. Publishing never blocks and
//! never fails the publisher: a bus with no subscribers drops events.

use crate::domain::events::EngineEvent;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(512);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            // No subscribers; nothing is listening yet.
            debug!("EventBus: event dropped (no subscribers)");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::DegradationLevel;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(EngineEvent::DegradationChanged {
            level: DegradationLevel::Degraded,
        });

        assert!(matches!(
            rx1.recv().await.unwrap(),
            EngineEvent::DegradationChanged { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            EngineEvent::DegradationChanged { .. }
        ));
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(EngineEvent::SafeModeLifted);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
