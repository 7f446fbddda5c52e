//! Event bus fanning session events out to observers

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::SessionEvent;

/// Receiving side of one subscription
pub type EventStream = mpsc::UnboundedReceiver<SessionEvent>;

/// Publish-subscribe bus for session events
///
/// Every subscriber owns an unbounded queue, so publishing never waits on a
/// slow observer. Subscribers that dropped their stream are pruned on the
/// next publish.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer; it sees every event published from now on
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver an event to every live subscriber
    pub fn publish(&self, event: SessionEvent) {
        debug!(?event, "Publishing session event");
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SessionState;
    use crate::protocol::DisconnectReason;

    fn state_changed(from: SessionState, to: SessionState) -> SessionEvent {
        SessionEvent::StateChanged { from, to }
    }

    #[tokio::test]
    async fn test_events_delivered_in_order_to_all_subscribers() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(state_changed(
            SessionState::Disconnected,
            SessionState::Connecting,
        ));
        bus.publish(SessionEvent::PasswordAccepted);

        for stream in [&mut first, &mut second] {
            assert_eq!(
                stream.recv().await,
                Some(state_changed(
                    SessionState::Disconnected,
                    SessionState::Connecting
                ))
            );
            assert_eq!(stream.recv().await, Some(SessionEvent::PasswordAccepted));
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let _idle = bus.subscribe();
        let mut active = bus.subscribe();

        for _ in 0..1000 {
            bus.publish(SessionEvent::PasswordRejected);
        }

        let mut received = 0;
        while let Ok(event) = active.try_recv() {
            assert_eq!(event, SessionEvent::PasswordRejected);
            received += 1;
        }
        assert_eq!(received, 1000);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let dropped = bus.subscribe();
        let mut kept = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(dropped);
        bus.publish(SessionEvent::Disconnected(DisconnectReason::Requested));

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(
            kept.recv().await,
            Some(SessionEvent::Disconnected(DisconnectReason::Requested))
        );
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(SessionEvent::PasswordAccepted);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
