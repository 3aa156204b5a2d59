//! Broadcast event bus for distributing `EventRecord`s to live subscribers.
//!
//! Built on `tokio::sync::broadcast`. The journal publishes every event after
//! it has been appended durably, so subscribers never see an event the log
//! does not contain. Publishing with no active subscribers is a no-op.

use conductor_types::event::EventRecord;
use tokio::sync::broadcast;

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Multi-consumer bus for workflow progress.
///
/// Cloning the bus clones the sender, allowing multiple producers and
/// consumers.
pub struct EventBus {
    sender: broadcast::Sender<EventRecord>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    /// Publish a record to all current subscribers.
    pub fn publish(&self, record: EventRecord) {
        let _ = self.sender.send(record);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conductor_types::event::WorkflowEvent;

    fn record(sequence: u64) -> EventRecord {
        EventRecord {
            sequence,
            timestamp: Utc::now(),
            workflow_id: "wf-1".to_string(),
            event: WorkflowEvent::WorkflowPaused {
                reason: "test".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_record() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(record(1));

        assert_eq!(rx1.recv().await.unwrap().sequence, 1);
        assert_eq!(rx2.recv().await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(record(1));
        bus.publish(record(2));
    }

    #[tokio::test]
    async fn lagged_receiver_handles_gracefully() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        for i in 1..=10 {
            bus.publish(record(i));
        }
        match rx.try_recv() {
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn clone_shares_channel() {
        let bus = EventBus::default();
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();
        bus2.publish(record(3));
        assert_eq!(rx.try_recv().unwrap().sequence, 3);
        assert!(format!("{bus:?}").contains("receiver_count"));
    }
}
