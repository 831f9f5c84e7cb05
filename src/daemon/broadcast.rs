use fornax_core::feed::FeedEvent;
use log::trace;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Fan-out bus for observer-facing events. Delivery is best-effort and
/// never blocks the publisher: a slow observer falls behind on its own
/// receiver (and sees a Lagged gap) without delaying anyone else.
pub struct Broadcaster {
    tx: broadcast::Sender<Arc<FeedEvent>>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to every current observer. The no-observer case is not an
    /// error; the event simply had no audience.
    pub fn publish(&self, event: FeedEvent) {
        trace!("broadcasting {:?}", event);
        let _ = self.tx.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<FeedEvent>> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fornax_core::status::{DeviceStatus, StatusUpdate};

    fn status_event(n: u64) -> FeedEvent {
        FeedEvent::status(StatusUpdate {
            device_id: format!("oven-{n}"),
            status: DeviceStatus::Idle,
            timestamp: "2024-06-25T10:00:00.000Z".into(),
        })
    }

    #[tokio::test]
    async fn publish_without_observers_is_a_no_op() {
        let bus = Broadcaster::new(8);
        assert_eq!(bus.observer_count(), 0);
        bus.publish(status_event(1));
    }

    #[tokio::test]
    async fn every_observer_sees_every_event() {
        let bus = Broadcaster::new(8);
        let mut rx_a = bus.subscribe();
        let mut rx_b = bus.subscribe();

        bus.publish(status_event(1));
        bus.publish(status_event(2));

        for rx in [&mut rx_a, &mut rx_b] {
            let first = rx.recv().await.expect("first event");
            let second = rx.recv().await.expect("second event");
            assert!(matches!(&*first, FeedEvent::StatusUpdate { device_id, .. } if device_id == "oven-1"));
            assert!(matches!(&*second, FeedEvent::StatusUpdate { device_id, .. } if device_id == "oven-2"));
        }
    }

    #[tokio::test]
    async fn lagging_observer_loses_only_its_own_backlog() {
        let bus = Broadcaster::new(2);
        let mut stalled = bus.subscribe();

        // Publisher keeps going well past the stalled observer's buffer.
        for n in 0..64 {
            bus.publish(status_event(n));
        }

        match stalled.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                assert!(skipped > 0, "stalled observer should report a gap")
            }
            other => panic!("expected lag error, got {other:?}"),
        }
        // After the gap it resumes from what is still buffered.
        assert!(stalled.recv().await.is_ok());
    }
}
