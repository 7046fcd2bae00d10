//! Event broker
//!
//! Generic publish/subscribe fan-out used by every notification channel
//! (job lifecycle, cancellation, log tail). Each subscriber owns a bounded
//! queue; publishing performs a non-blocking send per subscriber so one
//! slow consumer can never stall the scheduler or other consumers. A full
//! queue drops the event for that subscriber; a closed queue unregisters
//! it. There is no persisted backlog.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::warn;

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

struct Slot<T> {
    tx: mpsc::Sender<T>,
    predicate: Option<Predicate<T>>,
}

struct Inner<T> {
    topic: &'static str,
    capacity: usize,
    next_id: AtomicU64,
    slots: Mutex<HashMap<u64, Slot<T>>>,
}

/// Broadcast fan-out for one topic
pub struct EventBroker<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for EventBroker<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> EventBroker<T> {
    /// Creates a broker whose subscribers each buffer up to `capacity` events
    pub fn new(topic: &'static str, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                topic,
                capacity,
                next_id: AtomicU64::new(0),
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Delivers an event to every live subscriber whose predicate accepts it.
    ///
    /// Fire-and-forget per subscriber: never blocks, never errors. Events
    /// are delivered to each subscriber in publish order.
    pub fn publish(&self, event: &T) {
        let mut slots = self.inner.slots.lock().unwrap();
        slots.retain(|id, slot| {
            if let Some(predicate) = &slot.predicate {
                if !predicate(event) {
                    return true;
                }
            }
            match slot.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "subscriber {} on topic '{}' is not keeping up, dropping event",
                        id, self.inner.topic
                    );
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Subscribes to every event published from now on
    pub fn subscribe(&self) -> Subscription<T> {
        self.register(None)
    }

    /// Subscribes to events accepted by `predicate`.
    ///
    /// The predicate runs on the publishing side, so rejected events never
    /// occupy the subscriber's queue.
    pub fn subscribe_filtered(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Subscription<T> {
        self.register(Some(Box::new(predicate)))
    }

    fn register(&self, predicate: Option<Predicate<T>>) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .slots
            .lock()
            .unwrap()
            .insert(id, Slot { tx, predicate });
        Subscription {
            id,
            rx,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of currently registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.slots.lock().unwrap().len()
    }
}

/// A live subscription handle.
///
/// Dropping the handle unregisters the subscriber; further publishes are
/// silently discarded rather than blocking the publisher.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    inner: Arc<Inner<T>>,
}

impl<T> Subscription<T> {
    /// Waits for the next event; returns `None` once the broker is gone
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Returns a buffered event without waiting, if one is available
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.inner.slots.lock().unwrap().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_to_multiple_subscribers() {
        let broker: EventBroker<u32> = EventBroker::new("test", 8);
        let mut a = broker.subscribe();
        let mut b = broker.subscribe();

        broker.publish(&7);

        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(7));
    }

    #[tokio::test]
    async fn test_delivery_preserves_publish_order() {
        let broker: EventBroker<u32> = EventBroker::new("test", 8);
        let mut sub = broker.subscribe();

        for i in 0..5 {
            broker.publish(&i);
        }
        for i in 0..5 {
            assert_eq!(sub.recv().await, Some(i));
        }
    }

    #[tokio::test]
    async fn test_filtered_subscription_skips_rejected_events() {
        let broker: EventBroker<u32> = EventBroker::new("test", 8);
        let mut evens = broker.subscribe_filtered(|n| n % 2 == 0);

        for i in 0..6 {
            broker.publish(&i);
        }

        assert_eq!(evens.recv().await, Some(0));
        assert_eq!(evens.recv().await, Some(2));
        assert_eq!(evens.recv().await, Some(4));
        assert_eq!(evens.try_recv(), None);
    }

    #[tokio::test]
    async fn test_full_subscriber_drops_events() {
        let broker: EventBroker<u32> = EventBroker::new("test", 2);
        let mut sub = broker.subscribe();

        for i in 0..5 {
            broker.publish(&i);
        }

        // Only the first two fit; the rest were dropped, not queued.
        assert_eq!(sub.recv().await, Some(0));
        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_unregistered() {
        let broker: EventBroker<u32> = EventBroker::new("test", 8);
        let sub = broker.subscribe();
        assert_eq!(broker.subscriber_count(), 1);

        drop(sub);
        assert_eq!(broker.subscriber_count(), 0);

        // Publishing into the void neither blocks nor panics.
        broker.publish(&1);
    }
}
