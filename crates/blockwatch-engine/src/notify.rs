//! Publish-subscribe fan-out of match events.
//!
//! Delivery is best-effort per subscriber: a slow or disconnected client
//! lags or drops on its own receiver and never blocks the scan path.

use bitcoin::Txid;
use blockwatch_primitives::RequestId;
use tokio::sync::broadcast;

/// Events buffered per subscriber before the oldest are dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Requests satisfied by one transaction of a processed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SatisfiedEvent {
    /// Transaction that satisfied the requests.
    pub txid: Txid,
    /// Height of the containing block.
    pub height: u32,
    /// Satisfied request ids, deduplicated and in ascending byte order.
    pub satisfied: Vec<RequestId>,
}

/// Events published on the relay topic.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// One or more requests were satisfied by a transaction.
    RequestsSatisfied(SatisfiedEvent),
}

/// Broadcast hub for [`WatchEvent`]s.
pub struct NotificationHub {
    sender: broadcast::Sender<WatchEvent>,
}

impl NotificationHub {
    /// Creates a hub buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to the relay topic. Dropping the returned handle leaves
    /// the topic.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            inner: self.sender.subscribe(),
        }
    }

    /// Publishes an event, returning the number of subscribers that will
    /// receive it.
    pub fn publish(&self, event: WatchEvent) -> usize {
        // send only fails when there are no receivers, which is not an error
        // for a notification topic.
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// A live subscription to the relay topic.
pub struct EventSubscription {
    inner: broadcast::Receiver<WatchEvent>,
}

impl EventSubscription {
    /// Waits for the next event. Returns `None` once the hub is gone.
    ///
    /// A subscriber that fell behind skips the overwritten events and keeps
    /// receiving from the oldest retained one.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event subscriber lagged, dropping missed events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`EventSubscription::recv`].
    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        loop {
            match self.inner.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event subscriber lagged, dropping missed events");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn event(height: u32) -> WatchEvent {
        WatchEvent::RequestsSatisfied(SatisfiedEvent {
            txid: Txid::all_zeros(),
            height,
            satisfied: vec![RequestId::from_bytes([1u8; 32])],
        })
    }

    #[test]
    fn publish_reaches_every_subscriber() {
        let hub = NotificationHub::default();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        assert_eq!(hub.publish(event(7)), 2);

        for sub in [&mut a, &mut b] {
            let WatchEvent::RequestsSatisfied(got) = sub.try_recv().unwrap();
            assert_eq!(got.height, 7);
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let hub = NotificationHub::default();
        assert_eq!(hub.publish(event(1)), 0);
    }

    #[test]
    fn dropping_subscription_leaves_topic() {
        let hub = NotificationHub::default();
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
