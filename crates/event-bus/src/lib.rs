//! Best-effort notification bus.
//!
//! Popup views come and go, so a publish with nobody listening is an expected outcome rather
//! than an error. Publishers get a [`Delivery`] back and decide whether it is worth logging.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

/// Trait implemented by payload types that can be carried on the bus.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

/// Result of a best-effort publish.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Delivery {
    Delivered(usize),
    NoSubscribers,
}

impl Delivery {
    pub fn delivered(&self) -> bool {
        matches!(self, Delivery::Delivered(_))
    }
}

pub trait EventBus<E>: Send + Sync
where
    E: Event,
{
    fn publish(&self, event: E) -> Delivery;
    fn subscribe(&self) -> broadcast::Receiver<E>;
    fn subscriber_count(&self) -> usize;
}

/// In-memory bus backed by a tokio broadcast channel.
pub struct InMemoryBus<E>
where
    E: Event,
{
    sender: broadcast::Sender<E>,
}

impl<E> InMemoryBus<E>
where
    E: Event,
{
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }
}

impl<E> EventBus<E> for InMemoryBus<E>
where
    E: Event,
{
    fn publish(&self, event: E) -> Delivery {
        match self.sender.send(event) {
            Ok(receivers) => Delivery::Delivered(receivers),
            Err(_) => {
                trace!(target: "pagesync.bus", "publish dropped: no subscribers");
                Delivery::NoSubscribers
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_listener_is_not_an_error() {
        let bus = InMemoryBus::<u32>::new(4);
        assert_eq!(bus.publish(1), Delivery::NoSubscribers);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = InMemoryBus::<String>::new(4);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        assert!(bus.publish("ready".into()).delivered());
        assert_eq!(rx.recv().await.unwrap(), "ready");
    }
}
