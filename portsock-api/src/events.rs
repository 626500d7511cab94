//! Event subscriptions.
//!
//! Background loops publish into a [`Publisher`]; consumers hold a [`Subscription`], a
//! [`Stream`] that yields events in publication order. Publishing never blocks: channels are
//! unbounded so a slow consumer cannot stall an accept or receive loop.

use core::pin::Pin;
use core::task::{Context, Poll};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::{Stream, StreamExt};

/// The sending side of an event source.
///
/// Clones share the same subscriber list.
pub struct Publisher<T> {
    subscribers: Arc<Mutex<Vec<UnboundedSender<T>>>>,
}

impl<T> core::fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Publisher")
            .field("subscribers", &self.lock().len())
            .finish()
    }
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T> Default for Publisher<T> {
    fn default() -> Self {
        Self {
            subscribers: Arc::default(),
        }
    }
}

impl<T> Publisher<T> {
    /// Creates a publisher without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscription that receives every event published from now on.
    pub fn subscribe(&self) -> Subscription<T> {
        let (sender, receiver) = unbounded();
        self.lock().push(sender);
        Subscription { receiver }
    }

    /// Returns the number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|subscriber| !subscriber.is_closed());
        subscribers.len()
    }

    /// Hands `event` to the earliest live subscription.
    ///
    /// Returns the event if there is no live subscription.
    pub fn hand_off(&self, event: T) -> Option<T> {
        let mut subscribers = self.lock();
        let mut event = event;
        while let Some(subscriber) = subscribers.first() {
            match subscriber.unbounded_send(event) {
                Ok(()) => return None,
                Err(error) => {
                    event = error.into_inner();
                    subscribers.remove(0);
                }
            }
        }
        Some(event)
    }

    /// Ends every subscription.
    ///
    /// Subscriptions yield the events published before the close, then end.
    pub fn close(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<UnboundedSender<T>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Publisher<T> {
    /// Delivers a copy of `event` to every live subscription.
    ///
    /// Returns the number of subscriptions reached.
    pub fn broadcast(&self, event: T) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|subscriber| subscriber.unbounded_send(event.clone()).is_ok());
        subscribers.len()
    }
}

/// The receiving side of an event source.
///
/// Dropping the subscription or calling [`Subscription::unsubscribe`] stops delivery.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Waits for the next event.
    ///
    /// Returns `None` once the source has ended and every pending event was consumed.
    pub async fn next_event(&mut self) -> Option<T> {
        self.receiver.next().await
    }

    /// Stops delivery and discards pending events.
    pub fn unsubscribe(mut self) {
        self.receiver.close();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.receiver.size_hint()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;

    #[test]
    fn broadcast_reaches_every_subscription_in_order() {
        let publisher = Publisher::new();
        let mut first = publisher.subscribe();
        let mut second = publisher.subscribe();

        assert_eq!(publisher.broadcast(1), 2);
        assert_eq!(publisher.broadcast(2), 2);
        publisher.close();

        assert_eq!(block_on(first.by_ref().collect::<Vec<_>>()), vec![1, 2]);
        assert_eq!(block_on(second.next_event()), Some(1));
        assert_eq!(block_on(second.next_event()), Some(2));
        assert_eq!(block_on(second.next_event()), None);
    }

    #[test]
    fn unsubscribed_subscriptions_are_skipped() {
        let publisher = Publisher::new();
        let first = publisher.subscribe();
        let mut second = publisher.subscribe();

        first.unsubscribe();

        assert_eq!(publisher.broadcast("event"), 1);
        assert_eq!(publisher.subscriber_count(), 1);
        assert_eq!(block_on(second.next_event()), Some("event"));
    }

    #[test]
    fn hand_off_goes_to_the_earliest_live_subscription() {
        let publisher = Publisher::new();
        let first = publisher.subscribe();
        let mut second = publisher.subscribe();
        let mut third = publisher.subscribe();

        drop(first);

        assert_eq!(publisher.hand_off(String::from("connection")), None);
        publisher.close();
        assert_eq!(block_on(second.next_event()).as_deref(), Some("connection"));
        assert_eq!(block_on(third.next_event()), None);
    }

    #[test]
    fn hand_off_without_subscriptions_returns_the_event() {
        let publisher = Publisher::new();

        assert_eq!(publisher.hand_off(5), Some(5));

        let subscription = publisher.subscribe();
        drop(subscription);
        assert_eq!(publisher.hand_off(6), Some(6));
    }
}
