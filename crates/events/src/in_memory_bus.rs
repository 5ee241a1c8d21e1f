//! In-process bus used by the node and by tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, mpsc};

use thiserror::Error;

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InMemoryBusError {
    #[error("bus is closed")]
    Closed,
}

type Filter<M> = Box<dyn Fn(&M) -> bool + Send + Sync>;

struct Subscriber<M> {
    sender: mpsc::Sender<M>,
    filter: Option<Filter<M>>,
}

impl<M> Subscriber<M> {
    fn wants(&self, message: &M) -> bool {
        self.filter.as_ref().is_none_or(|f| f(message))
    }
}

/// Fans every message out to the subscriptions whose filter accepts it.
///
/// A dropped subscription is pruned the next time a message is sent to it.
/// Closing the bus disconnects every subscription, so receivers blocked in
/// `recv` return.
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<Subscriber<M>>>,
    closed: AtomicBool,
    delivered: AtomicU64,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the messages for which `filter` holds.
    pub fn subscribe_where(&self, filter: impl Fn(&M) -> bool + Send + Sync + 'static) -> Subscription<M> {
        self.attach(Some(Box::new(filter)))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Messages handed to a subscription so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Reject further messages and disconnect all subscriptions.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers().clear();
    }

    fn attach(&self, filter: Option<Filter<M>>) -> Subscription<M> {
        let (sender, receiver) = mpsc::channel();
        if !self.is_closed() {
            self.subscribers().push(Subscriber { sender, filter });
        }
        Subscription::new(receiver)
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber<M>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
        }
    }
}

impl<M> core::fmt::Debug for InMemoryEventBus<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        if self.is_closed() {
            return Err(InMemoryBusError::Closed);
        }
        let mut delivered = 0;
        self.subscribers().retain(|sub| {
            if !sub.wants(&message) {
                return true;
            }
            let sent = sub.sender.send(message.clone()).is_ok();
            delivered += u64::from(sent);
            sent
        });
        self.delivered.fetch_add(delivered, Ordering::Relaxed);
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        self.attach(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_select_what_a_subscription_sees() {
        let bus = InMemoryEventBus::<u32>::new();
        let all = bus.subscribe();
        let even = bus.subscribe_where(|n| n % 2 == 0);

        for n in 1..=4 {
            bus.publish(n).unwrap();
        }

        assert_eq!(all.drain(), vec![1, 2, 3, 4]);
        assert_eq!(even.drain(), vec![2, 4]);
        assert_eq!(bus.delivered(), 6);
    }

    #[test]
    fn dropped_subscriptions_are_pruned_on_delivery() {
        let bus = InMemoryEventBus::<u32>::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        drop(bus.subscribe_where(|n| *n > 10));

        bus.publish(1).unwrap();
        assert_eq!(bus.subscriber_count(), 2, "the filtered one never saw a message");

        bus.publish(11).unwrap();
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.drain(), vec![1, 11]);
    }

    #[test]
    fn closing_disconnects_receivers() {
        let bus = InMemoryEventBus::<u32>::new();
        let sub = bus.subscribe();

        bus.close();

        assert!(sub.recv().is_err());
        assert_eq!(bus.publish(1), Err(InMemoryBusError::Closed));
        assert!(bus.subscribe().recv().is_err());
    }
}
