//! Pub/sub mechanics for job notifications.
//!
//! Delivery is best effort. The job record in storage is the source of truth;
//! a subscriber that is not listening misses notifications.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

/// Receiving end of a bus. Every subscription gets its own copy of each
/// message published after it was created.
///
/// ```ignore
/// let subscription = bus.subscribe();
/// while let Ok(notification) = subscription.recv() {
///     record(notification);
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything buffered right now.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }

    /// Collect messages until `done` holds for the collected set or `timeout`
    /// passes. The last message is included.
    pub fn collect_until(&self, timeout: Duration, mut done: impl FnMut(&[M]) -> bool) -> Vec<M> {
        let deadline = Instant::now() + timeout;
        let mut seen = Vec::new();
        while !done(&seen) {
            let Some(left) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            match self.receiver.recv_timeout(left) {
                Ok(message) => seen.push(message),
                Err(_) => break,
            }
        }
        seen
    }
}

/// A bus shared between queue threads and job threads.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn collect_until_stops_at_the_condition() {
        let (tx, rx) = mpsc::channel();
        let subscription = Subscription::new(rx);
        for i in 0..5 {
            tx.send(i).unwrap();
        }

        let seen = subscription.collect_until(Duration::from_secs(1), |seen| seen.contains(&2));

        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(subscription.drain(), vec![3, 4]);
    }

    #[test]
    fn collect_until_gives_up_after_the_timeout() {
        let (tx, rx) = mpsc::channel();
        let subscription = Subscription::new(rx);
        tx.send(1).unwrap();

        let seen = subscription.collect_until(Duration::from_millis(20), |seen| seen.len() > 1);

        assert_eq!(seen, vec![1]);
    }
}
