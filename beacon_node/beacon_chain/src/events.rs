//! Single-producer, multi-consumer broadcast topics.
//!
//! Every worker interested in a topic subscribes its own channel; `send`
//! reports how many subscribers actually received the value, so producers
//! can notice when nobody is listening.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct Feed<T> {
    subscribers: Mutex<Vec<(usize, Sender<T>)>>,
    next_id: AtomicUsize,
}

/// A handle on one subscription; the id can be passed to `unsubscribe`.
pub struct Subscription<T> {
    pub id: usize,
    pub receiver: Receiver<T>,
}

impl<T: Clone> Feed<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(vec![]),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (sender, receiver) = unbounded();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, sender));
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: usize) {
        self.subscribers.lock().retain(|(sub_id, _)| *sub_id != id);
    }

    /// Deliver `value` to every live subscriber, pruning closed channels.
    ///
    /// Returns the number of subscribers reached.
    pub fn send(&self, value: T) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(_, sender)| sender.send(value.clone()).is_ok());
        subscribers.len()
    }
}

impl<T: Clone> Default for Feed<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_reports_delivery_count() {
        let feed = Feed::new();
        assert_eq!(feed.send(1_u64), 0);

        let sub_a = feed.subscribe();
        let sub_b = feed.subscribe();
        assert_eq!(feed.send(2), 2);
        assert_eq!(sub_a.receiver.recv().unwrap(), 2);
        assert_eq!(sub_b.receiver.recv().unwrap(), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let feed = Feed::new();
        let sub = feed.subscribe();
        feed.unsubscribe(sub.id);
        assert_eq!(feed.send(7_u64), 0);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let feed = Feed::new();
        {
            let _sub = feed.subscribe();
        }
        assert_eq!(feed.send(7_u64), 0);
    }
}
