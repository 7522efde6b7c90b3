//! Typed change-notification hub.
//!
//! Broadcasts cloned events to any number of subscribers over unbounded
//! channels. Subscribers drain their receiver from whichever thread owns
//! their state; senders whose receiver has been dropped are pruned on the
//! next emit.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Mutex;

/// A broadcast hub for one event type.
#[derive(Debug)]
pub struct EventHub<E> {
    subscribers: Mutex<Vec<Sender<E>>>,
}

// Manual impl: the derive would demand `E: Default` for no reason.
impl<E> Default for EventHub<E> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Clone> EventHub<E> {
    /// Creates a hub with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a new subscriber and returns its receiving end.
    pub fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push(tx);
        rx
    }

    /// Sends `event` to every live subscriber, dropping dead ones.
    pub fn emit(&self, event: E) {
        let mut subs = self.subscribers.lock().expect("subscriber list poisoned");
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .len()
    }

    /// Drops every subscription. Used when a session closes.
    pub fn clear(&self) {
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .clear();
    }
}
