//! Message-bus boundary used by peripheral drivers.
//!
//! Peripherals subscribe to named messages during `init` (or by listing them
//! in their `subscriptions` field) and receive them on their own queue. The
//! queue is drained right before each `update` of that peripheral, on
//! whichever thread runs the update.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

/// Sending half of a subscriber's message queue.
pub type MessageSender = mpsc::UnboundedSender<String>;

/// Receiving half of a subscriber's message queue.
pub type MessageReceiver = mpsc::UnboundedReceiver<String>;

/// Host message bus, as seen by the driver runtime.
pub trait MessageBus: Send + Sync {
    /// True once the bus has finished its own initialization.
    fn is_ready(&self) -> bool;

    /// Deliver future broadcasts of `message` into `subscriber`.
    fn subscribe(&self, message: &str, subscriber: MessageSender);

    /// Broadcast `message` to every subscriber.
    fn broadcast(&self, message: &str);
}

/// In-process bus for hosts without their own messaging layer.
///
/// Subscribers whose receiver has been dropped are pruned on the next
/// broadcast of the message they subscribed to.
#[derive(Debug, Default)]
pub struct LocalMessageBus {
    ready: AtomicBool,
    subscribers: Mutex<HashMap<String, Vec<MessageSender>>>,
}

impl LocalMessageBus {
    /// Create a bus that is not ready yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the bus ready; peripherals may be loaded afterwards.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Number of live subscribers for a message
    pub fn subscriber_count(&self, message: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(message)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

impl MessageBus for LocalMessageBus {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn subscribe(&self, message: &str, subscriber: MessageSender) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(message.to_string())
            .or_default()
            .push(subscriber);
    }

    fn broadcast(&self, message: &str) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(subs) = subscribers.get_mut(message) {
            subs.retain(|tx| tx.send(message.to_string()).is_ok());
            tracing::trace!(message, delivered = subs.len(), "Broadcast message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_until_marked() {
        let bus = LocalMessageBus::new();
        assert!(!bus.is_ready());
        bus.mark_ready();
        assert!(bus.is_ready());
    }

    #[test]
    fn broadcast_reaches_subscribers_only() {
        let bus = LocalMessageBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe("SongStarted", tx);

        bus.broadcast("SongStarted");
        bus.broadcast("SongEnded");

        assert_eq!(rx.try_recv().unwrap(), "SongStarted");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = LocalMessageBus::new();
        let (tx, rx) = mpsc::unbounded_channel();
        bus.subscribe("Tick", tx);
        assert_eq!(bus.subscriber_count("Tick"), 1);

        drop(rx);
        bus.broadcast("Tick");
        assert_eq!(bus.subscriber_count("Tick"), 0);
    }
}
