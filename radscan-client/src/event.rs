//! Connection lifecycle and message arrival events.
//!
//! The event dispatcher is a type-indexed publish/subscribe hub.
//! Publishing invokes every subscriber inline on the publisher's task;
//! there is no queueing here. A subscriber that needs asynchrony
//! re-enqueues onto its own active worker, and must not re-enter the
//! dispatcher synchronously - the subscriber list is locked for the
//! duration of the publish.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Process-unique connection identifier, monotonically increasing.
/// This is the name used by handlers, logs and events.
pub type ConnectionId = u64;

/// Everything a client or server publishes about its connections.
///
/// For every connection the observed sequence is a prefix of
/// `Connected, Message*, Disconnected`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent<M> {
    Connected(ConnectionId),
    Disconnected(ConnectionId),
    Message(ConnectionId, M),
    SendFailed(ConnectionId),
}

/// Identifies one subscription for later detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(usize);

type Callback<M> = Box<dyn Fn(ClientEvent<M>) + Send + Sync>;

/// Publish/subscribe hub for [`ClientEvent`]s.
pub struct EventDispatcher<M> {
    subscribers: Mutex<Vec<(usize, Callback<M>)>>,
    next_id: AtomicUsize,
}

impl<M> Default for EventDispatcher<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> EventDispatcher<M> {
    pub fn new() -> Self {
        EventDispatcher {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Register a callback for every published event.
    pub fn attach(
        &self,
        callback: impl Fn(ClientEvent<M>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("event dispatcher poisoned")
            .push((id, Box::new(callback)));
        SubscriptionId(id)
    }

    /// Remove a subscription; unknown ids are ignored.
    pub fn detach(&self, subscription: SubscriptionId) {
        self.subscribers
            .lock()
            .expect("event dispatcher poisoned")
            .retain(|(id, _)| *id != subscription.0);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("event dispatcher poisoned")
            .len()
    }
}

impl<M: Clone> EventDispatcher<M> {
    /// Invoke every subscriber with the event, inline. The final
    /// subscriber receives the event by move; earlier ones get clones,
    /// so the single-subscriber path never copies a message buffer.
    pub fn publish(&self, event: ClientEvent<M>) {
        let subscribers = self
            .subscribers
            .lock()
            .expect("event dispatcher poisoned");
        if subscribers.is_empty() {
            return;
        }
        for (_, callback) in subscribers.iter().take(subscribers.len() - 1) {
            callback(event.clone());
        }
        let (_, last) = &subscribers[subscribers.len() - 1];
        last(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let dispatcher = EventDispatcher::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..3 {
            let seen = seen.clone();
            dispatcher.attach(move |event| {
                if let ClientEvent::Message(id, payload) = event {
                    seen.lock().unwrap().push((id, payload));
                }
            });
        }

        dispatcher.publish(ClientEvent::Message(7, 99));
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert_eq!(seen.lock().unwrap()[0], (7, 99));
    }

    #[test]
    fn test_detach_stops_delivery() {
        let dispatcher = EventDispatcher::<u32>::new();
        let seen = Arc::new(Mutex::new(0u32));

        let seen_clone = seen.clone();
        let subscription = dispatcher.attach(move |_| {
            *seen_clone.lock().unwrap() += 1;
        });

        dispatcher.publish(ClientEvent::Connected(1));
        dispatcher.detach(subscription);
        dispatcher.publish(ClientEvent::Connected(2));

        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let dispatcher = EventDispatcher::<u32>::new();
        dispatcher.publish(ClientEvent::Disconnected(1));
    }
}
