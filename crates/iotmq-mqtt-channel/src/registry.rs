//! Subscription registry: topic filters and their message callbacks.
//!
//! Used twice per connection: to reissue every subscription after a clean
//! session is (re)established, and to route inbound messages.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use iotmq_protocol::{Qos, topics};

use crate::channel::Transport;

/// Callback invoked with `(topic, payload)` for each matching message.
pub type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// A registered subscription.
#[derive(Clone)]
pub struct Subscription {
    pub filter: String,
    pub qos: Qos,
    pub on_message: MessageCallback,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

/// Subscriptions keyed by filter (unique).
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<String, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a subscription, replacing any previous one for the same filter.
    pub fn insert(&mut self, subscription: Subscription) {
        self.subscriptions
            .insert(subscription.filter.clone(), subscription);
    }

    pub fn remove(&mut self, filter: &str) -> Option<Subscription> {
        self.subscriptions.remove(filter)
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.subscriptions.contains_key(filter)
    }

    /// Registered filters, sorted.
    pub fn filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = self.subscriptions.keys().cloned().collect();
        filters.sort();
        filters
    }

    /// Invoke the callback of every filter matching `topic`.
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for subscription in self.subscriptions.values() {
            if topics::matches(&subscription.filter, topic) {
                (subscription.on_message)(topic, payload);
                delivered += 1;
            }
        }
        delivered
    }

    /// Reissue every registered subscription on a fresh session.
    ///
    /// A failing filter is logged and skipped; the rest are still attempted.
    /// Returns the number of filters that failed.
    pub async fn resubscribe_all<T: Transport + ?Sized>(&self, transport: &T) -> usize {
        let mut failed = 0;
        for subscription in self.subscriptions.values() {
            if let Err(e) = transport
                .subscribe(&subscription.filter, subscription.qos)
                .await
            {
                tracing::error!(
                    filter = %subscription.filter,
                    error = %e,
                    "failed to resubscribe"
                );
                failed += 1;
            }
        }
        if !self.subscriptions.is_empty() {
            tracing::info!(
                total = self.subscriptions.len(),
                failed,
                "resubscribed to registered topics"
            );
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use std::sync::Mutex;

    type Received = Arc<Mutex<Vec<(String, String)>>>;

    fn recording(filter: &str, received: &Received) -> Subscription {
        let received = received.clone();
        let tag = filter.to_string();
        Subscription {
            filter: filter.to_string(),
            qos: Qos::AtLeastOnce,
            on_message: Arc::new(move |topic, _payload| {
                received
                    .lock()
                    .unwrap()
                    .push((tag.clone(), topic.to_string()));
            }),
        }
    }

    #[test]
    fn dispatch_to_every_matching_filter() {
        let received = Received::default();
        let mut registry = SubscriptionRegistry::new();
        registry.insert(recording("sensors/+/temp", &received));
        registry.insert(recording("sensors/#", &received));
        registry.insert(recording("actuators/#", &received));

        let delivered = registry.dispatch("sensors/room1/temp", b"21.5");
        assert_eq!(delivered, 2);

        let mut tags: Vec<String> = received
            .lock()
            .unwrap()
            .iter()
            .map(|(tag, _)| tag.clone())
            .collect();
        tags.sort();
        assert_eq!(tags, vec!["sensors/#", "sensors/+/temp"]);
    }

    #[test]
    fn unmatched_topic_is_ignored() {
        let received = Received::default();
        let mut registry = SubscriptionRegistry::new();
        registry.insert(recording("a/b", &received));
        assert_eq!(registry.dispatch("a/c", b""), 0);
        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn insert_overwrites_same_filter() {
        let first = Received::default();
        let second = Received::default();
        let mut registry = SubscriptionRegistry::new();
        registry.insert(recording("a/b", &first));
        registry.insert(recording("a/b", &second));

        assert_eq!(registry.len(), 1);
        registry.dispatch("a/b", b"x");
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);
    }

    #[test]
    fn remove_and_clear() {
        let received = Received::default();
        let mut registry = SubscriptionRegistry::new();
        registry.insert(recording("a/b", &received));
        registry.insert(recording("c/+", &received));

        assert!(registry.remove("a/b").is_some());
        assert!(registry.remove("a/b").is_none());
        assert_eq!(registry.filters(), vec!["c/+"]);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn resubscribe_continues_past_failures() {
        let received = Received::default();
        let mut registry = SubscriptionRegistry::new();
        registry.insert(recording("a/b", &received));
        registry.insert(recording("c/+", &received));

        let mock = MockTransport::new();
        mock.fail_subscribe("a/b");

        let failed = registry.resubscribe_all(&mock).await;
        assert_eq!(failed, 1);
        assert_eq!(mock.subscribe_count("a/b"), 1);
        assert_eq!(mock.subscribe_count("c/+"), 1);
        // Failure does not unregister the filter.
        assert!(registry.contains("a/b"));
    }
}
