//! Typed, topic-based publish/subscribe bus with synchronous fan-out.
//!
//! One [`TopicBus`] exists per payload type. Topics are plain strings, so a
//! single bus serves every server (`"sessionInfo-<id>"`, …).
//!
//! # Delivery
//!
//! [`TopicBus::publish`] hands the value to each current subscriber of the
//! topic in turn and only returns once every one of them has taken it out of
//! its [`Subscription`]. Nothing is buffered beyond that hand-off, so a slow
//! subscriber back-pressures the publisher instead of accumulating stale
//! snapshots. Per topic, every subscriber sees publishes in publish order.
//!
//! Subscriptions live as long as their [`Subscription`] value. There is no
//! explicit unsubscribe; dropped subscriptions are pruned on the next publish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// A value in flight to one subscriber together with its acceptance signal.
struct Delivery<T> {
    value: T,
    accepted: oneshot::Sender<()>,
}

type Subscribers<T> = HashMap<String, Vec<mpsc::Sender<Delivery<T>>>>;

/// Shared bus. Clone it cheaply – all clones share the same subscriber table.
pub struct TopicBus<T> {
    topics: Arc<Mutex<Subscribers<T>>>,
}

impl<T> Clone for TopicBus<T> {
    fn clone(&self) -> Self {
        Self {
            topics: Arc::clone(&self.topics),
        }
    }
}

impl<T> Default for TopicBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for TopicBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let topics = self.topics.lock().map(|t| t.len()).unwrap_or_default();
        f.debug_struct("TopicBus").field("topics", &topics).finish()
    }
}

impl<T> TopicBus<T> {
    /// An empty bus with no topics.
    pub fn new() -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new subscriber on `topic`.
    ///
    /// The returned [`Subscription`] receives every value published to
    /// `topic` from now on.
    pub fn subscribe(&self, topic: impl Into<String>) -> Subscription<T> {
        let topic = topic.into();
        let (sender, receiver) = mpsc::channel(1);
        // A poisoned lock only means another thread panicked mid-update; the
        // table itself is still a valid map of senders.
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics.entry(topic.clone()).or_default().push(sender);
        Subscription { topic, receiver }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

impl<T: Clone + Send + 'static> TopicBus<T> {
    /// Deliver `value` to every current subscriber of `topic`.
    ///
    /// Waits until each subscriber has accepted the value. Returns the number
    /// of subscribers that accepted it; `0` when nobody listens on the topic
    /// (a normal condition, not an error).
    pub async fn publish(&self, topic: &str, value: T) -> usize {
        // Copy the subscriber list and release the lock before any hand-off.
        let senders = {
            let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
            match topics.get(topic) {
                Some(subs) => subs.clone(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut saw_closed = false;
        for sender in senders {
            let (accepted, on_accept) = oneshot::channel();
            let delivery = Delivery {
                value: value.clone(),
                accepted,
            };
            if sender.send(delivery).await.is_err() {
                saw_closed = true;
                continue;
            }
            match on_accept.await {
                Ok(()) => delivered += 1,
                Err(_) => saw_closed = true,
            }
        }

        if saw_closed {
            let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(subs) = topics.get_mut(topic) {
                subs.retain(|s| !s.is_closed());
                debug!(topic, remaining = subs.len(), "pruned dropped subscribers");
            }
        }

        delivered
    }
}

/// Receiving end of one subscription.
pub struct Subscription<T> {
    topic: String,
    receiver: mpsc::Receiver<Delivery<T>>,
}

impl<T> Subscription<T> {
    /// Wait for the next value. Accepting it releases the publisher.
    ///
    /// Returns `None` once the bus and every clone of it have been dropped.
    pub async fn recv(&mut self) -> Option<T> {
        let delivery = self.receiver.recv().await?;
        let _ = delivery.accepted.send(());
        Some(delivery.value)
    }

    /// The topic this subscription is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}
