//! Change Notification Bus
//!
//! Streaming sessions subscribe to a [`Topic`] and are woken whenever the
//! ledger state behind that topic changes. A wake-up carries no payload: it
//! means "re-check", never "here is new data".
//!
//! # Architecture
//!
//! ```text
//!                          TopicBus
//!            ┌──────────────────────────────────────────┐
//!            │ DashMap<topic, Vec<(SubscriptionId, tx)>>│
//!            └───────────────┬──────────────────────────┘
//!                            │ publish(topic)
//!            ┌───────────────┼───────────────┐
//!            ▼               ▼               ▼
//!      session A        session B        session C
//!   (account:GA..)   (account:GA..)   (account:GB..)
//! ```
//!
//! Each subscription owns a channel of capacity one. Publishing while a
//! signal is already pending is a no-op, so bursts of ledger writes collapse
//! into a single re-evaluation and a slow session never blocks publishers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Grouping key for change notifications
///
/// The empty topic means "no specific topic": sessions on it never subscribe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic(String);

impl Topic {
    /// Create a topic from any string
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The empty topic
    #[must_use]
    pub fn none() -> Self {
        Self(String::new())
    }

    /// Topic carrying changes to one account's state
    #[must_use]
    pub fn account(address: &str) -> Self {
        if address.is_empty() {
            return Self::none();
        }
        Self(format!("account:{address}"))
    }

    /// True for the empty topic
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    /// The topic name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for one registration on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A session's registration for one topic
///
/// Handing it back through [`ChangeBus::unsubscribe`] consumes it, so a
/// subscription cannot be released twice.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    signal: mpsc::Receiver<()>,
}

impl Subscription {
    /// Build a subscription around a signal channel
    ///
    /// Bus implementations use this to hand out registrations.
    #[must_use]
    pub fn new(id: SubscriptionId, signal: mpsc::Receiver<()>) -> Self {
        Self { id, signal }
    }

    /// The registration identifier
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next change signal
    ///
    /// Returns `false` once the bus has dropped its side of the channel.
    pub async fn changed(&mut self) -> bool {
        self.signal.recv().await.is_some()
    }
}

/// Subscribe/unsubscribe contract of the change bus
pub trait ChangeBus: Send + Sync {
    /// Register interest in `topic`
    fn subscribe(&self, topic: &Topic) -> Subscription;

    /// Release a registration obtained from [`ChangeBus::subscribe`]
    fn unsubscribe(&self, subscription: Subscription, topic: &Topic);
}

/// In-process change bus
#[derive(Default)]
pub struct TopicBus {
    topics: DashMap<String, Vec<(SubscriptionId, mpsc::Sender<()>)>>,
    next_id: AtomicU64,
}

impl TopicBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every subscriber of `topic`
    ///
    /// Returns how many subscribers now have a pending signal.
    pub fn publish(&self, topic: &Topic) -> usize {
        let Some(subscribers) = self.topics.get(topic.as_str()) else {
            return 0;
        };

        let mut woken = 0;
        for (id, tx) in subscribers.iter() {
            match tx.try_send(()) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(())) => woken += 1,
                Err(mpsc::error::TrySendError::Closed(())) => {
                    tracing::debug!(subscription = %id, topic = %topic, "Skipping closed subscription");
                }
            }
        }

        tracing::trace!(topic = %topic, woken, "Published change");
        woken
    }

    /// Number of live registrations for `topic`
    #[must_use]
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics.get(topic.as_str()).map_or(0, |subs| subs.len())
    }

    /// Number of topics with at least one registration
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

impl ChangeBus for TopicBus {
    fn subscribe(&self, topic: &Topic) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::channel(1);

        self.topics
            .entry(topic.as_str().to_string())
            .or_default()
            .push((id, tx));

        tracing::debug!(subscription = %id, topic = %topic, "Subscribed");
        Subscription::new(id, rx)
    }

    fn unsubscribe(&self, subscription: Subscription, topic: &Topic) {
        let id = subscription.id();

        if let Some(mut subscribers) = self.topics.get_mut(topic.as_str()) {
            subscribers.retain(|(existing, _)| *existing != id);
        }
        self.topics
            .remove_if(topic.as_str(), |_, subscribers| subscribers.is_empty());

        tracing::debug!(subscription = %id, topic = %topic, "Unsubscribed");
    }
}

impl fmt::Debug for TopicBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicBus")
            .field("topics", &self.topic_count())
            .finish()
    }
}
