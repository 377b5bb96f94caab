//! Topic-keyed publish/subscribe built on tokio broadcast channels.
//!
//! One broadcast channel exists per entity id (job or batch) and only while it
//! has at least one subscriber. A [`Subscription`] filters the entity's channel
//! down to the kinds it asked for, so delivery is in publish order per topic and
//! also across the topics of one entity. Nothing is buffered for entities nobody
//! listens to, and nothing is replayed to late subscribers.

use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

pub use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::payload::{BusEvent, EventKind, EventPayload, Topic};

/// Default per-entity channel capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Events a subscriber may fall behind by before it observes `Lagged`.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl EventBusConfig {
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

struct BusInner {
    channels: DashMap<String, broadcast::Sender<BusEvent>>,
    capacity: usize,
}

/// Event bus shared by the job registry and the batch coordinator.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new bus with default capacity.
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                channels: DashMap::new(),
                // broadcast::channel panics on zero capacity
                capacity: config.channel_capacity.max(1),
            }),
        }
    }

    /// Publish `payload` on the topic `(payload.kind(), id)`.
    ///
    /// Returns the number of subscriptions attached to the entity at the time
    /// of sending; 0 when nobody listens.
    pub fn publish(&self, id: &str, payload: EventPayload) -> usize {
        let Some(sender) = self.inner.channels.get(id) else {
            trace!(topic = %Topic::new(payload.kind(), id), "No subscribers");
            return 0;
        };

        let event = BusEvent {
            topic: Topic::new(payload.kind(), id),
            published_at: Utc::now(),
            payload,
        };
        // send() only fails when every receiver is gone
        sender.send(event).unwrap_or(0)
    }

    /// Subscribe to a single topic.
    pub fn subscribe(&self, topic: &Topic) -> Subscription {
        self.subscribe_kinds(&topic.id, &[topic.kind])
    }

    /// Subscribe to every event published for `id`.
    pub fn subscribe_entity(&self, id: &str) -> Subscription {
        self.subscribe_kinds(id, &[])
    }

    /// Subscribe to several kinds of one entity. An empty slice means all kinds.
    pub fn subscribe_kinds(&self, id: &str, kinds: &[EventKind]) -> Subscription {
        let receiver = self
            .inner
            .channels
            .entry(id.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe();

        Subscription {
            id: id.to_string(),
            kinds: kinds.to_vec(),
            receiver: Some(receiver),
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live subscriptions for an entity.
    pub fn subscriber_count(&self, id: &str) -> usize {
        self.inner
            .channels
            .get(id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of entities that currently have a channel.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("channels", &self.inner.channels.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: String,
    kinds: Vec<EventKind>,
    receiver: Option<broadcast::Receiver<BusEvent>>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Entity id this subscription listens to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the next matching event.
    ///
    /// `Err(RecvError::Lagged(n))` means `n` events were missed; the next call
    /// continues with the oldest event still retained.
    pub async fn recv(&mut self) -> Result<BusEvent, RecvError> {
        let kinds = &self.kinds;
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(RecvError::Closed);
        };
        loop {
            let event = receiver.recv().await?;
            if kinds.is_empty() || kinds.contains(&event.kind()) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Result<BusEvent, TryRecvError> {
        let kinds = &self.kinds;
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(TryRecvError::Closed);
        };
        loop {
            let event = receiver.try_recv()?;
            if kinds.is_empty() || kinds.contains(&event.kind()) {
                return Ok(event);
            }
        }
    }

    /// Explicit unsubscribe; equivalent to dropping.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        drop(self.receiver.take());
        if let Some(inner) = self.bus.upgrade() {
            inner
                .channels
                .remove_if(&self.id, |_, sender| sender.receiver_count() == 0);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kinds", &self.kinds)
            .finish()
    }
}
