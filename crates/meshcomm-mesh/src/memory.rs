//! In-process transport.
//!
//! A [`MemoryHub`] plays the role of the gossip network for any number of
//! [`MemoryTransport`] nodes living in the same process. Like GossipSub, a
//! broadcast reaches every subscriber of the topic except the sender. The
//! hub can also forge deliveries and inject failures, which is what the
//! test suites use it for.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use meshcomm_core::{MeshCommError, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::transport::{Delivery, TopicPublisher, TopicSubscription, Transport};

struct Subscriber {
    node_id: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct HubState {
    subscribers: HashMap<String, Vec<Subscriber>>,
    /// Every payload broadcast per topic, in order.
    sent: HashMap<String, Vec<Vec<u8>>>,
    failing_joins: HashSet<String>,
    failing_subscribes: HashSet<String>,
    failing_publishes: HashSet<String>,
}

/// Shared in-memory broadcast medium.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport attached to this hub with the given identity.
    pub fn node(&self, node_id: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            node_id: node_id.into(),
        }
    }

    /// Deliver raw bytes to every subscriber of `topic` as if `origin` had
    /// forwarded them. Returns how many subscriptions received the payload.
    pub fn inject(&self, topic: &str, origin: &str, data: impl Into<Vec<u8>>) -> usize {
        let data = data.into();
        let mut state = self.state.lock();
        let Some(subs) = state.subscribers.get_mut(topic) else {
            return 0;
        };
        subs.retain(|s| !s.tx.is_closed());
        let mut delivered = 0;
        for sub in subs.iter() {
            let delivery = Delivery {
                data: data.clone(),
                origin: origin.to_string(),
            };
            if sub.tx.send(delivery).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Make every later `join_topic(topic)` fail.
    pub fn fail_joins(&self, topic: &str) {
        self.state.lock().failing_joins.insert(topic.to_string());
    }

    /// Make every later `subscribe(topic)` fail.
    pub fn fail_subscribes(&self, topic: &str) {
        self.state.lock().failing_subscribes.insert(topic.to_string());
    }

    /// Make every later broadcast on `topic` fail.
    pub fn fail_publishes(&self, topic: &str) {
        self.state.lock().failing_publishes.insert(topic.to_string());
    }

    /// Drop every subscription of `topic`; their `next()` returns an error.
    pub fn close_topic(&self, topic: &str) {
        self.state.lock().subscribers.remove(topic);
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .subscribers
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Every payload that has been broadcast on `topic`.
    pub fn sent(&self, topic: &str) -> Vec<Vec<u8>> {
        self.state.lock().sent.get(topic).cloned().unwrap_or_default()
    }
}

/// One node's view of a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
    node_id: String,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_id(&self) -> String {
        self.node_id.clone()
    }

    async fn join_topic(&self, topic: &str) -> Result<Arc<dyn TopicPublisher>> {
        if self.hub.state.lock().failing_joins.contains(topic) {
            return Err(MeshCommError::Join {
                topic: topic.to_string(),
                reason: "topic join refused".into(),
            });
        }
        Ok(Arc::new(MemoryPublisher {
            hub: self.hub.clone(),
            node_id: self.node_id.clone(),
            topic: topic.to_string(),
        }))
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn TopicSubscription>> {
        let mut state = self.hub.state.lock();
        if state.failing_subscribes.contains(topic) {
            return Err(MeshCommError::Join {
                topic: topic.to_string(),
                reason: "subscription refused".into(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                node_id: self.node_id.clone(),
                tx,
            });
        Ok(Box::new(MemorySubscription {
            topic: topic.to_string(),
            rx,
        }))
    }
}

struct MemoryPublisher {
    hub: MemoryHub,
    node_id: String,
    topic: String,
}

#[async_trait]
impl TopicPublisher for MemoryPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn broadcast(&self, data: Vec<u8>) -> Result<()> {
        let mut state = self.hub.state.lock();
        if state.failing_publishes.contains(&self.topic) {
            return Err(MeshCommError::Publish {
                topic: self.topic.clone(),
                reason: "no peers subscribed to topic".into(),
            });
        }
        let mut delivered = 0usize;
        if let Some(subs) = state.subscribers.get_mut(&self.topic) {
            subs.retain(|s| !s.tx.is_closed());
            for sub in subs.iter().filter(|s| s.node_id != self.node_id) {
                let delivery = Delivery {
                    data: data.clone(),
                    origin: self.node_id.clone(),
                };
                if sub.tx.send(delivery).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!(topic = %self.topic, from = %self.node_id, delivered, "memory broadcast");
        state.sent.entry(self.topic.clone()).or_default().push(data);
        Ok(())
    }
}

struct MemorySubscription {
    topic: String,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl TopicSubscription for MemorySubscription {
    async fn next(&mut self) -> Result<Delivery> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| MeshCommError::SubscriptionClosed(self.topic.clone()))
    }
}
