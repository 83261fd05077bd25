//! The seam between the message-distribution core and the network host.
//!
//! A host needs to offer very little: a stable local identity, a way to get
//! a publish handle and a subscription for a named topic, broadcast of raw
//! bytes, and a blocking `next()` that reports who handed us each delivery.

use async_trait::async_trait;
use meshcomm_core::Result;
use std::sync::Arc;

/// One inbound payload from a topic.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub data: Vec<u8>,
    /// Apparent origin: the identity of the peer that delivered the payload
    /// to us, as reported by the transport.
    pub origin: String,
}

/// A network host able to join named broadcast topics.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity this host presents to its peers.
    fn local_id(&self) -> String;

    /// Obtain a publish handle for `topic`.
    async fn join_topic(&self, topic: &str) -> Result<Arc<dyn TopicPublisher>>;

    /// Start receiving deliveries for `topic`.
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn TopicSubscription>>;
}

/// Publish capability for one topic.
#[async_trait]
pub trait TopicPublisher: Send + Sync {
    fn topic(&self) -> &str;

    /// Hand `data` to every current subscriber of the topic.
    async fn broadcast(&self, data: Vec<u8>) -> Result<()>;
}

/// Inbound stream for one topic.
#[async_trait]
pub trait TopicSubscription: Send {
    /// Wait for the next delivery. An error means the subscription is dead.
    async fn next(&mut self) -> Result<Delivery>;
}
