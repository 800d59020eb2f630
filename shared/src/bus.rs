//! Broker abstraction
//!
//! Services only ever see fire-and-forget `publish` and background-delivered
//! `subscribe`. Two flavours of subscription exist:
//! - `group = Some(name)`: processor-group consumption, each message reaches
//!   exactly one member of the group
//! - `group = None`: broadcast, every subscriber sees every message

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("Subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("Bus closed")]
    Closed,
}

type Acker = Box<dyn FnOnce() + Send>;

/// One message handed to a subscriber
pub struct Delivery {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Bytes,
    acker: Option<Acker>,
}

impl Delivery {
    pub fn new(topic: impl Into<String>, key: Option<String>, payload: Bytes) -> Self {
        Self {
            topic: topic.into(),
            key,
            payload,
            acker: None,
        }
    }

    pub(crate) fn with_acker(mut self, acker: Acker) -> Self {
        self.acker = Some(acker);
        self
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Acknowledge the delivery. Transports without acknowledgement treat
    /// this as a no-op.
    pub fn ack(mut self) {
        if let Some(acker) = self.acker.take() {
            acker();
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("key", &self.key)
            .field("payload_size", &self.payload.len())
            .field("tracked", &self.acker.is_some())
            .finish()
    }
}

/// Stream of deliveries for one subscription
pub struct Subscription {
    inner: BoxStream<'static, Delivery>,
}

impl Subscription {
    pub fn new(inner: BoxStream<'static, Delivery>) -> Self {
        Self { inner }
    }

    /// Next delivery, `None` once the underlying transport is gone
    pub async fn next(&mut self) -> Option<Delivery> {
        self.inner.next().await
    }
}

#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), BusError>;

    async fn subscribe(&self, topic: &str, group: Option<&str>) -> Result<Subscription, BusError>;
}

/// Serialize `value` as JSON and publish it keyed by `key`.
pub async fn publish_json<T: serde::Serialize + ?Sized>(
    bus: &dyn EventBus,
    topic: &str,
    key: &str,
    value: &T,
) -> Result<(), BusError> {
    let payload = serde_json::to_vec(value).map_err(|e| BusError::Publish {
        topic: topic.to_string(),
        reason: format!("encode: {}", e),
    })?;
    bus.publish(topic, key, Bytes::from(payload)).await
}
