//! In-process broker
//!
//! Same delivery semantics as the NATS bus: broadcast subscribers see every
//! message, group members share a topic round-robin. Group deliveries stay
//! on an unacknowledged ledger until `Delivery::ack` is called, so a consumer
//! that drops a message without acking can be made to see it again.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::bus::{BusError, Delivery, EventBus, Subscription};

type Sink = mpsc::UnboundedSender<Delivery>;

#[derive(Default)]
struct Group {
    members: Vec<Sink>,
    next: usize,
}

impl Group {
    /// Hand the delivery to the next live member. Returns it back when no
    /// member is left.
    fn dispatch(&mut self, mut delivery: Delivery) -> Option<Delivery> {
        while !self.members.is_empty() {
            let index = self.next % self.members.len();
            match self.members[index].send(delivery) {
                Ok(()) => {
                    self.next = index + 1;
                    return None;
                }
                Err(mpsc::error::SendError(returned)) => {
                    self.members.remove(index);
                    delivery = returned;
                }
            }
        }
        Some(delivery)
    }
}

#[derive(Default)]
struct Topic {
    broadcast: Vec<Sink>,
    groups: HashMap<String, Group>,
}

#[derive(Clone)]
struct Unacked {
    topic: String,
    group: String,
    key: String,
    payload: Bytes,
}

#[derive(Default)]
struct Inner {
    topics: Mutex<HashMap<String, Topic>>,
    unacked: DashMap<u64, Unacked>,
    next_seq: AtomicU64,
    published: AtomicU64,
}

impl Inner {
    fn tracked(self: &Arc<Self>, entry: Unacked) -> Delivery {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let delivery = Delivery::new(entry.topic.clone(), Some(entry.key.clone()), entry.payload.clone());
        self.unacked.insert(seq, entry);

        let inner = Arc::downgrade(self);
        delivery.with_acker(Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.unacked.remove(&seq);
            }
        }))
    }
}

/// Cheap to clone; all clones share one broker.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group deliveries handed out but not yet acknowledged
    pub fn unacked_count(&self) -> usize {
        self.inner.unacked.len()
    }

    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Re-dispatch every unacknowledged group delivery, as a broker does
    /// after a consumer crash. Returns how many were redelivered.
    pub fn redeliver_unacked(&self) -> usize {
        let pending: Vec<(u64, Unacked)> = self
            .inner
            .unacked
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut redelivered = 0;
        let mut topics = self.inner.topics.lock();
        for (seq, entry) in pending {
            if self.inner.unacked.remove(&seq).is_none() {
                continue;
            }
            let Some(group) = topics
                .get_mut(&entry.topic)
                .and_then(|topic| topic.groups.get_mut(&entry.group))
            else {
                continue;
            };
            let delivery = self.inner.tracked(entry);
            if group.dispatch(delivery).is_none() {
                redelivered += 1;
            }
        }
        redelivered
    }

    fn fan_out(&self, topic: &str, key: &str, payload: Bytes) {
        let mut topics = self.inner.topics.lock();
        let Some(state) = topics.get_mut(topic) else {
            tracing::trace!(topic = %topic, "No subscribers, message dropped");
            return;
        };

        state.broadcast.retain(|sink| {
            sink.send(Delivery::new(topic, Some(key.to_string()), payload.clone()))
                .is_ok()
        });

        for (name, group) in state.groups.iter_mut() {
            let delivery = self.inner.tracked(Unacked {
                topic: topic.to_string(),
                group: name.clone(),
                key: key.to_string(),
                payload: payload.clone(),
            });
            if group.dispatch(delivery).is_some() {
                tracing::trace!(topic = %topic, group = %name, "Group has no live members");
            }
        }
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), BusError> {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        self.fan_out(topic, key, payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: Option<&str>) -> Result<Subscription, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut topics = self.inner.topics.lock();
            let state = topics.entry(topic.to_string()).or_default();
            match group {
                Some(name) => state.groups.entry(name.to_string()).or_default().members.push(tx),
                None => state.broadcast.push(tx),
            }
        }

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        });
        Ok(Subscription::new(stream.boxed()))
    }
}
