//! NATS transport
//!
//! Commands and Actions live on a JetStream stream so that processor-group
//! deliveries are acknowledged explicitly and redelivered after `ack_wait`
//! when a consumer dies or never acks. Results and broadcast subscriptions
//! stay on core NATS.

use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, stream::RetentionPolicy};
use async_nats::{Client, ConnectOptions, Event, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;

use crate::bus::{BusError, Delivery, EventBus, Subscription};

/// Header carrying the partition key (the `eventId` for commands and results)
pub const KEY_HEADER: &str = "TaskTrack-Key";

/// Publish retry policy: capped exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt.min(10)));
        delay.min(self.max_delay)
    }
}

/// The JetStream stream backing acknowledged group consumption
#[derive(Debug, Clone)]
pub struct DurableStream {
    pub name: String,
    pub subjects: Vec<String>,
    pub max_age: Duration,
    /// Unacked deliveries are handed out again after this long
    pub ack_wait: Duration,
    pub max_deliver: i64,
}

impl DurableStream {
    /// Commands and Actions of every domain under `prefix`
    pub fn for_prefix(prefix: &str) -> Self {
        let name: String = prefix
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        Self {
            name: format!("{name}_EVENTS"),
            subjects: vec![format!("{prefix}.*.commands"), format!("{prefix}.*.actions")],
            max_age: Duration::from_secs(24 * 3600),
            ack_wait: Duration::from_secs(30),
            max_deliver: 5,
        }
    }

    pub fn covers(&self, subject: &str) -> bool {
        self.subjects.iter().any(|pattern| subject_matches(pattern, subject))
    }

    /// Durable consumer name for `group` reading `topic`
    pub fn consumer_name(group: &str, topic: &str) -> String {
        format!("{group}-{topic}")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }
}

/// NATS subject matching: `*` is one token, a trailing `>` is the rest
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut subject_tokens = subject.split('.');
    for token in pattern.split('.') {
        match (token, subject_tokens.next()) {
            (">", Some(_)) => return true,
            ("*", Some(_)) => {}
            (token, Some(actual)) if token == actual => {}
            _ => return false,
        }
    }
    subject_tokens.next().is_none()
}

pub struct NatsBus {
    client: Client,
    jetstream: jetstream::Context,
    stream: DurableStream,
    retry: RetryPolicy,
}

impl NatsBus {
    /// Connect, keep reconnecting for the lifetime of the process, and make
    /// sure `stream` exists.
    pub async fn connect(url: &str, stream: DurableStream) -> Result<Self, BusError> {
        let client = ConnectOptions::new()
            .retry_on_initial_connect()
            .event_callback(|event| async move {
                match event {
                    Event::Disconnected => tracing::warn!("NATS disconnected"),
                    Event::Connected => tracing::info!("NATS connected"),
                    other => tracing::debug!(event = %other, "NATS event"),
                }
            })
            .connect(url)
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;

        let jetstream = jetstream::new(client.clone());
        jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: stream.name.clone(),
                subjects: stream.subjects.clone(),
                max_age: stream.max_age,
                retention: RetentionPolicy::Limits,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Connect(format!("stream {}: {}", stream.name, e)))?;

        tracing::info!(url = %url, stream = %stream.name, "NATS bus ready");

        Ok(Self {
            client,
            jetstream,
            stream,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn publish_once(&self, topic: &str, headers: HeaderMap, payload: Bytes) -> Result<(), String> {
        if self.stream.covers(topic) {
            // Wait for the stream's ack so a lost write surfaces as an error
            self.jetstream
                .publish_with_headers(topic.to_string(), headers, payload)
                .await
                .map_err(|e| e.to_string())?
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        } else {
            self.client
                .publish_with_headers(topic.to_string(), headers, payload)
                .await
                .map_err(|e| e.to_string())
        }
    }

    async fn subscribe_group(&self, topic: &str, group: &str) -> Result<Subscription, BusError> {
        let subscribe_error = |reason: String| BusError::Subscribe {
            topic: topic.to_string(),
            reason,
        };
        if !self.stream.covers(topic) {
            return Err(subscribe_error(format!("not covered by stream {}", self.stream.name)));
        }

        let name = DurableStream::consumer_name(group, topic);
        let stream = self
            .jetstream
            .get_stream(&self.stream.name)
            .await
            .map_err(|e| subscribe_error(e.to_string()))?;
        let consumer = stream
            .get_or_create_consumer(
                &name,
                pull::Config {
                    durable_name: Some(name.clone()),
                    name: Some(name.clone()),
                    filter_subject: topic.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: self.stream.ack_wait,
                    max_deliver: self.stream.max_deliver,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| subscribe_error(e.to_string()))?;
        let messages = consumer
            .messages()
            .await
            .map_err(|e| subscribe_error(e.to_string()))?;

        tracing::debug!(topic = %topic, group = %group, consumer = %name, "Durable consumer attached");

        let stream = messages.filter_map(|message| async move {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(error = %e, "JetStream delivery failed");
                    return None;
                }
            };
            let key = message_key(message.headers.as_ref());
            let delivery = Delivery::new(message.subject.to_string(), key, message.payload.clone());
            Some(delivery.with_acker(Box::new(move || {
                tokio::spawn(async move {
                    if let Err(e) = message.ack().await {
                        tracing::warn!(subject = %message.subject, error = %e, "Ack failed, message will be redelivered");
                    }
                });
            })))
        });

        Ok(Subscription::new(stream.boxed()))
    }
}

fn message_key(headers: Option<&HeaderMap>) -> Option<String> {
    headers
        .and_then(|headers| headers.get(KEY_HEADER))
        .map(|value| value.as_str().to_string())
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), BusError> {
        let mut headers = HeaderMap::new();
        headers.insert(KEY_HEADER, key);

        let mut attempt = 0;
        loop {
            match self.publish_once(topic, headers.clone(), payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        topic = %topic,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(reason) => {
                    return Err(BusError::Publish {
                        topic: topic.to_string(),
                        reason,
                    })
                }
            }
        }
    }

    async fn subscribe(&self, topic: &str, group: Option<&str>) -> Result<Subscription, BusError> {
        if let Some(group) = group {
            return self.subscribe_group(topic, group).await;
        }

        let subscriber = self
            .client
            .subscribe(topic.to_string())
            .await
            .map_err(|e| BusError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(topic = %topic, "Subscribed");

        // Broadcast subscribers are not tracked, acking is a no-op
        let stream = subscriber.map(|message| {
            let key = message_key(message.headers.as_ref());
            Delivery::new(message.subject.to_string(), key, message.payload)
        });

        Ok(Subscription::new(stream.boxed()))
    }
}
