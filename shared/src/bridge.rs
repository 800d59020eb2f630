//! Command/result correlation bridge
//!
//! Turns fire-and-forget publish plus a broadcast results subscription into
//! an awaitable call. One bridge per domain; every in-flight call shares the
//! single results listener.
//!
//! A waiter is registered before the command is published and is removed
//! exactly once, by whichever of these happens first: the listener resolving
//! it, the caller's guard dropping (timeout, publish failure, cancellation),
//! or `shutdown`.

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, EventBus, Subscription};
use crate::events::{CommandEnvelope, Domain, Envelope, ResultEnvelope};
use crate::topics::DomainTopics;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("No result for {event_id} within {timeout:?}")]
    Timeout { event_id: String, timeout: Duration },
    #[error("Domain failure: {0}")]
    DomainFailure(String),
    #[error("Transport failure: {0}")]
    TransportFailure(#[from] BusError),
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Bridge closed")]
    Closed,
    #[error("Command encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
}

impl BridgeError {
    /// Upstream did not answer or could not be reached
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. } | BridgeError::TransportFailure(_))
    }
}

struct Waiter<R> {
    seq: u64,
    tx: oneshot::Sender<R>,
}

/// Outstanding calls keyed by `eventId`
pub(crate) struct PendingWaiters<R> {
    map: DashMap<String, Waiter<R>>,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl<R: Send + 'static> PendingWaiters<R> {
    pub(crate) fn new() -> Self {
        Self {
            map: DashMap::new(),
            next_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn register(
        self: &Arc<Self>,
        event_id: &str,
    ) -> Result<(WaiterGuard<R>, oneshot::Receiver<R>), BridgeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        match self.map.entry(event_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(BridgeError::InvariantViolation(format!(
                    "eventId {} is already pending",
                    event_id
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(Waiter { seq, tx });
            }
        }

        let guard = WaiterGuard {
            waiters: Arc::clone(self),
            event_id: event_id.to_string(),
            seq,
        };
        // `close` may have cleared the map between the check above and the
        // insert; the guard removes the stray waiter on the way out.
        if self.closed.load(Ordering::SeqCst) {
            drop(guard);
            return Err(BridgeError::Closed);
        }
        Ok((guard, rx))
    }

    /// Hand `result` to its waiter. False when nobody was waiting for it.
    fn resolve(&self, event_id: &str, result: R) -> bool {
        match self.map.remove(event_id) {
            Some((_, waiter)) => waiter.tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Drop every waiter; their callers observe `Closed`.
    pub(crate) fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let failed = self.map.len();
        self.map.clear();
        failed
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}

/// Removes the caller's waiter when the call ends, however it ends
pub(crate) struct WaiterGuard<R: Send + 'static> {
    waiters: Arc<PendingWaiters<R>>,
    event_id: String,
    seq: u64,
}

impl<R: Send + 'static> Drop for WaiterGuard<R> {
    fn drop(&mut self) {
        // The slot may already hold a newer call with the same id
        self.waiters
            .map
            .remove_if(&self.event_id, |_, waiter| waiter.seq == self.seq);
    }
}

#[derive(Default)]
struct BridgeStats {
    sent: AtomicU64,
    resolved: AtomicU64,
    timed_out: AtomicU64,
    transport_failures: AtomicU64,
    orphaned: AtomicU64,
    malformed: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatsSnapshot {
    pub domain: String,
    pub sent: u64,
    pub resolved: u64,
    pub timed_out: u64,
    pub transport_failures: u64,
    /// Results with no waiter: late, duplicate or meant for another gateway
    pub orphaned: u64,
    pub malformed: u64,
    pub pending: usize,
}

pub struct CorrelationBridge<D: Domain> {
    bus: Arc<dyn EventBus>,
    topics: DomainTopics,
    default_timeout: Duration,
    waiters: Arc<PendingWaiters<D::Result>>,
    stats: Arc<BridgeStats>,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<D: Domain> CorrelationBridge<D> {
    /// Subscribe to the results topic and start the listener. The
    /// subscription is live once this returns.
    pub async fn start(
        bus: Arc<dyn EventBus>,
        topics: DomainTopics,
        default_timeout: Duration,
    ) -> Result<Self, BusError> {
        let subscription = bus.subscribe(&topics.results, None).await?;

        let waiters = Arc::new(PendingWaiters::new());
        let stats = Arc::new(BridgeStats::default());
        let cancel = CancellationToken::new();

        let listener = tokio::spawn(listen::<D>(
            subscription,
            topics.results.clone(),
            Arc::clone(&waiters),
            Arc::clone(&stats),
            cancel.clone(),
        ));

        info!(
            domain = D::NAME,
            results = %topics.results,
            timeout_ms = default_timeout.as_millis() as u64,
            "Correlation bridge started"
        );

        Ok(Self {
            bus,
            topics,
            default_timeout,
            waiters,
            stats,
            cancel,
            listener: Mutex::new(Some(listener)),
        })
    }

    pub fn topics(&self) -> &DomainTopics {
        &self.topics
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send `command` and wait up to `timeout` for its Result. A Result with
    /// `success == false` is returned as-is.
    pub async fn call(
        &self,
        mut command: D::Command,
        timeout: Duration,
    ) -> Result<D::Result, BridgeError> {
        let event_id = command.ensure_event_id();
        let payload = serde_json::to_vec(&command).map_err(BridgeError::Encode)?;

        // Registered before publishing so a fast Result cannot be missed
        let (_guard, rx) = self.waiters.register(&event_id)?;

        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        debug!(
            domain = D::NAME,
            event_id = %event_id,
            command = command.command_name(),
            "Sending command"
        );

        if let Err(e) = self
            .bus
            .publish(&self.topics.commands, &event_id, Bytes::from(payload))
            .await
        {
            self.stats.transport_failures.fetch_add(1, Ordering::Relaxed);
            warn!(domain = D::NAME, event_id = %event_id, error = %e, "Command publish failed");
            return Err(BridgeError::TransportFailure(e));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(BridgeError::Closed),
            Err(_) => {
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    domain = D::NAME,
                    event_id = %event_id,
                    command = command.command_name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Command timed out"
                );
                Err(BridgeError::Timeout { event_id, timeout })
            }
        }
    }

    pub async fn call_default(&self, command: D::Command) -> Result<D::Result, BridgeError> {
        self.call(command, self.default_timeout).await
    }

    /// Like `call`, but a `success == false` Result becomes `DomainFailure`.
    pub async fn request(
        &self,
        command: D::Command,
        timeout: Duration,
    ) -> Result<D::Result, BridgeError> {
        let result = self.call(command, timeout).await?;
        if result.success() {
            Ok(result)
        } else {
            let message = result
                .error_message()
                .unwrap_or("request failed")
                .to_string();
            Err(BridgeError::DomainFailure(message))
        }
    }

    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }

    pub fn stats(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            domain: D::NAME.to_string(),
            sent: self.stats.sent.load(Ordering::Relaxed),
            resolved: self.stats.resolved.load(Ordering::Relaxed),
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
            transport_failures: self.stats.transport_failures.load(Ordering::Relaxed),
            orphaned: self.stats.orphaned.load(Ordering::Relaxed),
            malformed: self.stats.malformed.load(Ordering::Relaxed),
            pending: self.waiters.len(),
        }
    }

    /// Stop the listener and fail every outstanding call with `Closed`.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                error!(domain = D::NAME, error = %e, "Bridge listener ended abnormally");
            }
        }
        let failed = self.waiters.close();
        info!(domain = D::NAME, failed_calls = failed, stats = ?self.stats(), "Correlation bridge stopped");
    }
}

impl<D: Domain> Drop for CorrelationBridge<D> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn listen<D: Domain>(
    mut subscription: Subscription,
    topic: String,
    waiters: Arc<PendingWaiters<D::Result>>,
    stats: Arc<BridgeStats>,
    cancel: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            _ = cancel.cancelled() => break,
            next = subscription.next() => match next {
                Some(delivery) => delivery,
                None => {
                    warn!(domain = D::NAME, topic = %topic, "Results subscription ended");
                    waiters.close();
                    break;
                }
            },
        };

        match delivery.decode::<D::Result>() {
            Ok(result) => {
                let event_id = result.event_id().to_string();
                if waiters.resolve(&event_id, result) {
                    stats.resolved.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.orphaned.fetch_add(1, Ordering::Relaxed);
                    debug!(domain = D::NAME, event_id = %event_id, "Result has no waiter, dropped");
                }
            }
            Err(e) => {
                stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(domain = D::NAME, topic = %topic, error = %e, "Undecodable result dropped");
            }
        }
        delivery.ack();
    }
}
