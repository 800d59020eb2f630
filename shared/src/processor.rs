//! Domain command processor runtime
//!
//! Consumes a domain's commands as one member of the processor group,
//! answers each with exactly one Result and then its Actions. A delivery is
//! acknowledged only once everything it produced has been published.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{publish_json, BusError, Delivery, EventBus};
use crate::events::{CommandEnvelope, Domain, Envelope};
use crate::topics::DomainTopics;

/// What a handler produced for one command
pub struct Handled<D: Domain> {
    pub result: D::Result,
    pub actions: Vec<D::Action>,
}

impl<D: Domain> Handled<D> {
    pub fn result(result: D::Result) -> Self {
        Self {
            result,
            actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: D::Action) -> Self {
        self.actions.push(action);
        self
    }
}

#[async_trait]
pub trait CommandHandler<D: Domain>: Send + Sync + 'static {
    /// Perform the authoritative work for `command`. An error is answered
    /// with the domain's failure Result.
    async fn handle(&self, command: &D::Command) -> anyhow::Result<Handled<D>>;
}

pub struct CommandProcessor;

impl CommandProcessor {
    /// Join the processor group and start consuming. The subscription is
    /// live once this returns.
    pub async fn spawn<D, H>(
        bus: Arc<dyn EventBus>,
        topics: DomainTopics,
        handler: Arc<H>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, BusError>
    where
        D: Domain,
        H: CommandHandler<D>,
    {
        let group = topics.processor_group();
        let mut subscription = bus.subscribe(&topics.commands, Some(&group)).await?;
        info!(domain = D::NAME, topic = %topics.commands, group = %group, "Command processor started");

        let handle = tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = subscription.next() => match next {
                        Some(delivery) => delivery,
                        None => {
                            warn!(domain = D::NAME, "Command subscription ended");
                            break;
                        }
                    },
                };
                process::<D, H>(bus.as_ref(), &topics, handler.as_ref(), delivery).await;
            }
            info!(domain = D::NAME, "Command processor stopped");
        });

        Ok(handle)
    }
}

async fn process<D, H>(bus: &dyn EventBus, topics: &DomainTopics, handler: &H, delivery: Delivery)
where
    D: Domain,
    H: CommandHandler<D>,
{
    let command: D::Command = match delivery.decode() {
        Ok(command) => command,
        Err(e) => {
            warn!(domain = D::NAME, key = ?delivery.key, error = %e, "Undecodable command dropped");
            delivery.ack();
            return;
        }
    };

    debug!(
        domain = D::NAME,
        event_id = %command.event_id(),
        command = command.command_name(),
        "Handling command"
    );

    let handled = match handler.handle(&command).await {
        Ok(handled) => handled,
        Err(e) => {
            warn!(
                domain = D::NAME,
                event_id = %command.event_id(),
                command = command.command_name(),
                error = %e,
                "Command failed"
            );
            Handled::result(D::failure(&command, e.to_string()))
        }
    };

    if let Err(e) = publish_json(bus, &topics.results, command.event_id(), &handled.result).await {
        error!(domain = D::NAME, event_id = %command.event_id(), error = %e, "Result publish failed, leaving command unacknowledged");
        return;
    }

    for action in &handled.actions {
        if let Err(e) = publish_json(bus, &topics.actions, action.event_id(), action).await {
            error!(domain = D::NAME, event_id = %command.event_id(), error = %e, "Action publish failed, leaving command unacknowledged");
            return;
        }
    }

    delivery.ack();
}
