//! Reaction to user changes
//!
//! A role or password change invalidates every session of that user. The
//! auth service consumes user Actions as one group, so exactly one instance
//! expires the sessions and announces it with an `EXPIRE_ALL` session Action.

use shared::bus::{publish_json, Delivery};
use shared::events::session::{SessionActionEvent, SessionCommandType};
use shared::events::user::{UserActionEvent, UserActionType};
use shared::events::{Domain, SessionDomain, UserDomain};
use shared::{BusError, EventBus};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::store::SessionStore;

pub const REACTOR_GROUP: &str = "auth-service";

pub struct UserActionReactor {
    bus: Arc<dyn EventBus>,
    store: Arc<SessionStore>,
    session_actions: String,
}

impl UserActionReactor {
    pub fn new(bus: Arc<dyn EventBus>, store: Arc<SessionStore>, prefix: &str) -> Self {
        Self {
            bus,
            store,
            session_actions: SessionDomain::topics(prefix).actions,
        }
    }

    pub async fn spawn(self, prefix: &str, cancel: CancellationToken) -> Result<JoinHandle<()>, BusError> {
        let topic = UserDomain::topics(prefix).actions;
        let mut subscription = self.bus.subscribe(&topic, Some(REACTOR_GROUP)).await?;
        info!(topic = %topic, "User action reactor started");

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = subscription.next() => match next {
                        Some(delivery) => self.on_delivery(delivery).await,
                        None => break,
                    },
                }
            }
            info!("User action reactor stopped");
        }))
    }

    async fn on_delivery(&self, delivery: Delivery) {
        let action: UserActionEvent = match delivery.decode() {
            Ok(action) => action,
            Err(e) => {
                warn!(error = %e, "Undecodable user action dropped");
                delivery.ack();
                return;
            }
        };

        match self.react(&action).await {
            Ok(()) => delivery.ack(),
            Err(e) => warn!(event_id = %action.event_id, error = %e, "Session action publish failed, awaiting redelivery"),
        }
    }

    /// Expire the user's sessions when the action calls for it
    pub async fn react(&self, action: &UserActionEvent) -> Result<(), BusError> {
        let user_id = match (action.action_type, action.user_id) {
            (UserActionType::RoleUpdated | UserActionType::PasswordUpdated, Some(user_id)) => user_id,
            (UserActionType::RoleUpdated | UserActionType::PasswordUpdated, None) => {
                warn!(event_id = %action.event_id, "Credential change without userId ignored");
                return Ok(());
            }
            _ => return Ok(()),
        };

        let removed = self.store.expire_all(user_id);
        info!(
            user_id = user_id,
            removed = removed,
            reason = action.action_type.as_str(),
            "Sessions expired after credential change"
        );

        let announcement = SessionActionEvent {
            event_id: action.event_id.clone(),
            user_id: Some(user_id),
            session_command_type: Some(SessionCommandType::ExpireAll),
        };
        publish_json(
            self.bus.as_ref(),
            &self.session_actions,
            &announcement.event_id,
            &announcement,
        )
        .await
    }
}
