use anyhow::Context;
use async_trait::async_trait;
use shared::events::session::{
    SessionActionEvent, SessionCommandEvent, SessionCommandType, SessionResultEvent,
};
use shared::events::SessionDomain;
use shared::{CommandHandler, Handled};
use std::sync::Arc;
use tracing::info;

use crate::store::{SessionCheck, SessionStore};

pub const SESSION_EXPIRED: &str = "session expired";

/// Answers session commands against the store. Every command is safe to
/// replay: expiring a session that is already gone still succeeds.
pub struct SessionCommandHandler {
    store: Arc<SessionStore>,
}

impl SessionCommandHandler {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    fn verify(&self, command: &SessionCommandEvent) -> anyhow::Result<Handled<SessionDomain>> {
        let session_id = command.session_id.as_deref().context("sessionId is required")?;

        match self.store.check(session_id) {
            SessionCheck::Valid(user_id) => Ok(Handled::result(SessionResultEvent::ok(
                command.event_id.clone(),
                Some(user_id),
            ))),
            SessionCheck::Expired(user_id) => {
                info!(user_id = user_id, "Expired session presented");
                Ok(
                    Handled::result(SessionResultEvent::failed(command.event_id.clone(), SESSION_EXPIRED))
                        .with_action(SessionActionEvent::new(SessionCommandType::Expire, Some(user_id))),
                )
            }
            SessionCheck::Unknown => Ok(Handled::result(SessionResultEvent::failed(
                command.event_id.clone(),
                SESSION_EXPIRED,
            ))),
        }
    }

    fn expire(&self, command: &SessionCommandEvent) -> anyhow::Result<Handled<SessionDomain>> {
        let session_id = command.session_id.as_deref().context("sessionId is required")?;
        let owner = self.store.expire(session_id).or(command.user_id);

        Ok(Handled::result(SessionResultEvent::ok(command.event_id.clone(), owner))
            .with_action(SessionActionEvent::new(SessionCommandType::Expire, owner)))
    }

    fn expire_all(&self, command: &SessionCommandEvent) -> anyhow::Result<Handled<SessionDomain>> {
        let user_id = command.user_id.context("userId is required")?;
        let removed = self.store.expire_all(user_id);
        info!(user_id = user_id, removed = removed, "All sessions expired");

        Ok(Handled::result(SessionResultEvent::ok(command.event_id.clone(), Some(user_id)))
            .with_action(SessionActionEvent::new(SessionCommandType::ExpireAll, Some(user_id))))
    }

    fn expire_all_except_current(
        &self,
        command: &SessionCommandEvent,
    ) -> anyhow::Result<Handled<SessionDomain>> {
        let user_id = command.user_id.context("userId is required")?;
        let current = command.session_id.as_deref().context("sessionId is required")?;
        let removed = self.store.expire_all_except(user_id, current);
        info!(user_id = user_id, removed = removed, "Other sessions expired");

        Ok(Handled::result(SessionResultEvent::ok(command.event_id.clone(), Some(user_id)))
            .with_action(SessionActionEvent::new(
                SessionCommandType::ExpireAllExceptCurrent,
                Some(user_id),
            )))
    }
}

#[async_trait]
impl CommandHandler<SessionDomain> for SessionCommandHandler {
    async fn handle(&self, command: &SessionCommandEvent) -> anyhow::Result<Handled<SessionDomain>> {
        match command.session_command_type {
            SessionCommandType::Verify => self.verify(command),
            SessionCommandType::Expire => self.expire(command),
            SessionCommandType::ExpireAll => self.expire_all(command),
            SessionCommandType::ExpireAllExceptCurrent => self.expire_all_except_current(command),
        }
    }
}
