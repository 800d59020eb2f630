//! Typed lookups over the domain bridges

use shared::events::project::{ProjectCommandEvent, ProjectDto, ProjectRole};
use shared::events::session::SessionCommandEvent;
use shared::events::user::{UserCommandEvent, UserDto};
use shared::events::{ProjectDomain, SessionDomain, UserDomain, UserId};
use shared::{BridgeError, CorrelationBridge};
use std::sync::Arc;
use std::time::Duration;

use crate::session::ProjectGrant;

/// Outcome of a VERIFY round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Valid(UserId),
    Invalid(String),
}

#[derive(Clone)]
pub struct SessionDirectory {
    bridge: Arc<CorrelationBridge<SessionDomain>>,
    timeout: Duration,
}

impl SessionDirectory {
    pub fn new(bridge: Arc<CorrelationBridge<SessionDomain>>, timeout: Duration) -> Self {
        Self { bridge, timeout }
    }

    pub async fn verify(&self, session_id: &str) -> Result<Verification, BridgeError> {
        let result = self
            .bridge
            .call(SessionCommandEvent::verify(session_id), self.timeout)
            .await?;

        match (result.success, result.user_id) {
            (true, Some(user_id)) => Ok(Verification::Valid(user_id)),
            (true, None) => Ok(Verification::Invalid("session has no owner".to_string())),
            (false, _) => Ok(Verification::Invalid(
                result
                    .error_message
                    .unwrap_or_else(|| "session expired".to_string()),
            )),
        }
    }

    pub async fn expire(&self, session_id: &str, user_id: UserId) -> Result<(), BridgeError> {
        self.bridge
            .request(SessionCommandEvent::expire(session_id, user_id), self.timeout)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct UserDirectory {
    bridge: Arc<CorrelationBridge<UserDomain>>,
    timeout: Duration,
}

impl UserDirectory {
    pub fn new(bridge: Arc<CorrelationBridge<UserDomain>>, timeout: Duration) -> Self {
        Self { bridge, timeout }
    }

    pub async fn profile(&self, user_id: UserId) -> Result<UserDto, BridgeError> {
        let result = self
            .bridge
            .request(UserCommandEvent::get(user_id), self.timeout)
            .await?;

        result
            .users
            .and_then(|users| users.into_iter().find(|user| user.id == user_id))
            .ok_or_else(|| BridgeError::DomainFailure(format!("user {} not found", user_id)))
    }
}

#[derive(Clone)]
pub struct ProjectDirectory {
    bridge: Arc<CorrelationBridge<ProjectDomain>>,
    timeout: Duration,
}

impl ProjectDirectory {
    pub fn new(bridge: Arc<CorrelationBridge<ProjectDomain>>, timeout: Duration) -> Self {
        Self { bridge, timeout }
    }

    pub async fn projects_for_user(&self, user_id: UserId) -> Result<Vec<ProjectDto>, BridgeError> {
        let result = self
            .bridge
            .request(ProjectCommandEvent::for_user(user_id), self.timeout)
            .await?;
        Ok(result.projects.unwrap_or_default())
    }

    /// Authorization set of `user_id`: one grant per project they belong to
    pub async fn grants_for_user(&self, user_id: UserId) -> Result<Vec<ProjectGrant>, BridgeError> {
        let projects = self.projects_for_user(user_id).await?;
        Ok(projects
            .iter()
            .filter_map(|project| {
                let project_id = project.id?;
                Some(ProjectGrant {
                    project_id,
                    role: project.role_of(user_id).unwrap_or(ProjectRole::Member),
                })
            })
            .collect())
    }
}
