//! Action-driven session invalidation
//!
//! Session, user and project Actions are consumed in broadcast mode, so
//! every gateway instance sees them. Removals run inline; refreshes need a
//! project round trip and run on their own task so a slow refresh never
//! delays the next Action.

use shared::bus::Delivery;
use shared::events::project::{ProjectActionEvent, ProjectActionType};
use shared::events::session::{SessionActionEvent, SessionCommandType};
use shared::events::user::{UserActionEvent, UserActionType};
use shared::events::{
    ActionEnvelope, Domain, ProjectDomain, ProjectId, SessionDomain, UserDomain, UserId,
};
use shared::{BusError, EventBus};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::directory::ProjectDirectory;
use crate::session::SessionCache;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Ignore,
    /// Drop the subject's sessions, forcing re-authentication
    Remove(UserId),
    /// Re-fetch the authorization set of the listed subjects, plus every
    /// cached subject holding `project`
    Refresh {
        users: Vec<UserId>,
        project: Option<ProjectId>,
    },
}

pub fn classify_session(action: &SessionActionEvent) -> Decision {
    match (action.session_command_type, action.user_id) {
        (Some(SessionCommandType::Verify), _) => Decision::Ignore,
        (_, Some(user_id)) => Decision::Remove(user_id),
        (_, None) => Decision::Ignore,
    }
}

pub fn classify_user(action: &UserActionEvent) -> Decision {
    match (action.action_type, action.user_id) {
        (
            UserActionType::RoleUpdated | UserActionType::PasswordUpdated | UserActionType::UserDeleted,
            Some(user_id),
        ) => Decision::Remove(user_id),
        _ => Decision::Ignore,
    }
}

pub fn classify_project(action: &ProjectActionEvent) -> Decision {
    let users: Vec<UserId> = action.user_id.into_iter().collect();
    match action.action_type {
        ProjectActionType::Update => Decision::Ignore,
        ProjectActionType::Delete => Decision::Refresh {
            users,
            project: Some(action.project_id),
        },
        _ if users.is_empty() => Decision::Ignore,
        _ => Decision::Refresh {
            users,
            project: None,
        },
    }
}

#[derive(Clone)]
pub struct ActionListener {
    cache: Arc<SessionCache>,
    projects: ProjectDirectory,
}

impl ActionListener {
    pub fn new(cache: Arc<SessionCache>, projects: ProjectDirectory) -> Self {
        Self { cache, projects }
    }

    /// Subscribe to the Action topics and start consuming. Subscriptions
    /// are live once this returns.
    pub async fn spawn(
        self,
        bus: Arc<dyn EventBus>,
        prefix: &str,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, BusError> {
        let mut sessions = bus.subscribe(&SessionDomain::topics(prefix).actions, None).await?;
        let mut users = bus.subscribe(&UserDomain::topics(prefix).actions, None).await?;
        let mut projects = bus.subscribe(&ProjectDomain::topics(prefix).actions, None).await?;
        info!(prefix = %prefix, "Action listener started");

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    delivery = sessions.next() => {
                        let Some(delivery) = delivery else { break };
                        self.on_delivery(delivery, classify_session);
                    }
                    delivery = users.next() => {
                        let Some(delivery) = delivery else { break };
                        self.on_delivery(delivery, classify_user);
                    }
                    delivery = projects.next() => {
                        let Some(delivery) = delivery else { break };
                        self.on_delivery(delivery, classify_project);
                    }
                }
            }
            info!("Action listener stopped");
        }))
    }

    fn on_delivery<A, F>(&self, delivery: Delivery, classify: F)
    where
        A: ActionEnvelope,
        F: Fn(&A) -> Decision,
    {
        match delivery.decode::<A>() {
            Ok(action) => {
                let decision = classify(&action);
                debug!(
                    topic = %delivery.topic,
                    classifier = action.classifier(),
                    subject = ?action.subject(),
                    decision = ?decision,
                    "Action received"
                );
                self.apply(decision);
            }
            Err(e) => warn!(topic = %delivery.topic, error = %e, "Undecodable action dropped"),
        }
        delivery.ack();
    }

    /// Apply `decision` to the cache. Returns the handle of the refresh
    /// task, if one was started.
    pub fn apply(&self, decision: Decision) -> Option<JoinHandle<()>> {
        match decision {
            Decision::Ignore => None,
            Decision::Remove(user_id) => {
                self.cache.remove_subject(user_id);
                None
            }
            Decision::Refresh { mut users, project } => {
                // A fill racing this refresh may carry the old grants. Who
                // holds a project is only known for cached subjects, so a
                // project-wide refresh discards every fill in flight.
                if let Some(project_id) = project {
                    self.cache.discard_inflight_fills();
                    users.extend(self.cache.subjects_holding_project(project_id));
                }
                users.sort_unstable();
                users.dedup();
                for user_id in &users {
                    self.cache.invalidate_subject_fills(*user_id);
                }
                // Nothing cached for them, nothing to refresh
                users.retain(|user_id| !self.cache.tokens_for_subject(*user_id).is_empty());
                if users.is_empty() {
                    return None;
                }

                let cache = Arc::clone(&self.cache);
                let projects = self.projects.clone();
                Some(tokio::spawn(async move {
                    for user_id in users {
                        refresh_subject(&cache, &projects, user_id).await;
                    }
                }))
            }
        }
    }
}

async fn refresh_subject(cache: &SessionCache, projects: &ProjectDirectory, user_id: UserId) {
    match projects.grants_for_user(user_id).await {
        Ok(grants) => {
            let refreshed = cache.refresh_grants(user_id, &grants);
            debug!(user_id = user_id, refreshed = refreshed, grants = grants.len(), "Grants refreshed");
        }
        Err(e) => {
            let removed = cache.remove_subject(user_id);
            warn!(user_id = user_id, removed = removed, error = %e, "Grant refresh failed, sessions dropped");
        }
    }
}

