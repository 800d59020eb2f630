//! Wire contracts
//!
//! Every domain has three message kinds on three subjects:
//! - Command: a request, correlated by `eventId`
//! - Result: the outcome of exactly one Command, same `eventId`
//! - Action: broadcast notice that authoritative state changed; its
//!   `eventId` is a trace id only
//!
//! All payloads are JSON with camelCase field names.

pub mod backup;
pub mod project;
pub mod session;
pub mod skill;
pub mod task;
pub mod user;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use uuid::Uuid;

use crate::topics::DomainTopics;

pub use backup::BackupDomain;
pub use project::ProjectDomain;
pub use session::SessionDomain;
pub use skill::SkillDomain;
pub use task::ProjectTaskDomain;
pub use user::UserDomain;

pub type UserId = i32;
pub type ProjectId = i32;
pub type SkillId = i32;

pub fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

pub trait Envelope: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    fn event_id(&self) -> &str;
}

pub trait CommandEnvelope: Envelope {
    fn set_event_id(&mut self, event_id: String);

    /// Command type name, for logs
    fn command_name(&self) -> &'static str;

    /// Assign a fresh `eventId` unless the caller already set one.
    fn ensure_event_id(&mut self) -> String {
        if self.event_id().is_empty() {
            self.set_event_id(new_event_id());
        }
        self.event_id().to_string()
    }
}

pub trait ResultEnvelope: Envelope {
    fn success(&self) -> bool;

    fn error_message(&self) -> Option<&str>;
}

pub trait ActionEnvelope: Envelope {
    /// Subject whose state changed, when the action names one
    fn subject(&self) -> Option<i32>;

    /// Change classifier, e.g. `ROLE_UPDATED`
    fn classifier(&self) -> &str;
}

/// Ties one domain's message types to its subjects.
pub trait Domain: Send + Sync + 'static {
    const NAME: &'static str;

    type Command: CommandEnvelope;
    type Result: ResultEnvelope;
    type Action: ActionEnvelope;

    /// Failure result answering `command`
    fn failure(command: &Self::Command, message: String) -> Self::Result;

    fn topics(prefix: &str) -> DomainTopics {
        DomainTopics::new(prefix, Self::NAME)
    }
}
