use serde::{Deserialize, Serialize};

use super::{
    new_event_id, ActionEnvelope, CommandEnvelope, Domain, Envelope, ResultEnvelope, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionCommandType {
    Expire,
    ExpireAll,
    ExpireAllExceptCurrent,
    Verify,
}

impl SessionCommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionCommandType::Expire => "EXPIRE",
            SessionCommandType::ExpireAll => "EXPIRE_ALL",
            SessionCommandType::ExpireAllExceptCurrent => "EXPIRE_ALL_EXCEPT_CURRENT",
            SessionCommandType::Verify => "VERIFY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCommandEvent {
    #[serde(default)]
    pub event_id: String,
    pub session_command_type: SessionCommandType,
    pub session_id: Option<String>,
    pub user_id: Option<UserId>,
}

impl SessionCommandEvent {
    fn new(kind: SessionCommandType, session_id: Option<String>, user_id: Option<UserId>) -> Self {
        Self {
            event_id: String::new(),
            session_command_type: kind,
            session_id,
            user_id,
        }
    }

    pub fn verify(session_id: impl Into<String>) -> Self {
        Self::new(SessionCommandType::Verify, Some(session_id.into()), None)
    }

    pub fn expire(session_id: impl Into<String>, user_id: UserId) -> Self {
        Self::new(SessionCommandType::Expire, Some(session_id.into()), Some(user_id))
    }

    pub fn expire_all(user_id: UserId) -> Self {
        Self::new(SessionCommandType::ExpireAll, None, Some(user_id))
    }

    pub fn expire_all_except_current(user_id: UserId, session_id: impl Into<String>) -> Self {
        Self::new(
            SessionCommandType::ExpireAllExceptCurrent,
            Some(session_id.into()),
            Some(user_id),
        )
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResultEvent {
    pub event_id: String,
    pub user_id: Option<UserId>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl SessionResultEvent {
    pub fn ok(event_id: impl Into<String>, user_id: Option<UserId>) -> Self {
        Self {
            event_id: event_id.into(),
            user_id,
            success: true,
            error_message: None,
        }
    }

    pub fn failed(event_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            user_id: None,
            success: false,
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionActionEvent {
    pub event_id: String,
    pub user_id: Option<UserId>,
    pub session_command_type: Option<SessionCommandType>,
}

impl SessionActionEvent {
    pub fn new(kind: SessionCommandType, user_id: Option<UserId>) -> Self {
        Self {
            event_id: new_event_id(),
            user_id,
            session_command_type: Some(kind),
        }
    }
}

impl Envelope for SessionCommandEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl CommandEnvelope for SessionCommandEvent {
    fn set_event_id(&mut self, event_id: String) {
        self.event_id = event_id;
    }

    fn command_name(&self) -> &'static str {
        self.session_command_type.as_str()
    }
}

impl Envelope for SessionResultEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl ResultEnvelope for SessionResultEvent {
    fn success(&self) -> bool {
        self.success
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

impl Envelope for SessionActionEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl ActionEnvelope for SessionActionEvent {
    fn subject(&self) -> Option<i32> {
        self.user_id
    }

    fn classifier(&self) -> &str {
        self.session_command_type
            .as_ref()
            .map(SessionCommandType::as_str)
            .unwrap_or("UNKNOWN")
    }
}

pub struct SessionDomain;

impl Domain for SessionDomain {
    const NAME: &'static str = "session";

    type Command = SessionCommandEvent;
    type Result = SessionResultEvent;
    type Action = SessionActionEvent;

    fn failure(command: &SessionCommandEvent, message: String) -> SessionResultEvent {
        SessionResultEvent::failed(command.event_id.clone(), message)
    }
}
