use serde::{Deserialize, Serialize};

use super::{
    new_event_id, ActionEnvelope, CommandEnvelope, Domain, Envelope, ResultEnvelope, SkillId,
    UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserCommandType {
    Create,
    Delete,
    List,
    Edit,
    FindBySkills,
    Get,
}

impl UserCommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserCommandType::Create => "CREATE",
            UserCommandType::Delete => "DELETE",
            UserCommandType::List => "LIST",
            UserCommandType::Edit => "EDIT",
            UserCommandType::FindBySkills => "FIND_BY_SKILLS",
            UserCommandType::Get => "GET",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserActionType {
    UserCreated,
    UserUpdated,
    RoleUpdated,
    PasswordUpdated,
    UserDeleted,
    #[serde(other)]
    Unknown,
}

impl UserActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserActionType::UserCreated => "USER_CREATED",
            UserActionType::UserUpdated => "USER_UPDATED",
            UserActionType::RoleUpdated => "ROLE_UPDATED",
            UserActionType::PasswordUpdated => "PASSWORD_UPDATED",
            UserActionType::UserDeleted => "USER_DELETED",
            UserActionType::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: UserId,
    pub login: String,
    pub email: String,
    pub full_name: Option<String>,
    pub global_role: String,
    #[serde(default)]
    pub skill_ids: Vec<SkillId>,
    pub created_at: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCommandEvent {
    #[serde(default)]
    pub event_id: String,
    pub command_type: UserCommandType,
    pub user_id: Option<UserId>,
    pub login: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub avatar_url: Option<String>,
    pub full_name: Option<String>,
    pub global_role: Option<String>,
    #[serde(default)]
    pub skill_ids: Vec<SkillId>,
}

impl UserCommandEvent {
    pub fn new(command_type: UserCommandType) -> Self {
        Self {
            event_id: String::new(),
            command_type,
            user_id: None,
            login: None,
            email: None,
            password_hash: None,
            avatar_url: None,
            full_name: None,
            global_role: None,
            skill_ids: Vec::new(),
        }
    }

    pub fn get(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::new(UserCommandType::Get)
        }
    }

    /// `GET` addressed by login; the Result carries the stored `passwordHash`
    pub fn get_by_login(login: impl Into<String>) -> Self {
        Self {
            login: Some(login.into()),
            ..Self::new(UserCommandType::Get)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResultEvent {
    pub event_id: String,
    pub users: Option<Vec<UserDto>>,
    pub password_hash: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl UserResultEvent {
    pub fn ok(event_id: impl Into<String>, users: Vec<UserDto>) -> Self {
        Self {
            event_id: event_id.into(),
            users: Some(users),
            password_hash: None,
            success: true,
            error_message: None,
        }
    }

    pub fn failed(event_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            users: None,
            password_hash: None,
            success: false,
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActionEvent {
    pub event_id: String,
    pub action_type: UserActionType,
    pub user_id: Option<UserId>,
    pub login: Option<String>,
}

impl UserActionEvent {
    pub fn new(action_type: UserActionType, user_id: UserId) -> Self {
        Self {
            event_id: new_event_id(),
            action_type,
            user_id: Some(user_id),
            login: None,
        }
    }
}

impl Envelope for UserCommandEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl CommandEnvelope for UserCommandEvent {
    fn set_event_id(&mut self, event_id: String) {
        self.event_id = event_id;
    }

    fn command_name(&self) -> &'static str {
        self.command_type.as_str()
    }
}

impl Envelope for UserResultEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl ResultEnvelope for UserResultEvent {
    fn success(&self) -> bool {
        self.success
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

impl Envelope for UserActionEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl ActionEnvelope for UserActionEvent {
    fn subject(&self) -> Option<i32> {
        self.user_id
    }

    fn classifier(&self) -> &str {
        self.action_type.as_str()
    }
}

pub struct UserDomain;

impl Domain for UserDomain {
    const NAME: &'static str = "user";

    type Command = UserCommandEvent;
    type Result = UserResultEvent;
    type Action = UserActionEvent;

    fn failure(command: &UserCommandEvent, message: String) -> UserResultEvent {
        UserResultEvent::failed(command.event_id.clone(), message)
    }
}
