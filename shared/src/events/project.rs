use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    new_event_id, ActionEnvelope, CommandEnvelope, Domain, Envelope, ProjectId, ResultEnvelope,
    UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectEventType {
    Create,
    Delete,
    Update,
    List,
    Get,
    ForUserList,
    Assign,
    Discharge,
    EditRole,
}

impl ProjectEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectEventType::Create => "CREATE",
            ProjectEventType::Delete => "DELETE",
            ProjectEventType::Update => "UPDATE",
            ProjectEventType::List => "LIST",
            ProjectEventType::Get => "GET",
            ProjectEventType::ForUserList => "FOR_USER_LIST",
            ProjectEventType::Assign => "ASSIGN",
            ProjectEventType::Discharge => "DISCHARGE",
            ProjectEventType::EditRole => "EDIT_ROLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectActionType {
    Create,
    Delete,
    Update,
    Discharge,
    EditRole,
}

impl ProjectActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectActionType::Create => "CREATE",
            ProjectActionType::Delete => "DELETE",
            ProjectActionType::Update => "UPDATE",
            ProjectActionType::Discharge => "DISCHARGE",
            ProjectActionType::EditRole => "EDIT_ROLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectRole {
    Owner,
    Member,
    Manager,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMemberDto {
    pub id: i32,
    pub user_id: UserId,
    pub role: ProjectRole,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDto {
    pub id: Option<ProjectId>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub avatar_url: Option<String>,
    pub project_members: Option<Vec<ProjectMemberDto>>,
}

impl ProjectDto {
    /// Role of `user_id` in this project, if they are a member
    pub fn role_of(&self, user_id: UserId) -> Option<ProjectRole> {
        self.project_members
            .as_ref()?
            .iter()
            .find(|member| member.user_id == user_id)
            .map(|member| member.role)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCommandEvent {
    #[serde(default)]
    pub event_id: String,
    pub command_type: ProjectEventType,
    pub user_id: Option<UserId>,
    pub project_id: Option<ProjectId>,
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub avatar_url: Option<String>,
    pub description: Option<String>,
    pub project_role: Option<ProjectRole>,
}

impl ProjectCommandEvent {
    pub fn new(command_type: ProjectEventType) -> Self {
        Self {
            event_id: String::new(),
            command_type,
            user_id: None,
            project_id: None,
            name: None,
            is_active: None,
            avatar_url: None,
            description: None,
            project_role: None,
        }
    }

    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::new(ProjectEventType::ForUserList)
        }
    }

    pub fn get(project_id: ProjectId) -> Self {
        Self {
            project_id: Some(project_id),
            ..Self::new(ProjectEventType::Get)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResultEvent {
    pub event_id: String,
    pub projects: Option<Vec<ProjectDto>>,
    pub success: bool,
    pub error_message: Option<String>,
    pub user_id: Option<UserId>,
}

impl ProjectResultEvent {
    pub fn ok(event_id: impl Into<String>, projects: Vec<ProjectDto>) -> Self {
        Self {
            event_id: event_id.into(),
            projects: Some(projects),
            success: true,
            error_message: None,
            user_id: None,
        }
    }

    pub fn failed(event_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            projects: None,
            success: false,
            error_message: Some(message.into()),
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectActionEvent {
    pub event_id: String,
    pub project_id: ProjectId,
    pub action_type: ProjectActionType,
    pub user_id: Option<UserId>,
}

impl ProjectActionEvent {
    pub fn new(action_type: ProjectActionType, project_id: ProjectId, user_id: Option<UserId>) -> Self {
        Self {
            event_id: new_event_id(),
            project_id,
            action_type,
            user_id,
        }
    }
}

impl Envelope for ProjectCommandEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl CommandEnvelope for ProjectCommandEvent {
    fn set_event_id(&mut self, event_id: String) {
        self.event_id = event_id;
    }

    fn command_name(&self) -> &'static str {
        self.command_type.as_str()
    }
}

impl Envelope for ProjectResultEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl ResultEnvelope for ProjectResultEvent {
    fn success(&self) -> bool {
        self.success
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

impl Envelope for ProjectActionEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl ActionEnvelope for ProjectActionEvent {
    fn subject(&self) -> Option<i32> {
        self.user_id
    }

    fn classifier(&self) -> &str {
        self.action_type.as_str()
    }
}

pub struct ProjectDomain;

impl Domain for ProjectDomain {
    const NAME: &'static str = "project";

    type Command = ProjectCommandEvent;
    type Result = ProjectResultEvent;
    type Action = ProjectActionEvent;

    fn failure(command: &ProjectCommandEvent, message: String) -> ProjectResultEvent {
        ProjectResultEvent::failed(command.event_id.clone(), message)
    }
}
