use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{
    ActionEnvelope, CommandEnvelope, Domain, Envelope, ProjectId, ResultEnvelope, SkillId, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectTaskEventType {
    GetProject,
    TasksForUser,
    CreateTask,
    UpdateTask,
    DeleteTask,
    CreateBranch,
    DeleteBranch,
    UpdateBranch,
}

impl ProjectTaskEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectTaskEventType::GetProject => "GET_PROJECT",
            ProjectTaskEventType::TasksForUser => "TASKS_FOR_USER",
            ProjectTaskEventType::CreateTask => "CREATE_TASK",
            ProjectTaskEventType::UpdateTask => "UPDATE_TASK",
            ProjectTaskEventType::DeleteTask => "DELETE_TASK",
            ProjectTaskEventType::CreateBranch => "CREATE_BRANCH",
            ProjectTaskEventType::DeleteBranch => "DELETE_BRANCH",
            ProjectTaskEventType::UpdateBranch => "UPDATE_BRANCH",
        }
    }
}

/// Task dates travel as `dd.MM.yyyy`
mod dotted_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%d.%m.%Y";

    pub fn serialize<S: Serializer>(date: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error> {
        match date {
            Some(date) => serializer.serialize_str(&date.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDate>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|value| NaiveDate::parse_from_str(&value, FORMAT).map_err(serde::de::Error::custom))
            .transpose()
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDto {
    pub task_id: Option<String>,
    pub parent_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, with = "dotted_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, with = "dotted_date")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub has_problem: bool,
    pub problem_message: Option<String>,
    pub skill_id: Option<SkillId>,
    pub assigned_to: Option<UserId>,
    pub file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchDto {
    pub branch_id: Option<String>,
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatistics {
    pub task_count: i32,
    pub completed_tasks_count: i32,
    pub delayed_tasks_count: i32,
    pub problem_tasks_count: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub branch_id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub tasks: Vec<TaskDto>,
    #[serde(default)]
    pub statistics: TaskStatistics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProject {
    pub project_id: ProjectId,
    #[serde(default)]
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub statistics: TaskStatistics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskWithContext {
    pub project_id: ProjectId,
    pub branch_id: String,
    pub task: TaskDto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectTaskCommandEvent {
    #[serde(default)]
    pub event_id: String,
    pub command_type: ProjectTaskEventType,
    pub task: Option<TaskDto>,
    pub branch: Option<BranchDto>,
    pub user_id: Option<UserId>,
    pub project_id: Option<ProjectId>,
    pub branch_id: Option<String>,
}

impl ProjectTaskCommandEvent {
    pub fn tasks_for_user(user_id: UserId) -> Self {
        Self {
            event_id: String::new(),
            command_type: ProjectTaskEventType::TasksForUser,
            task: None,
            branch: None,
            user_id: Some(user_id),
            project_id: None,
            branch_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectTaskResultEvent {
    pub event_id: String,
    pub success: bool,
    pub error_message: Option<String>,
    #[serde(default)]
    pub projects: Vec<TaskProject>,
    #[serde(default)]
    pub tasks: Vec<TaskWithContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectTaskActionEvent {
    pub event_id: String,
    pub project_id: ProjectId,
}

impl Envelope for ProjectTaskCommandEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl CommandEnvelope for ProjectTaskCommandEvent {
    fn set_event_id(&mut self, event_id: String) {
        self.event_id = event_id;
    }

    fn command_name(&self) -> &'static str {
        self.command_type.as_str()
    }
}

impl Envelope for ProjectTaskResultEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl ResultEnvelope for ProjectTaskResultEvent {
    fn success(&self) -> bool {
        self.success
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

impl Envelope for ProjectTaskActionEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl ActionEnvelope for ProjectTaskActionEvent {
    fn subject(&self) -> Option<i32> {
        Some(self.project_id)
    }

    fn classifier(&self) -> &str {
        "TASKS_CHANGED"
    }
}

pub struct ProjectTaskDomain;

impl Domain for ProjectTaskDomain {
    const NAME: &'static str = "project-task";

    type Command = ProjectTaskCommandEvent;
    type Result = ProjectTaskResultEvent;
    type Action = ProjectTaskActionEvent;

    fn failure(command: &ProjectTaskCommandEvent, message: String) -> ProjectTaskResultEvent {
        ProjectTaskResultEvent {
            event_id: command.event_id.clone(),
            success: false,
            error_message: Some(message),
            projects: Vec::new(),
            tasks: Vec::new(),
        }
    }
}
