use serde::{Deserialize, Serialize};

use super::{ActionEnvelope, CommandEnvelope, Domain, Envelope, ResultEnvelope, SkillId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkillCommandType {
    Create,
    Delete,
    List,
    FindByType,
}

impl SkillCommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillCommandType::Create => "CREATE",
            SkillCommandType::Delete => "DELETE",
            SkillCommandType::List => "LIST",
            SkillCommandType::FindByType => "FIND_BY_TYPE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillDto {
    pub id: SkillId,
    pub name: String,
    #[serde(rename = "type")]
    pub skill_type: String,
    pub user_count: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillCommandEvent {
    #[serde(default)]
    pub event_id: String,
    pub command_type: SkillCommandType,
    pub skill_id: Option<SkillId>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub skill_type: Option<String>,
}

impl SkillCommandEvent {
    pub fn list() -> Self {
        Self {
            event_id: String::new(),
            command_type: SkillCommandType::List,
            skill_id: None,
            name: None,
            skill_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillResultEvent {
    pub event_id: String,
    pub skills: Option<Vec<SkillDto>>,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillActionEvent {
    pub event_id: String,
    pub action_type: String,
    pub skill_id: SkillId,
}

impl Envelope for SkillCommandEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl CommandEnvelope for SkillCommandEvent {
    fn set_event_id(&mut self, event_id: String) {
        self.event_id = event_id;
    }

    fn command_name(&self) -> &'static str {
        self.command_type.as_str()
    }
}

impl Envelope for SkillResultEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl ResultEnvelope for SkillResultEvent {
    fn success(&self) -> bool {
        self.success
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

impl Envelope for SkillActionEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl ActionEnvelope for SkillActionEvent {
    fn subject(&self) -> Option<i32> {
        Some(self.skill_id)
    }

    fn classifier(&self) -> &str {
        &self.action_type
    }
}

pub struct SkillDomain;

impl Domain for SkillDomain {
    const NAME: &'static str = "skill";

    type Command = SkillCommandEvent;
    type Result = SkillResultEvent;
    type Action = SkillActionEvent;

    fn failure(command: &SkillCommandEvent, message: String) -> SkillResultEvent {
        SkillResultEvent {
            event_id: command.event_id.clone(),
            skills: None,
            success: false,
            error_message: Some(message),
        }
    }
}
