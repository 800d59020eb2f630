use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_event_id, ActionEnvelope, CommandEnvelope, Domain, Envelope, ResultEnvelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupCommandType {
    Create,
    Restore,
    Delete,
    List,
}

impl BackupCommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupCommandType::Create => "CREATE",
            BackupCommandType::Restore => "RESTORE",
            BackupCommandType::Delete => "DELETE",
            BackupCommandType::List => "LIST",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    Success,
    Failed,
    InProgress,
}

fn default_db_type() -> Option<String> {
    Some("postgresql".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupCommandEvent {
    #[serde(default)]
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub command_type: BackupCommandType,
    pub backup_file_name: Option<String>,
    #[serde(default = "default_db_type")]
    pub db_type: Option<String>,
}

impl BackupCommandEvent {
    pub fn new(command_type: BackupCommandType) -> Self {
        Self {
            event_id: String::new(),
            timestamp: Utc::now(),
            command_type,
            backup_file_name: None,
            db_type: default_db_type(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResultEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: BackupStatus,
    pub command_type: BackupCommandType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub backup_files: Option<Vec<String>>,
    pub backup_path: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupActionEvent {
    pub event_id: String,
    pub command_type: BackupCommandType,
    pub backup_file_name: Option<String>,
}

impl BackupActionEvent {
    pub fn new(command_type: BackupCommandType, backup_file_name: Option<String>) -> Self {
        Self {
            event_id: new_event_id(),
            command_type,
            backup_file_name,
        }
    }
}

impl Envelope for BackupCommandEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl CommandEnvelope for BackupCommandEvent {
    fn set_event_id(&mut self, event_id: String) {
        self.event_id = event_id;
    }

    fn command_name(&self) -> &'static str {
        self.command_type.as_str()
    }
}

impl Envelope for BackupResultEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl ResultEnvelope for BackupResultEvent {
    /// `IN_PROGRESS` counts as accepted
    fn success(&self) -> bool {
        self.status != BackupStatus::Failed
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

impl Envelope for BackupActionEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl ActionEnvelope for BackupActionEvent {
    fn subject(&self) -> Option<i32> {
        None
    }

    fn classifier(&self) -> &str {
        self.command_type.as_str()
    }
}

pub struct BackupDomain;

impl Domain for BackupDomain {
    const NAME: &'static str = "backup";

    type Command = BackupCommandEvent;
    type Result = BackupResultEvent;
    type Action = BackupActionEvent;

    fn failure(command: &BackupCommandEvent, message: String) -> BackupResultEvent {
        let now = Utc::now();
        BackupResultEvent {
            event_id: command.event_id.clone(),
            timestamp: now,
            status: BackupStatus::Failed,
            command_type: command.command_type,
            start_time: command.timestamp,
            end_time: now,
            duration_ms: (now - command.timestamp).num_milliseconds(),
            backup_files: None,
            backup_path: None,
            error_message: Some(message),
        }
    }
}
