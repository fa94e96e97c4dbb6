//! Backend payload models
//!
//! These mirror the JSON the backend returns. Every model keeps unknown
//! fields in `extra` so a payload relayed through an agent is never
//! silently trimmed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Backend task identifier
pub type TaskId = i64;

/// Profile returned by `GET /api/users/me`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An action item tracked by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Integer on some endpoints, `"low"`/`"medium"`/`"high"` on others
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn new(id: TaskId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: None,
            status: None,
            priority: None,
            deadline: None,
            due_date: None,
            reminder_time: None,
            assigned_to: None,
            extra: Map::new(),
        }
    }

    pub fn has_reminder(&self) -> bool {
        self.reminder_time.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Due date for display, preferring `due_date` over `deadline`
    pub fn due(&self) -> Option<&str> {
        self.due_date.as_deref().or(self.deadline.as_deref())
    }
}

/// Task collection as returned by list endpoints, either bare or wrapped
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TaskList {
    Wrapped { tasks: Vec<Task> },
    Bare(Vec<Task>),
}

impl TaskList {
    pub fn into_tasks(self) -> Vec<Task> {
        match self {
            TaskList::Wrapped { tasks } | TaskList::Bare(tasks) => tasks,
        }
    }
}

/// A member of the user's team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of processing or extracting an email
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// The email currently open in the webmail page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSnapshot {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub sender: String,
    pub content: String,
}

/// Body for `POST /api/emails/current/process`
#[derive(Debug, Clone, Serialize)]
pub struct ProcessEmailBody<'a> {
    pub content: &'a str,
    pub subject: &'a str,
    pub sender: &'a str,
    pub gmail_id: &'a str,
    pub thread_id: &'a str,
}

impl<'a> From<&'a EmailSnapshot> for ProcessEmailBody<'a> {
    fn from(email: &'a EmailSnapshot) -> Self {
        Self {
            content: &email.content,
            subject: &email.subject,
            sender: &email.sender,
            gmail_id: &email.id,
            thread_id: &email.thread_id,
        }
    }
}

/// Body for `POST /api/tasks`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewTask {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}

/// Body for `PUT /api/tasks/{id}`; unset fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}
