//! Task record as it travels through the queue and the terminal indices.
//!
//! # Invariants
//! - `id`, `title` and `description` are always present; a payload missing
//!   any of them is malformed and never becomes a `Task`.
//! - `result` is only set once `status == Completed`, `error` once `status == Failed`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::store::StoreError;

/// Status of a task in its lifecycle.
///
/// # State Machine
/// ```text
/// Queued ──(dequeue)──▶ Active ──▶ Completed
///                          └──────▶ Failed
/// ```
/// Terminal states have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Queued,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jira_ticket: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    /// Fields written by other producers, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    /// Create a freshly queued task with a generated id.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: format!("task-{}", uuid::Uuid::new_v4()),
            title: title.into(),
            description: description.into(),
            branch: None,
            jira_ticket: None,
            status: TaskStatus::Queued,
            result: None,
            error: None,
            created_at: Some(now_string()),
            started_at: None,
            completed_at: None,
            failed_at: None,
            worker: None,
            extra: Map::new(),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_jira_ticket(mut self, ticket: impl Into<String>) -> Self {
        self.jira_ticket = Some(ticket.into());
        self
    }

    /// Parse a queue payload.
    pub fn parse(raw: &str) -> Result<Self, TaskError> {
        let task: Task = serde_json::from_str(raw).map_err(|e| TaskError::Malformed {
            reason: e.to_string(),
        })?;
        if task.id.trim().is_empty() {
            return Err(TaskError::Malformed {
                reason: "empty task id".to_string(),
            });
        }
        Ok(task)
    }

    pub fn to_json(&self) -> Result<String, TaskError> {
        serde_json::to_string(self).map_err(TaskError::from)
    }

    /// Branch the work happens on; `main` when the producer gave none.
    pub fn branch_or_default(&self) -> &str {
        self.branch.as_deref().unwrap_or("main")
    }
}

pub fn now_string() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Malformed task payload: {reason}")]
    Malformed { reason: String },

    #[error("No active task")]
    NoActiveTask,

    #[error("Active slot already holds task {0}")]
    ActiveSlotOccupied(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to serialize task: {0}")]
    Serialize(#[from] serde_json::Error),
}
