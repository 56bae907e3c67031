//! Task model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
    Cancelled,
    ToBeDeleted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::ToBeDeleted => "to_be_deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "todo" => Self::Todo,
            "in_progress" => Self::InProgress,
            "blocked" => Self::Blocked,
            "done" => Self::Done,
            "cancelled" => Self::Cancelled,
            "to_be_deleted" => Self::ToBeDeleted,
            _ => return None,
        })
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Todo
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => return None,
        })
    }

    /// Sort weight for "high first" listing order.
    pub fn sort_rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

/// Workspace metadata captured at task creation; immutable afterward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceMetadata {
    pub workspace_path: String,
    pub git_root: Option<String>,
    pub cwd_at_creation: String,
    pub project_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<i64>,
    pub depends_on: Vec<i64>,
    pub tags: Vec<String>,
    pub blocker_reason: String,
    pub file_references: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_metadata: Option<WorkspaceMetadata>,
}

impl Task {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A task plus its live descendants, expanded depth-first. Mode projection is applied by the query layer on top
/// of this.
#[derive(Debug, Clone, Serialize)]
pub struct TaskTreeNode {
    #[serde(flatten)]
    pub task: Task,
    pub children: Vec<TaskTreeNode>,
}

/// Fields accepted when creating a task.
#[derive(Debug, Clone, Default, Deserialize, schemars::JsonSchema)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub parent_task_id: Option<i64>,
    pub depends_on: Option<Vec<i64>>,
    pub tags: Option<Vec<String>>,
    pub blocker_reason: Option<String>,
    pub file_references: Option<Vec<String>>,
    pub created_by: Option<String>,
    pub cwd_at_creation: Option<String>,
}

/// Partial update. `Option<Option<T>>` fields
/// distinguish "leave unchanged" from "explicitly clear".
#[derive(Debug, Clone, Default, Deserialize, schemars::JsonSchema)]
pub struct TaskUpdate {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_task_id: Option<Option<i64>>,
    pub depends_on: Option<Vec<i64>>,
    pub tags: Option<Vec<String>>,
    pub blocker_reason: Option<String>,
    pub file_references: Option<Vec<String>>,
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}
