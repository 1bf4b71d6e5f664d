use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a task. Transitions are free-form; new tasks start at `Todo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    #[serde(alias = "To Do")]
    Todo,
    #[serde(alias = "In Progress")]
    InProgress,
    #[serde(alias = "Completed")]
    Completed,
    #[serde(alias = "Blocked")]
    Blocked,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    /// Accepts both the stored form (`in_progress`) and the label (`In Progress`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" | "To Do" => Ok(Self::Todo),
            "in_progress" | "In Progress" => Ok(Self::InProgress),
            "completed" | "Completed" => Ok(Self::Completed),
            "blocked" | "Blocked" => Ok(Self::Blocked),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Optional severity attached to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[serde(alias = "Low")]
    Low,
    #[serde(alias = "Medium")]
    Medium,
    #[serde(alias = "High")]
    High,
    #[serde(alias = "Critical")]
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = PriorityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(PriorityParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Priority`] string.
#[derive(Debug, Clone)]
pub struct PriorityParseError(pub String);

impl fmt::Display for PriorityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid priority: {:?}", self.0)
    }
}

impl std::error::Error for PriorityParseError {}

// ---------------------------------------------------------------------------

/// What kind of record a task's `assignee_id` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssigneeKind {
    #[serde(alias = "User")]
    User,
    #[serde(alias = "Team")]
    Team,
}

impl fmt::Display for AssigneeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Team => "team",
        };
        f.write_str(s)
    }
}

impl FromStr for AssigneeKind {
    type Err = AssigneeKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" | "User" => Ok(Self::User),
            "team" | "Team" => Ok(Self::Team),
            other => Err(AssigneeKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`AssigneeKind`] string.
#[derive(Debug, Clone)]
pub struct AssigneeKindParseError(pub String);

impl fmt::Display for AssigneeKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid assignee kind: {:?}", self.0)
    }
}

impl std::error::Error for AssigneeKindParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A registered user. Bearer tokens are issued per user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// A named group of users with an owner.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A project -- the owner of a task tree.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    /// Free-text prompt the plan was generated from.
    pub goal: String,
    pub due_date: Option<DateTime<Utc>>,
    pub team_id: Option<Uuid>,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A task -- a unit of work within a project. `parent_id` is set for subtasks.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub team_id: Option<Uuid>,
    pub owner_id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Index among siblings (same parent, or top level of the project).
    pub position: i32,
    pub name: String,
    /// Duration in days.
    pub duration: Option<i32>,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Option<Priority>,
    pub assignee_id: Option<Uuid>,
    pub assignee_kind: Option<AssigneeKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An edge in the task dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TaskDependency {
    pub task_id: Uuid,
    pub depends_on: Uuid,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_display_parses_back() {
        for v in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Blocked,
        ] {
            assert_eq!(v.to_string().parse::<TaskStatus>().unwrap(), v);
        }
    }

    #[test]
    fn task_status_parses_labels() {
        assert_eq!("To Do".parse::<TaskStatus>().unwrap(), TaskStatus::Todo);
        assert_eq!("In Progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("Completed".parse::<TaskStatus>().unwrap(), TaskStatus::Completed);
    }

    #[test]
    fn task_status_default_is_todo() {
        assert_eq!(TaskStatus::default(), TaskStatus::Todo);
    }

    #[test]
    fn task_status_invalid() {
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_status_deserializes_labels() {
        let s: TaskStatus = serde_json::from_str("\"In Progress\"").unwrap();
        assert_eq!(s, TaskStatus::InProgress);
        let s: TaskStatus = serde_json::from_str("\"blocked\"").unwrap();
        assert_eq!(s, TaskStatus::Blocked);
        assert_eq!(serde_json::to_string(&TaskStatus::Todo).unwrap(), "\"todo\"");
    }

    #[test]
    fn priority_is_case_insensitive() {
        assert_eq!("High".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("critical".parse::<Priority>().unwrap(), Priority::Critical);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn assignee_kind_accepts_model_names() {
        assert_eq!("User".parse::<AssigneeKind>().unwrap(), AssigneeKind::User);
        assert_eq!("team".parse::<AssigneeKind>().unwrap(), AssigneeKind::Team);
        assert!("group".parse::<AssigneeKind>().is_err());
    }
}
