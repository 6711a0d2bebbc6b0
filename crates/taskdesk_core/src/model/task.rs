//! Task domain model and status state machine.
//!
//! # Responsibility
//! - Define the task record, its status/priority enums and field validation.
//! - Own the status transition table.
//!
//! # Invariants
//! - Self-transitions are never allowed.
//! - `categories`, `tags` and `history` are read-side projections populated
//!   by the repository; writes through `Update` ignore them.

use crate::model::category::Category;
use crate::model::error::{DomainError, DomainResult};
use crate::model::history::TaskHistory;
use crate::model::tag::Tag;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Open,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Open,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Cancelled,
    ];

    /// Statuses reachable from `self` in one transition.
    pub fn allowed_transitions(self) -> &'static [TaskStatus] {
        match self {
            Self::Open => &[Self::InProgress, Self::Completed, Self::Cancelled],
            Self::InProgress => &[Self::Completed, Self::Open, Self::Cancelled],
            Self::Completed => &[Self::Open, Self::InProgress],
            Self::Cancelled => &[Self::Open, Self::InProgress],
        }
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Fails with `BusinessRule` when `self -> next` is not in the table.
    pub fn ensure_transition(self, next: TaskStatus) -> DomainResult<()> {
        if self.can_transition_to(next) {
            return Ok(());
        }
        Err(DomainError::business_rule(format!(
            "invalid status transition from {self} to {next}"
        )))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "OPEN" => Ok(Self::Open),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            "" => Err(DomainError::invalid_field("status", "valid status is required")),
            other => Err(DomainError::invalid_field(
                "status",
                format!("unknown task status `{other}`"),
            )),
        }
    }
}

/// Importance of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }
}

impl Display for TaskPriority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "URGENT" => Ok(Self::Urgent),
            other => Err(DomainError::invalid_field(
                "priority",
                format!("unknown task priority `{other}`"),
            )),
        }
    }
}

/// Unit of work assigned to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Empty until assigned by the repository on create.
    pub id: String,
    pub title: String,
    pub description: String,
    /// Id of the assigned user.
    pub assignee_id: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Epoch milliseconds.
    pub due_date: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: i64,
    pub is_deleted: bool,
    pub deleted_at: Option<i64>,
    /// Non-deleted categories linked to this task, populated on read.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<Category>,
    /// Non-deleted tags linked to this task, populated on read.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    /// Audit entries, most recent first, populated on read.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<TaskHistory>,
}

impl Task {
    /// Builds an unsaved `OPEN`/`MEDIUM` task.
    pub fn new(title: impl Into<String>, assignee_id: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            description: String::new(),
            assignee_id: assignee_id.into(),
            status: TaskStatus::Open,
            priority: TaskPriority::Medium,
            due_date: None,
            created_at: 0,
            updated_at: 0,
            version: 0,
            is_deleted: false,
            deleted_at: None,
            categories: Vec::new(),
            tags: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Checks required fields.
    pub fn validate(&self) -> DomainResult<()> {
        if self.title.trim().is_empty() {
            return Err(DomainError::invalid_field("title", "title is required"));
        }
        if self.assignee_id.trim().is_empty() {
            return Err(DomainError::invalid_field("assignee_id", "assignee is required"));
        }
        Ok(())
    }

    pub fn category_ids(&self) -> Vec<&str> {
        self.categories.iter().map(|category| category.id.as_str()).collect()
    }

    pub fn tag_ids(&self) -> Vec<&str> {
        self.tags.iter().map(|tag| tag.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Task, TaskPriority, TaskStatus};

    #[test]
    fn transition_table_matches_every_pair() {
        use TaskStatus::*;
        let allowed = [
            (Open, InProgress),
            (Open, Completed),
            (Open, Cancelled),
            (InProgress, Completed),
            (InProgress, Open),
            (InProgress, Cancelled),
            (Completed, Open),
            (Completed, InProgress),
            (Cancelled, Open),
            (Cancelled, InProgress),
        ];

        for current in TaskStatus::ALL {
            for next in TaskStatus::ALL {
                let expected = allowed.contains(&(current, next));
                assert_eq!(
                    current.can_transition_to(next),
                    expected,
                    "{current} -> {next}"
                );
                assert_eq!(current.ensure_transition(next).is_ok(), expected);
            }
        }
    }

    #[test]
    fn self_transitions_are_business_rule_violations() {
        for status in TaskStatus::ALL {
            let err = status.ensure_transition(status).unwrap_err();
            assert!(err.is_business_rule());
        }
    }

    #[test]
    fn missing_title_or_assignee_is_invalid() {
        let err = Task::new("", "user-1").validate().unwrap_err();
        assert_eq!(err.field(), Some("title"));

        let err = Task::new("Write report", "").validate().unwrap_err();
        assert_eq!(err.field(), Some("assignee_id"));

        Task::new("Write report", "user-1").validate().unwrap();
    }

    #[test]
    fn status_and_priority_round_trip_through_text() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert_eq!("URGENT".parse::<TaskPriority>().unwrap(), TaskPriority::Urgent);
        assert!("unspecified".parse::<TaskStatus>().unwrap_err().is_invalid_input());
        assert!("".parse::<TaskStatus>().unwrap_err().is_invalid_input());
    }
}
