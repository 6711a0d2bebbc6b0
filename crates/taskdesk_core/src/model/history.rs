//! Task audit trail model.
//!
//! # Responsibility
//! - Describe one append-only history entry and its JSON details payload.
//!
//! # Invariants
//! - Entries are never updated or deleted once written.
//! - `details` is stored as JSON text with the shape of [`TaskHistoryDetails`].

use crate::model::error::DomainError;
use crate::model::user::UserRole;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Kind of change recorded for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskHistoryAction {
    Created,
    Updated,
    Completed,
    Deleted,
    Restored,
    Assigned,
}

impl TaskHistoryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Completed => "COMPLETED",
            Self::Deleted => "DELETED",
            Self::Restored => "RESTORED",
            Self::Assigned => "ASSIGNED",
        }
    }
}

impl Display for TaskHistoryAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskHistoryAction {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CREATED" => Ok(Self::Created),
            "UPDATED" => Ok(Self::Updated),
            "COMPLETED" => Ok(Self::Completed),
            "DELETED" => Ok(Self::Deleted),
            "RESTORED" => Ok(Self::Restored),
            "ASSIGNED" => Ok(Self::Assigned),
            other => Err(DomainError::InvalidData(format!(
                "unknown history action `{other}`"
            ))),
        }
    }
}

/// Actor snapshot resolved when history is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryActor {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
}

/// Structured payload stored in `task_history.details`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHistoryDetails {
    /// Names of the fields that changed.
    #[serde(default)]
    pub changes: Vec<String>,
    #[serde(default)]
    pub old_values: Map<String, Value>,
    #[serde(default)]
    pub new_values: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TaskHistoryDetails {
    /// Records `field` as changed when `old != new`.
    pub fn record<T: Serialize + PartialEq>(&mut self, field: &str, old: &T, new: &T) {
        if old == new {
            return;
        }
        self.changes.push(field.to_string());
        self.old_values
            .insert(field.to_string(), serde_json::to_value(old).unwrap_or(Value::Null));
        self.new_values
            .insert(field.to_string(), serde_json::to_value(new).unwrap_or(Value::Null));
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.metadata.is_empty()
    }

    pub fn changed(&self, field: &str) -> bool {
        self.changes.iter().any(|change| change == field)
    }
}

/// One audit entry for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHistory {
    pub id: String,
    pub task_id: String,
    pub action: TaskHistoryAction,
    pub actor_id: String,
    /// Present when the actor still exists as a user row.
    pub actor: Option<HistoryActor>,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub details: TaskHistoryDetails,
}

impl TaskHistory {
    pub fn new(
        task_id: impl Into<String>,
        action: TaskHistoryAction,
        actor_id: impl Into<String>,
        details: TaskHistoryDetails,
    ) -> Self {
        Self {
            id: String::new(),
            task_id: task_id.into(),
            action,
            actor_id: actor_id.into(),
            actor: None,
            timestamp: 0,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{TaskHistoryAction, TaskHistoryDetails};
    use serde_json::json;

    #[test]
    fn record_skips_unchanged_fields() {
        let mut details = TaskHistoryDetails::default();
        details.record("title", &"a", &"a");
        details.record("status", &"OPEN", &"COMPLETED");

        assert_eq!(details.changes, vec!["status".to_string()]);
        assert_eq!(details.old_values["status"], json!("OPEN"));
        assert_eq!(details.new_values["status"], json!("COMPLETED"));
        assert!(details.changed("status"));
        assert!(!details.changed("title"));
    }

    #[test]
    fn details_serialize_with_all_four_sections() {
        let details = TaskHistoryDetails::default().with_metadata("source", "test");
        let value = serde_json::to_value(&details).unwrap();
        assert_eq!(
            value,
            json!({
                "changes": [],
                "old_values": {},
                "new_values": {},
                "metadata": {"source": "test"}
            })
        );
    }

    #[test]
    fn action_text_round_trips() {
        for action in [
            TaskHistoryAction::Created,
            TaskHistoryAction::Updated,
            TaskHistoryAction::Completed,
            TaskHistoryAction::Deleted,
            TaskHistoryAction::Restored,
            TaskHistoryAction::Assigned,
        ] {
            assert_eq!(action.as_str().parse::<TaskHistoryAction>().unwrap(), action);
        }
        assert!("ARCHIVED".parse::<TaskHistoryAction>().is_err());
    }
}
