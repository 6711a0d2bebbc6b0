//! Category domain model.

use crate::model::error::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};

/// Grouping label for tasks. Nesting is limited to one level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub description: String,
    pub color: String,
    /// Parent category id; `None` for top-level categories.
    pub parent_id: Option<String>,
    pub is_public: bool,
    /// Id of the user who created the category.
    pub creator_id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: i64,
    pub is_deleted: bool,
    pub deleted_at: Option<i64>,
}

impl Category {
    /// Builds an unsaved public top-level category.
    pub fn new(name: impl Into<String>, creator_id: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            color: String::new(),
            parent_id: None,
            is_public: true,
            creator_id: creator_id.into(),
            created_at: 0,
            updated_at: 0,
            version: 0,
            is_deleted: false,
            deleted_at: None,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::invalid_field("name", "category name is required"));
        }
        if self.creator_id.trim().is_empty() {
            return Err(DomainError::invalid_field(
                "creator_id",
                "category creator is required",
            ));
        }
        if matches!(self.parent_id.as_deref(), Some(parent) if parent.trim().is_empty()) {
            return Err(DomainError::invalid_field(
                "parent_id",
                "parent id must not be blank",
            ));
        }
        Ok(())
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::Category;

    #[test]
    fn requires_name_and_creator() {
        assert_eq!(
            Category::new(" ", "user-1").validate().unwrap_err().field(),
            Some("name")
        );
        assert_eq!(
            Category::new("Work", "").validate().unwrap_err().field(),
            Some("creator_id")
        );
        Category::new("Work", "user-1").validate().unwrap();
    }

    #[test]
    fn blank_parent_id_is_rejected() {
        let mut category = Category::new("Work", "user-1");
        category.parent_id = Some(String::new());
        assert_eq!(category.validate().unwrap_err().field(), Some("parent_id"));
    }
}
