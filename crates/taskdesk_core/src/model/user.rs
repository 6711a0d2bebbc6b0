//! User domain model.
//!
//! # Invariants
//! - `email` is unique among non-deleted users (enforced by storage).
//! - Role rank is a total order: `user` < `admin`.

use crate::model::error::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Access level of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    /// Position in the role hierarchy; higher ranks include lower ones.
    pub fn rank(self) -> u8 {
        match self {
            Self::User => 1,
            Self::Admin => 2,
        }
    }

    /// Whether this role satisfies a check that requires `required`.
    pub fn satisfies(self, required: UserRole) -> bool {
        self.rank() >= required.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl Display for UserRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "" => Err(DomainError::invalid_field("role", "user role must be specified")),
            other => Err(DomainError::invalid_field(
                "role",
                format!("unknown user role `{other}`"),
            )),
        }
    }
}

/// A person who can own, assign and administer tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Empty until assigned by the repository on create.
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    /// Epoch milliseconds, stamped by storage.
    pub created_at: i64,
    /// Epoch milliseconds, stamped by storage.
    pub updated_at: i64,
    /// Starts at 1 on create; bumped once per successful mutation.
    pub version: i64,
    pub is_deleted: bool,
    pub deleted_at: Option<i64>,
}

impl User {
    /// Builds an unsaved user. Storage assigns id, version and timestamps.
    pub fn new(name: impl Into<String>, email: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            email: email.into(),
            role,
            created_at: 0,
            updated_at: 0,
            version: 0,
            is_deleted: false,
            deleted_at: None,
        }
    }

    /// Checks required fields.
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::invalid_field("name", "user name is required"));
        }
        if self.email.trim().is_empty() {
            return Err(DomainError::invalid_field("email", "user email is required"));
        }
        Ok(())
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::{User, UserRole};

    #[test]
    fn valid_users_pass_validation() {
        User::new("Test Admin", "admin@example.com", UserRole::Admin)
            .validate()
            .unwrap();
        User::new("Test User", "user@example.com", UserRole::User)
            .validate()
            .unwrap();
    }

    #[test]
    fn missing_name_or_email_is_invalid_input() {
        let err = User::new("", "test@example.com", UserRole::User)
            .validate()
            .unwrap_err();
        assert!(err.is_invalid_input());
        assert_eq!(err.field(), Some("name"));

        let err = User::new("Test User", "  ", UserRole::User)
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("email"));
    }

    #[test]
    fn role_rank_orders_admin_above_user() {
        assert!(UserRole::Admin.satisfies(UserRole::User));
        assert!(UserRole::Admin.satisfies(UserRole::Admin));
        assert!(UserRole::User.satisfies(UserRole::User));
        assert!(!UserRole::User.satisfies(UserRole::Admin));
    }

    #[test]
    fn role_parsing_rejects_unknown_and_empty_values() {
        assert_eq!("admin".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert!("root".parse::<UserRole>().unwrap_err().is_invalid_input());
        assert!("".parse::<UserRole>().unwrap_err().is_invalid_input());
    }
}
