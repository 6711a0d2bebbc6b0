//! Domain error taxonomy.
//!
//! # Responsibility
//! - Define the closed set of failure kinds surfaced by repositories and
//!   services.
//! - Give transport layers a stable, machine-checkable kind and status code.
//!
//! # Invariants
//! - Kind predicates never rely on message text.
//! - `Context` wrappers keep the wrapped kind retrievable.
//! - `NotFound` and `VersionConflict` are never wrapped by `ResultExt::context`.

use crate::db::DbError;
use rusqlite::ErrorCode;
use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Machine-checkable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Conflict,
    Unauthorized,
    Forbidden,
    VersionConflict,
    PermissionDenied,
    BusinessRuleViolation,
    Cancelled,
    DeadlineExceeded,
    Internal,
}

impl ErrorKind {
    /// HTTP-style status code used by transport mappings.
    pub fn code(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::InvalidInput => 400,
            Self::Conflict => 409,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::VersionConflict => 409,
            Self::PermissionDenied => 403,
            Self::BusinessRuleViolation => 422,
            Self::Cancelled => 499,
            Self::DeadlineExceeded => 504,
            Self::Internal => 500,
        }
    }

    /// Stable upper-case label, also used as the display prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::InvalidInput => "INVALID_INPUT",
            Self::Conflict => "CONFLICT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::VersionConflict => "VERSION_CONFLICT",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::BusinessRuleViolation => "BUSINESS_RULE_VIOLATION",
            Self::Cancelled => "CANCELLED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Internal => "INTERNAL",
        }
    }
}

/// Error returned by every repository and service operation.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("NOT_FOUND: {entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("INVALID_INPUT: {message}")]
    InvalidInput {
        field: Option<&'static str>,
        message: String,
    },

    #[error("CONFLICT: {0}")]
    Conflict(String),

    #[error("UNAUTHORIZED: {0}")]
    Unauthorized(String),

    #[error("FORBIDDEN: {0}")]
    Forbidden(String),

    #[error(
        "VERSION_CONFLICT: {entity} has been modified (expected version {expected}, actual version {actual})"
    )]
    VersionConflict {
        entity: &'static str,
        expected: i64,
        actual: i64,
    },

    #[error("PERMISSION_DENIED: {0}")]
    PermissionDenied(String),

    #[error("BUSINESS_RULE_VIOLATION: {0}")]
    BusinessRule(String),

    #[error("CANCELLED: operation cancelled by caller")]
    Cancelled,

    #[error("DEADLINE_EXCEEDED: operation deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Storage(#[from] DbError),

    #[error("invalid persisted data: {0}")]
    InvalidData(String),

    #[error("{message}: {source}")]
    Context {
        message: String,
        #[source]
        source: Box<DomainError>,
    },
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: None,
            message: message.into(),
        }
    }

    /// Invalid input attributed to one named field.
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: Some(field),
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn version_conflict(entity: &'static str, expected: i64, actual: i64) -> Self {
        Self::VersionConflict {
            entity,
            expected,
            actual,
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn business_rule(message: impl Into<String>) -> Self {
        Self::BusinessRule(message.into())
    }

    /// Returns the category of this error, looking through context wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::VersionConflict { .. } => ErrorKind::VersionConflict,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::BusinessRule(_) => ErrorKind::BusinessRuleViolation,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::Storage(_) | Self::InvalidData(_) => ErrorKind::Internal,
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// HTTP-style status code for transport mapping.
    pub fn code(&self) -> u16 {
        self.kind().code()
    }

    /// Innermost error, skipping context wrappers.
    pub fn root(&self) -> &DomainError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// `(expected, actual)` versions when this is a version conflict.
    pub fn version_conflict_versions(&self) -> Option<(i64, i64)> {
        match self.root() {
            Self::VersionConflict {
                expected, actual, ..
            } => Some((*expected, *actual)),
            _ => None,
        }
    }

    /// Offending field for invalid input, when known.
    pub fn field(&self) -> Option<&'static str> {
        match self.root() {
            Self::InvalidInput { field, .. } => *field,
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_invalid_input(&self) -> bool {
        self.kind() == ErrorKind::InvalidInput
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind() == ErrorKind::Unauthorized
    }

    pub fn is_forbidden(&self) -> bool {
        self.kind() == ErrorKind::Forbidden
    }

    pub fn is_version_conflict(&self) -> bool {
        self.kind() == ErrorKind::VersionConflict
    }

    pub fn is_permission_denied(&self) -> bool {
        self.kind() == ErrorKind::PermissionDenied
    }

    pub fn is_business_rule(&self) -> bool {
        self.kind() == ErrorKind::BusinessRuleViolation
    }

    /// True for both caller cancellation and an expired deadline.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Cancelled | ErrorKind::DeadlineExceeded
        )
    }

    /// Wraps this error with a message unless it must pass through unchanged.
    pub fn with_context(self, message: impl Into<String>) -> Self {
        match self {
            Self::NotFound { .. } | Self::VersionConflict { .. } => self,
            other => Self::Context {
                message: message.into(),
                source: Box::new(other),
            },
        }
    }
}

impl From<rusqlite::Error> for DomainError {
    fn from(value: rusqlite::Error) -> Self {
        let (code, extended_code, detail) = match &value {
            rusqlite::Error::SqliteFailure(failure, detail) => {
                (Some(failure.code), failure.extended_code, detail.clone())
            }
            _ => (None, 0, None),
        };

        match code {
            Some(ErrorCode::OperationInterrupted) => Self::Cancelled,
            Some(ErrorCode::ConstraintViolation)
                if extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Self::Conflict(match detail {
                    Some(text) => format!("unique constraint violated ({text})"),
                    None => "unique constraint violated".to_string(),
                })
            }
            Some(ErrorCode::ConstraintViolation)
                if extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
            {
                Self::invalid_input("referenced record does not exist")
            }
            _ => Self::Storage(DbError::Sqlite(value)),
        }
    }
}

/// Adds contextual messages to fallible results.
pub trait ResultExt<T> {
    /// Wraps the error with `message`; `NotFound` and `VersionConflict`
    /// pass through unchanged.
    fn context(self, message: impl Into<String>) -> DomainResult<T>;
}

impl<T> ResultExt<T> for DomainResult<T> {
    fn context(self, message: impl Into<String>) -> DomainResult<T> {
        self.map_err(|err| err.with_context(message))
    }
}

#[cfg(test)]
mod tests {
    use super::{DomainError, ErrorKind, ResultExt};

    #[test]
    fn display_uses_kind_prefix() {
        assert_eq!(
            DomainError::not_found("user", "u-1").to_string(),
            "NOT_FOUND: user not found: u-1"
        );
        assert_eq!(
            DomainError::conflict("email already exists").to_string(),
            "CONFLICT: email already exists"
        );
        assert_eq!(
            DomainError::invalid_input("name is required").to_string(),
            "INVALID_INPUT: name is required"
        );
        assert_eq!(
            DomainError::version_conflict("task", 1, 2).to_string(),
            "VERSION_CONFLICT: task has been modified (expected version 1, actual version 2)"
        );
    }

    #[test]
    fn each_kind_has_its_own_predicate_and_code() {
        let cases = [
            (DomainError::not_found("tag", "x"), ErrorKind::NotFound, 404),
            (DomainError::invalid_input("bad"), ErrorKind::InvalidInput, 400),
            (DomainError::conflict("dup"), ErrorKind::Conflict, 409),
            (DomainError::unauthorized("who"), ErrorKind::Unauthorized, 401),
            (DomainError::forbidden("no"), ErrorKind::Forbidden, 403),
            (
                DomainError::version_conflict("user", 3, 4),
                ErrorKind::VersionConflict,
                409,
            ),
            (
                DomainError::permission_denied("role"),
                ErrorKind::PermissionDenied,
                403,
            ),
            (
                DomainError::business_rule("rule"),
                ErrorKind::BusinessRuleViolation,
                422,
            ),
        ];

        for (err, kind, code) in cases {
            assert_eq!(err.kind(), kind);
            assert_eq!(err.code(), code);
        }

        assert!(DomainError::forbidden("x").is_forbidden());
        assert!(!DomainError::forbidden("x").is_permission_denied());
        assert!(DomainError::unauthorized("x").is_unauthorized());
        assert!(!DomainError::conflict("x").is_version_conflict());
    }

    #[test]
    fn context_keeps_kind_and_passes_through_not_found_and_version_conflict() {
        let wrapped: Result<(), DomainError> =
            Err(DomainError::conflict("duplicate name")).context("failed to create tag");
        let err = wrapped.unwrap_err();
        assert!(matches!(err, DomainError::Context { .. }));
        assert!(err.is_conflict());
        assert_eq!(err.to_string(), "failed to create tag: CONFLICT: duplicate name");

        let passed: Result<(), DomainError> =
            Err(DomainError::version_conflict("task", 1, 2)).context("failed to update task");
        let err = passed.unwrap_err();
        assert!(matches!(err, DomainError::VersionConflict { .. }));
        assert_eq!(err.version_conflict_versions(), Some((1, 2)));

        let missing: Result<(), DomainError> =
            Err(DomainError::not_found("task", "t")).context("failed to get task");
        assert!(matches!(missing.unwrap_err(), DomainError::NotFound { .. }));
    }

    #[test]
    fn field_is_reported_through_wrappers() {
        let err = DomainError::invalid_field("email", "email is required").with_context("create");
        assert!(err.is_invalid_input());
        assert_eq!(err.field(), Some("email"));
    }
}
