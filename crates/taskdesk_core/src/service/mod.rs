//! Business-rule services layered over the repositories.
//!
//! # Responsibility
//! - Validate arguments before any storage access.
//! - Enforce cross-entity rules (transitions, permissions, usage guards,
//!   uniqueness) and delegate persistence to repositories.
//!
//! # Invariants
//! - `NotFound` and `VersionConflict` from repositories pass through
//!   unchanged; other repository failures gain a context message.
//! - Services never retry a failed write.

pub mod category_service;
pub mod tag_service;
pub mod task_service;
pub mod user_service;

use crate::context::RequestContext;
use crate::model::error::{DomainError, DomainResult, ErrorKind};
use crate::repo::category_repo::SqliteCategoryRepository;
use crate::repo::tag_repo::SqliteTagRepository;
use crate::repo::task_repo::SqliteTaskRepository;
use crate::repo::user_repo::SqliteUserRepository;
use category_service::CategoryService;
use log::{debug, error, warn};
use rusqlite::Connection;
use tag_service::TagService;
use task_service::TaskService;
use user_service::UserService;

pub type SqliteUserService<'conn> = UserService<SqliteUserRepository<'conn>>;
pub type SqliteTaskService<'conn> = TaskService<
    SqliteTaskRepository<'conn>,
    SqliteUserRepository<'conn>,
    SqliteCategoryRepository<'conn>,
    SqliteTagRepository<'conn>,
>;
pub type SqliteCategoryService<'conn> =
    CategoryService<SqliteCategoryRepository<'conn>, SqliteTaskRepository<'conn>>;
pub type SqliteTagService<'conn> =
    TagService<SqliteTagRepository<'conn>, SqliteTaskRepository<'conn>>;

/// All four services wired over one connection.
pub struct Services<'conn> {
    pub users: SqliteUserService<'conn>,
    pub tasks: SqliteTaskService<'conn>,
    pub categories: SqliteCategoryService<'conn>,
    pub tags: SqliteTagService<'conn>,
}

impl<'conn> Services<'conn> {
    /// Builds every service; fails when the schema is not fully migrated.
    pub fn sqlite(conn: &'conn Connection) -> DomainResult<Self> {
        let users = SqliteUserRepository::try_new(conn)?;
        let tasks = SqliteTaskRepository::try_new(conn)?;
        let categories = SqliteCategoryRepository::try_new(conn)?;
        let tags = SqliteTagRepository::try_new(conn)?;

        Ok(Self {
            users: UserService::new(users),
            tasks: TaskService::new(tasks, users, categories, tags),
            categories: CategoryService::new(categories, tasks),
            tags: TagService::new(tags, tasks),
        })
    }
}

/// Logs a failed operation at a level matching its kind and returns it.
///
/// Expected outcomes (missing rows, conflicts, rule rejections) are not
/// errors from the service's point of view.
pub(crate) fn log_failure(ctx: &RequestContext, event: &str, err: DomainError) -> DomainError {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::InvalidInput => debug!(
            "event={} module=service status=rejected request_id={} error_kind={}",
            event,
            ctx.request_id(),
            err.kind().as_str()
        ),
        ErrorKind::VersionConflict => {
            let (expected, actual) = err.version_conflict_versions().unwrap_or_default();
            warn!(
                "event={} module=service status=conflict request_id={} expected_version={} actual_version={}",
                event,
                ctx.request_id(),
                expected,
                actual
            )
        }
        ErrorKind::Conflict
        | ErrorKind::BusinessRuleViolation
        | ErrorKind::PermissionDenied
        | ErrorKind::Forbidden
        | ErrorKind::Unauthorized => warn!(
            "event={} module=service status=rejected request_id={} error_kind={}",
            event,
            ctx.request_id(),
            err.kind().as_str()
        ),
        ErrorKind::Cancelled | ErrorKind::DeadlineExceeded => warn!(
            "event={} module=service status=cancelled request_id={} error_kind={}",
            event,
            ctx.request_id(),
            err.kind().as_str()
        ),
        ErrorKind::Internal => error!(
            "event={} module=service status=error request_id={} error={}",
            event,
            ctx.request_id(),
            err
        ),
    }
    err
}

/// Rejects a blank id argument before any storage access.
pub(crate) fn require_arg(field: &'static str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::invalid_field(field, format!("{field} is required")));
    }
    Ok(())
}
