//! Core domain logic for the taskdesk admin backend.
//! This crate is the single source of truth for business invariants.

pub mod config;
pub mod context;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{AppConfig, ConfigError, DatabaseConfig, LoggingConfig};
pub use context::{CancelHandle, RequestContext};
pub use db::{
    health_check, open_db, open_db_in_memory, open_db_with_busy_timeout, schema_version, DbError,
};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status, LoggingError};
pub use model::category::Category;
pub use model::error::{DomainError, DomainResult, ErrorKind, ResultExt};
pub use model::history::{HistoryActor, TaskHistory, TaskHistoryAction, TaskHistoryDetails};
pub use model::tag::{normalize_tag_name, Tag};
pub use model::task::{Task, TaskPriority, TaskStatus};
pub use model::user::{User, UserRole};
pub use repo::category_repo::{CategoryListOptions, CategoryRepository, SqliteCategoryRepository};
pub use repo::tag_repo::{SqliteTagRepository, TagListOptions, TagRepository};
pub use repo::task_repo::{SqliteTaskRepository, TaskListOptions, TaskRepository};
pub use repo::user_repo::{SqliteUserRepository, UserRepository};
pub use repo::{ListOptions, Page};
pub use service::category_service::CategoryService;
pub use service::tag_service::TagService;
pub use service::task_service::TaskService;
pub use service::user_service::UserService;
pub use service::Services;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
