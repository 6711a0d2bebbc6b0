//! Domain model for the admin backend.
//!
//! # Responsibility
//! - Define the four versioned, soft-deletable entities and task history.
//! - Provide pure field validation and the closed error taxonomy.
//!
//! # Invariants
//! - Every entity carries `id`, `version`, `is_deleted`, `deleted_at`,
//!   `created_at` and `updated_at`; storage owns all of them.
//! - Deletion is represented by soft-delete markers, not hard delete.

pub mod category;
pub mod error;
pub mod history;
pub mod tag;
pub mod task;
pub mod user;
