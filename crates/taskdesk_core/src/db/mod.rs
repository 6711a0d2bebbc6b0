//! SQLite storage bootstrap and schema migration entry points.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the admin core.
//! - Apply schema migrations in deterministic order.
//! - Report connection health.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Repositories refuse connections whose schema is not fully migrated.

use thiserror::Error;

pub mod migrations;
mod open;

pub use migrations::{latest_version, schema_version};
pub use open::{
    health_check, open_db, open_db_in_memory, open_db_with_busy_timeout, DEFAULT_BUSY_TIMEOUT,
};

pub type DbResult<T> = Result<T, DbError>;

/// Storage bootstrap failure.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },

    #[error("database schema is not ready: expected version {expected_version}, found {actual_version}")]
    SchemaNotReady {
        expected_version: u32,
        actual_version: u32,
    },
}

/// Fails with `SchemaNotReady` unless the connection is fully migrated.
pub fn ensure_schema_ready(conn: &rusqlite::Connection) -> DbResult<()> {
    let actual_version = schema_version(conn)?;
    let expected_version = latest_version();
    if actual_version != expected_version {
        return Err(DbError::SchemaNotReady {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}
