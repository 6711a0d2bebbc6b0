//! Embedded schema migrations for the task store.
//!
//! Each step is a SQL file compiled into the binary. The applied step is
//! tracked in `PRAGMA user_version`; a fresh database is brought to
//! [`latest_version`] in one write transaction.

use crate::db::{DbError, DbResult};
use log::{debug, info};
use rusqlite::{Connection, TransactionBehavior};

#[derive(Debug, Clone, Copy)]
struct Step {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "users_tasks_categories_tags",
        sql: include_str!("0001_init.sql"),
    },
    Step {
        version: 2,
        name: "task_relations_history",
        sql: include_str!("0002_task_relations.sql"),
    },
];

/// Highest schema version this build knows how to create.
pub fn latest_version() -> u32 {
    STEPS.iter().map(|step| step.version).max().unwrap_or(0)
}

/// Brings `conn` to [`latest_version`].
///
/// The version is re-read under an IMMEDIATE transaction so two processes
/// opening the same fresh file do not both run the steps.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let latest = latest_version();
    if schema_version(conn)? == latest {
        return Ok(());
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let from = schema_version(&tx)?;
    if from > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from,
            latest_supported: latest,
        });
    }

    for step in STEPS.iter().filter(|step| step.version > from) {
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
        debug!(
            "event=db_migrate_step module=db status=ok version={} name={}",
            step.version, step.name
        );
    }
    tx.commit()?;

    if from < latest {
        info!(
            "event=db_migrate module=db status=ok from_version={} to_version={}",
            from, latest
        );
    }
    Ok(())
}

/// Schema version stored in `PRAGMA user_version`.
pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get::<_, u32>(0))?)
}
