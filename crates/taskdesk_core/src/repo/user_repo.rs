//! User repository contract and SQLite implementation.
//!
//! # Invariants
//! - Write paths call `User::validate()` before any SQL.
//! - Email uniqueness among live users is enforced by a partial unique
//!   index; violations surface as `Conflict`.
//! - A delete or demotion of a live admin only commits while another live
//!   admin exists; the check runs inside the same conditional write.

use crate::context::RequestContext;
use crate::model::error::{DomainError, DomainResult};
use crate::model::user::{User, UserRole};
use crate::repo::{
    assign_id, count_rows, ensure_repo_ready, now_epoch_ms, order_clause, query_page,
    require_id, resolve_write_miss, restore_row, ListOptions, Page, QueryFilter, WriteKind,
};
use log::warn;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Row};

const USER_SELECT_SQL: &str = "SELECT
    id,
    name,
    email,
    role,
    created_at,
    updated_at,
    version,
    is_deleted,
    deleted_at
FROM users";

const USER_SORTABLE: &[&str] = &["name", "email", "role", "created_at", "updated_at"];

const ENTITY: &str = "user";

/// Holds for a row that is not an admin or is not the last live admin.
const KEEPS_AN_ADMIN_SQL: &str = "(role <> 'admin' OR EXISTS (
    SELECT 1 FROM users AS other
    WHERE other.role = 'admin' AND other.is_deleted = 0 AND other.id <> users.id
))";

/// Persistence contract for users.
pub trait UserRepository {
    /// Persists a new user; assigns id, version `1` and timestamps in place.
    fn create(&self, ctx: &RequestContext, user: &mut User) -> DomainResult<()>;
    fn get_by_id(&self, ctx: &RequestContext, id: &str) -> DomainResult<User>;
    /// Case-insensitive lookup among live users.
    fn get_by_email(&self, ctx: &RequestContext, email: &str) -> DomainResult<User>;
    fn list(&self, ctx: &RequestContext, options: &ListOptions) -> DomainResult<Page<User>>;
    /// Conditional write at `user.version`; bumps `version` and `updated_at`
    /// in place on success. Demoting the last live admin fails with
    /// `BusinessRule`.
    fn update(&self, ctx: &RequestContext, user: &mut User) -> DomainResult<()>;
    /// Deleting the last live admin fails with `BusinessRule`.
    fn soft_delete(&self, ctx: &RequestContext, id: &str, expected_version: i64)
        -> DomainResult<()>;
    fn restore(&self, ctx: &RequestContext, id: &str, expected_version: i64) -> DomainResult<()>;
    /// Number of live users holding `role`.
    fn count_by_role(&self, ctx: &RequestContext, role: UserRole) -> DomainResult<i64>;
}

/// SQLite-backed user repository.
#[derive(Debug, Clone, Copy)]
pub struct SqliteUserRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUserRepository<'conn> {
    /// Rejects connections whose schema is not fully migrated.
    pub fn try_new(conn: &'conn Connection) -> DomainResult<Self> {
        ensure_repo_ready(conn)?;
        Ok(Self { conn })
    }
}

impl UserRepository for SqliteUserRepository<'_> {
    fn create(&self, ctx: &RequestContext, user: &mut User) -> DomainResult<()> {
        user.validate()?;
        ctx.run(self.conn, || {
            let mut id = user.id.clone();
            assign_id(&mut id);
            let now = now_epoch_ms();
            self.conn.execute(
                "INSERT INTO users (
                    id, name, email, role, created_at, updated_at, version, is_deleted, deleted_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1, 0, NULL);",
                params![id, user.name.trim(), user.email.trim(), user.role.as_str(), now],
            )?;

            user.id = id;
            user.name = user.name.trim().to_string();
            user.email = user.email.trim().to_string();
            user.created_at = now;
            user.updated_at = now;
            user.version = 1;
            user.is_deleted = false;
            user.deleted_at = None;
            Ok(())
        })
    }

    fn get_by_id(&self, ctx: &RequestContext, id: &str) -> DomainResult<User> {
        require_id("id", id)?;
        ctx.run(self.conn, || {
            self.conn
                .query_row(
                    &format!("{USER_SELECT_SQL} WHERE id = ?1 AND is_deleted = 0;"),
                    [id],
                    |row| Ok(parse_user_row(row)),
                )
                .optional()?
                .transpose()?
                .ok_or_else(|| DomainError::not_found(ENTITY, id))
        })
    }

    fn get_by_email(&self, ctx: &RequestContext, email: &str) -> DomainResult<User> {
        let email = email.trim();
        if email.is_empty() {
            return Err(DomainError::invalid_field("email", "email is required"));
        }
        ctx.run(self.conn, || {
            self.conn
                .query_row(
                    &format!("{USER_SELECT_SQL} WHERE email = ?1 AND is_deleted = 0;"),
                    [email],
                    |row| Ok(parse_user_row(row)),
                )
                .optional()?
                .transpose()?
                .ok_or_else(|| DomainError::not_found(ENTITY, email))
        })
    }

    fn list(&self, ctx: &RequestContext, options: &ListOptions) -> DomainResult<Page<User>> {
        let order_sql = order_clause(options, USER_SORTABLE)?;
        let mut filter = QueryFilter::for_options(options);
        filter.search(options, &["name", "email"]);

        ctx.run(self.conn, || {
            query_page(
                self.conn,
                USER_SELECT_SQL,
                "users",
                &filter,
                &order_sql,
                options,
                parse_user_row,
            )
        })
    }

    fn update(&self, ctx: &RequestContext, user: &mut User) -> DomainResult<()> {
        require_id("id", &user.id)?;
        user.validate()?;
        ctx.run(self.conn, || {
            let now = now_epoch_ms();
            let changed = self.conn.execute(
                &format!(
                    "UPDATE users
                     SET name = ?1, email = ?2, role = ?3, updated_at = ?4, version = version + 1
                     WHERE id = ?5 AND version = ?6 AND is_deleted = 0
                       AND (?3 = 'admin' OR {KEEPS_AN_ADMIN_SQL});"
                ),
                params![
                    user.name.trim(),
                    user.email.trim(),
                    user.role.as_str(),
                    now,
                    user.id,
                    user.version
                ],
            )?;
            if changed == 0 {
                return Err(user_write_miss(
                    self.conn,
                    &user.id,
                    user.version,
                    WriteKind::Update,
                ));
            }

            user.name = user.name.trim().to_string();
            user.email = user.email.trim().to_string();
            user.version += 1;
            user.updated_at = now;
            Ok(())
        })
    }

    fn soft_delete(
        &self,
        ctx: &RequestContext,
        id: &str,
        expected_version: i64,
    ) -> DomainResult<()> {
        require_id("id", id)?;
        ctx.run(self.conn, || {
            let changed = self.conn.execute(
                &format!(
                    "UPDATE users
                     SET is_deleted = 1, deleted_at = ?1, updated_at = ?1, version = version + 1
                     WHERE id = ?2 AND version = ?3 AND is_deleted = 0
                       AND {KEEPS_AN_ADMIN_SQL};"
                ),
                params![now_epoch_ms(), id, expected_version],
            )?;
            if changed == 0 {
                return Err(user_write_miss(
                    self.conn,
                    id,
                    expected_version,
                    WriteKind::SoftDelete,
                ));
            }
            Ok(())
        })
    }

    fn restore(&self, ctx: &RequestContext, id: &str, expected_version: i64) -> DomainResult<()> {
        require_id("id", id)?;
        ctx.run(self.conn, || {
            restore_row(self.conn, "users", ENTITY, id, expected_version).map(|_| ())
        })
    }

    fn count_by_role(&self, ctx: &RequestContext, role: UserRole) -> DomainResult<i64> {
        let mut filter = QueryFilter::for_options(&ListOptions::default());
        filter.push("role = ?", [Value::Text(role.as_str().to_string())]);
        ctx.run(self.conn, || count_rows(self.conn, "users", &filter))
    }
}

/// Explains a zero-row user write. A live row at the expected version can
/// only have been held back by the last-admin condition.
fn user_write_miss(
    conn: &Connection,
    id: &str,
    expected_version: i64,
    kind: WriteKind,
) -> DomainError {
    let held_back = conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ?1 AND version = ?2 AND is_deleted = 0 AND role = 'admin';",
            params![id, expected_version],
            |_| Ok(()),
        )
        .optional();
    match held_back {
        Ok(Some(())) => {
            warn!(
                "event=last_admin_guard module=repo status=rejected user_id={} version={} kind={:?}",
                id, expected_version, kind
            );
            DomainError::business_rule("cannot remove the last admin user")
        }
        Ok(None) => resolve_write_miss(conn, "users", ENTITY, id, expected_version, kind),
        Err(err) => DomainError::from(err),
    }
}

fn parse_user_row(row: &Row<'_>) -> DomainResult<User> {
    let role_text: String = row.get("role")?;
    let role = role_text.parse::<UserRole>().map_err(|_| {
        DomainError::InvalidData(format!("invalid role `{role_text}` in users.role"))
    })?;

    Ok(User {
        id: row.get("id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        role,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        version: row.get("version")?,
        is_deleted: row.get("is_deleted")?,
        deleted_at: row.get("deleted_at")?,
    })
}
