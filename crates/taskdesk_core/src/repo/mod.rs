//! Repository contracts and SQLite implementations.
//!
//! # Responsibility
//! - Translate entity operations into versioned, soft-delete-aware SQL.
//! - Own the optimistic-concurrency protocol for every entity table.
//!
//! # Invariants
//! - Every mutation is one conditional `UPDATE ... WHERE id = ? AND version = ?`
//!   that also sets `version = version + 1`.
//! - A write that matches zero rows is resolved by re-reading the row:
//!   missing or deleted rows are `NotFound`, version drift is
//!   `VersionConflict` carrying the stored version.
//! - Normal reads never return soft-deleted rows.

pub mod category_repo;
pub mod tag_repo;
pub mod task_repo;
pub mod user_repo;

use crate::db::ensure_schema_ready;
use crate::model::error::{DomainError, DomainResult};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Page size used when the caller passes `0`.
pub const DEFAULT_PAGE_SIZE: u32 = 50;
/// Upper bound applied to caller-provided page sizes.
pub const MAX_PAGE_SIZE: u32 = 1_000;

/// Shared list options for every entity.
///
/// `page` is zero-based.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub page: u32,
    pub page_size: u32,
    /// Case-insensitive substring over the entity's text fields.
    pub search_query: Option<String>,
    pub include_deleted: bool,
    /// Column to sort by; must be in the entity's sortable set.
    pub sort_by: Option<String>,
    pub sort_desc: bool,
}

impl ListOptions {
    pub fn page(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            ..Self::default()
        }
    }

    /// Page size after defaulting and clamping.
    pub fn effective_page_size(&self) -> u32 {
        match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            size => size.min(MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.effective_page_size())
    }

    fn search_term(&self) -> Option<&str> {
        self.search_query
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }
}

/// One page of list results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Rows matching the filter before pagination.
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

/// Which conditional write matched zero rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteKind {
    Update,
    SoftDelete,
    Restore,
}

/// Junction table joining an owner table to linked ids.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JunctionLink {
    pub(crate) owner_table: &'static str,
    pub(crate) junction: &'static str,
    pub(crate) owner_column: &'static str,
    pub(crate) link_column: &'static str,
}

/// Accumulates `WHERE` conditions with their positional binds.
#[derive(Debug, Default)]
pub(crate) struct QueryFilter {
    conditions: Vec<String>,
    binds: Vec<Value>,
}

impl QueryFilter {
    /// Starts a filter that hides deleted rows unless `include_deleted`.
    pub(crate) fn for_options(options: &ListOptions) -> Self {
        let mut filter = Self::default();
        if !options.include_deleted {
            filter.conditions.push("is_deleted = 0".to_string());
        }
        filter
    }

    pub(crate) fn push(&mut self, condition: impl Into<String>, binds: impl IntoIterator<Item = Value>) {
        self.conditions.push(condition.into());
        self.binds.extend(binds);
    }

    pub(crate) fn eq_text(&mut self, column: &str, value: &str) {
        self.push(format!("{column} = ?"), [Value::Text(value.to_string())]);
    }

    /// Matches `term` as a substring of any of `columns`.
    pub(crate) fn search(&mut self, options: &ListOptions, columns: &[&str]) {
        let Some(term) = options.search_term() else {
            return;
        };
        let pattern = like_pattern(term);
        let condition = columns
            .iter()
            .map(|column| format!("{column} LIKE ? ESCAPE '\\'"))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.push(
            format!("({condition})"),
            columns.iter().map(|_| Value::Text(pattern.clone())),
        );
    }

    /// Matches `owner_table` rows linked through `junction` to any of `ids`.
    pub(crate) fn linked_to_any(&mut self, link: JunctionLink, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        self.push(
            format!(
                "EXISTS (SELECT 1 FROM {junction} j WHERE j.{owner_column} = {owner_table}.id AND j.{link_column} IN ({placeholders}))",
                junction = link.junction,
                owner_column = link.owner_column,
                owner_table = link.owner_table,
                link_column = link.link_column,
            ),
            ids.iter().map(|id| Value::Text(id.clone())),
        );
    }

    fn where_sql(&self) -> String {
        if self.conditions.is_empty() {
            return String::new();
        }
        format!(" WHERE {}", self.conditions.join(" AND "))
    }
}

/// Builds `ORDER BY` from the options, restricted to `sortable` columns.
pub(crate) fn order_clause(options: &ListOptions, sortable: &[&str]) -> DomainResult<String> {
    let Some(sort_by) = options.sort_by.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(" ORDER BY created_at DESC, id ASC".to_string());
    };
    let Some(column) = sortable.iter().find(|column| **column == sort_by) else {
        return Err(DomainError::invalid_field(
            "sort_by",
            format!("unsupported sort field `{sort_by}`"),
        ));
    };
    let direction = if options.sort_desc { "DESC" } else { "ASC" };
    Ok(format!(" ORDER BY {column} {direction}, id ASC"))
}

/// Runs the count and page queries for one filtered list.
pub(crate) fn query_page<T>(
    conn: &Connection,
    select_sql: &str,
    table: &str,
    filter: &QueryFilter,
    order_sql: &str,
    options: &ListOptions,
    mut map_row: impl FnMut(&Row<'_>) -> DomainResult<T>,
) -> DomainResult<Page<T>> {
    let where_sql = filter.where_sql();
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {table}{where_sql};"),
        params_from_iter(filter.binds.iter()),
        |row| row.get(0),
    )?;

    let page_size = options.effective_page_size();
    let mut binds = filter.binds.clone();
    binds.push(Value::Integer(i64::from(page_size)));
    binds.push(Value::Integer(options.offset()));

    let mut stmt = conn.prepare(&format!("{select_sql}{where_sql}{order_sql} LIMIT ? OFFSET ?;"))?;
    let mut rows = stmt.query(params_from_iter(binds))?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(map_row(row)?);
    }

    Ok(Page {
        items,
        total,
        page: options.page,
        page_size,
    })
}

/// Counts rows matching `filter` without fetching them.
pub(crate) fn count_rows(conn: &Connection, table: &str, filter: &QueryFilter) -> DomainResult<i64> {
    let total = conn.query_row(
        &format!("SELECT COUNT(*) FROM {table}{};", filter.where_sql()),
        params_from_iter(filter.binds.iter()),
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Escapes `%`, `_` and `\` and wraps the term for substring matching.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Assigns a fresh UUID when `id` is empty.
pub(crate) fn assign_id(id: &mut String) {
    if id.trim().is_empty() {
        *id = uuid::Uuid::new_v4().to_string();
    }
}

/// Rejects blank ids before any storage access.
pub(crate) fn require_id(field: &'static str, id: &str) -> DomainResult<()> {
    if id.trim().is_empty() {
        return Err(DomainError::invalid_field(field, format!("{field} is required")));
    }
    Ok(())
}

/// Maps schema readiness failures into the domain error space.
pub(crate) fn ensure_repo_ready(conn: &Connection) -> DomainResult<()> {
    ensure_schema_ready(conn)?;
    Ok(())
}

/// Explains why a conditional write on `table` matched no row.
pub(crate) fn resolve_write_miss(
    conn: &Connection,
    table: &str,
    entity: &'static str,
    id: &str,
    expected_version: i64,
    kind: WriteKind,
) -> DomainError {
    let state = conn
        .query_row(
            &format!("SELECT version, is_deleted FROM {table} WHERE id = ?1;"),
            [id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?)),
        )
        .optional();

    let err = match state {
        Err(err) => DomainError::from(err),
        Ok(None) => DomainError::not_found(entity, id),
        Ok(Some((_, true))) if kind != WriteKind::Restore => DomainError::not_found(entity, id),
        Ok(Some((_, false))) if kind == WriteKind::Restore => {
            DomainError::business_rule(format!("{entity} is not deleted"))
        }
        Ok(Some((actual, _))) => DomainError::version_conflict(entity, expected_version, actual),
    };
    debug!(
        "event=write_miss module=repo status=rejected entity={} id={} expected_version={} kind={:?} error_kind={}",
        entity,
        id,
        expected_version,
        kind,
        err.kind().as_str()
    );
    err
}

/// Soft-deletes one live row at `expected_version`; returns the new version.
pub(crate) fn soft_delete_row(
    conn: &Connection,
    table: &str,
    entity: &'static str,
    id: &str,
    expected_version: i64,
) -> DomainResult<i64> {
    let now = now_epoch_ms();
    let changed = conn.execute(
        &format!(
            "UPDATE {table}
             SET is_deleted = 1, deleted_at = ?1, updated_at = ?1, version = version + 1
             WHERE id = ?2 AND version = ?3 AND is_deleted = 0;"
        ),
        params![now, id, expected_version],
    )?;
    if changed == 0 {
        return Err(resolve_write_miss(
            conn,
            table,
            entity,
            id,
            expected_version,
            WriteKind::SoftDelete,
        ));
    }
    Ok(expected_version + 1)
}

/// Restores one deleted row at `expected_version`; returns the new version.
pub(crate) fn restore_row(
    conn: &Connection,
    table: &str,
    entity: &'static str,
    id: &str,
    expected_version: i64,
) -> DomainResult<i64> {
    let changed = conn.execute(
        &format!(
            "UPDATE {table}
             SET is_deleted = 0, deleted_at = NULL, updated_at = ?1, version = version + 1
             WHERE id = ?2 AND version = ?3 AND is_deleted = 1;"
        ),
        params![now_epoch_ms(), id, expected_version],
    )?;
    if changed == 0 {
        return Err(resolve_write_miss(
            conn,
            table,
            entity,
            id,
            expected_version,
            WriteKind::Restore,
        ));
    }
    Ok(expected_version + 1)
}
