//! Task repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist tasks with optimistic concurrency and soft deletes.
//! - Maintain the task/category and task/tag junctions.
//! - Append and read the task audit trail.
//!
//! # Invariants
//! - Reads populate `categories`, `tags` and `history`; only non-deleted
//!   categories and tags are included.
//! - Relation mutations run in one IMMEDIATE transaction that re-checks the
//!   task version, mutates the junction idempotently and bumps the version.
//! - History rows are append-only and returned most recent first.

use crate::context::RequestContext;
use crate::model::category::Category;
use crate::model::error::{DomainError, DomainResult};
use crate::model::history::{HistoryActor, TaskHistory, TaskHistoryAction, TaskHistoryDetails};
use crate::model::tag::Tag;
use crate::model::task::{Task, TaskPriority, TaskStatus};
use crate::model::user::UserRole;
use crate::repo::category_repo::{parse_category_row, CATEGORY_SELECT_SQL};
use crate::repo::tag_repo::{parse_tag_row, TAG_SELECT_SQL};
use crate::repo::{
    assign_id, count_rows, ensure_repo_ready, now_epoch_ms, order_clause, query_page,
    require_id, resolve_write_miss, restore_row, soft_delete_row, JunctionLink, ListOptions,
    Page, QueryFilter, WriteKind,
};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

const TASK_SELECT_SQL: &str = "SELECT
    id,
    title,
    description,
    assignee_id,
    status,
    priority,
    due_date,
    created_at,
    updated_at,
    version,
    is_deleted,
    deleted_at
FROM tasks";

const HISTORY_SELECT_SQL: &str = "SELECT
    h.id AS id,
    h.task_id AS task_id,
    h.action AS action,
    h.actor_id AS actor_id,
    h.timestamp AS timestamp,
    h.details AS details,
    u.id AS actor_user_id,
    u.name AS actor_name,
    u.email AS actor_email,
    u.role AS actor_role
FROM task_history h
LEFT JOIN users u ON u.id = h.actor_id";

const TASK_SORTABLE: &[&str] = &[
    "title",
    "status",
    "priority",
    "due_date",
    "created_at",
    "updated_at",
];

const ENTITY: &str = "task";

const CATEGORY_LINK: JunctionLink = JunctionLink {
    owner_table: "tasks",
    junction: "task_categories",
    owner_column: "task_id",
    link_column: "category_id",
};

const TAG_LINK: JunctionLink = JunctionLink {
    owner_table: "tasks",
    junction: "task_tags",
    owner_column: "task_id",
    link_column: "tag_id",
};

/// List options for tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskListOptions {
    pub list: ListOptions,
    pub assignee_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    /// Tasks linked to any of these categories.
    pub category_ids: Vec<String>,
    /// Tasks linked to any of these tags.
    pub tag_ids: Vec<String>,
    /// Inclusive upper bound on `due_date` (epoch ms).
    pub due_before: Option<i64>,
    /// Inclusive lower bound on `due_date` (epoch ms).
    pub due_after: Option<i64>,
}

impl TaskListOptions {
    /// Live tasks linked to one category.
    pub fn with_category(category_id: impl Into<String>) -> Self {
        Self {
            category_ids: vec![category_id.into()],
            ..Self::default()
        }
    }

    /// Live tasks linked to one tag.
    pub fn with_tag(tag_id: impl Into<String>) -> Self {
        Self {
            tag_ids: vec![tag_id.into()],
            ..Self::default()
        }
    }

    fn filter(&self) -> QueryFilter {
        let mut filter = QueryFilter::for_options(&self.list);
        filter.search(&self.list, &["title", "description"]);
        if let Some(assignee_id) = self.assignee_id.as_deref().filter(|id| !id.is_empty()) {
            filter.eq_text("assignee_id", assignee_id);
        }
        if let Some(status) = self.status {
            filter.eq_text("status", status.as_str());
        }
        if let Some(priority) = self.priority {
            filter.eq_text("priority", priority.as_str());
        }
        filter.linked_to_any(CATEGORY_LINK, &self.category_ids);
        filter.linked_to_any(TAG_LINK, &self.tag_ids);
        if let Some(due_before) = self.due_before {
            filter.push("due_date <= ?", [Value::Integer(due_before)]);
        }
        if let Some(due_after) = self.due_after {
            filter.push("due_date >= ?", [Value::Integer(due_after)]);
        }
        filter
    }
}

/// Persistence contract for tasks and their relations.
pub trait TaskRepository {
    /// Persists a new task and links `task.categories` / `task.tags` by id.
    fn create(&self, ctx: &RequestContext, task: &mut Task) -> DomainResult<()>;
    /// Loads a live task with categories, tags and history.
    fn get_by_id(&self, ctx: &RequestContext, id: &str) -> DomainResult<Task>;
    fn list(&self, ctx: &RequestContext, options: &TaskListOptions) -> DomainResult<Page<Task>>;
    /// Number of tasks matching the filters, ignoring pagination.
    fn count(&self, ctx: &RequestContext, options: &TaskListOptions) -> DomainResult<i64>;
    /// Conditional write of scalar fields at `task.version`.
    fn update(&self, ctx: &RequestContext, task: &mut Task) -> DomainResult<()>;
    fn soft_delete(&self, ctx: &RequestContext, id: &str, expected_version: i64)
        -> DomainResult<()>;
    fn restore(&self, ctx: &RequestContext, id: &str, expected_version: i64) -> DomainResult<()>;
    /// Links categories; returns the new task version.
    fn add_categories(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        category_ids: &[String],
        expected_version: i64,
    ) -> DomainResult<i64>;
    fn remove_categories(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        category_ids: &[String],
        expected_version: i64,
    ) -> DomainResult<i64>;
    fn add_tags(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        tag_ids: &[String],
        expected_version: i64,
    ) -> DomainResult<i64>;
    fn remove_tags(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        tag_ids: &[String],
        expected_version: i64,
    ) -> DomainResult<i64>;
    /// Appends one audit entry; assigns id and timestamp in place.
    fn append_history(&self, ctx: &RequestContext, entry: &mut TaskHistory) -> DomainResult<()>;
    /// Audit entries for one task, most recent first, actors resolved.
    fn get_history(&self, ctx: &RequestContext, task_id: &str) -> DomainResult<Vec<TaskHistory>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelationKind {
    Categories,
    Tags,
}

impl RelationKind {
    fn link(self) -> JunctionLink {
        match self {
            Self::Categories => CATEGORY_LINK,
            Self::Tags => TAG_LINK,
        }
    }

    fn field(self) -> &'static str {
        match self {
            Self::Categories => "category_ids",
            Self::Tags => "tag_ids",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelationChange {
    Add,
    Remove,
}

/// SQLite-backed task repository.
#[derive(Debug, Clone, Copy)]
pub struct SqliteTaskRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaskRepository<'conn> {
    /// Rejects connections whose schema is not fully migrated.
    pub fn try_new(conn: &'conn Connection) -> DomainResult<Self> {
        ensure_repo_ready(conn)?;
        Ok(Self { conn })
    }

    fn load_task(&self, id: &str) -> DomainResult<Option<Task>> {
        let task = self
            .conn
            .query_row(
                &format!("{TASK_SELECT_SQL} WHERE id = ?1 AND is_deleted = 0;"),
                [id],
                |row| Ok(parse_task_row(row)),
            )
            .optional()?
            .transpose()?;

        match task {
            Some(mut task) => {
                self.load_relations(&mut task)?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    fn load_relations(&self, task: &mut Task) -> DomainResult<()> {
        task.categories = load_categories(self.conn, &task.id)?;
        task.tags = load_tags(self.conn, &task.id)?;
        task.history = load_history(self.conn, &task.id)?;
        Ok(())
    }

    fn change_relation(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        ids: &[String],
        expected_version: i64,
        kind: RelationKind,
        change: RelationChange,
    ) -> DomainResult<i64> {
        require_id("task_id", task_id)?;
        let ids = normalize_ids(kind.field(), ids)?;
        if ids.is_empty() {
            return Ok(expected_version);
        }

        ctx.run(self.conn, || {
            let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
            ensure_task_version(&tx, task_id, expected_version)?;

            let link = kind.link();
            let sql = match change {
                RelationChange::Add => format!(
                    "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?1, ?2);",
                    link.junction, link.owner_column, link.link_column
                ),
                RelationChange::Remove => format!(
                    "DELETE FROM {} WHERE {} = ?1 AND {} = ?2;",
                    link.junction, link.owner_column, link.link_column
                ),
            };
            {
                let mut stmt = tx.prepare(&sql)?;
                for id in &ids {
                    stmt.execute(params![task_id, id])?;
                }
            }

            let changed = tx.execute(
                "UPDATE tasks
                 SET updated_at = ?1, version = version + 1
                 WHERE id = ?2 AND version = ?3 AND is_deleted = 0;",
                params![now_epoch_ms(), task_id, expected_version],
            )?;
            if changed == 0 {
                return Err(resolve_write_miss(
                    &tx,
                    "tasks",
                    ENTITY,
                    task_id,
                    expected_version,
                    WriteKind::Update,
                ));
            }

            tx.commit()?;
            Ok(expected_version + 1)
        })
    }
}

impl TaskRepository for SqliteTaskRepository<'_> {
    fn create(&self, ctx: &RequestContext, task: &mut Task) -> DomainResult<()> {
        task.validate()?;
        let category_ids = normalize_ids(
            "category_ids",
            &task.categories.iter().map(|c| c.id.clone()).collect::<Vec<_>>(),
        )?;
        let tag_ids = normalize_ids(
            "tag_ids",
            &task.tags.iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
        )?;

        ctx.run(self.conn, || {
            let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
            let mut id = task.id.clone();
            assign_id(&mut id);
            let now = now_epoch_ms();

            tx.execute(
                "INSERT INTO tasks (
                    id, title, description, assignee_id, status, priority, due_date,
                    created_at, updated_at, version, is_deleted, deleted_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, 1, 0, NULL);",
                params![
                    id,
                    task.title.trim(),
                    task.description,
                    task.assignee_id.trim(),
                    task.status.as_str(),
                    task.priority.as_str(),
                    task.due_date,
                    now
                ],
            )?;
            for category_id in &category_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO task_categories (task_id, category_id) VALUES (?1, ?2);",
                    params![id, category_id],
                )?;
            }
            for tag_id in &tag_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO task_tags (task_id, tag_id) VALUES (?1, ?2);",
                    params![id, tag_id],
                )?;
            }
            let categories = load_categories(&tx, &id)?;
            let tags = load_tags(&tx, &id)?;
            tx.commit()?;

            task.id = id;
            task.title = task.title.trim().to_string();
            task.assignee_id = task.assignee_id.trim().to_string();
            task.created_at = now;
            task.updated_at = now;
            task.version = 1;
            task.is_deleted = false;
            task.deleted_at = None;
            task.categories = categories;
            task.tags = tags;
            task.history.clear();
            Ok(())
        })
    }

    fn get_by_id(&self, ctx: &RequestContext, id: &str) -> DomainResult<Task> {
        require_id("id", id)?;
        ctx.run(self.conn, || {
            self.load_task(id)?
                .ok_or_else(|| DomainError::not_found(ENTITY, id))
        })
    }

    fn list(&self, ctx: &RequestContext, options: &TaskListOptions) -> DomainResult<Page<Task>> {
        let order_sql = order_clause(&options.list, TASK_SORTABLE)?;
        let filter = options.filter();

        ctx.run(self.conn, || {
            let mut page = query_page(
                self.conn,
                TASK_SELECT_SQL,
                "tasks",
                &filter,
                &order_sql,
                &options.list,
                parse_task_row,
            )?;
            for task in &mut page.items {
                self.load_relations(task)?;
            }
            Ok(page)
        })
    }

    fn count(&self, ctx: &RequestContext, options: &TaskListOptions) -> DomainResult<i64> {
        let filter = options.filter();
        ctx.run(self.conn, || count_rows(self.conn, "tasks", &filter))
    }

    fn update(&self, ctx: &RequestContext, task: &mut Task) -> DomainResult<()> {
        require_id("id", &task.id)?;
        task.validate()?;
        ctx.run(self.conn, || {
            let now = now_epoch_ms();
            let changed = self.conn.execute(
                "UPDATE tasks
                 SET
                    title = ?1,
                    description = ?2,
                    assignee_id = ?3,
                    status = ?4,
                    priority = ?5,
                    due_date = ?6,
                    updated_at = ?7,
                    version = version + 1
                 WHERE id = ?8 AND version = ?9 AND is_deleted = 0;",
                params![
                    task.title.trim(),
                    task.description,
                    task.assignee_id.trim(),
                    task.status.as_str(),
                    task.priority.as_str(),
                    task.due_date,
                    now,
                    task.id,
                    task.version
                ],
            )?;
            if changed == 0 {
                return Err(resolve_write_miss(
                    self.conn,
                    "tasks",
                    ENTITY,
                    &task.id,
                    task.version,
                    WriteKind::Update,
                ));
            }

            task.title = task.title.trim().to_string();
            task.assignee_id = task.assignee_id.trim().to_string();
            task.version += 1;
            task.updated_at = now;
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
            soft_delete_row(self.conn, "tasks", ENTITY, id, expected_version).map(|_| ())
        })
    }

    fn restore(&self, ctx: &RequestContext, id: &str, expected_version: i64) -> DomainResult<()> {
        require_id("id", id)?;
        ctx.run(self.conn, || {
            restore_row(self.conn, "tasks", ENTITY, id, expected_version).map(|_| ())
        })
    }

    fn add_categories(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        category_ids: &[String],
        expected_version: i64,
    ) -> DomainResult<i64> {
        self.change_relation(
            ctx,
            task_id,
            category_ids,
            expected_version,
            RelationKind::Categories,
            RelationChange::Add,
        )
    }

    fn remove_categories(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        category_ids: &[String],
        expected_version: i64,
    ) -> DomainResult<i64> {
        self.change_relation(
            ctx,
            task_id,
            category_ids,
            expected_version,
            RelationKind::Categories,
            RelationChange::Remove,
        )
    }

    fn add_tags(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        tag_ids: &[String],
        expected_version: i64,
    ) -> DomainResult<i64> {
        self.change_relation(
            ctx,
            task_id,
            tag_ids,
            expected_version,
            RelationKind::Tags,
            RelationChange::Add,
        )
    }

    fn remove_tags(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        tag_ids: &[String],
        expected_version: i64,
    ) -> DomainResult<i64> {
        self.change_relation(
            ctx,
            task_id,
            tag_ids,
            expected_version,
            RelationKind::Tags,
            RelationChange::Remove,
        )
    }

    fn append_history(&self, ctx: &RequestContext, entry: &mut TaskHistory) -> DomainResult<()> {
        require_id("task_id", &entry.task_id)?;
        require_id("actor_id", &entry.actor_id)?;
        let details = serde_json::to_string(&entry.details).map_err(|err| {
            DomainError::invalid_field("details", format!("history details are not JSON: {err}"))
        })?;

        ctx.run(self.conn, || {
            let mut id = entry.id.clone();
            assign_id(&mut id);
            let now = now_epoch_ms();
            self.conn.execute(
                "INSERT INTO task_history (id, task_id, action, actor_id, timestamp, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                params![
                    id,
                    entry.task_id,
                    entry.action.as_str(),
                    entry.actor_id,
                    now,
                    details
                ],
            )?;
            entry.id = id;
            entry.timestamp = now;
            Ok(())
        })
    }

    fn get_history(&self, ctx: &RequestContext, task_id: &str) -> DomainResult<Vec<TaskHistory>> {
        require_id("task_id", task_id)?;
        ctx.run(self.conn, || {
            let exists = self
                .conn
                .query_row(
                    "SELECT 1 FROM tasks WHERE id = ?1 AND is_deleted = 0;",
                    [task_id],
                    |_| Ok(()),
                )
                .optional()?;
            if exists.is_none() {
                return Err(DomainError::not_found(ENTITY, task_id));
            }
            load_history(self.conn, task_id)
        })
    }
}

/// Fails unless the task is live at `expected_version`.
fn ensure_task_version(conn: &Connection, task_id: &str, expected_version: i64) -> DomainResult<()> {
    let state = conn
        .query_row(
            "SELECT version, is_deleted FROM tasks WHERE id = ?1;",
            [task_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?)),
        )
        .optional()?;

    match state {
        None | Some((_, true)) => Err(DomainError::not_found(ENTITY, task_id)),
        Some((actual, false)) if actual != expected_version => Err(
            DomainError::version_conflict(ENTITY, expected_version, actual),
        ),
        Some(_) => Ok(()),
    }
}

/// Trims and dedups ids, rejecting blanks.
fn normalize_ids(field: &'static str, ids: &[String]) -> DomainResult<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        let id = id.trim();
        if id.is_empty() {
            return Err(DomainError::invalid_field(field, "ids must not be blank"));
        }
        if !normalized.iter().any(|existing| existing == id) {
            normalized.push(id.to_string());
        }
    }
    Ok(normalized)
}

fn load_categories(conn: &Connection, task_id: &str) -> DomainResult<Vec<Category>> {
    let mut stmt = conn.prepare(&format!(
        "{CATEGORY_SELECT_SQL}
         WHERE is_deleted = 0
           AND id IN (SELECT category_id FROM task_categories WHERE task_id = ?1)
         ORDER BY name ASC, id ASC;"
    ))?;
    let mut rows = stmt.query([task_id])?;
    let mut categories = Vec::new();
    while let Some(row) = rows.next()? {
        categories.push(parse_category_row(row)?);
    }
    Ok(categories)
}

fn load_tags(conn: &Connection, task_id: &str) -> DomainResult<Vec<Tag>> {
    let mut stmt = conn.prepare(&format!(
        "{TAG_SELECT_SQL}
         WHERE is_deleted = 0
           AND id IN (SELECT tag_id FROM task_tags WHERE task_id = ?1)
         ORDER BY name ASC, id ASC;"
    ))?;
    let mut rows = stmt.query([task_id])?;
    let mut tags = Vec::new();
    while let Some(row) = rows.next()? {
        tags.push(parse_tag_row(row)?);
    }
    Ok(tags)
}

fn load_history(conn: &Connection, task_id: &str) -> DomainResult<Vec<TaskHistory>> {
    let mut stmt = conn.prepare(&format!(
        "{HISTORY_SELECT_SQL}
         WHERE h.task_id = ?1
         ORDER BY h.timestamp DESC, h.rowid DESC;"
    ))?;
    let mut rows = stmt.query([task_id])?;
    let mut history = Vec::new();
    while let Some(row) = rows.next()? {
        history.push(parse_history_row(row)?);
    }
    Ok(history)
}

fn parse_task_row(row: &Row<'_>) -> DomainResult<Task> {
    let status_text: String = row.get("status")?;
    let status = status_text.parse::<TaskStatus>().map_err(|_| {
        DomainError::InvalidData(format!("invalid status `{status_text}` in tasks.status"))
    })?;
    let priority_text: String = row.get("priority")?;
    let priority = priority_text.parse::<TaskPriority>().map_err(|_| {
        DomainError::InvalidData(format!(
            "invalid priority `{priority_text}` in tasks.priority"
        ))
    })?;

    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        assignee_id: row.get("assignee_id")?,
        status,
        priority,
        due_date: row.get("due_date")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        version: row.get("version")?,
        is_deleted: row.get("is_deleted")?,
        deleted_at: row.get("deleted_at")?,
        categories: Vec::new(),
        tags: Vec::new(),
        history: Vec::new(),
    })
}

fn parse_history_row(row: &Row<'_>) -> DomainResult<TaskHistory> {
    let action_text: String = row.get("action")?;
    let action = action_text.parse::<TaskHistoryAction>()?;

    let details_text: String = row.get("details")?;
    let details: TaskHistoryDetails = serde_json::from_str(&details_text).map_err(|err| {
        DomainError::InvalidData(format!("invalid JSON in task_history.details: {err}"))
    })?;

    let actor = match row.get::<_, Option<String>>("actor_user_id")? {
        Some(id) => {
            let role_text: String = row.get("actor_role")?;
            let role = role_text.parse::<UserRole>().map_err(|_| {
                DomainError::InvalidData(format!("invalid role `{role_text}` in users.role"))
            })?;
            Some(HistoryActor {
                id,
                name: row.get("actor_name")?,
                email: row.get("actor_email")?,
                role,
            })
        }
        None => None,
    };

    Ok(TaskHistory {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        action,
        actor_id: row.get("actor_id")?,
        actor,
        timestamp: row.get("timestamp")?,
        details,
    })
}
