//! Category repository contract and SQLite implementation.

use crate::context::RequestContext;
use crate::model::category::Category;
use crate::model::error::{DomainError, DomainResult};
use crate::repo::{
    assign_id, ensure_repo_ready, now_epoch_ms, order_clause, query_page, require_id,
    resolve_write_miss, restore_row, soft_delete_row, ListOptions, Page, QueryFilter, WriteKind,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(crate) const CATEGORY_SELECT_SQL: &str = "SELECT
    id,
    name,
    description,
    color,
    parent_id,
    is_public,
    creator_id,
    created_at,
    updated_at,
    version,
    is_deleted,
    deleted_at
FROM categories";

const CATEGORY_SORTABLE: &[&str] = &["name", "created_at", "updated_at"];

const ENTITY: &str = "category";

/// List options for categories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryListOptions {
    pub list: ListOptions,
    /// Only direct children of this category.
    pub parent_id: Option<String>,
    pub public_only: bool,
    pub creator_id: Option<String>,
}

/// Persistence contract for categories.
pub trait CategoryRepository {
    fn create(&self, ctx: &RequestContext, category: &mut Category) -> DomainResult<()>;
    fn get_by_id(&self, ctx: &RequestContext, id: &str) -> DomainResult<Category>;
    /// Exact-name lookup among live categories.
    fn get_by_name(&self, ctx: &RequestContext, name: &str) -> DomainResult<Category>;
    fn list(
        &self,
        ctx: &RequestContext,
        options: &CategoryListOptions,
    ) -> DomainResult<Page<Category>>;
    fn update(&self, ctx: &RequestContext, category: &mut Category) -> DomainResult<()>;
    fn soft_delete(&self, ctx: &RequestContext, id: &str, expected_version: i64)
        -> DomainResult<()>;
    fn restore(&self, ctx: &RequestContext, id: &str, expected_version: i64) -> DomainResult<()>;
}

/// SQLite-backed category repository.
#[derive(Debug, Clone, Copy)]
pub struct SqliteCategoryRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCategoryRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> DomainResult<Self> {
        ensure_repo_ready(conn)?;
        Ok(Self { conn })
    }

    fn find_one(&self, condition: &str, value: &str) -> DomainResult<Option<Category>> {
        let category = self
            .conn
            .query_row(
                &format!("{CATEGORY_SELECT_SQL} WHERE {condition} AND is_deleted = 0;"),
                [value],
                |row| Ok(parse_category_row(row)),
            )
            .optional()?
            .transpose()?;
        Ok(category)
    }
}

impl CategoryRepository for SqliteCategoryRepository<'_> {
    fn create(&self, ctx: &RequestContext, category: &mut Category) -> DomainResult<()> {
        category.validate()?;
        ctx.run(self.conn, || {
            let mut id = category.id.clone();
            assign_id(&mut id);
            let now = now_epoch_ms();
            self.conn.execute(
                "INSERT INTO categories (
                    id, name, description, color, parent_id, is_public, creator_id,
                    created_at, updated_at, version, is_deleted, deleted_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, 1, 0, NULL);",
                params![
                    id,
                    category.name.trim(),
                    category.description,
                    category.color,
                    category.parent_id,
                    category.is_public,
                    category.creator_id,
                    now
                ],
            )?;

            category.id = id;
            category.name = category.name.trim().to_string();
            category.created_at = now;
            category.updated_at = now;
            category.version = 1;
            category.is_deleted = false;
            category.deleted_at = None;
            Ok(())
        })
    }

    fn get_by_id(&self, ctx: &RequestContext, id: &str) -> DomainResult<Category> {
        require_id("id", id)?;
        ctx.run(self.conn, || {
            self.find_one("id = ?1", id)?
                .ok_or_else(|| DomainError::not_found(ENTITY, id))
        })
    }

    fn get_by_name(&self, ctx: &RequestContext, name: &str) -> DomainResult<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::invalid_field("name", "category name is required"));
        }
        ctx.run(self.conn, || {
            self.find_one("name = ?1", name)?
                .ok_or_else(|| DomainError::not_found(ENTITY, name))
        })
    }

    fn list(
        &self,
        ctx: &RequestContext,
        options: &CategoryListOptions,
    ) -> DomainResult<Page<Category>> {
        let order_sql = order_clause(&options.list, CATEGORY_SORTABLE)?;
        let mut filter = QueryFilter::for_options(&options.list);
        filter.search(&options.list, &["name", "description"]);
        if let Some(parent_id) = options.parent_id.as_deref().filter(|id| !id.is_empty()) {
            filter.eq_text("parent_id", parent_id);
        }
        if options.public_only {
            filter.push("is_public = 1", std::iter::empty());
        }
        if let Some(creator_id) = options.creator_id.as_deref().filter(|id| !id.is_empty()) {
            filter.eq_text("creator_id", creator_id);
        }

        ctx.run(self.conn, || {
            query_page(
                self.conn,
                CATEGORY_SELECT_SQL,
                "categories",
                &filter,
                &order_sql,
                &options.list,
                parse_category_row,
            )
        })
    }

    fn update(&self, ctx: &RequestContext, category: &mut Category) -> DomainResult<()> {
        require_id("id", &category.id)?;
        category.validate()?;
        ctx.run(self.conn, || {
            let now = now_epoch_ms();
            let changed = self.conn.execute(
                "UPDATE categories
                 SET
                    name = ?1,
                    description = ?2,
                    color = ?3,
                    parent_id = ?4,
                    is_public = ?5,
                    updated_at = ?6,
                    version = version + 1
                 WHERE id = ?7 AND version = ?8 AND is_deleted = 0;",
                params![
                    category.name.trim(),
                    category.description,
                    category.color,
                    category.parent_id,
                    category.is_public,
                    now,
                    category.id,
                    category.version
                ],
            )?;
            if changed == 0 {
                return Err(resolve_write_miss(
                    self.conn,
                    "categories",
                    ENTITY,
                    &category.id,
                    category.version,
                    WriteKind::Update,
                ));
            }

            category.name = category.name.trim().to_string();
            category.version += 1;
            category.updated_at = now;
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
            soft_delete_row(self.conn, "categories", ENTITY, id, expected_version).map(|_| ())
        })
    }

    fn restore(&self, ctx: &RequestContext, id: &str, expected_version: i64) -> DomainResult<()> {
        require_id("id", id)?;
        ctx.run(self.conn, || {
            restore_row(self.conn, "categories", ENTITY, id, expected_version).map(|_| ())
        })
    }
}

pub(crate) fn parse_category_row(row: &Row<'_>) -> DomainResult<Category> {
    Ok(Category {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        color: row.get("color")?,
        parent_id: row.get("parent_id")?,
        is_public: row.get("is_public")?,
        creator_id: row.get("creator_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        version: row.get("version")?,
        is_deleted: row.get("is_deleted")?,
        deleted_at: row.get("deleted_at")?,
    })
}
