//! Tag repository contract and SQLite implementation.
//!
//! Names are stored exactly as given; normalization belongs to the service.

use crate::context::RequestContext;
use crate::model::error::{DomainError, DomainResult};
use crate::model::tag::Tag;
use crate::repo::{
    assign_id, ensure_repo_ready, now_epoch_ms, order_clause, query_page, require_id,
    resolve_write_miss, restore_row, soft_delete_row, ListOptions, Page, QueryFilter, WriteKind,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

pub(crate) const TAG_SELECT_SQL: &str = "SELECT
    id,
    name,
    color,
    creator_id,
    created_at,
    updated_at,
    version,
    is_deleted,
    deleted_at
FROM tags";

const TAG_SORTABLE: &[&str] = &["name", "created_at", "updated_at"];

const ENTITY: &str = "tag";

/// List options for tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagListOptions {
    pub list: ListOptions,
    pub creator_id: Option<String>,
}

/// Persistence contract for tags.
pub trait TagRepository {
    fn create(&self, ctx: &RequestContext, tag: &mut Tag) -> DomainResult<()>;
    fn get_by_id(&self, ctx: &RequestContext, id: &str) -> DomainResult<Tag>;
    /// Exact-name lookup among live tags.
    fn get_by_name(&self, ctx: &RequestContext, name: &str) -> DomainResult<Tag>;
    fn list(&self, ctx: &RequestContext, options: &TagListOptions) -> DomainResult<Page<Tag>>;
    fn update(&self, ctx: &RequestContext, tag: &mut Tag) -> DomainResult<()>;
    fn soft_delete(&self, ctx: &RequestContext, id: &str, expected_version: i64)
        -> DomainResult<()>;
    fn restore(&self, ctx: &RequestContext, id: &str, expected_version: i64) -> DomainResult<()>;
}

/// SQLite-backed tag repository.
#[derive(Debug, Clone, Copy)]
pub struct SqliteTagRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTagRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> DomainResult<Self> {
        ensure_repo_ready(conn)?;
        Ok(Self { conn })
    }

    fn find_one(&self, condition: &str, value: &str) -> DomainResult<Option<Tag>> {
        let tag = self
            .conn
            .query_row(
                &format!("{TAG_SELECT_SQL} WHERE {condition} AND is_deleted = 0;"),
                [value],
                |row| Ok(parse_tag_row(row)),
            )
            .optional()?
            .transpose()?;
        Ok(tag)
    }
}

impl TagRepository for SqliteTagRepository<'_> {
    fn create(&self, ctx: &RequestContext, tag: &mut Tag) -> DomainResult<()> {
        tag.validate()?;
        ctx.run(self.conn, || {
            let mut id = tag.id.clone();
            assign_id(&mut id);
            let now = now_epoch_ms();
            self.conn.execute(
                "INSERT INTO tags (
                    id, name, color, creator_id, created_at, updated_at, version, is_deleted, deleted_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1, 0, NULL);",
                params![id, tag.name, tag.color, tag.creator_id, now],
            )?;

            tag.id = id;
            tag.created_at = now;
            tag.updated_at = now;
            tag.version = 1;
            tag.is_deleted = false;
            tag.deleted_at = None;
            Ok(())
        })
    }

    fn get_by_id(&self, ctx: &RequestContext, id: &str) -> DomainResult<Tag> {
        require_id("id", id)?;
        ctx.run(self.conn, || {
            self.find_one("id = ?1", id)?
                .ok_or_else(|| DomainError::not_found(ENTITY, id))
        })
    }

    fn get_by_name(&self, ctx: &RequestContext, name: &str) -> DomainResult<Tag> {
        if name.trim().is_empty() {
            return Err(DomainError::invalid_field("name", "tag name is required"));
        }
        ctx.run(self.conn, || {
            self.find_one("name = ?1", name)?
                .ok_or_else(|| DomainError::not_found(ENTITY, name))
        })
    }

    fn list(&self, ctx: &RequestContext, options: &TagListOptions) -> DomainResult<Page<Tag>> {
        let order_sql = order_clause(&options.list, TAG_SORTABLE)?;
        let mut filter = QueryFilter::for_options(&options.list);
        filter.search(&options.list, &["name"]);
        if let Some(creator_id) = options.creator_id.as_deref().filter(|id| !id.is_empty()) {
            filter.eq_text("creator_id", creator_id);
        }

        ctx.run(self.conn, || {
            query_page(
                self.conn,
                TAG_SELECT_SQL,
                "tags",
                &filter,
                &order_sql,
                &options.list,
                parse_tag_row,
            )
        })
    }

    fn update(&self, ctx: &RequestContext, tag: &mut Tag) -> DomainResult<()> {
        require_id("id", &tag.id)?;
        tag.validate()?;
        ctx.run(self.conn, || {
            let now = now_epoch_ms();
            let changed = self.conn.execute(
                "UPDATE tags
                 SET name = ?1, color = ?2, updated_at = ?3, version = version + 1
                 WHERE id = ?4 AND version = ?5 AND is_deleted = 0;",
                params![tag.name, tag.color, now, tag.id, tag.version],
            )?;
            if changed == 0 {
                return Err(resolve_write_miss(
                    self.conn,
                    "tags",
                    ENTITY,
                    &tag.id,
                    tag.version,
                    WriteKind::Update,
                ));
            }

            tag.version += 1;
            tag.updated_at = now;
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
            soft_delete_row(self.conn, "tags", ENTITY, id, expected_version).map(|_| ())
        })
    }

    fn restore(&self, ctx: &RequestContext, id: &str, expected_version: i64) -> DomainResult<()> {
        require_id("id", id)?;
        ctx.run(self.conn, || {
            restore_row(self.conn, "tags", ENTITY, id, expected_version).map(|_| ())
        })
    }
}

pub(crate) fn parse_tag_row(row: &Row<'_>) -> DomainResult<Tag> {
    Ok(Tag {
        id: row.get("id")?,
        name: row.get("name")?,
        color: row.get("color")?,
        creator_id: row.get("creator_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        version: row.get("version")?,
        is_deleted: row.get("is_deleted")?,
        deleted_at: row.get("deleted_at")?,
    })
}
