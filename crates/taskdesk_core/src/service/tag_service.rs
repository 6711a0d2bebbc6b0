//! Tag use-case service.
//!
//! # Responsibility
//! - Validate raw tag names, normalize them and pre-check uniqueness.
//! - Refuse to delete tags still linked to live tasks.
//! - Resolve free-form names to tags with `find_or_create_tag`.
//!
//! # Invariants
//! - Names reaching the repository are always normalized, so
//!   `"  IMPORTANT  "` and `"important"` collide.

use crate::context::RequestContext;
use crate::model::error::{DomainError, DomainResult, ResultExt};
use crate::model::tag::{
    normalize_tag_name, validate_tag_name, Tag, DEFAULT_TAG_COLORS, SYSTEM_CREATOR_ID,
};
use crate::repo::tag_repo::{TagListOptions, TagRepository};
use crate::repo::task_repo::{TaskListOptions, TaskRepository};
use crate::repo::Page;
use crate::service::{log_failure, require_arg};
use log::{debug, info};

pub struct TagService<G: TagRepository, T: TaskRepository> {
    tags: G,
    tasks: T,
}

impl<G: TagRepository, T: TaskRepository> TagService<G, T> {
    pub fn new(tags: G, tasks: T) -> Self {
        Self { tags, tasks }
    }

    /// Creates a tag owned by `acting_user_id`; an empty color takes the
    /// first palette entry.
    pub fn create_tag(&self, ctx: &RequestContext, tag: Tag, acting_user_id: &str) -> DomainResult<Tag> {
        info!(
            "event=tag_create module=service status=start request_id={} actor_id={}",
            ctx.request_id(),
            acting_user_id
        );
        self.create_tag_inner(ctx, tag, acting_user_id)
            .map_err(|err| log_failure(ctx, "tag_create", err))
    }

    fn create_tag_inner(
        &self,
        ctx: &RequestContext,
        mut tag: Tag,
        acting_user_id: &str,
    ) -> DomainResult<Tag> {
        require_arg("acting_user_id", acting_user_id)?;
        validate_tag_name(&tag.name)?;
        tag.name = normalize_tag_name(&tag.name);
        tag.creator_id = acting_user_id.trim().to_string();
        if tag.color.trim().is_empty() {
            tag.color = DEFAULT_TAG_COLORS[0].to_string();
        }
        tag.validate()?;
        self.ensure_name_available(ctx, &tag.name, None)?;

        self.tags
            .create(ctx, &mut tag)
            .context("failed to create tag")?;

        info!(
            "event=tag_create module=service status=ok request_id={} tag_id={} version={}",
            ctx.request_id(),
            tag.id,
            tag.version
        );
        Ok(tag)
    }

    pub fn get_tag_by_id(&self, ctx: &RequestContext, id: &str) -> DomainResult<Tag> {
        debug!(
            "event=tag_get module=service status=start request_id={} tag_id={}",
            ctx.request_id(),
            id
        );
        require_arg("tag_id", id)
            .and_then(|()| self.tags.get_by_id(ctx, id).context("failed to get tag"))
            .map_err(|err| log_failure(ctx, "tag_get", err))
    }

    /// Applies a full update at `tag.version`. The creator never changes.
    pub fn update_tag(&self, ctx: &RequestContext, tag: Tag) -> DomainResult<Tag> {
        info!(
            "event=tag_update module=service status=start request_id={} tag_id={} version={}",
            ctx.request_id(),
            tag.id,
            tag.version
        );
        self.update_tag_inner(ctx, tag)
            .map_err(|err| log_failure(ctx, "tag_update", err))
    }

    fn update_tag_inner(&self, ctx: &RequestContext, mut tag: Tag) -> DomainResult<Tag> {
        require_arg("tag_id", &tag.id)?;
        validate_tag_name(&tag.name)?;
        tag.name = normalize_tag_name(&tag.name);

        let existing = self
            .tags
            .get_by_id(ctx, &tag.id)
            .context("failed to get existing tag")?;
        if existing.version != tag.version {
            return Err(DomainError::version_conflict("tag", tag.version, existing.version));
        }
        tag.creator_id = existing.creator_id.clone();
        if tag.color.trim().is_empty() {
            tag.color = existing.color.clone();
        }
        tag.validate()?;
        if tag.name != existing.name {
            self.ensure_name_available(ctx, &tag.name, Some(&tag.id))?;
        }

        self.tags
            .update(ctx, &mut tag)
            .context("failed to update tag")?;

        info!(
            "event=tag_update module=service status=ok request_id={} tag_id={} version={}",
            ctx.request_id(),
            tag.id,
            tag.version
        );
        Ok(tag)
    }

    /// Soft-deletes an unused tag.
    pub fn delete_tag(&self, ctx: &RequestContext, id: &str, version: i64) -> DomainResult<()> {
        info!(
            "event=tag_delete module=service status=start request_id={} tag_id={} version={}",
            ctx.request_id(),
            id,
            version
        );
        let result = require_arg("tag_id", id).and_then(|()| {
            self.ensure_unused(ctx, id)?;
            self.tags
                .soft_delete(ctx, id, version)
                .context("failed to delete tag")
        });
        result.map_err(|err| log_failure(ctx, "tag_delete", err))?;

        info!(
            "event=tag_delete module=service status=ok request_id={} tag_id={} version={}",
            ctx.request_id(),
            id,
            version + 1
        );
        Ok(())
    }

    pub fn restore_tag(&self, ctx: &RequestContext, id: &str, version: i64) -> DomainResult<Tag> {
        info!(
            "event=tag_restore module=service status=start request_id={} tag_id={} version={}",
            ctx.request_id(),
            id,
            version
        );
        require_arg("tag_id", id)
            .and_then(|()| {
                self.tags
                    .restore(ctx, id, version)
                    .context("failed to restore tag")?;
                self.tags
                    .get_by_id(ctx, id)
                    .context("failed to get restored tag")
            })
            .map_err(|err| log_failure(ctx, "tag_restore", err))
    }

    pub fn list_tags(&self, ctx: &RequestContext, options: &TagListOptions) -> DomainResult<Page<Tag>> {
        debug!(
            "event=tag_list module=service status=start request_id={} page={} page_size={}",
            ctx.request_id(),
            options.list.page,
            options.list.page_size
        );
        self.tags
            .list(ctx, options)
            .context("failed to list tags")
            .map_err(|err| log_failure(ctx, "tag_list", err))
    }

    /// Fails with `BusinessRule` while any live task links the tag.
    pub fn validate_tag_usage(&self, ctx: &RequestContext, id: &str) -> DomainResult<()> {
        require_arg("tag_id", id)
            .and_then(|()| self.ensure_unused(ctx, id))
            .map_err(|err| log_failure(ctx, "tag_usage", err))
    }

    /// Number of live tasks linked to the tag.
    pub fn get_tag_task_count(&self, ctx: &RequestContext, id: &str) -> DomainResult<i64> {
        require_arg("tag_id", id)
            .and_then(|()| self.task_count(ctx, id))
            .map_err(|err| log_failure(ctx, "tag_task_count", err))
    }

    /// Returns the live tag whose normalized name matches `name`, creating
    /// it under the system creator when none exists.
    pub fn find_or_create_tag(&self, ctx: &RequestContext, name: &str) -> DomainResult<Tag> {
        debug!(
            "event=tag_find_or_create module=service status=start request_id={}",
            ctx.request_id()
        );
        self.find_or_create_tag_inner(ctx, name)
            .map_err(|err| log_failure(ctx, "tag_find_or_create", err))
    }

    fn find_or_create_tag_inner(&self, ctx: &RequestContext, name: &str) -> DomainResult<Tag> {
        let normalized = normalize_tag_name(name);
        validate_tag_name(&normalized)?;
        match self.tags.get_by_name(ctx, &normalized) {
            Ok(existing) => {
                debug!(
                    "event=tag_find_or_create module=service status=found request_id={} tag_id={}",
                    ctx.request_id(),
                    existing.id
                );
                return Ok(existing);
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.with_context("failed to search for existing tag")),
        }

        let mut tag = Tag::new(normalized, SYSTEM_CREATOR_ID);
        tag.color = DEFAULT_TAG_COLORS[0].to_string();
        self.create_tag_inner(ctx, tag, SYSTEM_CREATOR_ID)
    }

    fn task_count(&self, ctx: &RequestContext, id: &str) -> DomainResult<i64> {
        self.tasks
            .count(ctx, &TaskListOptions::with_tag(id))
            .context("failed to count tasks for tag")
    }

    fn ensure_unused(&self, ctx: &RequestContext, id: &str) -> DomainResult<()> {
        let count = self.task_count(ctx, id)?;
        if count > 0 {
            return Err(DomainError::business_rule(format!(
                "cannot delete tag: it is used by {count} tasks"
            )));
        }
        Ok(())
    }

    fn ensure_name_available(
        &self,
        ctx: &RequestContext,
        name: &str,
        owner_id: Option<&str>,
    ) -> DomainResult<()> {
        match self.tags.get_by_name(ctx, name) {
            Ok(existing) if Some(existing.id.as_str()) != owner_id => {
                Err(DomainError::conflict("tag with this name already exists"))
            }
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.with_context("failed to check for existing tag")),
        }
    }
}
