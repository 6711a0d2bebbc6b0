//! Category use-case service.
//!
//! # Responsibility
//! - Name uniqueness pre-checks and one-level parent nesting.
//! - Refuse to delete categories still linked to live tasks.

use crate::context::RequestContext;
use crate::model::category::Category;
use crate::model::error::{DomainError, DomainResult, ResultExt};
use crate::repo::category_repo::{CategoryListOptions, CategoryRepository};
use crate::repo::task_repo::{TaskListOptions, TaskRepository};
use crate::repo::{ListOptions, Page};
use crate::service::{log_failure, require_arg};
use log::{debug, info};

pub struct CategoryService<C: CategoryRepository, T: TaskRepository> {
    categories: C,
    tasks: T,
}

impl<C: CategoryRepository, T: TaskRepository> CategoryService<C, T> {
    pub fn new(categories: C, tasks: T) -> Self {
        Self { categories, tasks }
    }

    /// Creates a category owned by `acting_user_id`.
    pub fn create_category(
        &self,
        ctx: &RequestContext,
        category: Category,
        acting_user_id: &str,
    ) -> DomainResult<Category> {
        info!(
            "event=category_create module=service status=start request_id={} actor_id={}",
            ctx.request_id(),
            acting_user_id
        );
        self.create_category_inner(ctx, category, acting_user_id)
            .map_err(|err| log_failure(ctx, "category_create", err))
    }

    fn create_category_inner(
        &self,
        ctx: &RequestContext,
        mut category: Category,
        acting_user_id: &str,
    ) -> DomainResult<Category> {
        require_arg("acting_user_id", acting_user_id)?;
        category.creator_id = acting_user_id.trim().to_string();
        category.validate()?;
        if let Some(parent_id) = category.parent_id.as_deref() {
            self.ensure_valid_parent(ctx, None, parent_id)?;
        }
        self.ensure_name_available(ctx, &category.name, None)?;

        self.categories
            .create(ctx, &mut category)
            .context("failed to create category")?;

        info!(
            "event=category_create module=service status=ok request_id={} category_id={} version={}",
            ctx.request_id(),
            category.id,
            category.version
        );
        Ok(category)
    }

    pub fn get_category_by_id(&self, ctx: &RequestContext, id: &str) -> DomainResult<Category> {
        debug!(
            "event=category_get module=service status=start request_id={} category_id={}",
            ctx.request_id(),
            id
        );
        require_arg("category_id", id)
            .and_then(|()| {
                self.categories
                    .get_by_id(ctx, id)
                    .context("failed to get category")
            })
            .map_err(|err| log_failure(ctx, "category_get", err))
    }

    /// Applies a full update at `category.version`. The creator never changes.
    pub fn update_category(&self, ctx: &RequestContext, category: Category) -> DomainResult<Category> {
        info!(
            "event=category_update module=service status=start request_id={} category_id={} version={}",
            ctx.request_id(),
            category.id,
            category.version
        );
        self.update_category_inner(ctx, category)
            .map_err(|err| log_failure(ctx, "category_update", err))
    }

    fn update_category_inner(
        &self,
        ctx: &RequestContext,
        mut category: Category,
    ) -> DomainResult<Category> {
        require_arg("category_id", &category.id)?;
        let existing = self
            .categories
            .get_by_id(ctx, &category.id)
            .context("failed to get existing category")?;
        if existing.version != category.version {
            return Err(DomainError::version_conflict(
                "category",
                category.version,
                existing.version,
            ));
        }
        category.creator_id = existing.creator_id.clone();
        category.validate()?;

        if category.name.trim() != existing.name {
            self.ensure_name_available(ctx, &category.name, Some(&category.id))?;
        }
        if let Some(parent_id) = category.parent_id.as_deref() {
            if existing.parent_id.as_deref() != Some(parent_id) {
                self.ensure_valid_parent(ctx, Some(&category.id), parent_id)?;
            }
        }

        self.categories
            .update(ctx, &mut category)
            .context("failed to update category")?;

        info!(
            "event=category_update module=service status=ok request_id={} category_id={} version={}",
            ctx.request_id(),
            category.id,
            category.version
        );
        Ok(category)
    }

    /// Soft-deletes an unused category.
    pub fn delete_category(&self, ctx: &RequestContext, id: &str, version: i64) -> DomainResult<()> {
        info!(
            "event=category_delete module=service status=start request_id={} category_id={} version={}",
            ctx.request_id(),
            id,
            version
        );
        self.delete_category_inner(ctx, id, version)
            .map_err(|err| log_failure(ctx, "category_delete", err))
    }

    fn delete_category_inner(&self, ctx: &RequestContext, id: &str, version: i64) -> DomainResult<()> {
        require_arg("category_id", id)?;
        self.ensure_unused(ctx, id)?;
        self.categories
            .soft_delete(ctx, id, version)
            .context("failed to delete category")?;

        info!(
            "event=category_delete module=service status=ok request_id={} category_id={} version={}",
            ctx.request_id(),
            id,
            version + 1
        );
        Ok(())
    }

    pub fn restore_category(
        &self,
        ctx: &RequestContext,
        id: &str,
        version: i64,
    ) -> DomainResult<Category> {
        info!(
            "event=category_restore module=service status=start request_id={} category_id={} version={}",
            ctx.request_id(),
            id,
            version
        );
        require_arg("category_id", id)
            .and_then(|()| {
                self.categories
                    .restore(ctx, id, version)
                    .context("failed to restore category")?;
                self.categories
                    .get_by_id(ctx, id)
                    .context("failed to get restored category")
            })
            .map_err(|err| log_failure(ctx, "category_restore", err))
    }

    pub fn list_categories(
        &self,
        ctx: &RequestContext,
        options: &CategoryListOptions,
    ) -> DomainResult<Page<Category>> {
        debug!(
            "event=category_list module=service status=start request_id={} page={} page_size={}",
            ctx.request_id(),
            options.list.page,
            options.list.page_size
        );
        self.categories
            .list(ctx, options)
            .context("failed to list categories")
            .map_err(|err| log_failure(ctx, "category_list", err))
    }

    /// Fails with `BusinessRule` while any live task links the category.
    pub fn validate_category_usage(&self, ctx: &RequestContext, id: &str) -> DomainResult<()> {
        require_arg("category_id", id)
            .and_then(|()| self.ensure_unused(ctx, id))
            .map_err(|err| log_failure(ctx, "category_usage", err))
    }

    /// Number of live tasks linked to the category.
    pub fn get_category_task_count(&self, ctx: &RequestContext, id: &str) -> DomainResult<i64> {
        require_arg("category_id", id)
            .and_then(|()| self.task_count(ctx, id))
            .map_err(|err| log_failure(ctx, "category_task_count", err))
    }

    fn task_count(&self, ctx: &RequestContext, id: &str) -> DomainResult<i64> {
        self.tasks
            .count(ctx, &TaskListOptions::with_category(id))
            .context("failed to count tasks for category")
    }

    fn ensure_unused(&self, ctx: &RequestContext, id: &str) -> DomainResult<()> {
        let count = self.task_count(ctx, id)?;
        if count > 0 {
            return Err(DomainError::business_rule(format!(
                "cannot delete category: it is used by {count} tasks"
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
        match self.categories.get_by_name(ctx, name) {
            Ok(existing) if Some(existing.id.as_str()) != owner_id => {
                Err(DomainError::conflict("category name already in use"))
            }
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.with_context("failed to check for existing category")),
        }
    }

    /// Parent must exist, differ from the category and be top-level; a
    /// category that already has children cannot gain a parent.
    fn ensure_valid_parent(
        &self,
        ctx: &RequestContext,
        category_id: Option<&str>,
        parent_id: &str,
    ) -> DomainResult<()> {
        if category_id == Some(parent_id) {
            return Err(DomainError::invalid_field(
                "parent_id",
                "category cannot be its own parent",
            ));
        }
        let parent = match self.categories.get_by_id(ctx, parent_id) {
            Ok(parent) => parent,
            Err(err) if err.is_not_found() => {
                return Err(DomainError::invalid_field(
                    "parent_id",
                    "parent category does not exist",
                ))
            }
            Err(err) => return Err(err.with_context("failed to get parent category")),
        };
        if !parent.is_top_level() {
            return Err(DomainError::business_rule(
                "categories can only be nested one level deep",
            ));
        }

        if let Some(category_id) = category_id {
            let children = self
                .categories
                .list(
                    ctx,
                    &CategoryListOptions {
                        list: ListOptions::page(0, 1),
                        parent_id: Some(category_id.to_string()),
                        ..CategoryListOptions::default()
                    },
                )
                .context("failed to check child categories")?;
            if children.total > 0 {
                return Err(DomainError::business_rule(
                    "categories can only be nested one level deep",
                ));
            }
        }
        Ok(())
    }
}
