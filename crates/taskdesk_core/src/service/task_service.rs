//! Task use-case service.
//!
//! # Responsibility
//! - Validate task input and cross-entity references (assignee, categories,
//!   tags) before delegating persistence.
//! - Enforce the status state machine on every path that changes status.
//! - Append one audit entry per successful mutation.
//!
//! # Invariants
//! - Field-level mutations load the task first and fail fast with
//!   `VersionConflict` when the caller's version is stale; the repository's
//!   conditional write re-checks the same version.
//! - History is appended after the mutation commits. A failed append is
//!   logged and does not fail the mutation.
//! - `actor_id` is required for every mutation and is checked before any
//!   storage access.

use crate::context::RequestContext;
use crate::model::error::{DomainError, DomainResult, ResultExt};
use crate::model::history::{TaskHistory, TaskHistoryAction, TaskHistoryDetails};
use crate::model::task::{Task, TaskPriority, TaskStatus};
use crate::repo::category_repo::CategoryRepository;
use crate::repo::tag_repo::TagRepository;
use crate::repo::task_repo::{TaskListOptions, TaskRepository};
use crate::repo::user_repo::UserRepository;
use crate::repo::Page;
use crate::service::{log_failure, require_arg};
use log::{debug, info, warn};
use serde_json::Value;

/// Task service facade over repository implementations.
pub struct TaskService<T, U, C, G>
where
    T: TaskRepository,
    U: UserRepository,
    C: CategoryRepository,
    G: TagRepository,
{
    tasks: T,
    users: U,
    categories: C,
    tags: G,
}

impl<T, U, C, G> TaskService<T, U, C, G>
where
    T: TaskRepository,
    U: UserRepository,
    C: CategoryRepository,
    G: TagRepository,
{
    pub fn new(tasks: T, users: U, categories: C, tags: G) -> Self {
        Self {
            tasks,
            users,
            categories,
            tags,
        }
    }

    /// Creates a task, linking `task.categories` and `task.tags` by id.
    ///
    /// The assignee and every referenced category and tag must exist.
    pub fn create_task(&self, ctx: &RequestContext, task: Task, actor_id: &str) -> DomainResult<Task> {
        info!(
            "event=task_create module=service status=start request_id={} assignee_id={} actor_id={}",
            ctx.request_id(),
            task.assignee_id,
            actor_id
        );
        self.create_task_inner(ctx, task, actor_id)
            .map_err(|err| log_failure(ctx, "task_create", err))
    }

    fn create_task_inner(
        &self,
        ctx: &RequestContext,
        mut task: Task,
        actor_id: &str,
    ) -> DomainResult<Task> {
        require_arg("actor_id", actor_id)?;
        task.validate()?;
        task.assignee_id = task.assignee_id.trim().to_string();
        self.ensure_assignee_exists(ctx, &task.assignee_id)?;
        let category_ids = owned_ids(task.category_ids());
        let tag_ids = owned_ids(task.tag_ids());
        self.ensure_categories_exist(ctx, &category_ids)?;
        self.ensure_tags_exist(ctx, &tag_ids)?;

        self.tasks
            .create(ctx, &mut task)
            .context("failed to create task")?;

        let mut details = TaskHistoryDetails::default();
        for (field, value) in [
            ("title", Value::from(task.title.clone())),
            ("assignee_id", Value::from(task.assignee_id.clone())),
            ("status", Value::from(task.status.as_str())),
            ("priority", Value::from(task.priority.as_str())),
        ] {
            details.new_values.insert(field.to_string(), value);
        }
        if !category_ids.is_empty() {
            details = details.with_metadata("category_ids", category_ids);
        }
        if !tag_ids.is_empty() {
            details = details.with_metadata("tag_ids", tag_ids);
        }
        if let Some(entry) =
            self.record_history(ctx, &task.id, TaskHistoryAction::Created, actor_id, details)
        {
            task.history.insert(0, entry);
        }

        info!(
            "event=task_create module=service status=ok request_id={} task_id={} version={}",
            ctx.request_id(),
            task.id,
            task.version
        );
        Ok(task)
    }

    pub fn get_task_by_id(&self, ctx: &RequestContext, id: &str) -> DomainResult<Task> {
        debug!(
            "event=task_get module=service status=start request_id={} task_id={}",
            ctx.request_id(),
            id
        );
        require_arg("task_id", id)
            .and_then(|()| self.tasks.get_by_id(ctx, id).context("failed to get task"))
            .map_err(|err| log_failure(ctx, "task_get", err))
    }

    /// Applies a full update at `task.version`.
    ///
    /// Relations in `task.categories` / `task.tags` are ignored; use the
    /// dedicated relation operations to change them.
    pub fn update_task(&self, ctx: &RequestContext, task: Task, actor_id: &str) -> DomainResult<Task> {
        info!(
            "event=task_update module=service status=start request_id={} task_id={} version={} actor_id={}",
            ctx.request_id(),
            task.id,
            task.version,
            actor_id
        );
        self.update_task_inner(ctx, task, actor_id)
            .map_err(|err| log_failure(ctx, "task_update", err))
    }

    fn update_task_inner(&self, ctx: &RequestContext, task: Task, actor_id: &str) -> DomainResult<Task> {
        require_arg("actor_id", actor_id)?;
        require_arg("task_id", &task.id)?;
        task.validate()?;
        let existing = self.load_at_version(ctx, &task.id, task.version)?;
        self.apply_update(ctx, existing, task, actor_id)
    }

    pub fn delete_task(
        &self,
        ctx: &RequestContext,
        id: &str,
        version: i64,
        actor_id: &str,
    ) -> DomainResult<()> {
        info!(
            "event=task_delete module=service status=start request_id={} task_id={} version={} actor_id={}",
            ctx.request_id(),
            id,
            version,
            actor_id
        );
        self.delete_task_inner(ctx, id, version, actor_id)
            .map_err(|err| log_failure(ctx, "task_delete", err))
    }

    fn delete_task_inner(
        &self,
        ctx: &RequestContext,
        id: &str,
        version: i64,
        actor_id: &str,
    ) -> DomainResult<()> {
        require_arg("actor_id", actor_id)?;
        require_arg("task_id", id)?;
        self.tasks
            .soft_delete(ctx, id, version)
            .context("failed to delete task")?;

        let details = TaskHistoryDetails::default().with_metadata("version", version + 1);
        self.record_history(ctx, id, TaskHistoryAction::Deleted, actor_id, details);

        info!(
            "event=task_delete module=service status=ok request_id={} task_id={} version={}",
            ctx.request_id(),
            id,
            version + 1
        );
        Ok(())
    }

    /// Restores a deleted task at its deleted version and returns it.
    pub fn restore_task(
        &self,
        ctx: &RequestContext,
        id: &str,
        version: i64,
        actor_id: &str,
    ) -> DomainResult<Task> {
        info!(
            "event=task_restore module=service status=start request_id={} task_id={} version={} actor_id={}",
            ctx.request_id(),
            id,
            version,
            actor_id
        );
        self.restore_task_inner(ctx, id, version, actor_id)
            .map_err(|err| log_failure(ctx, "task_restore", err))
    }

    fn restore_task_inner(
        &self,
        ctx: &RequestContext,
        id: &str,
        version: i64,
        actor_id: &str,
    ) -> DomainResult<Task> {
        require_arg("actor_id", actor_id)?;
        require_arg("task_id", id)?;
        self.tasks
            .restore(ctx, id, version)
            .context("failed to restore task")?;

        let details = TaskHistoryDetails::default().with_metadata("version", version + 1);
        self.record_history(ctx, id, TaskHistoryAction::Restored, actor_id, details);

        let task = self
            .tasks
            .get_by_id(ctx, id)
            .context("failed to get restored task")?;
        info!(
            "event=task_restore module=service status=ok request_id={} task_id={} version={}",
            ctx.request_id(),
            task.id,
            task.version
        );
        Ok(task)
    }

    pub fn list_tasks(
        &self,
        ctx: &RequestContext,
        options: &TaskListOptions,
    ) -> DomainResult<Page<Task>> {
        debug!(
            "event=task_list module=service status=start request_id={} page={} page_size={}",
            ctx.request_id(),
            options.list.page,
            options.list.page_size
        );
        let page = self
            .tasks
            .list(ctx, options)
            .context("failed to list tasks")
            .map_err(|err| log_failure(ctx, "task_list", err))?;
        debug!(
            "event=task_list module=service status=ok request_id={} count={} total={}",
            ctx.request_id(),
            page.items.len(),
            page.total
        );
        Ok(page)
    }

    /// Reassigns a task; recorded as `ASSIGNED`.
    pub fn assign_task(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        assignee_id: &str,
        version: i64,
        actor_id: &str,
    ) -> DomainResult<Task> {
        info!(
            "event=task_assign module=service status=start request_id={} task_id={} assignee_id={} version={} actor_id={}",
            ctx.request_id(),
            task_id,
            assignee_id,
            version,
            actor_id
        );
        self.change_field(ctx, task_id, version, actor_id, |task| {
            task.assignee_id = assignee_id.trim().to_string();
            Ok(())
        })
        .map_err(|err| log_failure(ctx, "task_assign", err))
    }

    /// Moves a task along the status state machine.
    pub fn change_task_status(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        status: TaskStatus,
        version: i64,
        actor_id: &str,
    ) -> DomainResult<Task> {
        info!(
            "event=task_change_status module=service status=start request_id={} task_id={} new_status={} version={} actor_id={}",
            ctx.request_id(),
            task_id,
            status,
            version,
            actor_id
        );
        self.change_field(ctx, task_id, version, actor_id, |task| {
            task.status.ensure_transition(status)?;
            task.status = status;
            Ok(())
        })
        .map_err(|err| log_failure(ctx, "task_change_status", err))
    }

    pub fn change_task_priority(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        priority: TaskPriority,
        version: i64,
        actor_id: &str,
    ) -> DomainResult<Task> {
        info!(
            "event=task_change_priority module=service status=start request_id={} task_id={} priority={} version={} actor_id={}",
            ctx.request_id(),
            task_id,
            priority,
            version,
            actor_id
        );
        self.change_field(ctx, task_id, version, actor_id, |task| {
            task.priority = priority;
            Ok(())
        })
        .map_err(|err| log_failure(ctx, "task_change_priority", err))
    }

    pub fn add_task_categories(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        category_ids: &[String],
        version: i64,
        actor_id: &str,
    ) -> DomainResult<Task> {
        info!(
            "event=task_add_categories module=service status=start request_id={} task_id={} count={} version={} actor_id={}",
            ctx.request_id(),
            task_id,
            category_ids.len(),
            version,
            actor_id
        );
        self.change_relation(ctx, task_id, category_ids, version, actor_id, Relation::AddCategories)
            .map_err(|err| log_failure(ctx, "task_add_categories", err))
    }

    pub fn remove_task_categories(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        category_ids: &[String],
        version: i64,
        actor_id: &str,
    ) -> DomainResult<Task> {
        info!(
            "event=task_remove_categories module=service status=start request_id={} task_id={} count={} version={} actor_id={}",
            ctx.request_id(),
            task_id,
            category_ids.len(),
            version,
            actor_id
        );
        self.change_relation(
            ctx,
            task_id,
            category_ids,
            version,
            actor_id,
            Relation::RemoveCategories,
        )
        .map_err(|err| log_failure(ctx, "task_remove_categories", err))
    }

    pub fn add_task_tags(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        tag_ids: &[String],
        version: i64,
        actor_id: &str,
    ) -> DomainResult<Task> {
        info!(
            "event=task_add_tags module=service status=start request_id={} task_id={} count={} version={} actor_id={}",
            ctx.request_id(),
            task_id,
            tag_ids.len(),
            version,
            actor_id
        );
        self.change_relation(ctx, task_id, tag_ids, version, actor_id, Relation::AddTags)
            .map_err(|err| log_failure(ctx, "task_add_tags", err))
    }

    pub fn remove_task_tags(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        tag_ids: &[String],
        version: i64,
        actor_id: &str,
    ) -> DomainResult<Task> {
        info!(
            "event=task_remove_tags module=service status=start request_id={} task_id={} count={} version={} actor_id={}",
            ctx.request_id(),
            task_id,
            tag_ids.len(),
            version,
            actor_id
        );
        self.change_relation(ctx, task_id, tag_ids, version, actor_id, Relation::RemoveTags)
            .map_err(|err| log_failure(ctx, "task_remove_tags", err))
    }

    /// Audit entries for a live task, most recent first.
    pub fn get_task_history(
        &self,
        ctx: &RequestContext,
        task_id: &str,
    ) -> DomainResult<Vec<TaskHistory>> {
        debug!(
            "event=task_history module=service status=start request_id={} task_id={}",
            ctx.request_id(),
            task_id
        );
        require_arg("task_id", task_id)
            .and_then(|()| {
                self.tasks
                    .get_history(ctx, task_id)
                    .context("failed to get task history")
            })
            .map_err(|err| log_failure(ctx, "task_history", err))
    }

    /// Load, version check, single-field edit, update.
    fn change_field(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        version: i64,
        actor_id: &str,
        edit: impl FnOnce(&mut Task) -> DomainResult<()>,
    ) -> DomainResult<Task> {
        require_arg("actor_id", actor_id)?;
        require_arg("task_id", task_id)?;
        let existing = self.load_at_version(ctx, task_id, version)?;
        let mut task = existing.clone();
        edit(&mut task)?;
        task.validate()?;
        self.apply_update(ctx, existing, task, actor_id)
    }

    fn apply_update(
        &self,
        ctx: &RequestContext,
        existing: Task,
        mut task: Task,
        actor_id: &str,
    ) -> DomainResult<Task> {
        if task.status != existing.status {
            existing.status.ensure_transition(task.status)?;
        }
        task.assignee_id = task.assignee_id.trim().to_string();
        if task.assignee_id != existing.assignee_id {
            self.ensure_assignee_exists(ctx, &task.assignee_id)?;
        }

        let mut details = TaskHistoryDetails::default();
        details.record("title", &existing.title, &task.title.trim().to_string());
        details.record("description", &existing.description, &task.description);
        details.record("assignee_id", &existing.assignee_id, &task.assignee_id);
        details.record("status", &existing.status, &task.status);
        details.record("priority", &existing.priority, &task.priority);
        details.record("due_date", &existing.due_date, &task.due_date);
        let action = update_action(&details, task.status);

        self.tasks
            .update(ctx, &mut task)
            .context("failed to update task")?;

        task.categories = existing.categories;
        task.tags = existing.tags;
        task.history = existing.history;
        if let Some(entry) = self.record_history(ctx, &task.id, action, actor_id, details) {
            task.history.insert(0, entry);
        }

        info!(
            "event=task_update module=service status=ok request_id={} task_id={} version={} action={}",
            ctx.request_id(),
            task.id,
            task.version,
            action
        );
        Ok(task)
    }

    fn change_relation(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        ids: &[String],
        version: i64,
        actor_id: &str,
        relation: Relation,
    ) -> DomainResult<Task> {
        require_arg("actor_id", actor_id)?;
        require_arg("task_id", task_id)?;
        self.load_at_version(ctx, task_id, version)?;

        let new_version = match relation {
            Relation::AddCategories => {
                self.ensure_categories_exist(ctx, ids)?;
                self.tasks.add_categories(ctx, task_id, ids, version)
            }
            Relation::RemoveCategories => self.tasks.remove_categories(ctx, task_id, ids, version),
            Relation::AddTags => {
                self.ensure_tags_exist(ctx, ids)?;
                self.tasks.add_tags(ctx, task_id, ids, version)
            }
            Relation::RemoveTags => self.tasks.remove_tags(ctx, task_id, ids, version),
        }
        .context(relation.failure_message())?;

        if new_version != version {
            let mut details = TaskHistoryDetails::default()
                .with_metadata(relation.metadata_key(), ids.to_vec());
            details.changes.push(relation.field().to_string());
            self.record_history(ctx, task_id, TaskHistoryAction::Updated, actor_id, details);
        }

        let task = self
            .tasks
            .get_by_id(ctx, task_id)
            .context("failed to reload task")?;
        info!(
            "event=task_relation module=service status=ok request_id={} task_id={} field={} version={}",
            ctx.request_id(),
            task.id,
            relation.field(),
            task.version
        );
        Ok(task)
    }

    fn load_at_version(&self, ctx: &RequestContext, task_id: &str, version: i64) -> DomainResult<Task> {
        let task = self
            .tasks
            .get_by_id(ctx, task_id)
            .context("failed to get task")?;
        if task.version != version {
            return Err(DomainError::version_conflict("task", version, task.version));
        }
        Ok(task)
    }

    fn ensure_assignee_exists(&self, ctx: &RequestContext, assignee_id: &str) -> DomainResult<()> {
        match self.users.get_by_id(ctx, assignee_id) {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Err(DomainError::invalid_field(
                "assignee_id",
                "assignee does not exist",
            )),
            Err(err) => Err(err.with_context("failed to validate assignee")),
        }
    }

    fn ensure_categories_exist(&self, ctx: &RequestContext, ids: &[String]) -> DomainResult<()> {
        for id in ids {
            match self.categories.get_by_id(ctx, id.trim()) {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {
                    return Err(DomainError::invalid_field(
                        "category_ids",
                        format!("category {id} does not exist"),
                    ))
                }
                Err(err) => return Err(err.with_context(format!("failed to validate category {id}"))),
            }
        }
        Ok(())
    }

    fn ensure_tags_exist(&self, ctx: &RequestContext, ids: &[String]) -> DomainResult<()> {
        for id in ids {
            match self.tags.get_by_id(ctx, id.trim()) {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {
                    return Err(DomainError::invalid_field(
                        "tag_ids",
                        format!("tag {id} does not exist"),
                    ))
                }
                Err(err) => return Err(err.with_context(format!("failed to validate tag {id}"))),
            }
        }
        Ok(())
    }

    /// Appends one audit entry; failures are logged and swallowed.
    fn record_history(
        &self,
        ctx: &RequestContext,
        task_id: &str,
        action: TaskHistoryAction,
        actor_id: &str,
        details: TaskHistoryDetails,
    ) -> Option<TaskHistory> {
        let mut entry = TaskHistory::new(task_id, action, actor_id, details);
        match self.tasks.append_history(ctx, &mut entry) {
            Ok(()) => Some(entry),
            Err(err) => {
                warn!(
                    "event=task_history_append module=service status=error request_id={} task_id={} action={} error_kind={}",
                    ctx.request_id(),
                    task_id,
                    action,
                    err.kind().as_str()
                );
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    AddCategories,
    RemoveCategories,
    AddTags,
    RemoveTags,
}

impl Relation {
    fn field(self) -> &'static str {
        match self {
            Self::AddCategories | Self::RemoveCategories => "categories",
            Self::AddTags | Self::RemoveTags => "tags",
        }
    }

    fn metadata_key(self) -> &'static str {
        match self {
            Self::AddCategories | Self::AddTags => "added",
            Self::RemoveCategories | Self::RemoveTags => "removed",
        }
    }

    fn failure_message(self) -> &'static str {
        match self {
            Self::AddCategories => "failed to add categories",
            Self::RemoveCategories => "failed to remove categories",
            Self::AddTags => "failed to add tags",
            Self::RemoveTags => "failed to remove tags",
        }
    }
}

/// History action for a scalar update.
fn update_action(details: &TaskHistoryDetails, new_status: TaskStatus) -> TaskHistoryAction {
    if details.changed("status") && new_status == TaskStatus::Completed {
        TaskHistoryAction::Completed
    } else if details.changes.len() == 1 && details.changed("assignee_id") {
        TaskHistoryAction::Assigned
    } else {
        TaskHistoryAction::Updated
    }
}

fn owned_ids(ids: Vec<&str>) -> Vec<String> {
    ids.into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::update_action;
    use crate::model::history::{TaskHistoryAction, TaskHistoryDetails};
    use crate::model::task::TaskStatus;

    #[test]
    fn completion_wins_over_other_changes() {
        let mut details = TaskHistoryDetails::default();
        details.record("status", &TaskStatus::Open, &TaskStatus::Completed);
        details.record("assignee_id", &"a", &"b");
        assert_eq!(
            update_action(&details, TaskStatus::Completed),
            TaskHistoryAction::Completed
        );
    }

    #[test]
    fn assignee_only_change_is_assigned() {
        let mut details = TaskHistoryDetails::default();
        details.record("assignee_id", &"a", &"b");
        assert_eq!(
            update_action(&details, TaskStatus::Open),
            TaskHistoryAction::Assigned
        );

        details.record("priority", &"LOW", &"HIGH");
        assert_eq!(
            update_action(&details, TaskStatus::Open),
            TaskHistoryAction::Updated
        );
    }
}
