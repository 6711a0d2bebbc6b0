//! User use-case service.
//!
//! # Responsibility
//! - Create, read, update, delete and restore users with email uniqueness
//!   pre-checks.
//! - Guard the admin population and check role-based permissions.
//!
//! # Invariants
//! - The last live admin can be neither deleted nor demoted.
//! - Role checks compare ranks: an actor satisfies a required role when its
//!   rank is greater than or equal to the required rank.

use crate::context::RequestContext;
use crate::model::error::{DomainError, DomainResult, ResultExt};
use crate::model::user::{User, UserRole};
use crate::repo::user_repo::UserRepository;
use crate::repo::{ListOptions, Page};
use crate::service::{log_failure, require_arg};
use log::{debug, info, warn};

/// User service facade over a repository implementation.
pub struct UserService<U: UserRepository> {
    users: U,
}

impl<U: UserRepository> UserService<U> {
    pub fn new(users: U) -> Self {
        Self { users }
    }

    /// Creates one user after validation and an email uniqueness pre-check.
    ///
    /// A concurrent insert of the same email still surfaces as `Conflict`
    /// from the storage-level unique index.
    pub fn create_user(&self, ctx: &RequestContext, user: User) -> DomainResult<User> {
        info!(
            "event=user_create module=service status=start request_id={} role={}",
            ctx.request_id(),
            user.role
        );
        self.create_user_inner(ctx, user)
            .map_err(|err| log_failure(ctx, "user_create", err))
    }

    fn create_user_inner(&self, ctx: &RequestContext, mut user: User) -> DomainResult<User> {
        user.validate()?;
        self.ensure_email_available(ctx, &user.email, None)?;
        self.users
            .create(ctx, &mut user)
            .context("failed to create user")?;

        info!(
            "event=user_create module=service status=ok request_id={} user_id={} version={}",
            ctx.request_id(),
            user.id,
            user.version
        );
        Ok(user)
    }

    pub fn get_user_by_id(&self, ctx: &RequestContext, id: &str) -> DomainResult<User> {
        debug!(
            "event=user_get module=service status=start request_id={} user_id={}",
            ctx.request_id(),
            id
        );
        require_arg("user_id", id)
            .and_then(|()| self.users.get_by_id(ctx, id).context("failed to get user"))
            .map_err(|err| log_failure(ctx, "user_get", err))
    }

    pub fn get_user_by_email(&self, ctx: &RequestContext, email: &str) -> DomainResult<User> {
        debug!(
            "event=user_get_by_email module=service status=start request_id={}",
            ctx.request_id()
        );
        require_arg("email", email)
            .and_then(|()| {
                self.users
                    .get_by_email(ctx, email)
                    .context("failed to get user")
            })
            .map_err(|err| log_failure(ctx, "user_get_by_email", err))
    }

    /// Applies a full update at `user.version`.
    ///
    /// Demoting the last admin through a general update is rejected the same
    /// way as through [`Self::change_user_role`].
    pub fn update_user(&self, ctx: &RequestContext, user: User) -> DomainResult<User> {
        info!(
            "event=user_update module=service status=start request_id={} user_id={} version={}",
            ctx.request_id(),
            user.id,
            user.version
        );
        self.update_user_inner(ctx, user)
            .map_err(|err| log_failure(ctx, "user_update", err))
    }

    fn update_user_inner(&self, ctx: &RequestContext, mut user: User) -> DomainResult<User> {
        require_arg("user_id", &user.id)?;
        user.validate()?;

        let existing = self
            .users
            .get_by_id(ctx, &user.id)
            .context("failed to get existing user")?;
        if existing.version != user.version {
            return Err(DomainError::version_conflict(
                "user",
                user.version,
                existing.version,
            ));
        }
        if !existing.email.eq_ignore_ascii_case(user.email.trim()) {
            self.ensure_email_available(ctx, &user.email, Some(&user.id))?;
        }
        if existing.is_admin() && user.role != UserRole::Admin {
            self.ensure_not_last_admin(ctx, "cannot remove admin role from the last admin user")?;
        }

        self.users
            .update(ctx, &mut user)
            .context("failed to update user")?;

        info!(
            "event=user_update module=service status=ok request_id={} user_id={} version={}",
            ctx.request_id(),
            user.id,
            user.version
        );
        Ok(user)
    }

    pub fn delete_user(&self, ctx: &RequestContext, id: &str, version: i64) -> DomainResult<()> {
        info!(
            "event=user_delete module=service status=start request_id={} user_id={} version={}",
            ctx.request_id(),
            id,
            version
        );
        self.delete_user_inner(ctx, id, version)
            .map_err(|err| log_failure(ctx, "user_delete", err))
    }

    fn delete_user_inner(&self, ctx: &RequestContext, id: &str, version: i64) -> DomainResult<()> {
        require_arg("user_id", id)?;
        let user = self
            .users
            .get_by_id(ctx, id)
            .context("failed to get user for deletion")?;
        if user.is_admin() {
            self.ensure_not_last_admin(ctx, "cannot delete the last admin user")?;
        }

        self.users
            .soft_delete(ctx, id, version)
            .context("failed to delete user")?;

        info!(
            "event=user_delete module=service status=ok request_id={} user_id={} version={}",
            ctx.request_id(),
            id,
            version + 1
        );
        Ok(())
    }

    /// Restores a deleted user at its deleted version and returns it.
    pub fn restore_user(&self, ctx: &RequestContext, id: &str, version: i64) -> DomainResult<User> {
        info!(
            "event=user_restore module=service status=start request_id={} user_id={} version={}",
            ctx.request_id(),
            id,
            version
        );
        self.restore_user_inner(ctx, id, version)
            .map_err(|err| log_failure(ctx, "user_restore", err))
    }

    fn restore_user_inner(&self, ctx: &RequestContext, id: &str, version: i64) -> DomainResult<User> {
        require_arg("user_id", id)?;
        self.users
            .restore(ctx, id, version)
            .context("failed to restore user")?;
        let user = self
            .users
            .get_by_id(ctx, id)
            .context("failed to get restored user")?;

        info!(
            "event=user_restore module=service status=ok request_id={} user_id={} version={}",
            ctx.request_id(),
            user.id,
            user.version
        );
        Ok(user)
    }

    pub fn list_users(&self, ctx: &RequestContext, options: &ListOptions) -> DomainResult<Page<User>> {
        debug!(
            "event=user_list module=service status=start request_id={} page={} page_size={}",
            ctx.request_id(),
            options.page,
            options.page_size
        );
        let page = self
            .users
            .list(ctx, options)
            .context("failed to list users")
            .map_err(|err| log_failure(ctx, "user_list", err))?;
        debug!(
            "event=user_list module=service status=ok request_id={} count={} total={}",
            ctx.request_id(),
            page.items.len(),
            page.total
        );
        Ok(page)
    }

    /// Changes one user's role at `version`.
    pub fn change_user_role(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        new_role: UserRole,
        version: i64,
    ) -> DomainResult<User> {
        info!(
            "event=user_change_role module=service status=start request_id={} user_id={} new_role={} version={}",
            ctx.request_id(),
            user_id,
            new_role,
            version
        );
        self.change_user_role_inner(ctx, user_id, new_role, version)
            .map_err(|err| log_failure(ctx, "user_change_role", err))
    }

    fn change_user_role_inner(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        new_role: UserRole,
        version: i64,
    ) -> DomainResult<User> {
        require_arg("user_id", user_id)?;
        let mut user = self
            .users
            .get_by_id(ctx, user_id)
            .context("failed to get user")?;
        if user.version != version {
            return Err(DomainError::version_conflict("user", version, user.version));
        }
        if user.is_admin() && new_role != UserRole::Admin {
            self.ensure_not_last_admin(ctx, "cannot remove admin role from the last admin user")?;
        }

        user.role = new_role;
        self.update_user_inner(ctx, user)
    }

    /// Fails with `PermissionDenied` unless `user_id` holds at least
    /// `required_role`. A missing user propagates `NotFound`.
    pub fn validate_user_permissions(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        required_role: UserRole,
    ) -> DomainResult<()> {
        let result = require_arg("user_id", user_id).and_then(|()| {
            let user = self
                .users
                .get_by_id(ctx, user_id)
                .context("failed to get user for permission check")?;
            if !user.role.satisfies(required_role) {
                warn!(
                    "event=user_permission module=service status=rejected request_id={} user_id={} user_role={} required_role={}",
                    ctx.request_id(),
                    user_id,
                    user.role,
                    required_role
                );
                return Err(DomainError::permission_denied(
                    "insufficient role privileges",
                ));
            }
            Ok(())
        });
        result.map_err(|err| log_failure(ctx, "user_permission", err))
    }

    fn ensure_email_available(
        &self,
        ctx: &RequestContext,
        email: &str,
        owner_id: Option<&str>,
    ) -> DomainResult<()> {
        match self.users.get_by_email(ctx, email) {
            Ok(existing) if Some(existing.id.as_str()) != owner_id => Err(DomainError::conflict(
                "user with email already exists",
            )),
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.with_context("failed to check for existing user")),
        }
    }

    fn ensure_not_last_admin(&self, ctx: &RequestContext, message: &str) -> DomainResult<()> {
        let admins = self
            .users
            .count_by_role(ctx, UserRole::Admin)
            .context("failed to count admin users")?;
        if admins <= 1 {
            return Err(DomainError::business_rule(message));
        }
        Ok(())
    }
}
