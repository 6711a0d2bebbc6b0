use std::cell::RefCell;
use taskdesk_core::db::open_db_in_memory;
use taskdesk_core::{
    DomainResult, ErrorKind, ListOptions, Page, RequestContext, SqliteUserRepository, User,
    UserRepository, UserRole, UserService,
};

fn service(conn: &rusqlite::Connection) -> UserService<SqliteUserRepository<'_>> {
    UserService::new(SqliteUserRepository::try_new(conn).unwrap())
}

fn create(
    users: &UserService<SqliteUserRepository<'_>>,
    ctx: &RequestContext,
    name: &str,
    email: &str,
    role: UserRole,
) -> User {
    users
        .create_user(ctx, User::new(name, email, role))
        .unwrap()
}

#[test]
fn create_assigns_id_and_first_version() {
    let conn = open_db_in_memory().unwrap();
    let users = service(&conn);
    let ctx = RequestContext::new();

    let user = create(&users, &ctx, "Ada", "ada@example.com", UserRole::User);
    assert!(!user.id.is_empty());
    assert_eq!(user.version, 1);
    assert!(user.created_at > 0);
    assert_eq!(user.created_at, user.updated_at);

    let loaded = users.get_user_by_id(&ctx, &user.id).unwrap();
    assert_eq!(loaded, user);
    let by_email = users.get_user_by_email(&ctx, "ADA@example.com").unwrap();
    assert_eq!(by_email.id, user.id);
}

#[test]
fn invalid_input_is_rejected_before_storage() {
    let conn = open_db_in_memory().unwrap();
    let users = service(&conn);
    let ctx = RequestContext::new();

    let err = users
        .create_user(&ctx, User::new("", "x@example.com", UserRole::User))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(err.field(), Some("name"));

    let err = users.get_user_by_id(&ctx, "  ").unwrap_err();
    assert!(err.is_invalid_input());
    let err = users.get_user_by_email(&ctx, "").unwrap_err();
    assert!(err.is_invalid_input());
}

#[test]
fn duplicate_email_conflicts_until_owner_is_deleted() {
    let conn = open_db_in_memory().unwrap();
    let users = service(&conn);
    let ctx = RequestContext::new();

    let first = create(&users, &ctx, "First", "dup@example.com", UserRole::User);
    let err = users
        .create_user(&ctx, User::new("Second", "DUP@example.com", UserRole::User))
        .unwrap_err();
    assert!(err.is_conflict());

    users.delete_user(&ctx, &first.id, first.version).unwrap();
    let reused = create(&users, &ctx, "Second", "dup@example.com", UserRole::User);
    assert_ne!(reused.id, first.id);
}

#[test]
fn storage_unique_index_backs_the_pre_check() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::try_new(&conn).unwrap();
    let ctx = RequestContext::new();

    let mut first = User::new("First", "race@example.com", UserRole::User);
    repo.create(&ctx, &mut first).unwrap();
    let mut second = User::new("Second", "race@example.com", UserRole::User);
    let err = repo.create(&ctx, &mut second).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn update_bumps_version_and_rejects_stale_writes() {
    let conn = open_db_in_memory().unwrap();
    let users = service(&conn);
    let ctx = RequestContext::new();

    let user = create(&users, &ctx, "Ada", "ada@example.com", UserRole::User);
    let mut edit = user.clone();
    edit.name = "Ada Lovelace".to_string();
    let updated = users.update_user(&ctx, edit).unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(users.get_user_by_id(&ctx, &user.id).unwrap().name, "Ada Lovelace");

    let mut stale = user.clone();
    stale.name = "Stale".to_string();
    let err = users.update_user(&ctx, stale).unwrap_err();
    assert_eq!(err.version_conflict_versions(), Some((1, 2)));
}

#[test]
fn update_rejects_email_taken_by_another_user() {
    let conn = open_db_in_memory().unwrap();
    let users = service(&conn);
    let ctx = RequestContext::new();

    create(&users, &ctx, "Ada", "ada@example.com", UserRole::User);
    let grace = create(&users, &ctx, "Grace", "grace@example.com", UserRole::User);

    let mut edit = grace.clone();
    edit.email = "ada@example.com".to_string();
    assert!(users.update_user(&ctx, edit).unwrap_err().is_conflict());

    let mut case_only = grace;
    case_only.email = "Grace@Example.com".to_string();
    let updated = users.update_user(&ctx, case_only).unwrap();
    assert_eq!(updated.email, "Grace@Example.com");
}

#[test]
fn last_admin_cannot_be_deleted_or_demoted() {
    let conn = open_db_in_memory().unwrap();
    let users = service(&conn);
    let ctx = RequestContext::new();

    let admin = create(&users, &ctx, "Root", "root@example.com", UserRole::Admin);

    let err = users.delete_user(&ctx, &admin.id, admin.version).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BusinessRuleViolation);

    let err = users
        .change_user_role(&ctx, &admin.id, UserRole::User, admin.version)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BusinessRuleViolation);

    let mut demoted = admin.clone();
    demoted.role = UserRole::User;
    let err = users.update_user(&ctx, demoted).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BusinessRuleViolation);

    let still_admin = users.get_user_by_id(&ctx, &admin.id).unwrap();
    assert_eq!(still_admin.role, UserRole::Admin);
    assert_eq!(still_admin.version, 1);
}

#[test]
fn with_two_admins_delete_and_demotion_succeed() {
    let conn = open_db_in_memory().unwrap();
    let users = service(&conn);
    let ctx = RequestContext::new();

    let first = create(&users, &ctx, "One", "one@example.com", UserRole::Admin);
    let second = create(&users, &ctx, "Two", "two@example.com", UserRole::Admin);
    let third = create(&users, &ctx, "Three", "three@example.com", UserRole::Admin);

    let demoted = users
        .change_user_role(&ctx, &first.id, UserRole::User, first.version)
        .unwrap();
    assert_eq!(demoted.role, UserRole::User);
    assert_eq!(demoted.version, 2);

    users.delete_user(&ctx, &second.id, second.version).unwrap();

    let err = users.delete_user(&ctx, &third.id, third.version).unwrap_err();
    assert!(err.is_business_rule());
}

#[test]
fn change_role_fails_fast_on_stale_version() {
    let conn = open_db_in_memory().unwrap();
    let users = service(&conn);
    let ctx = RequestContext::new();

    let user = create(&users, &ctx, "Ada", "ada@example.com", UserRole::User);
    let err = users
        .change_user_role(&ctx, &user.id, UserRole::Admin, 7)
        .unwrap_err();
    assert_eq!(err.version_conflict_versions(), Some((7, 1)));

    let promoted = users
        .change_user_role(&ctx, &user.id, UserRole::Admin, 1)
        .unwrap();
    assert!(promoted.is_admin());
}

#[test]
fn permissions_follow_role_rank() {
    let conn = open_db_in_memory().unwrap();
    let users = service(&conn);
    let ctx = RequestContext::new();

    let admin = create(&users, &ctx, "Root", "root@example.com", UserRole::Admin);
    let member = create(&users, &ctx, "Member", "member@example.com", UserRole::User);

    users
        .validate_user_permissions(&ctx, &admin.id, UserRole::Admin)
        .unwrap();
    users
        .validate_user_permissions(&ctx, &admin.id, UserRole::User)
        .unwrap();
    users
        .validate_user_permissions(&ctx, &member.id, UserRole::User)
        .unwrap();

    let err = users
        .validate_user_permissions(&ctx, &member.id, UserRole::Admin)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let err = users
        .validate_user_permissions(&ctx, "missing", UserRole::User)
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn soft_delete_round_trip_restores_content() {
    let conn = open_db_in_memory().unwrap();
    let users = service(&conn);
    let ctx = RequestContext::new();

    let user = create(&users, &ctx, "Ada", "ada@example.com", UserRole::User);
    users.delete_user(&ctx, &user.id, 1).unwrap();
    assert!(users.get_user_by_id(&ctx, &user.id).unwrap_err().is_not_found());

    let err = users.restore_user(&ctx, &user.id, 1).unwrap_err();
    assert_eq!(err.version_conflict_versions(), Some((1, 2)));

    let restored = users.restore_user(&ctx, &user.id, 2).unwrap();
    assert_eq!(restored.version, 3);
    assert!(!restored.is_deleted);
    assert!(restored.deleted_at.is_none());
    assert_eq!(restored.name, user.name);
    assert_eq!(restored.email, user.email);

    let err = users.restore_user(&ctx, &user.id, 3).unwrap_err();
    assert!(err.is_business_rule());
}

#[test]
fn list_searches_pages_and_hides_deleted() {
    let conn = open_db_in_memory().unwrap();
    let users = service(&conn);
    let ctx = RequestContext::new();

    for index in 0..5 {
        create(
            &users,
            &ctx,
            &format!("Worker {index}"),
            &format!("worker{index}@example.com"),
            UserRole::User,
        );
    }
    let gone = create(&users, &ctx, "Worker gone", "gone@example.com", UserRole::User);
    users.delete_user(&ctx, &gone.id, gone.version).unwrap();

    let page = users
        .list_users(
            &ctx,
            &ListOptions {
                page: 1,
                page_size: 2,
                search_query: Some("worker".to_string()),
                sort_by: Some("email".to_string()),
                ..ListOptions::default()
            },
        )
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].email, "worker2@example.com");
    assert_eq!(page.items[1].email, "worker3@example.com");

    let with_deleted = users
        .list_users(
            &ctx,
            &ListOptions {
                include_deleted: true,
                ..ListOptions::default()
            },
        )
        .unwrap();
    assert_eq!(with_deleted.total, 6);

    let err = users
        .list_users(
            &ctx,
            &ListOptions {
                sort_by: Some("password".to_string()),
                ..ListOptions::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.field(), Some("sort_by"));
}

/// Lets another writer remove an admin between the service's checks and
/// its own write, the way a concurrent request on another connection would.
struct RacingUsers<'conn> {
    inner: SqliteUserRepository<'conn>,
    rival: RefCell<Option<User>>,
}

impl<'conn> RacingUsers<'conn> {
    fn new(inner: SqliteUserRepository<'conn>, rival: User) -> Self {
        Self {
            inner,
            rival: RefCell::new(Some(rival)),
        }
    }

    fn remove_rival(&self, ctx: &RequestContext) {
        if let Some(rival) = self.rival.borrow_mut().take() {
            self.inner.soft_delete(ctx, &rival.id, rival.version).unwrap();
        }
    }
}

impl UserRepository for RacingUsers<'_> {
    fn create(&self, ctx: &RequestContext, user: &mut User) -> DomainResult<()> {
        self.inner.create(ctx, user)
    }

    fn get_by_id(&self, ctx: &RequestContext, id: &str) -> DomainResult<User> {
        self.inner.get_by_id(ctx, id)
    }

    fn get_by_email(&self, ctx: &RequestContext, email: &str) -> DomainResult<User> {
        self.inner.get_by_email(ctx, email)
    }

    fn list(&self, ctx: &RequestContext, options: &ListOptions) -> DomainResult<Page<User>> {
        self.inner.list(ctx, options)
    }

    fn update(&self, ctx: &RequestContext, user: &mut User) -> DomainResult<()> {
        self.remove_rival(ctx);
        self.inner.update(ctx, user)
    }

    fn soft_delete(&self, ctx: &RequestContext, id: &str, expected_version: i64) -> DomainResult<()> {
        self.remove_rival(ctx);
        self.inner.soft_delete(ctx, id, expected_version)
    }

    fn restore(&self, ctx: &RequestContext, id: &str, expected_version: i64) -> DomainResult<()> {
        self.inner.restore(ctx, id, expected_version)
    }

    fn count_by_role(&self, ctx: &RequestContext, role: UserRole) -> DomainResult<i64> {
        self.inner.count_by_role(ctx, role)
    }
}

#[test]
fn admin_removed_after_the_count_still_blocks_the_last_delete() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::try_new(&conn).unwrap();
    let ctx = RequestContext::new();
    let seed = UserService::new(repo);
    let first = create(&seed, &ctx, "One", "one@example.com", UserRole::Admin);
    let second = create(&seed, &ctx, "Two", "two@example.com", UserRole::Admin);

    let users = UserService::new(RacingUsers::new(repo, second));
    let err = users.delete_user(&ctx, &first.id, first.version).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BusinessRuleViolation);

    assert_eq!(repo.count_by_role(&ctx, UserRole::Admin).unwrap(), 1);
    let kept = repo.get_by_id(&ctx, &first.id).unwrap();
    assert_eq!(kept.version, first.version);
}

#[test]
fn admin_removed_after_the_count_still_blocks_the_last_demotion() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::try_new(&conn).unwrap();
    let ctx = RequestContext::new();
    let seed = UserService::new(repo);
    let first = create(&seed, &ctx, "One", "one@example.com", UserRole::Admin);
    let second = create(&seed, &ctx, "Two", "two@example.com", UserRole::Admin);

    let users = UserService::new(RacingUsers::new(repo, second));
    let err = users
        .change_user_role(&ctx, &first.id, UserRole::User, first.version)
        .unwrap_err();
    assert!(err.is_business_rule());

    let kept = repo.get_by_id(&ctx, &first.id).unwrap();
    assert_eq!(kept.role, UserRole::Admin);
    assert_eq!(kept.version, first.version);
}

#[test]
fn repository_refuses_to_remove_the_last_live_admin() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteUserRepository::try_new(&conn).unwrap();
    let ctx = RequestContext::new();

    let mut admin = User::new("Root", "root@example.com", UserRole::Admin);
    repo.create(&ctx, &mut admin).unwrap();
    let mut member = User::new("Member", "member@example.com", UserRole::User);
    repo.create(&ctx, &mut member).unwrap();

    let err = repo.soft_delete(&ctx, &admin.id, 1).unwrap_err();
    assert!(err.is_business_rule());

    let mut demoted = admin.clone();
    demoted.role = UserRole::User;
    assert!(repo.update(&ctx, &mut demoted).unwrap_err().is_business_rule());
    assert_eq!(demoted.version, 1);

    let err = repo.soft_delete(&ctx, &admin.id, 5).unwrap_err();
    assert_eq!(err.version_conflict_versions(), Some((5, 1)));

    let mut renamed = admin.clone();
    renamed.name = "Root renamed".to_string();
    repo.update(&ctx, &mut renamed).unwrap();
    assert_eq!(renamed.version, 2);

    repo.soft_delete(&ctx, &member.id, 1).unwrap();
}
