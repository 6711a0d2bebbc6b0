use taskdesk_core::db::open_db_in_memory;
use taskdesk_core::{
    Category, CategoryListOptions, ErrorKind, ListOptions, RequestContext, Services, Tag,
    TagListOptions, Task, User, UserRole,
};

fn creator(services: &Services<'_>, ctx: &RequestContext) -> User {
    services
        .users
        .create_user(ctx, User::new("A", "a@x.com", UserRole::User))
        .unwrap()
}

#[test]
fn category_in_use_cannot_be_deleted_until_unlinked() {
    let conn = open_db_in_memory().unwrap();
    let services = Services::sqlite(&conn).unwrap();
    let ctx = RequestContext::new();
    let a = creator(&services, &ctx);

    let work = services
        .categories
        .create_category(&ctx, Category::new("Work", ""), &a.id)
        .unwrap();
    assert_eq!(work.creator_id, a.id);
    let urgent = services
        .tags
        .create_tag(&ctx, Tag::new("urgent", ""), &a.id)
        .unwrap();

    let mut draft = Task::new("T", a.id.clone());
    draft.categories.push(work.clone());
    draft.tags.push(urgent.clone());
    let task = services.tasks.create_task(&ctx, draft, &a.id).unwrap();

    assert_eq!(services.categories.get_category_task_count(&ctx, &work.id).unwrap(), 1);
    let err = services
        .categories
        .delete_category(&ctx, &work.id, work.version)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BusinessRuleViolation);
    assert!(err.to_string().contains("used by 1 tasks"));

    let err = services.tags.delete_tag(&ctx, &urgent.id, urgent.version).unwrap_err();
    assert!(err.is_business_rule());
    assert!(services.tags.validate_tag_usage(&ctx, &urgent.id).is_err());

    services
        .tasks
        .remove_task_categories(&ctx, &task.id, &[work.id.clone()], task.version, &a.id)
        .unwrap();
    services.categories.validate_category_usage(&ctx, &work.id).unwrap();
    services
        .categories
        .delete_category(&ctx, &work.id, work.version)
        .unwrap();
    assert!(services
        .categories
        .get_category_by_id(&ctx, &work.id)
        .unwrap_err()
        .is_not_found());
}

#[test]
fn deleted_tasks_do_not_count_as_usage() {
    let conn = open_db_in_memory().unwrap();
    let services = Services::sqlite(&conn).unwrap();
    let ctx = RequestContext::new();
    let a = creator(&services, &ctx);

    let tag = services.tags.find_or_create_tag(&ctx, "later").unwrap();
    let mut draft = Task::new("T", a.id.clone());
    draft.tags.push(tag.clone());
    let task = services.tasks.create_task(&ctx, draft, &a.id).unwrap();
    assert_eq!(services.tags.get_tag_task_count(&ctx, &tag.id).unwrap(), 1);

    services
        .tasks
        .delete_task(&ctx, &task.id, task.version, &a.id)
        .unwrap();
    assert_eq!(services.tags.get_tag_task_count(&ctx, &tag.id).unwrap(), 0);
    services.tags.delete_tag(&ctx, &tag.id, tag.version).unwrap();
}

#[test]
fn tag_restore_requires_the_deleted_version() {
    let conn = open_db_in_memory().unwrap();
    let services = Services::sqlite(&conn).unwrap();
    let ctx = RequestContext::new();
    let a = creator(&services, &ctx);

    let tag = services.tags.find_or_create_tag(&ctx, "soon").unwrap();
    let mut draft = Task::new("T", a.id.clone());
    draft.tags.push(tag.clone());
    let task = services.tasks.create_task(&ctx, draft, &a.id).unwrap();
    services
        .tasks
        .remove_task_tags(&ctx, &task.id, &[tag.id.clone()], task.version, &a.id)
        .unwrap();
    services.tags.delete_tag(&ctx, &tag.id, tag.version).unwrap();

    let restored = services.tags.restore_tag(&ctx, &tag.id, tag.version + 1).unwrap();
    assert_eq!(restored.version, tag.version + 2);
    assert_eq!(restored.name, "soon");
}

#[test]
fn tag_names_are_normalized_before_the_uniqueness_check() {
    let conn = open_db_in_memory().unwrap();
    let services = Services::sqlite(&conn).unwrap();
    let ctx = RequestContext::new();
    let a = creator(&services, &ctx);

    let tag = services
        .tags
        .create_tag(&ctx, Tag::new("  Very   Important ", ""), &a.id)
        .unwrap();
    assert_eq!(tag.name, "very-important");
    assert_eq!(tag.color, "#FF6B6B");
    assert_eq!(tag.creator_id, a.id);

    let err = services
        .tags
        .create_tag(&ctx, Tag::new("VERY important", ""), &a.id)
        .unwrap_err();
    assert!(err.is_conflict());

    let err = services
        .tags
        .create_tag(&ctx, Tag::new("bad!name", ""), &a.id)
        .unwrap_err();
    assert_eq!(err.field(), Some("name"));

    let err = services
        .tags
        .create_tag(&ctx, Tag::new("x".repeat(51), ""), &a.id)
        .unwrap_err();
    assert_eq!(err.field(), Some("name"));
}

#[test]
fn find_or_create_tag_is_idempotent_across_spellings() {
    let conn = open_db_in_memory().unwrap();
    let services = Services::sqlite(&conn).unwrap();
    let ctx = RequestContext::new();

    let first = services.tags.find_or_create_tag(&ctx, "  URGENT  ").unwrap();
    assert_eq!(first.name, "urgent");
    assert_eq!(first.creator_id, "system");
    assert_eq!(first.color, "#FF6B6B");

    let second = services.tags.find_or_create_tag(&ctx, "urgent").unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.version, 1);

    let all = services
        .tags
        .list_tags(&ctx, &TagListOptions::default())
        .unwrap();
    assert_eq!(all.total, 1);
}

#[test]
fn find_or_create_tag_validates_the_normalized_name() {
    let conn = open_db_in_memory().unwrap();
    let services = Services::sqlite(&conn).unwrap();
    let ctx = RequestContext::new();

    let tabbed = services.tags.find_or_create_tag(&ctx, "urgent\ttask").unwrap();
    assert_eq!(tabbed.name, "urgent-task");
    let spaced = services.tags.find_or_create_tag(&ctx, "  URGENT   task ").unwrap();
    assert_eq!(spaced.id, tabbed.id);

    let long = "x".repeat(48);
    let padded = format!("      {long}      ");
    assert!(padded.chars().count() > 50);
    let tag = services.tags.find_or_create_tag(&ctx, &padded).unwrap();
    assert_eq!(tag.name, long);

    let err = services.tags.find_or_create_tag(&ctx, "bad!name").unwrap_err();
    assert_eq!(err.field(), Some("name"));
    let err = services.tags.find_or_create_tag(&ctx, " \t ").unwrap_err();
    assert_eq!(err.field(), Some("name"));
    let err = services
        .tags
        .find_or_create_tag(&ctx, &"y".repeat(51))
        .unwrap_err();
    assert!(err.is_invalid_input());
}

#[test]
fn tag_update_renames_and_checks_uniqueness() {
    let conn = open_db_in_memory().unwrap();
    let services = Services::sqlite(&conn).unwrap();
    let ctx = RequestContext::new();
    let a = creator(&services, &ctx);

    let taken = services.tags.create_tag(&ctx, Tag::new("taken", ""), &a.id).unwrap();
    let tag = services.tags.create_tag(&ctx, Tag::new("draft", ""), &a.id).unwrap();

    let mut rename = tag.clone();
    rename.name = "Taken".to_string();
    assert!(services.tags.update_tag(&ctx, rename).unwrap_err().is_conflict());

    let mut rename = tag.clone();
    rename.name = "Final Version".to_string();
    rename.color = "#000000".to_string();
    rename.creator_id = "someone-else".to_string();
    let renamed = services.tags.update_tag(&ctx, rename).unwrap();
    assert_eq!(renamed.name, "final-version");
    assert_eq!(renamed.color, "#000000");
    assert_eq!(renamed.creator_id, a.id);
    assert_eq!(renamed.version, 2);

    let mut stale = tag;
    stale.name = "again".to_string();
    let err = services.tags.update_tag(&ctx, stale).unwrap_err();
    assert_eq!(err.version_conflict_versions(), Some((1, 2)));

    let mine = services
        .tags
        .list_tags(
            &ctx,
            &TagListOptions {
                creator_id: Some(a.id.clone()),
                list: ListOptions {
                    sort_by: Some("name".to_string()),
                    ..ListOptions::default()
                },
            },
        )
        .unwrap();
    let names: Vec<_> = mine.items.iter().map(|tag| tag.name.as_str()).collect();
    assert_eq!(names, vec!["final-version", taken.name.as_str()]);
}

#[test]
fn category_names_are_unique_among_live_rows() {
    let conn = open_db_in_memory().unwrap();
    let services = Services::sqlite(&conn).unwrap();
    let ctx = RequestContext::new();
    let a = creator(&services, &ctx);

    let work = services
        .categories
        .create_category(&ctx, Category::new("Work", ""), &a.id)
        .unwrap();
    let err = services
        .categories
        .create_category(&ctx, Category::new("Work", ""), &a.id)
        .unwrap_err();
    assert!(err.is_conflict());

    let home = services
        .categories
        .create_category(&ctx, Category::new("Home", ""), &a.id)
        .unwrap();
    let mut rename = home.clone();
    rename.name = "Work".to_string();
    assert!(services
        .categories
        .update_category(&ctx, rename)
        .unwrap_err()
        .is_conflict());

    let mut keep_name = home;
    keep_name.description = "chores".to_string();
    let updated = services.categories.update_category(&ctx, keep_name).unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.description, "chores");

    services
        .categories
        .delete_category(&ctx, &work.id, work.version)
        .unwrap();
    let reused = services
        .categories
        .create_category(&ctx, Category::new("Work", ""), &a.id)
        .unwrap();
    assert_ne!(reused.id, work.id);

    let err = services
        .categories
        .restore_category(&ctx, &work.id, work.version + 1)
        .unwrap_err();
    assert!(err.is_conflict());
}

#[test]
fn categories_nest_one_level_only() {
    let conn = open_db_in_memory().unwrap();
    let services = Services::sqlite(&conn).unwrap();
    let ctx = RequestContext::new();
    let a = creator(&services, &ctx);

    let root = services
        .categories
        .create_category(&ctx, Category::new("Root", ""), &a.id)
        .unwrap();

    let mut child = Category::new("Child", "");
    child.parent_id = Some(root.id.clone());
    let child = services
        .categories
        .create_category(&ctx, child, &a.id)
        .unwrap();
    assert!(!child.is_top_level());

    let mut grandchild = Category::new("Grandchild", "");
    grandchild.parent_id = Some(child.id.clone());
    let err = services
        .categories
        .create_category(&ctx, grandchild, &a.id)
        .unwrap_err();
    assert!(err.is_business_rule());

    let mut orphan = Category::new("Orphan", "");
    orphan.parent_id = Some("missing".to_string());
    let err = services
        .categories
        .create_category(&ctx, orphan, &a.id)
        .unwrap_err();
    assert_eq!(err.field(), Some("parent_id"));

    let mut own_parent = root.clone();
    own_parent.parent_id = Some(root.id.clone());
    let err = services
        .categories
        .update_category(&ctx, own_parent)
        .unwrap_err();
    assert_eq!(err.field(), Some("parent_id"));

    let other = services
        .categories
        .create_category(&ctx, Category::new("Other", ""), &a.id)
        .unwrap();
    let mut nest_parent = root.clone();
    nest_parent.parent_id = Some(other.id.clone());
    let err = services
        .categories
        .update_category(&ctx, nest_parent)
        .unwrap_err();
    assert!(err.is_business_rule());

    let children = services
        .categories
        .list_categories(
            &ctx,
            &CategoryListOptions {
                parent_id: Some(root.id.clone()),
                ..CategoryListOptions::default()
            },
        )
        .unwrap();
    assert_eq!(children.total, 1);
    assert_eq!(children.items[0].id, child.id);
}

#[test]
fn category_list_filters_public_and_search() {
    let conn = open_db_in_memory().unwrap();
    let services = Services::sqlite(&conn).unwrap();
    let ctx = RequestContext::new();
    let a = creator(&services, &ctx);

    let mut private = Category::new("Private notes", "");
    private.is_public = false;
    services
        .categories
        .create_category(&ctx, private, &a.id)
        .unwrap();
    let mut shared = Category::new("Shared", "");
    shared.description = "team notes".to_string();
    services
        .categories
        .create_category(&ctx, shared, &a.id)
        .unwrap();

    let public = services
        .categories
        .list_categories(
            &ctx,
            &CategoryListOptions {
                public_only: true,
                ..CategoryListOptions::default()
            },
        )
        .unwrap();
    assert_eq!(public.total, 1);
    assert_eq!(public.items[0].name, "Shared");

    let notes = services
        .categories
        .list_categories(
            &ctx,
            &CategoryListOptions {
                list: ListOptions {
                    search_query: Some("NOTES".to_string()),
                    ..ListOptions::default()
                },
                ..CategoryListOptions::default()
            },
        )
        .unwrap();
    assert_eq!(notes.total, 2);
}
