//! CLI smoke entry point.
//!
//! # Responsibility
//! - Load configuration, start logging and open the configured database.
//! - Print the core version, schema version and live entity totals.

use log::info;
use std::process::ExitCode;
use taskdesk_core::{
    core_version, init_from_config, open_db_with_busy_timeout, schema_version, AppConfig,
    CategoryListOptions, ListOptions, RequestContext, Services, TagListOptions, TaskListOptions,
};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("taskdesk: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let config = AppConfig::load().map_err(|err| err.to_string())?;
    init_from_config(&config.logging).map_err(|err| err.to_string())?;

    let conn = open_db_with_busy_timeout(&config.database.path, config.busy_timeout())
        .map_err(|err| err.to_string())?;
    let services = Services::sqlite(&conn).map_err(|err| err.to_string())?;
    let ctx = RequestContext::with_timeout(config.request_timeout());
    info!(
        "event=cli_probe module=cli status=start request_id={}",
        ctx.request_id()
    );

    let probe = ListOptions::page(0, 1);
    let users = services
        .users
        .list_users(&ctx, &probe)
        .map_err(|err| err.to_string())?;
    let tasks = services
        .tasks
        .list_tasks(
            &ctx,
            &TaskListOptions {
                list: probe.clone(),
                ..TaskListOptions::default()
            },
        )
        .map_err(|err| err.to_string())?;
    let categories = services
        .categories
        .list_categories(
            &ctx,
            &CategoryListOptions {
                list: probe.clone(),
                ..CategoryListOptions::default()
            },
        )
        .map_err(|err| err.to_string())?;
    let tags = services
        .tags
        .list_tags(
            &ctx,
            &TagListOptions {
                list: probe,
                ..TagListOptions::default()
            },
        )
        .map_err(|err| err.to_string())?;

    println!("taskdesk_core version={}", core_version());
    println!(
        "schema version={}",
        schema_version(&conn).map_err(|err| err.to_string())?
    );
    println!(
        "users={} tasks={} categories={} tags={}",
        users.total, tasks.total, categories.total, tags.total
    );
    Ok(())
}
