//! Habitor CLI - track habits from the terminal
//!
//! Works offline against the local database; syncs to the configured
//! account store when signed in and reachable.

mod cli;
mod commands;
mod error;


use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, QueueCommands};
use crate::commands::account::{run_sign_in, run_sign_out};
use crate::commands::add::run_add;
use crate::commands::common::{resolve_config_path, resolve_db_path, App};
use crate::commands::delete::{run_delete, run_purge, run_restore};
use crate::commands::edit::run_edit;
use crate::commands::list::run_list;
use crate::commands::queue::{run_queue_clear, run_queue_list};
use crate::commands::sync::{run_status, run_sync, run_watch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "habitor=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.command.is_none() && cli.habit.is_empty() {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    }

    let db_path = resolve_db_path(cli.db_path);
    let config_path = resolve_config_path(cli.config);
    let app = App::open(&db_path, config_path.as_deref()).await?;

    let result = dispatch(&app, cli.command, &cli.habit).await;
    app.finish().await;
    result
}

async fn dispatch(app: &App, command: Option<Commands>, habit: &[String]) -> Result<(), CliError> {
    match command {
        Some(Commands::Add { name, note }) => run_add(app, &name, note.as_deref()),
        Some(Commands::List { trash, json }) => run_list(app, trash, json),
        Some(Commands::Edit { id, name, note }) => {
            run_edit(app, &id, name.as_deref(), note.as_deref())
        }
        Some(Commands::Delete { id }) => run_delete(app, &id),
        Some(Commands::Restore { id }) => run_restore(app, &id),
        Some(Commands::Purge { id }) => run_purge(app, &id),
        Some(Commands::Sync { force }) => run_sync(app, force).await,
        Some(Commands::Watch) => run_watch(app).await,
        Some(Commands::Status { json }) => run_status(app, json),
        Some(Commands::SignIn { account, strategy }) => run_sign_in(app, &account, strategy).await,
        Some(Commands::SignOut) => run_sign_out(app),
        Some(Commands::Queue { command }) => match command {
            QueueCommands::List { json } => run_queue_list(app, json),
            QueueCommands::Clear { yes } => run_queue_clear(app, yes),
        },
        // Quick add: habitor "drink water"
        None => run_add(app, habit, None),
    }
}
