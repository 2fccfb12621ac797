use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use portal_sync::cli::args::{Cli, Commands};
use portal_sync::cli::commands;
use portal_sync::config::{Config, Paths};
use portal_sync::error::SyncError;
use portal_sync::sync::{RouteTable, SyncQueue};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        let code = e.downcast_ref::<SyncError>().map_or(1, SyncError::exit_code);
        std::process::exit(code);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = Paths::resolve(cli.data_dir.as_deref())?;
    let config = Config::load(&paths)?;
    let format = cli.output.unwrap_or(config.general.default_output);

    let output = match cli.command {
        Commands::Config => commands::show_config(&config, &paths, format)?,
        Commands::Completions { shell } => commands::completions(shell)?,
        command => {
            let queue = Arc::new(SyncQueue::open(&paths)?);
            dispatch(command, queue, &config, format).await?
        },
    };

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

async fn dispatch(
    command: Commands,
    queue: Arc<SyncQueue>,
    config: &Config,
    format: portal_sync::OutputFormat,
) -> Result<String, SyncError> {
    match command {
        Commands::Enqueue {
            entity,
            operation_type,
            id,
            payload,
        } => {
            let routes = RouteTable::new(config.sync.routes.clone());
            commands::enqueue(&queue, &routes, &entity, &operation_type, id, &payload, format)
        },
        Commands::Status => commands::status(&queue, format),
        Commands::List { status, limit } => commands::list(&queue, &status, limit, format),
        Commands::Run { dry_run } => commands::run(queue, config, dry_run, format).await,
        Commands::Daemon => commands::daemon(queue, config, format).await,
        Commands::Retry { all, id } => commands::retry(&queue, all, id, format),
        Commands::Remove { id } => commands::remove(&queue, id, format),
        Commands::Clear {
            dead_letters,
            all,
            force,
        } => commands::clear(&queue, dead_letters, all, force, format),
        Commands::Config | Commands::Completions { .. } => Ok(String::new()),
    }
}
