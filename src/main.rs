//! Timely planner
//!
//! Serves the task tree over HTTP and offers a few read-only CLI views.

use anyhow::Result;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use timely::api;
use timely::cli::{Cli, Command, ListArgs};
use timely::config::Config;
use timely::db::Database;
use timely::format::{format_forest_markdown, format_tree_markdown};
use timely::time::local_now;
use timely::types::TaskId;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn init_logging(cli: &Cli) -> Result<()> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn open_database(config: &Config) -> Result<Arc<Database>> {
    config.ensure_db_dir()?;
    let db = Database::open(&config.server.db_path)?.with_tree_depth(config.server.tree_depth);
    info!(
        path = %config.server.db_path.display(),
        tree_depth = config.server.tree_depth,
        "Database opened"
    );
    Ok(Arc::new(db))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    let mut config = Config::load_or_default(cli.config.as_deref().map(Path::new))?;

    // Override paths from CLI arguments
    if let Some(db_path) = &cli.database {
        config.server.db_path = db_path.into();
    }

    match cli.command {
        Some(Command::List(args)) => run_list(&config, &args)?,
        Some(Command::Show { id }) => run_show(&config, id)?,
        Some(Command::Serve { host, port }) => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await?;
        }
        None => run_server(config).await?,
    }

    Ok(())
}

fn run_list(config: &Config, args: &ListArgs) -> Result<()> {
    let db = open_database(config)?;
    let trees = db.list_root_tasks(&args.to_filters(), local_now())?;
    print!("{}", format_forest_markdown(&trees));
    Ok(())
}

fn run_show(config: &Config, id: TaskId) -> Result<()> {
    let db = open_database(config)?;
    let tree = db.get_task_tree(id)?;
    print!("{}", format_tree_markdown(&tree));
    Ok(())
}

/// Run the HTTP API until Ctrl-C.
async fn run_server(config: Config) -> Result<()> {
    let db = open_database(&config)?;
    let handle = api::start_server(db, &config.server).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    handle.shutdown().await;

    Ok(())
}
