//! jobwatch - submit jobs to a job store and track them to completion.
//!
//! Provides create and import tracking with a live progress bar, plus plain
//! store operations (status, list, delete) and a server-work simulator for
//! mock stores.

mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use commands::{config, job, store};
use jobwatch_core::config::Config;
use jobwatch_core::jobs::{HttpJobStore, JobStore, MemoryJobStore};
use jobwatch_core::telemetry::init_logging;
use output::OutputFormat;

/// jobwatch - track long-running jobs to completion
#[derive(Parser)]
#[command(
    name = "jobwatch",
    version = "0.1.0",
    about = "Submit jobs and track them to completion",
    long_about = "Creates or imports jobs on a REST job store and polls them until they finish, \
                  with adaptive backoff and optimistic progress.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "JOBWATCH_CONFIG")]
    config: Option<String>,

    /// Job store URL, overrides the configuration
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Use an in-process store instead of the HTTP store
    #[arg(long, global = true)]
    offline: bool,

    /// Log level, overrides the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a job and track it to completion
    Create(job::CreateArgs),

    /// Import a job from a file and track it to completion
    Import(job::ImportArgs),

    /// Show the current record of a job
    Status {
        /// Job ID
        id: String,
    },

    /// List all jobs
    List,

    /// Delete a job
    Delete {
        /// Job ID
        id: String,
    },

    /// Drive a job through simulated progress steps
    Simulate(store::SimulateArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

/// Resolved configuration and store shared by all commands.
pub struct App {
    pub config: Config,
    pub store: Arc<dyn JobStore>,
}

impl App {
    fn build(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path))?,
            None => Config::load().context("Failed to load configuration")?,
        };
        if let Some(url) = &cli.base_url {
            config.store.base_url = url.clone();
        }
        if let Some(level) = &cli.log_level {
            config.logging.level = level.clone();
        }

        let store: Arc<dyn JobStore> = if cli.offline {
            Arc::new(MemoryJobStore::new())
        } else {
            Arc::new(HttpJobStore::new(&config.store).context("Failed to build HTTP job store")?)
        };

        Ok(Self { config, store })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let app = match App::build(&cli) {
        Ok(app) => app,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    };
    init_logging(&app.config.logging)?;

    let format = cli.output;
    let result = match cli.command {
        Commands::Create(args) => job::create(args, &app, format).await,
        Commands::Import(args) => job::import(args, &app, format).await,
        Commands::Status { id } => store::status(&id, &app, format).await,
        Commands::List => store::list(&app, format).await,
        Commands::Delete { id } => store::delete(&id, &app, format).await,
        Commands::Simulate(args) => store::simulate(args, &app, format).await,
        Commands::Config(cmd) => config::execute(cmd, &app, format),
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
