//! mvngraph CLI - Maven repository crawling and dependency graph import
//!
//! Fetches manifests from remote mirrors into a local repository, expands
//! their dependency closure and imports the result into a graph database.
//!
//! # Usage
//!
//! ```bash
//! # Crawl everything published under a namespace
//! mvngraph fetch org.apache.commons
//!
//! # Crawl from an explicit seed list, then import
//! mvngraph run --seeds poms.txt --report failures.json
//!
//! # Import whatever is already in the local repository
//! mvngraph import
//!
//! # Show node and edge counts
//! mvngraph stats
//! ```

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mvngraph_config::{LogFormat, LoggingConfig};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;
mod progress;

/// mvngraph - Maven dependency graph crawler
#[derive(Parser, Debug)]
#[command(name = "mvngraph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Args, Debug, Clone)]
struct GlobalOptions {
    /// Project directory holding `.mvngraph/config.toml` (defaults to the current directory)
    #[arg(long, short = 'r', global = true, env = "MVNGRAPH_REPO")]
    repo: Option<PathBuf>,

    /// Path to configuration file, replacing the project's local config
    #[arg(long, short = 'c', global = true, env = "MVNGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Additional mirror URL, tried after the configured mirrors (repeatable)
    #[arg(long = "mirror", global = true, value_name = "URL")]
    mirrors: Vec<String>,
}

impl GlobalOptions {
    /// Convert global options to config overrides
    pub fn to_config_overrides(&self) -> mvngraph_config::ConfigOverrides {
        mvngraph_config::ConfigOverrides {
            extra_mirrors: self.mirrors.clone(),
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch seed manifests and their dependency closure
    Fetch(commands::fetch::FetchArgs),

    /// Import every manifest in the local repository into the graph
    Import(commands::import::ImportArgs),

    /// Fetch, then import the crawled manifests
    Run(commands::run::RunArgs),

    /// Show graph statistics
    Stats(commands::stats::StatsArgs),

    /// View and manage configuration
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // `config` must work even when the configuration does not load
    let project = commands::Project::load(&cli.global);
    let logging = project.as_ref().ok().map(|p| &p.config.logging);
    init_logging(&cli.global, logging)?;

    match cli.command {
        Commands::Config(cmd) => commands::config::execute(cmd, cli.global).await,
        Commands::Fetch(args) => commands::fetch::execute(args, project?, cli.global).await,
        Commands::Import(args) => commands::import::execute(args, project?, cli.global).await,
        Commands::Run(args) => commands::run::execute(args, project?, cli.global).await,
        Commands::Stats(args) => commands::stats::execute(args, project?).await,
    }
}

/// Install the tracing subscriber.
///
/// `--quiet` and `--verbose` win over the configured level; `MVNGRAPH_LOG`
/// takes a full filter directive and wins over both.
fn init_logging(global: &GlobalOptions, logging: Option<&LoggingConfig>) -> Result<()> {
    let level = if global.quiet {
        "error".to_string()
    } else if global.verbose {
        "debug".to_string()
    } else {
        logging
            .map(|l| l.level.to_lowercase())
            .unwrap_or_else(|| "info".to_string())
    };
    let filter = EnvFilter::try_from_env("MVNGRAPH_LOG").unwrap_or_else(|_| EnvFilter::new(level));

    let json = logging.is_some_and(|l| l.format == LogFormat::Json);
    let file = logging.and_then(|l| l.file.as_deref());
    let builder = FmtSubscriber::builder().with_env_filter(filter);

    match (json, file) {
        (true, Some(path)) => tracing::subscriber::set_global_default(
            builder.json().with_writer(Mutex::new(open_log_file(path)?)).finish(),
        )?,
        (false, Some(path)) => tracing::subscriber::set_global_default(
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(path)?))
                .finish(),
        )?,
        (true, None) => tracing::subscriber::set_global_default(
            builder.json().with_writer(std::io::stderr).finish(),
        )?,
        (false, None) => tracing::subscriber::set_global_default(
            builder.with_writer(std::io::stderr).with_ansi(true).finish(),
        )?,
    }
    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}
