//! Config command - View and manage configuration
//!
//! - Show the effective configuration and where it came from
//! - Initialize a local configuration file

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;

use super::{config_loader, print_info, resolve_project_dir};
use crate::GlobalOptions;

/// Config management commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show(ShowArgs),

    /// Create `.mvngraph/config.toml` with default values
    Init,
}

/// Arguments for the show command
#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Configuration paths
#[derive(Debug, Clone, Serialize)]
pub struct ConfigPaths {
    /// Global config file path
    pub global: Option<PathBuf>,
    /// Local config file path
    pub local: PathBuf,
    /// Whether global config exists
    pub global_exists: bool,
    /// Whether local config exists
    pub local_exists: bool,
}

/// Execute the config command
pub async fn execute(cmd: ConfigCommand, global: GlobalOptions) -> Result<()> {
    match cmd {
        ConfigCommand::Show(args) => execute_show(args, global),
        ConfigCommand::Init => execute_init(global),
    }
}

fn execute_show(args: ShowArgs, global: GlobalOptions) -> Result<()> {
    let project_dir = resolve_project_dir(&global)?;
    let mut loader = config_loader(&global);
    let effective = loader
        .load(&project_dir, Some(&global.to_config_overrides()))
        .context("Failed to load configuration")?;

    let global_path = loader.global_config_path();
    let local_path = loader.local_config_path(&project_dir);
    let paths = ConfigPaths {
        global_exists: global_path.as_ref().is_some_and(|p| p.exists()),
        global: global_path,
        local_exists: local_path.exists(),
        local: local_path,
    };

    if args.json {
        let out = serde_json::json!({ "paths": paths, "config": effective });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let source = |path: &Option<PathBuf>, exists: bool| match (path, exists) {
        (Some(p), true) => p.display().to_string(),
        (Some(p), false) => format!("{} (not found)", p.display()),
        (None, _) => "(no home directory)".to_string(),
    };
    println!("# global: {}", source(&paths.global, paths.global_exists));
    println!("# local:  {}", source(&Some(paths.local.clone()), paths.local_exists));
    println!("# local repository: {}", effective.local_root(&project_dir).display());
    println!("# graph database:   {}", effective.graph_db_path(&project_dir).display());
    println!();
    print!(
        "{}",
        toml::to_string_pretty(&effective).context("Failed to render configuration")?
    );
    Ok(())
}

fn execute_init(global: GlobalOptions) -> Result<()> {
    let project_dir = resolve_project_dir(&global)?;
    let loader = config_loader(&global);
    let path = loader.local_config_path(&project_dir);
    let existed = path.exists();

    let path = loader
        .init_local(&project_dir)
        .context("Failed to initialize configuration")?;

    if existed {
        print_info(&format!("Configuration already exists: {}", path.display()), global.quiet);
    } else {
        println!("Created {}", path.display());
    }
    Ok(())
}
