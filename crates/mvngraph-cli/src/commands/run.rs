//! Run command - fetch followed by import of the crawled manifests

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::fetch::{crawl, emit_failures, FetchArgs};
use super::import::import_manifests;
use super::Project;
use crate::GlobalOptions;

/// Arguments for the run command
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub fetch: FetchArgs,

    /// Graph database file (defaults to `import.graph_db`)
    #[arg(long, value_name = "FILE")]
    pub db: Option<PathBuf>,
}

/// Execute the run command
pub async fn execute(args: RunArgs, project: Project, global: GlobalOptions) -> Result<()> {
    let report = crawl(&project, &args.fetch, global.quiet).await?;
    import_manifests(&project, &report.manifests, args.db.as_deref(), global.quiet)?;
    emit_failures(&report.failures, args.fetch.report.as_deref())
}
