//! Fetch command - crawl seeds and their dependency closure into the local repository

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use mvngraph_core::{ClosureReport, FailureReport, ManifestSource};

use super::{describe, report_rejected_seeds, Project};
use crate::progress::{finish_spinner, finish_spinner_warn, spinner};
use crate::GlobalOptions;

/// Arguments for the fetch command
#[derive(Args, Debug, Clone, Default)]
pub struct FetchArgs {
    /// Namespace to discover seeds under (e.g. `org.apache.commons`)
    pub namespace: Option<String>,

    /// Newline-delimited seed list (URLs, local paths or group:artifact:version)
    #[arg(long, value_name = "FILE")]
    pub seeds: Option<PathBuf>,

    /// Also write the failure report as JSON
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

/// Execute the fetch command
pub async fn execute(args: FetchArgs, project: Project, global: GlobalOptions) -> Result<()> {
    let report = crawl(&project, &args, global.quiet).await?;
    emit_failures(&report.failures, args.report.as_deref())
}

/// Derive seeds and expand them into their closure.
pub async fn crawl(project: &Project, args: &FetchArgs, quiet: bool) -> Result<ClosureReport> {
    let seeds = project
        .seeds(args.namespace.as_deref(), args.seeds.as_deref())
        .await?;
    report_rejected_seeds(&seeds, quiet);

    let fetcher = project.fetcher()?;
    let crawler = project.crawler(fetcher as Arc<dyn ManifestSource>);

    let pb = spinner(&format!("Crawling from {}", describe(&seeds.coordinates)), quiet);
    let report = crawler.expand(seeds.coordinates).await;

    let summary = format!(
        "Resolved {} manifests in {} rounds ({} downloaded)",
        report.manifests.len(),
        report.rounds,
        report.fetched
    );
    if report.failures.is_empty() {
        finish_spinner(pb, &summary);
    } else {
        finish_spinner_warn(pb, &format!("{}, {} failures", summary, report.failures.len()));
    }

    Ok(report)
}

/// Print the end-of-run failure report and optionally write it as JSON.
///
/// Failures never change the exit status.
pub fn emit_failures(failures: &FailureReport, json_path: Option<&Path>) -> Result<()> {
    let mut failures = failures.clone();
    failures.sort();

    if !failures.is_empty() {
        println!("Failures ({}):", failures.len());
        print!("{}", failures);
    }

    if let Some(path) = json_path {
        let json = failures.to_json().context("Failed to serialize failure report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
    }
    Ok(())
}
