//! Import command - resolve the local repository and write it into the graph database

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use futures::stream::{self, StreamExt};
use mvngraph_core::{
    scan_local_repository, EffectiveManifest, FailureReport, GraphImporter, ImportStats,
    ManifestSource,
};
use tracing::warn;

use super::fetch::emit_failures;
use super::{print_info, Project};
use crate::progress::{finish_progress, finish_spinner, progress_bar, spinner};
use crate::GlobalOptions;

/// Arguments for the import command
#[derive(Args, Debug, Clone, Default)]
pub struct ImportArgs {
    /// Graph database file (defaults to `import.graph_db`)
    #[arg(long, value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Also write the failure report as JSON
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

/// Execute the import command
pub async fn execute(args: ImportArgs, project: Project, global: GlobalOptions) -> Result<()> {
    let (manifests, failures) = resolve_local(&project, global.quiet).await?;
    import_manifests(&project, &manifests, args.db.as_deref(), global.quiet)?;
    emit_failures(&failures, args.report.as_deref())
}

/// Resolve every manifest found in the local repository.
async fn resolve_local(
    project: &Project,
    quiet: bool,
) -> Result<(Vec<EffectiveManifest>, FailureReport)> {
    let local_root = project.local_root();
    let paths = scan_local_repository(&local_root, project.extension());
    print_info(
        &format!("Found {} manifests under {}", paths.len(), local_root.display()),
        quiet,
    );

    let fetcher = project.fetcher()?;
    let resolver = project.resolver(fetcher as Arc<dyn ManifestSource>);
    let pb = progress_bar(paths.len() as u64, "Resolving", quiet);

    let results: Vec<_> = stream::iter(paths)
        .map(|path| {
            let resolver = Arc::clone(&resolver);
            async move {
                let result = resolver.resolve_effective(&path).await;
                (path, result)
            }
        })
        .buffer_unordered(project.config.fetch.concurrency.max(1))
        .inspect(|_| {
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        })
        .collect()
        .await;
    finish_progress(pb);

    let mut manifests = Vec::new();
    let mut failures = FailureReport::new();
    for (path, result) in results {
        match result {
            Ok(manifest) => manifests.push(manifest),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping manifest");
                failures.record(path.display().to_string(), e.kind(), e.to_string());
            }
        }
    }
    manifests.sort_by(|a, b| a.coordinate.cmp(&b.coordinate));
    manifests.dedup_by(|a, b| a.coordinate == b.coordinate);

    Ok((manifests, failures))
}

/// Run the two-pass import into the project's graph database.
///
/// Store failures abort the command.
pub fn import_manifests(
    project: &Project,
    manifests: &[EffectiveManifest],
    db: Option<&Path>,
    quiet: bool,
) -> Result<ImportStats> {
    let store = project.open_store(db)?;
    let pb = spinner(&format!("Importing {} manifests", manifests.len()), quiet);

    let stats = GraphImporter::new(&store, project.config.import.batch_size)
        .import(manifests)
        .context("Graph import failed")?;

    finish_spinner(
        pb,
        &format!(
            "Imported {} versions ({} new, {} promoted), {} placeholders, {} dependency edges",
            stats.manifests,
            stats.versions_created,
            stats.versions_promoted,
            stats.placeholders_created,
            stats.dependency_edges_created
        ),
    );
    print_info(
        &format!("Graph database: {}", project.graph_db_path(db).display()),
        quiet,
    );
    Ok(stats)
}
