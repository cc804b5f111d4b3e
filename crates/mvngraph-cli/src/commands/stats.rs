//! Stats command - node and edge counts of the graph database

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use mvngraph_core::{GraphStats, GraphStore};

use super::Project;

/// Arguments for the stats command
#[derive(Args, Debug, Clone, Default)]
pub struct StatsArgs {
    /// Graph database file (defaults to `import.graph_db`)
    #[arg(long, value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the stats command
pub async fn execute(args: StatsArgs, project: Project) -> Result<()> {
    let path = project.graph_db_path(args.db.as_deref());
    if !path.exists() {
        bail!("Graph database not found: {} (run `mvngraph import` first)", path.display());
    }

    let store = project.open_store(args.db.as_deref())?;
    let stats = store.stats()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{}", render(&stats));
    }
    Ok(())
}

fn render(stats: &GraphStats) -> String {
    let mut out = format!("Nodes: {}\n", stats.node_count());
    for (label, count) in &stats.nodes {
        out.push_str(&format!("  {:<14} {}\n", label, count));
    }
    out.push_str(&format!("  {:<14} {}\n", "(missing)", stats.missing_versions));
    out.push_str(&format!("Edges: {}\n", stats.edge_count()));
    for (edge_type, count) in &stats.edges {
        out.push_str(&format!("  {:<14} {}\n", edge_type, count));
    }
    out
}
