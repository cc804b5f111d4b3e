//! CLI command implementations
//!
//! Every command works on a [`Project`]: a directory plus the configuration
//! merged for it. The project turns configuration into core components.

pub mod config;
pub mod fetch;
pub mod import;
pub mod run;
pub mod stats;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use mvngraph_config::{ConfigLoader, GraphConfig};
use mvngraph_core::seeds::DEFAULT_SEED_FILE;
use mvngraph_core::{
    read_seed_file, ClosureConfig, ClosureCrawler, Coordinate, FetcherConfig, ListingConfig,
    ListingCrawler, ManifestResolver, ManifestSource, Mirror, RepositoryFetcher, ResolverConfig,
    SeedList, SqliteGraphStore,
};
use tracing::{info, warn};

use crate::GlobalOptions;

/// Resolve the project directory from options or current directory.
pub fn resolve_project_dir(global: &GlobalOptions) -> Result<PathBuf> {
    match global.repo {
        Some(ref dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create project directory {}", dir.display()))?;
            dir.canonicalize()
                .with_context(|| format!("Invalid project directory {}", dir.display()))
        }
        None => std::env::current_dir().context("Failed to get current directory"),
    }
}

/// Build a config loader honoring `--config`.
pub fn config_loader(global: &GlobalOptions) -> ConfigLoader {
    let loader = ConfigLoader::new();
    match global.config {
        Some(ref file) => loader.with_config_file(file),
        None => loader,
    }
}

/// A project directory and its merged configuration.
#[derive(Debug, Clone)]
pub struct Project {
    pub dir: PathBuf,
    pub config: GraphConfig,
}

impl Project {
    /// Load configuration for the project selected by the global options.
    pub fn load(global: &GlobalOptions) -> Result<Self> {
        let dir = resolve_project_dir(global)?;
        let config = config_loader(global)
            .load(&dir, Some(&global.to_config_overrides()))
            .context("Failed to load configuration")?;
        Ok(Self { dir, config })
    }

    pub fn local_root(&self) -> PathBuf {
        self.config.local_root(&self.dir)
    }

    pub fn extension(&self) -> &str {
        &self.config.repository.manifest_extension
    }

    /// Configured mirrors as core mirrors, first registration winning.
    pub fn mirrors(&self) -> Vec<Mirror> {
        self.config
            .mirrors()
            .into_iter()
            .map(|m| Mirror::new(m.id, m.url))
            .collect()
    }

    pub fn fetcher(&self) -> Result<Arc<RepositoryFetcher>> {
        let mut config = FetcherConfig::new(self.local_root())
            .with_mirrors(self.mirrors())
            .with_extension(self.extension())
            .with_timeout(self.config.fetch.timeout_secs)
            .with_max_retries(self.config.fetch.max_retries);
        config.user_agent = self.config.fetch.user_agent.clone();

        let fetcher = RepositoryFetcher::new(config).context("Failed to create repository fetcher")?;
        Ok(Arc::new(fetcher))
    }

    pub fn resolver(&self, source: Arc<dyn ManifestSource>) -> Arc<ManifestResolver> {
        let settings = &self.config.resolver;
        Arc::new(ManifestResolver::new(
            source,
            ResolverConfig {
                strict: settings.strict,
                max_parent_depth: settings.max_parent_depth,
                raw_cache_capacity: settings.raw_cache_capacity,
            },
        ))
    }

    pub fn crawler(&self, source: Arc<dyn ManifestSource>) -> ClosureCrawler {
        let resolver = self.resolver(Arc::clone(&source));
        let fetch = &self.config.fetch;
        ClosureCrawler::new(
            source,
            resolver,
            ClosureConfig {
                concurrency: fetch.concurrency,
                deadline: fetch.crawl_timeout_secs.map(Duration::from_secs),
                evict_malformed: fetch.evict_malformed,
            },
        )
    }

    /// Directory-listing crawler against the first mirror.
    pub fn listing(&self) -> Result<ListingCrawler> {
        let Some(mirror) = self.mirrors().into_iter().next() else {
            bail!("No mirror configured for directory listing");
        };
        let config = ListingConfig::new(mirror.url)
            .with_extension(self.extension())
            .with_request_delay(Duration::from_millis(self.config.listing.request_delay_ms));
        ListingCrawler::new(config).context("Failed to create listing crawler")
    }

    pub fn graph_db_path(&self, db: Option<&Path>) -> PathBuf {
        match db {
            Some(path) => path.to_path_buf(),
            None => self.config.graph_db_path(&self.dir),
        }
    }

    pub fn open_store(&self, db: Option<&Path>) -> Result<SqliteGraphStore> {
        let path = self.graph_db_path(db);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        SqliteGraphStore::open(&path)
            .with_context(|| format!("Failed to open graph database {}", path.display()))
    }

    /// Seed coordinates, from the first available source:
    /// an explicit seed file, a namespace listing crawl, or `poms.txt` at the
    /// local repository root.
    pub async fn seeds(&self, namespace: Option<&str>, seed_file: Option<&Path>) -> Result<SeedList> {
        let local_root = self.local_root();
        let mirrors = self.mirrors();

        if let Some(file) = seed_file {
            return read_seed_file(file, &mirrors, &local_root, self.extension())
                .with_context(|| format!("Failed to read seed file {}", file.display()));
        }

        if let Some(namespace) = namespace {
            let listing = self.listing()?;
            let urls = listing
                .discover(namespace)
                .await
                .with_context(|| format!("Failed to list namespace '{}'", namespace))?;
            let mut seeds = SeedList::default();
            for url in urls {
                match listing.coordinate_of(&url) {
                    Some(coordinate) => seeds.coordinates.push(coordinate),
                    None => warn!(url = %url, "Listed manifest does not match the repository layout"),
                }
            }
            info!(namespace, seeds = seeds.coordinates.len(), "Discovered seeds");
            return Ok(seeds);
        }

        let default_file = local_root.join(DEFAULT_SEED_FILE);
        if default_file.is_file() {
            info!(file = %default_file.display(), "Using default seed file");
            return read_seed_file(&default_file, &mirrors, &local_root, self.extension())
                .with_context(|| format!("Failed to read seed file {}", default_file.display()));
        }

        bail!(
            "No seeds: pass a NAMESPACE, --seeds <file>, or create {}",
            default_file.display()
        )
    }
}

/// Report rejected seed lines on stderr.
pub fn report_rejected_seeds(seeds: &SeedList, quiet: bool) {
    for rejected in &seeds.rejected {
        print_warning(&rejected.to_string(), quiet);
    }
}

/// Seed coordinates for display.
pub fn describe(coordinates: &[Coordinate]) -> String {
    match coordinates {
        [] => "no seeds".to_string(),
        [one] => one.to_string(),
        many => format!("{} seeds", many.len()),
    }
}

/// Print a warning message to stderr (respects quiet flag).
pub fn print_warning(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("warning: {}", message);
    }
}

/// Print an info message (respects quiet flag).
pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("{}", message);
    }
}
