//! Configuration loader with inheritance support.
//!
//! Loads configuration from multiple sources and merges them:
//! 1. Global config: `~/.mvngraph/config.toml`
//! 2. Local config: `.mvngraph/config.toml` (in the project directory), or an
//!    explicit file given with [`ConfigLoader::with_config_file`]
//! 3. CLI overrides
//!
//! Later sources override earlier ones.

use crate::error::ConfigError;
use crate::{
    ConfigOverrides, FetchConfig, GraphConfig, ImportConfig, ListingSettings, LoggingConfig,
    RepositoryConfig, ResolverSettings,
};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Global configuration directory name.
const GLOBAL_CONFIG_DIR: &str = ".mvngraph";

/// Local configuration directory name.
const LOCAL_CONFIG_DIR: &str = ".mvngraph";

/// Configuration loader with caching and inheritance support.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Global config directory (e.g., `~/.mvngraph`)
    global_config_dir: Option<PathBuf>,

    /// Explicit local config file, replacing `.mvngraph/config.toml`
    config_file: Option<PathBuf>,

    /// Cached global config
    global_config: Option<GraphConfig>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    ///
    /// Automatically detects the global config directory (`~/.mvngraph`).
    pub fn new() -> Self {
        Self {
            global_config_dir: dirs::home_dir().map(|h| h.join(GLOBAL_CONFIG_DIR)),
            config_file: None,
            global_config: None,
        }
    }

    /// Create a loader with a custom global config directory.
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_config_dir: Some(global_dir.into()),
            config_file: None,
            global_config: None,
        }
    }

    /// Read the local layer from `path` instead of the project directory.
    ///
    /// Unlike the default local file, an explicit file must exist.
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Get the global config file path.
    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_config_dir
            .as_ref()
            .map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Get the local config file path for a project directory.
    pub fn local_config_path(&self, project_dir: &Path) -> PathBuf {
        match &self.config_file {
            Some(file) => file.clone(),
            None => project_dir.join(LOCAL_CONFIG_DIR).join(CONFIG_FILE_NAME),
        }
    }

    /// Load configuration for a project directory with optional CLI overrides.
    ///
    /// Merges config in order: global → local → overrides, then validates.
    pub fn load(
        &mut self,
        project_dir: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<GraphConfig, ConfigError> {
        let mut config = GraphConfig::default();

        if let Some(global_config) = self.load_global()? {
            config = merge_configs(config, global_config);
        }

        if let Some(local_config) = self.load_local(project_dir)? {
            config = merge_configs(config, local_config);
        }

        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load only the global configuration.
    pub fn load_global(&mut self) -> Result<Option<GraphConfig>, ConfigError> {
        if let Some(ref config) = self.global_config {
            return Ok(Some(config.clone()));
        }

        let Some(global_path) = self.global_config_path() else {
            debug!("No home directory found, skipping global config");
            return Ok(None);
        };

        if !global_path.exists() {
            trace!("Global config not found at {:?}", global_path);
            return Ok(None);
        }

        debug!("Loading global config from {:?}", global_path);
        let config = load_config_file(&global_path)?;
        self.global_config = Some(config.clone());

        Ok(Some(config))
    }

    /// Load only the local configuration for a project directory.
    pub fn load_local(&self, project_dir: &Path) -> Result<Option<GraphConfig>, ConfigError> {
        let local_path = self.local_config_path(project_dir);

        if self.config_file.is_none() && !local_path.exists() {
            trace!("Local config not found at {:?}", local_path);
            return Ok(None);
        }

        debug!("Loading local config from {:?}", local_path);
        load_config_file(&local_path).map(Some)
    }

    /// Save configuration to the local config file for a project directory.
    pub fn save_local(&self, project_dir: &Path, config: &GraphConfig) -> Result<(), ConfigError> {
        let local_path = self.local_config_path(project_dir);
        save_config_file(&local_path, config)
    }

    /// Initialize local configuration for a project directory.
    ///
    /// Creates `.mvngraph/config.toml` with default configuration unless it
    /// already exists.
    pub fn init_local(&self, project_dir: &Path) -> Result<PathBuf, ConfigError> {
        let config_path = self.local_config_path(project_dir);
        if !config_path.exists() {
            save_config_file(&config_path, &GraphConfig::default())?;
        }
        Ok(config_path)
    }
}

/// Load a configuration file from disk.
fn load_config_file(path: &Path) -> Result<GraphConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;

    toml::from_str(&content).map_err(|e| ConfigError::parse_toml(path, e))
}

/// Save a configuration file to disk.
fn save_config_file(path: &Path, config: &GraphConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
}

/// Merge two configurations, with `overlay` taking precedence.
///
/// A field in `overlay` wins when it differs from the default, which lets a
/// partial file override only what it names.
fn merge_configs(base: GraphConfig, overlay: GraphConfig) -> GraphConfig {
    GraphConfig {
        repository: merge_repository(base.repository, overlay.repository),
        fetch: merge_fetch(base.fetch, overlay.fetch),
        resolver: merge_resolver(base.resolver, overlay.resolver),
        import: merge_import(base.import, overlay.import),
        listing: merge_listing(base.listing, overlay.listing),
        logging: merge_logging(base.logging, overlay.logging),
    }
}

fn pick<T: PartialEq>(base: T, overlay: T, default: T) -> T {
    if overlay != default {
        overlay
    } else {
        base
    }
}

fn merge_repository(base: RepositoryConfig, overlay: RepositoryConfig) -> RepositoryConfig {
    let default = RepositoryConfig::default();
    RepositoryConfig {
        local_root: pick(base.local_root, overlay.local_root, default.local_root),
        manifest_extension: pick(
            base.manifest_extension,
            overlay.manifest_extension,
            default.manifest_extension,
        ),
        // a mirror list replaces the inherited one as a whole
        mirrors: pick(base.mirrors, overlay.mirrors, default.mirrors),
    }
}

fn merge_fetch(base: FetchConfig, overlay: FetchConfig) -> FetchConfig {
    let default = FetchConfig::default();
    FetchConfig {
        concurrency: pick(base.concurrency, overlay.concurrency, default.concurrency),
        timeout_secs: pick(base.timeout_secs, overlay.timeout_secs, default.timeout_secs),
        max_retries: pick(base.max_retries, overlay.max_retries, default.max_retries),
        crawl_timeout_secs: overlay.crawl_timeout_secs.or(base.crawl_timeout_secs),
        evict_malformed: pick(base.evict_malformed, overlay.evict_malformed, default.evict_malformed),
        user_agent: pick(base.user_agent, overlay.user_agent, default.user_agent),
    }
}

fn merge_resolver(base: ResolverSettings, overlay: ResolverSettings) -> ResolverSettings {
    let default = ResolverSettings::default();
    ResolverSettings {
        strict: pick(base.strict, overlay.strict, default.strict),
        max_parent_depth: pick(
            base.max_parent_depth,
            overlay.max_parent_depth,
            default.max_parent_depth,
        ),
        raw_cache_capacity: pick(
            base.raw_cache_capacity,
            overlay.raw_cache_capacity,
            default.raw_cache_capacity,
        ),
    }
}

fn merge_import(base: ImportConfig, overlay: ImportConfig) -> ImportConfig {
    let default = ImportConfig::default();
    ImportConfig {
        batch_size: pick(base.batch_size, overlay.batch_size, default.batch_size),
        graph_db: pick(base.graph_db, overlay.graph_db, default.graph_db),
    }
}

fn merge_listing(base: ListingSettings, overlay: ListingSettings) -> ListingSettings {
    ListingSettings {
        request_delay_ms: pick(
            base.request_delay_ms,
            overlay.request_delay_ms,
            ListingSettings::default().request_delay_ms,
        ),
    }
}

fn merge_logging(base: LoggingConfig, overlay: LoggingConfig) -> LoggingConfig {
    LoggingConfig {
        level: pick(base.level, overlay.level, "info".to_string()),
        format: pick(base.format, overlay.format, Default::default()),
        file: overlay.file.or(base.file),
    }
}
