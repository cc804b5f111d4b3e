//! mvngraph Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.mvngraph/config.toml`
//! - Local config: `.mvngraph/config.toml` (in the project directory)
//! - CLI overrides via `ConfigOverrides`
//!
//! Configuration is merged in order: global → local → CLI overrides.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Public central repository.
pub const CENTRAL_MIRROR_URL: &str = "https://repo1.maven.org/maven2";

/// Root configuration for mvngraph.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct GraphConfig {
    /// Local repository and mirrors
    pub repository: RepositoryConfig,

    /// Manifest fetching and crawling
    pub fetch: FetchConfig,

    /// Effective manifest resolution
    pub resolver: ResolverSettings,

    /// Graph import
    pub import: ImportConfig,

    /// Directory-listing discovery
    pub listing: ListingSettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Local repository layout and remote mirrors.
///
/// # Example TOML
///
/// ```toml
/// [repository]
/// local_root = "./repository"
/// manifest_extension = "pom"
///
/// [[repository.mirrors]]
/// id = "central"
/// url = "https://repo1.maven.org/maven2"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Root of the local repository (relative paths resolve against the project directory)
    pub local_root: PathBuf,

    /// Manifest file extension
    pub manifest_extension: String,

    /// Remote repositories, tried in order
    pub mirrors: Vec<MirrorConfig>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            local_root: PathBuf::from("./repository"),
            manifest_extension: "pom".to_string(),
            mirrors: vec![MirrorConfig::central()],
        }
    }
}

/// A named remote repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MirrorConfig {
    pub id: String,
    pub url: String,
}

impl MirrorConfig {
    pub fn central() -> Self {
        Self {
            id: "central".to_string(),
            url: CENTRAL_MIRROR_URL.to_string(),
        }
    }
}

/// Fetching and crawl limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// Concurrent fetches and resolutions per crawl round
    pub concurrency: usize,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Retries per mirror for transient failures
    pub max_retries: u32,

    /// Wall-clock budget for a whole crawl
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawl_timeout_secs: Option<u64>,

    /// Remove manifests that fail to parse from the local repository
    pub evict_malformed: bool,

    /// User-Agent header for remote requests
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            timeout_secs: 30,
            max_retries: 2,
            crawl_timeout_secs: None,
            evict_malformed: true,
            user_agent: format!("mvngraph/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Resolver behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolverSettings {
    /// Treat missing identity fields and versionless dependencies as errors
    pub strict: bool,

    /// Maximum parent chain length
    pub max_parent_depth: usize,

    /// Parsed manifests kept in memory
    pub raw_cache_capacity: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            strict: false,
            max_parent_depth: 32,
            raw_cache_capacity: 4096,
        }
    }
}

/// Graph import settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImportConfig {
    /// Writes per committed batch
    pub batch_size: usize,

    /// SQLite graph database (relative paths resolve against the project directory)
    pub graph_db: PathBuf,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            graph_db: PathBuf::from("mvngraph.db"),
        }
    }
}

/// Directory-listing crawl pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListingSettings {
    /// Minimum delay between listing requests in milliseconds
    pub request_delay_ms: u64,
}

impl Default for ListingSettings {
    fn default() -> Self {
        Self {
            request_delay_ms: 100,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: LogFormat,

    /// Log file path (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON structured logging
    Json,
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// CLI overrides for configuration values.
///
/// Used to apply command-line arguments over file-based config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override local repository root
    pub local_root: Option<PathBuf>,

    /// Extra mirror URLs, registered after the configured ones
    pub extra_mirrors: Vec<String>,

    /// Override graph database path
    pub graph_db: Option<PathBuf>,

    /// Override log level
    pub log_level: Option<String>,

    /// Override strict resolution
    pub strict: Option<bool>,

    /// Override crawl concurrency
    pub concurrency: Option<usize>,
}

impl GraphConfig {
    /// Apply CLI overrides to this configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref root) = overrides.local_root {
            self.repository.local_root = root.clone();
        }

        for (i, url) in overrides.extra_mirrors.iter().enumerate() {
            self.repository.mirrors.push(MirrorConfig {
                id: format!("cli-{}", i + 1),
                url: url.clone(),
            });
        }

        if let Some(ref db) = overrides.graph_db {
            self.import.graph_db = db.clone();
        }

        if let Some(ref level) = overrides.log_level {
            self.logging.level = level.clone();
        }

        if let Some(strict) = overrides.strict {
            self.resolver.strict = strict;
        }

        if let Some(concurrency) = overrides.concurrency {
            self.fetch.concurrency = concurrency;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.mirrors.is_empty() {
            return Err(ConfigError::NoMirrors);
        }
        for mirror in &self.repository.mirrors {
            if !(mirror.url.starts_with("http://") || mirror.url.starts_with("https://")) {
                return Err(ConfigError::unsupported_mirror(&mirror.id, &mirror.url));
            }
        }
        if self.repository.manifest_extension.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "repository.manifest_extension",
                "must not be empty",
            ));
        }
        if self.fetch.concurrency == 0 {
            return Err(ConfigError::zero("fetch.concurrency"));
        }
        if self.import.batch_size == 0 {
            return Err(ConfigError::zero("import.batch_size"));
        }
        if self.resolver.max_parent_depth == 0 {
            return Err(ConfigError::zero("resolver.max_parent_depth"));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::UnknownLogLevel(self.logging.level.clone()));
        }
        Ok(())
    }

    /// Mirrors in registration order; on a duplicate id the first one wins.
    pub fn mirrors(&self) -> Vec<MirrorConfig> {
        let mut seen = HashSet::new();
        self.repository
            .mirrors
            .iter()
            .filter(|m| {
                let first = seen.insert(m.id.clone());
                if !first {
                    warn!(id = %m.id, url = %m.url, "Ignoring mirror with duplicate id");
                }
                first
            })
            .cloned()
            .collect()
    }

    /// Resolve the local repository root against the project directory.
    pub fn local_root(&self, project_dir: &Path) -> PathBuf {
        resolve_against(project_dir, &self.repository.local_root)
    }

    /// Resolve the graph database path against the project directory.
    pub fn graph_db_path(&self, project_dir: &Path) -> PathBuf {
        resolve_against(project_dir, &self.import.graph_db)
    }
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path.strip_prefix(".").unwrap_or(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = GraphConfig::default();
        assert_eq!(config.repository.mirrors, vec![MirrorConfig::central()]);
        assert_eq!(config.repository.manifest_extension, "pom");
        assert_eq!(config.fetch.concurrency, 8);
        assert_eq!(config.fetch.max_retries, 2);
        assert!(config.fetch.evict_malformed);
        assert!(!config.resolver.strict);
        assert_eq!(config.resolver.max_parent_depth, 32);
        assert_eq!(config.import.batch_size, 1000);
        assert_eq!(config.listing.request_delay_ms, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: GraphConfig = toml::from_str(
            r#"
            [fetch]
            concurrency = 2

            [resolver]
            strict = true
            "#,
        )
        .unwrap();

        assert_eq!(config.fetch.concurrency, 2);
        assert_eq!(config.fetch.timeout_secs, 30);
        assert!(config.resolver.strict);
        assert_eq!(config.repository.mirrors.len(), 1);
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = GraphConfig::default();
        let overrides = ConfigOverrides {
            local_root: Some(PathBuf::from("/srv/m2")),
            extra_mirrors: vec!["http://localhost:8081/repo".to_string()],
            log_level: Some("debug".to_string()),
            strict: Some(true),
            ..Default::default()
        };

        config.apply_overrides(&overrides);

        assert_eq!(config.repository.local_root, PathBuf::from("/srv/m2"));
        assert_eq!(config.repository.mirrors[0], MirrorConfig::central());
        assert_eq!(config.repository.mirrors[1].id, "cli-1");
        assert_eq!(config.logging.level, "debug");
        assert!(config.resolver.strict);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = GraphConfig::default();
        config.repository.mirrors.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoMirrors)));

        let mut config = GraphConfig::default();
        config.repository.mirrors[0].url = "ftp://example.org".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedMirrorUrl { ref id, .. }) if id == "central"
        ));

        let mut config = GraphConfig::default();
        config.fetch.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = GraphConfig::default();
        config.import.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = GraphConfig::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::UnknownLogLevel(_))));
    }

    #[test]
    fn test_duplicate_mirror_id_keeps_first() {
        let mut config = GraphConfig::default();
        config.repository.mirrors.push(MirrorConfig {
            id: "central".to_string(),
            url: "http://shadow.example".to_string(),
        });

        let mirrors = config.mirrors();
        assert_eq!(mirrors, vec![MirrorConfig::central()]);
    }

    #[test]
    fn test_path_resolution() {
        let config = GraphConfig::default();
        let project = PathBuf::from("/home/user/crawl");

        assert_eq!(config.local_root(&project), PathBuf::from("/home/user/crawl/repository"));
        assert_eq!(config.graph_db_path(&project), PathBuf::from("/home/user/crawl/mvngraph.db"));

        let mut config = GraphConfig::default();
        config.import.graph_db = PathBuf::from("/var/lib/graph.db");
        assert_eq!(config.graph_db_path(&project), PathBuf::from("/var/lib/graph.db"));
    }

    #[test]
    fn test_toml_roundtrip_of_logging_format() {
        let config: GraphConfig = toml::from_str(
            r#"
            [logging]
            format = "json"
            file = "/tmp/mvngraph.log"
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.file, Some(PathBuf::from("/tmp/mvngraph.log")));
    }
}
