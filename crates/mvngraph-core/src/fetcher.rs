//! Remote-to-local manifest fetching.
//!
//! [`RepositoryFetcher`] mirrors manifests from one or more remote repositories
//! into a local repository tree. Mirrors are tried in registration order; each
//! mirror gets a bounded number of retries for transient failures before the
//! next one is consulted.
//!
//! Writes go through a temporary file in the destination directory that is
//! renamed into place once the body is complete, so a manifest path either
//! does not exist or holds a complete download. Concurrent requests for the
//! same coordinate are collapsed onto a single download, and a coordinate no
//! mirror could provide is not requested again for the fetcher's lifetime.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::coordinate::{Coordinate, DEFAULT_MANIFEST_EXTENSION};

/// Default request timeout (seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default retry attempts per mirror for transient failures
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Base delay for exponential backoff (milliseconds)
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Default mirror used when none is configured.
pub const CENTRAL_URL: &str = "https://repo1.maven.org/maven2";

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while making a manifest available locally.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every mirror was tried and none produced the manifest
    #[error("Failed to fetch {coordinate} from {mirrors} mirror(s): {last_error}")]
    Exhausted {
        coordinate: Coordinate,
        mirrors: usize,
        last_error: String,
    },

    /// No mirror is registered
    #[error("No repository mirrors configured")]
    NoMirrors,

    /// Writing to the local repository failed
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be built
    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Outcome of a single download attempt against one mirror.
#[derive(Debug)]
enum AttemptError {
    /// The mirror does not have the manifest (not retried)
    NotFound(StatusCode),
    /// Worth retrying against the same mirror
    Transient(String),
    /// Not retried; the next mirror is tried
    Rejected(String),
    /// Local write failure; aborts the whole fetch
    Local(FetchError),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::NotFound(status) => write!(f, "not found ({})", status),
            AttemptError::Transient(msg) | AttemptError::Rejected(msg) => write!(f, "{}", msg),
            AttemptError::Local(e) => write!(f, "{}", e),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// A remote repository base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    pub id: String,
    pub url: String,
}

impl Mirror {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }

    /// The default central repository.
    pub fn central() -> Self {
        Self::new("central", CENTRAL_URL)
    }
}

/// Configuration for [`RepositoryFetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Root of the local repository tree
    pub local_root: PathBuf,
    /// Manifest file extension
    pub extension: String,
    /// Mirrors in priority order
    pub mirrors: Vec<Mirror>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Retries per mirror for transient failures
    pub max_retries: u32,
    /// First backoff delay; doubled after every retry
    pub retry_base_delay: Duration,
    /// User agent sent with every request
    pub user_agent: String,
}

impl FetcherConfig {
    /// Defaults rooted at `local_root` with the central mirror.
    pub fn new(local_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            extension: DEFAULT_MANIFEST_EXTENSION.to_string(),
            mirrors: vec![Mirror::central()],
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            user_agent: concat!("mvngraph/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    /// Replace the mirror list.
    pub fn with_mirrors(mut self, mirrors: Vec<Mirror>) -> Self {
        self.mirrors = mirrors;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }
}

// ============================================================================
// ManifestSource trait
// ============================================================================

/// Something that can make a coordinate's manifest available on local disk.
///
/// The resolver and the closure crawler only depend on this trait, so tests
/// can substitute a purely local source.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Where the manifest for `coordinate` lives (or would live) locally.
    fn local_path(&self, coordinate: &Coordinate) -> PathBuf;

    /// Recover the coordinate a local path was stored under, if it lies in the
    /// repository layout.
    fn coordinate_for(&self, _path: &Path) -> Option<Coordinate> {
        None
    }

    /// Ensure the manifest exists locally, downloading it if needed.
    async fn ensure_local(&self, coordinate: &Coordinate) -> Result<PathBuf, FetchError>;

    /// Remove a local manifest so that a later run fetches it again.
    ///
    /// Returns whether a file was removed.
    fn evict(&self, coordinate: &Coordinate) -> std::io::Result<bool> {
        match std::fs::remove_file(self.local_path(coordinate)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// RepositoryFetcher
// ============================================================================

/// Downloads manifests from remote mirrors into a local repository.
pub struct RepositoryFetcher {
    client: Client,
    local_root: PathBuf,
    extension: String,
    mirrors: RwLock<Vec<Mirror>>,
    max_retries: u32,
    retry_base_delay: Duration,
    /// One lock per coordinate currently being fetched
    inflight: DashMap<Coordinate, Arc<tokio::sync::Mutex<()>>>,
    /// Coordinates every mirror failed on: mirror count and last error
    exhausted: DashMap<Coordinate, (usize, String)>,
    downloads: AtomicUsize,
}

impl RepositoryFetcher {
    /// Create a fetcher from configuration.
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        let fetcher = Self {
            client,
            local_root: config.local_root,
            extension: config.extension,
            mirrors: RwLock::new(Vec::new()),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
            inflight: DashMap::new(),
            exhausted: DashMap::new(),
            downloads: AtomicUsize::new(0),
        };
        for mirror in config.mirrors {
            fetcher.add_mirror(mirror);
        }
        Ok(fetcher)
    }

    /// Register an additional mirror.
    ///
    /// The first registration of an id wins; later ones are ignored and
    /// `false` is returned. A new mirror clears the record of exhausted
    /// coordinates, since it may provide them.
    pub fn add_mirror(&self, mirror: Mirror) -> bool {
        let mut mirrors = self.mirrors.write();
        if mirrors.iter().any(|m| m.id == mirror.id) {
            debug!(id = %mirror.id, "Ignoring duplicate mirror registration");
            return false;
        }
        mirrors.push(mirror);
        self.exhausted.clear();
        true
    }

    /// Registered mirrors in priority order.
    pub fn mirrors(&self) -> Vec<Mirror> {
        self.mirrors.read().clone()
    }

    /// Root of the local repository tree.
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Manifest file extension.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Number of manifests actually downloaded by this fetcher.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::Relaxed)
    }

    /// Number of coordinates no mirror could provide.
    pub fn exhausted_count(&self) -> usize {
        self.exhausted.len()
    }

    fn exhausted_error(&self, coordinate: &Coordinate) -> Option<FetchError> {
        self.exhausted.get(coordinate).map(|entry| {
            let (mirrors, last_error) = entry.value();
            FetchError::Exhausted {
                coordinate: coordinate.clone(),
                mirrors: *mirrors,
                last_error: last_error.clone(),
            }
        })
    }

    fn inflight_lock(&self, coordinate: &Coordinate) -> Arc<tokio::sync::Mutex<()>> {
        self.inflight
            .entry(coordinate.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn fetch(&self, coordinate: &Coordinate, dest: &Path) -> Result<(), FetchError> {
        let mirrors = self.mirrors();
        if mirrors.is_empty() {
            return Err(FetchError::NoMirrors);
        }

        let mut last_error = String::new();
        for mirror in &mirrors {
            match self.download_with_retry(mirror, coordinate, dest).await {
                Ok(()) => {
                    self.downloads.fetch_add(1, Ordering::Relaxed);
                    info!(%coordinate, mirror = %mirror.id, "Fetched manifest");
                    return Ok(());
                }
                Err(AttemptError::Local(e)) => return Err(e),
                Err(e) => {
                    debug!(%coordinate, mirror = %mirror.id, error = %e, "Mirror did not provide manifest");
                    last_error = format!("{}: {}", mirror.id, e);
                }
            }
        }

        warn!(%coordinate, "Manifest not available from any mirror");
        Err(FetchError::Exhausted {
            coordinate: coordinate.clone(),
            mirrors: mirrors.len(),
            last_error,
        })
    }

    /// Try one mirror, retrying transient failures with exponential backoff.
    async fn download_with_retry(
        &self,
        mirror: &Mirror,
        coordinate: &Coordinate,
        dest: &Path,
    ) -> Result<(), AttemptError> {
        let mut retry_delay = self.retry_base_delay;

        for attempt in 0..=self.max_retries {
            match self.download(mirror, coordinate, dest).await {
                Ok(()) => return Ok(()),
                Err(AttemptError::Transient(msg)) if attempt < self.max_retries => {
                    debug!(%coordinate, mirror = %mirror.id, attempt, error = %msg, "Retrying download");
                    tokio::time::sleep(retry_delay).await;
                    retry_delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }

        Err(AttemptError::Transient("retries exhausted".into()))
    }

    /// A single request; streams the body into a temp file next to `dest`.
    async fn download(
        &self,
        mirror: &Mirror,
        coordinate: &Coordinate,
        dest: &Path,
    ) -> Result<(), AttemptError> {
        let url = coordinate.remote_url(&mirror.url, &self.extension);

        let mut response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                AttemptError::Transient("Request timed out".into())
            } else if e.is_connect() {
                AttemptError::Transient(format!("Connection failed: {}", e))
            } else {
                AttemptError::Transient(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        match status {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND | StatusCode::GONE => return Err(AttemptError::NotFound(status)),
            StatusCode::TOO_MANY_REQUESTS
            | StatusCode::REQUEST_TIMEOUT
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::INTERNAL_SERVER_ERROR => {
                return Err(AttemptError::Transient(format!("HTTP {}", status)))
            }
            _ => return Err(AttemptError::Rejected(format!("HTTP {}", status))),
        }

        let parent = dest
            .parent()
            .ok_or_else(|| AttemptError::Local(FetchError::io(dest, missing_parent())))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AttemptError::Local(FetchError::io(parent, e)))?;

        let temp = tempfile::Builder::new()
            .prefix(".fetch-")
            .suffix(".part")
            .tempfile_in(parent)
            .map_err(|e| AttemptError::Local(FetchError::io(parent, e)))?;
        let std_file = temp
            .as_file()
            .try_clone()
            .map_err(|e| AttemptError::Local(FetchError::io(temp.path(), e)))?;
        let mut file = tokio::fs::File::from_std(std_file);

        // a failed chunk drops `temp`, which deletes the partial file
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AttemptError::Transient(format!("Body read failed: {}", e)))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| AttemptError::Local(FetchError::io(temp.path(), e)))?;
        }
        file.flush()
            .await
            .map_err(|e| AttemptError::Local(FetchError::io(temp.path(), e)))?;
        drop(file);

        temp.persist(dest)
            .map_err(|e| AttemptError::Local(FetchError::io(dest, e.error)))?;
        Ok(())
    }
}

fn missing_parent() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent directory")
}

#[async_trait]
impl ManifestSource for RepositoryFetcher {
    fn local_path(&self, coordinate: &Coordinate) -> PathBuf {
        coordinate.local_path(&self.local_root, &self.extension)
    }

    fn coordinate_for(&self, path: &Path) -> Option<Coordinate> {
        let relative = path.strip_prefix(&self.local_root).ok()?;
        Coordinate::from_relative_path(relative, &self.extension)
    }

    async fn ensure_local(&self, coordinate: &Coordinate) -> Result<PathBuf, FetchError> {
        let dest = self.local_path(coordinate);
        if dest.is_file() {
            return Ok(dest);
        }

        if let Some(err) = self.exhausted_error(coordinate) {
            return Err(err);
        }

        let lock = self.inflight_lock(coordinate);
        let result = {
            let _guard = lock.lock().await;

            // another task may have settled this coordinate while we waited
            if dest.is_file() {
                return Ok(dest);
            }
            if let Some(err) = self.exhausted_error(coordinate) {
                return Err(err);
            }

            let result = self.fetch(coordinate, &dest).await;
            if let Err(FetchError::Exhausted {
                mirrors, last_error, ..
            }) = &result
            {
                self.exhausted
                    .insert(coordinate.clone(), (*mirrors, last_error.clone()));
            }
            result
        };

        // outcome is on disk or recorded above, so a late lock holder sees it
        self.inflight.remove(coordinate);
        result.map(|_| dest)
    }
}

impl std::fmt::Debug for RepositoryFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryFetcher")
            .field("local_root", &self.local_root)
            .field("extension", &self.extension)
            .field("mirrors", &*self.mirrors.read())
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
