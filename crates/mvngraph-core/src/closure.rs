//! Dependency closure crawling.
//!
//! [`ClosureCrawler::expand`] starts from a set of seed coordinates and keeps
//! resolving manifests and fetching the dependencies they declare until a
//! round discovers nothing new.
//!
//! Every coordinate moves at most once from unknown into either the known set
//! or the failed set, so the crawl always terminates.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::coordinate::Coordinate;
use crate::fetcher::ManifestSource;
use crate::report::{FailureKind, FailureReport};
use crate::resolver::{EffectiveManifest, ManifestResolver, ResolveError};

/// Default number of concurrent fetches and resolutions.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Crawl behavior switches.
#[derive(Debug, Clone)]
pub struct ClosureConfig {
    /// Concurrent fetches and resolutions per round
    pub concurrency: usize,
    /// Wall-clock budget for the whole crawl
    pub deadline: Option<Duration>,
    /// Delete manifests that fail to parse, ancestors included, once the crawl
    /// ends, so a later run fetches them again
    pub evict_malformed: bool,
}

impl Default for ClosureConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            deadline: None,
            evict_malformed: true,
        }
    }
}

/// Outcome of a crawl.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClosureReport {
    /// Every successfully resolved manifest, sorted by coordinate
    pub manifests: Vec<EffectiveManifest>,
    pub failures: FailureReport,
    /// Number of resolve rounds performed
    pub rounds: usize,
    /// Coordinates newly fetched during the crawl
    pub fetched: usize,
}

impl ClosureReport {
    /// Coordinates of the resolved manifests.
    pub fn coordinates(&self) -> impl Iterator<Item = &Coordinate> {
        self.manifests.iter().map(|m| &m.coordinate)
    }
}

/// Mutable crawl bookkeeping.
#[derive(Default)]
struct CrawlState {
    known: HashSet<Coordinate>,
    failed: HashSet<Coordinate>,
    /// Versionless dependencies already reported, by `group:artifact`
    reported_gaps: HashSet<String>,
    manifests: BTreeMap<Coordinate, EffectiveManifest>,
    /// Unparseable local files found so far, with their coordinates
    malformed: BTreeMap<PathBuf, Coordinate>,
    failures: FailureReport,
    fetched: usize,
}

impl CrawlState {
    fn is_seen(&self, coordinate: &Coordinate) -> bool {
        self.known.contains(coordinate) || self.failed.contains(coordinate)
    }

    fn fail(&mut self, coordinate: Coordinate, kind: FailureKind, message: String) {
        self.failures.record(coordinate.to_string(), kind, message);
        self.known.remove(&coordinate);
        self.failed.insert(coordinate);
    }
}

/// Fixed-point crawler over declared dependencies.
pub struct ClosureCrawler {
    source: Arc<dyn ManifestSource>,
    resolver: Arc<ManifestResolver>,
    config: ClosureConfig,
}

impl ClosureCrawler {
    pub fn new(
        source: Arc<dyn ManifestSource>,
        resolver: Arc<ManifestResolver>,
        config: ClosureConfig,
    ) -> Self {
        Self {
            source,
            resolver,
            config,
        }
    }

    /// Expand `seeds` into their full dependency closure.
    ///
    /// Failures are recorded in the report and never abort the crawl.
    pub async fn expand(&self, seeds: Vec<Coordinate>) -> ClosureReport {
        let deadline = self.config.deadline.map(|d| Instant::now() + d);
        let mut state = CrawlState::default();

        let seeds: BTreeSet<Coordinate> = seeds.iter().map(Coordinate::normalized).collect();
        info!(seeds = seeds.len(), "Starting closure crawl");
        let mut frontier = self.fetch_round(seeds, deadline, &mut state).await;

        let mut rounds = 0;
        while !frontier.is_empty() {
            rounds += 1;
            debug!(round = rounds, frontier = frontier.len(), "Resolving frontier");

            let discovered = self.resolve_round(frontier, deadline, &mut state).await;

            let mut next = Vec::new();
            let mut to_fetch = BTreeSet::new();
            for (coordinate, local) in discovered {
                match local {
                    Some(path) => next.push((coordinate, path)),
                    None => {
                        to_fetch.insert(coordinate);
                    }
                }
            }
            next.extend(self.fetch_round(to_fetch, deadline, &mut state).await);
            frontier = next;
        }

        if self.config.evict_malformed {
            self.evict_malformed(std::mem::take(&mut state.malformed));
        }

        info!(
            rounds,
            resolved = state.manifests.len(),
            failed = state.failures.len(),
            fetched = state.fetched,
            "Closure crawl finished"
        );

        ClosureReport {
            manifests: state.manifests.into_values().collect(),
            failures: state.failures,
            rounds,
            fetched: state.fetched,
        }
    }

    /// Make `coordinates` available locally; successes join the known set.
    async fn fetch_round(
        &self,
        coordinates: BTreeSet<Coordinate>,
        deadline: Option<Instant>,
        state: &mut CrawlState,
    ) -> Vec<(Coordinate, PathBuf)> {
        let wanted: Vec<Coordinate> = coordinates
            .into_iter()
            .filter(|c| !state.is_seen(c))
            .collect();
        if wanted.is_empty() {
            return Vec::new();
        }

        let results: Vec<_> = stream::iter(wanted)
            .map(|coordinate| async move {
                let already_local = self.source.local_path(&coordinate).is_file();
                let result = match deadline {
                    Some(at) => tokio::time::timeout_at(at, self.source.ensure_local(&coordinate))
                        .await
                        .map_err(|_| ()),
                    None => Ok(self.source.ensure_local(&coordinate).await),
                };
                (coordinate, (already_local, result))
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut ready = Vec::new();
        for (coordinate, (already_local, result)) in sorted(results) {
            match result {
                Ok(Ok(path)) => {
                    if !already_local {
                        state.fetched += 1;
                    }
                    state.known.insert(coordinate.clone());
                    ready.push((coordinate, path));
                }
                Ok(Err(e)) => {
                    warn!(%coordinate, error = %e, "Fetch failed");
                    state.fail(coordinate, FailureKind::Fetch, e.to_string());
                }
                Err(_) => state.fail(
                    coordinate,
                    FailureKind::Timeout,
                    "crawl deadline reached before fetch completed".into(),
                ),
            }
        }
        ready
    }

    /// Resolve a frontier, returning newly discovered dependency coordinates.
    ///
    /// Coordinates already present locally come back with their path and skip
    /// the fetch round.
    async fn resolve_round(
        &self,
        frontier: Vec<(Coordinate, PathBuf)>,
        deadline: Option<Instant>,
        state: &mut CrawlState,
    ) -> Vec<(Coordinate, Option<PathBuf>)> {
        let results: Vec<_> = stream::iter(frontier)
            .map(|(coordinate, path)| async move {
                let resolution = self.resolver.resolve_effective(&path);
                let result = match deadline {
                    Some(at) => tokio::time::timeout_at(at, resolution).await.map_err(|_| ()),
                    None => Ok(resolution.await),
                };
                (coordinate, (path, result))
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut discovered: BTreeMap<Coordinate, Option<PathBuf>> = BTreeMap::new();
        for (coordinate, (path, result)) in sorted(results) {
            let manifest = match result {
                Ok(Ok(manifest)) => manifest,
                Ok(Err(e)) => {
                    self.handle_resolve_failure(&coordinate, &path, &e, state);
                    state.fail(coordinate, e.kind(), e.to_string());
                    continue;
                }
                Err(_) => {
                    state.fail(
                        coordinate,
                        FailureKind::Timeout,
                        "crawl deadline reached during resolution".into(),
                    );
                    continue;
                }
            };

            for dep in &manifest.dependencies {
                let Some(target) = dep.coordinate() else {
                    if state.reported_gaps.insert(dep.key()) {
                        state.failures.record(
                            dep.key(),
                            FailureKind::UnresolvedDependencyVersion,
                            format!(
                                "declared by {} without a usable version ({})",
                                manifest.coordinate,
                                dep.version.as_deref().unwrap_or("none")
                            ),
                        );
                    }
                    continue;
                };
                if state.is_seen(&target) || discovered.contains_key(&target) {
                    continue;
                }

                let local = self.source.local_path(&target);
                if local.is_file() {
                    state.known.insert(target.clone());
                    discovered.insert(target, Some(local));
                } else {
                    discovered.insert(target, None);
                }
            }

            state.manifests.insert(manifest.coordinate.clone(), manifest);
        }

        discovered.into_iter().collect()
    }

    /// Log a failed resolution and remember the unparseable file behind it.
    ///
    /// Eviction waits for the end of the crawl: removing a broken ancestor now
    /// would make its next child download it again.
    fn handle_resolve_failure(
        &self,
        coordinate: &Coordinate,
        path: &Path,
        error: &ResolveError,
        state: &mut CrawlState,
    ) {
        warn!(%coordinate, error = %error, "Resolution failed");
        let Some(bad) = error.malformed_path() else {
            return;
        };
        if state.malformed.contains_key(bad) {
            return;
        }

        let owner = if bad == path {
            Some(coordinate.clone())
        } else {
            self.source.coordinate_for(bad)
        };
        match owner {
            Some(owner) => {
                state.malformed.insert(bad.to_path_buf(), owner);
            }
            None => debug!(path = %bad.display(), "Malformed file is outside the local repository"),
        }
    }

    fn evict_malformed(&self, malformed: BTreeMap<PathBuf, Coordinate>) {
        for (path, coordinate) in malformed {
            self.resolver.forget(&path);
            match self.source.evict(&coordinate) {
                Ok(true) => info!(%coordinate, "Evicted malformed manifest"),
                Ok(false) => {}
                Err(e) => warn!(%coordinate, error = %e, "Failed to evict malformed manifest"),
            }
        }
    }
}

fn sorted<T>(mut results: Vec<(Coordinate, T)>) -> Vec<(Coordinate, T)> {
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

impl std::fmt::Debug for ClosureCrawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureCrawler")
            .field("config", &self.config)
            .finish()
    }
}
