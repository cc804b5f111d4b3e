//! Effective manifest resolution.
//!
//! Turning a raw manifest into its effective form takes five steps:
//!
//! 1. Walk the parent chain, fetching missing ancestors on demand
//! 2. Fold the chain root-first (properties, dependency management,
//!    inherited dependencies and metadata; the child wins on conflict)
//! 3. Interpolate `${...}` placeholders against the merged properties and
//!    the built-in `project.*` values
//! 4. Expand BOM imports (`scope=import`, `type=pom`) into dependency management
//! 5. Fill missing dependency versions and scopes from dependency management
//!    and collapse version ranges
//!
//! Raw manifests are cached in a bounded LRU keyed by path, since popular
//! parents are shared by thousands of children.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use futures::future::{BoxFuture, FutureExt};
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::coordinate::{normalize_version, Coordinate};
use crate::fetcher::{FetchError, ManifestSource};
use crate::manifest::{read_manifest, Dependency, ManagedDependency, ManifestError, RawManifest};
use crate::report::FailureKind;

/// Default maximum number of ancestors followed.
pub const DEFAULT_MAX_PARENT_DEPTH: usize = 32;

/// Default number of raw manifests kept in memory.
pub const DEFAULT_RAW_CACHE_CAPACITY: usize = 4096;

/// Upper bound on substitution passes, so self-referencing properties terminate.
const MAX_INTERPOLATION_PASSES: usize = 16;

/// Packaging assumed when a manifest declares none.
const DEFAULT_PACKAGING: &str = "jar";

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid regex"))
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while resolving an effective manifest.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The manifest or one of its ancestors could not be parsed
    #[error("Malformed manifest {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },

    /// A required identity field could not be determined
    #[error("Manifest {path} has no {field}")]
    MissingField { path: PathBuf, field: &'static str },

    /// The parent chain loops or exceeds the depth limit
    #[error("Parent chain of {subject} {reason}")]
    CycleOrDepth { subject: String, reason: String },

    /// A parent or imported manifest could not be fetched
    #[error("Failed to fetch {relation} {coordinate} of {subject}: {source}")]
    Fetch {
        subject: String,
        relation: &'static str,
        coordinate: Coordinate,
        #[source]
        source: FetchError,
    },

    /// Strict mode only: a dependency has no version after management
    #[error("Dependency {dependency} of {subject} has no version")]
    UnresolvedDependencyVersion { subject: String, dependency: String },
}

impl ResolveError {
    /// Failure category used in crawl reports.
    pub fn kind(&self) -> FailureKind {
        match self {
            ResolveError::Malformed { .. } | ResolveError::MissingField { .. } => {
                FailureKind::Malformed
            }
            ResolveError::CycleOrDepth { .. } => FailureKind::CycleOrDepth,
            ResolveError::Fetch { .. } => FailureKind::Fetch,
            ResolveError::UnresolvedDependencyVersion { .. } => {
                FailureKind::UnresolvedDependencyVersion
            }
        }
    }

    /// The unparseable file behind a [`ResolveError::Malformed`]; either the
    /// resolved manifest or one of its ancestors.
    pub fn malformed_path(&self) -> Option<&Path> {
        match self {
            ResolveError::Malformed { path, .. } => Some(path),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration & model
// ============================================================================

/// Resolver behavior switches.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Fail on missing dependency versions and identity fields instead of
    /// degrading gracefully
    pub strict: bool,
    /// Maximum ancestors followed before reporting `CycleOrDepth`
    pub max_parent_depth: usize,
    /// Capacity of the raw manifest cache
    pub raw_cache_capacity: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            strict: false,
            max_parent_depth: DEFAULT_MAX_PARENT_DEPTH,
            raw_cache_capacity: DEFAULT_RAW_CACHE_CAPACITY,
        }
    }
}

/// A manifest with inheritance, interpolation and dependency management applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveManifest {
    pub coordinate: Coordinate,
    pub packaging: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub parent: Option<Coordinate>,
    pub properties: BTreeMap<String, String>,
    pub dependencies: Vec<Dependency>,
    /// Managed entries sorted by `group:artifact`
    pub dependency_management: Vec<ManagedDependency>,
    /// Local file the manifest was read from
    pub source: PathBuf,
}

impl EffectiveManifest {
    /// Human-readable name, falling back to the artifact id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.coordinate.artifact)
    }

    /// Managed entry for an artifact, if any.
    pub fn managed(&self, group: &str, artifact: &str) -> Option<&ManagedDependency> {
        self.dependency_management
            .iter()
            .find(|m| m.group == group && m.artifact == artifact)
    }
}

/// Raw cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
}

struct RawCache {
    entries: LruCache<PathBuf, Arc<RawManifest>>,
    metrics: CacheMetrics,
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolves raw manifests into [`EffectiveManifest`]s.
pub struct ManifestResolver {
    source: Arc<dyn ManifestSource>,
    config: ResolverConfig,
    cache: Mutex<RawCache>,
}

impl ManifestResolver {
    pub fn new(source: Arc<dyn ManifestSource>, config: ResolverConfig) -> Self {
        let capacity = NonZeroUsize::new(config.raw_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            config,
            cache: Mutex::new(RawCache {
                entries: LruCache::new(capacity),
                metrics: CacheMetrics::default(),
            }),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Raw cache hit/miss counters.
    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.lock().metrics
    }

    /// Drop a cached raw manifest (after eviction from disk).
    pub fn forget(&self, path: &Path) {
        self.cache.lock().entries.pop(path);
    }

    /// Read a raw manifest, going through the cache.
    pub fn load_raw(&self, path: &Path) -> Result<Arc<RawManifest>, ResolveError> {
        {
            let mut cache = self.cache.lock();
            if let Some(raw) = cache.entries.get(path).cloned() {
                cache.metrics.hits += 1;
                return Ok(raw);
            }
            cache.metrics.misses += 1;
        }

        let raw = Arc::new(read_manifest(path).map_err(|source| ResolveError::Malformed {
            path: path.to_path_buf(),
            source,
        })?);
        self.cache
            .lock()
            .entries
            .put(path.to_path_buf(), Arc::clone(&raw));
        Ok(raw)
    }

    /// Resolve the manifest stored at `path`.
    ///
    /// Resolution is deterministic: the same file and ancestors always give
    /// an equal result.
    pub async fn resolve_effective(&self, path: &Path) -> Result<EffectiveManifest, ResolveError> {
        self.resolve_guarded(path.to_path_buf(), Vec::new()).await
    }

    /// `importers` lists the manifests currently importing this one as a BOM.
    fn resolve_guarded(
        &self,
        path: PathBuf,
        importers: Vec<Coordinate>,
    ) -> BoxFuture<'_, Result<EffectiveManifest, ResolveError>> {
        async move {
            let raw = self.load_raw(&path)?;
            let subject = raw
                .declared_coordinate()
                .map(|c| c.to_string())
                .unwrap_or_else(|| path.display().to_string());

            let chain = self.parent_chain(&raw, &subject).await?;
            let folded = Folded::from_chain(&chain);
            let mut effective = self.interpolate(&path, &raw, folded)?;

            self.expand_imports(&mut effective, &subject, importers).await?;
            self.apply_management(&mut effective, &subject)?;

            trace!(coordinate = %effective.coordinate, "Resolved manifest");
            Ok(effective.into_manifest())
        }
        .boxed()
    }

    /// Ancestors of `raw`, root-first, ending with `raw` itself.
    async fn parent_chain(
        &self,
        raw: &Arc<RawManifest>,
        subject: &str,
    ) -> Result<Vec<Arc<RawManifest>>, ResolveError> {
        let mut chain = vec![Arc::clone(raw)];
        let mut lineage: Vec<Coordinate> = raw.declared_coordinate().into_iter().collect();
        let mut current = Arc::clone(raw);

        while let Some(parent_ref) = current.parent.clone() {
            let parent = parent_ref.coordinate();
            if lineage.contains(&parent) {
                return Err(ResolveError::CycleOrDepth {
                    subject: subject.to_string(),
                    reason: format!("revisits {}", parent),
                });
            }
            if chain.len() > self.config.max_parent_depth {
                return Err(ResolveError::CycleOrDepth {
                    subject: subject.to_string(),
                    reason: format!("exceeds {} levels", self.config.max_parent_depth),
                });
            }

            let parent_path =
                self.source
                    .ensure_local(&parent)
                    .await
                    .map_err(|source| ResolveError::Fetch {
                        subject: subject.to_string(),
                        relation: "parent",
                        coordinate: parent.clone(),
                        source,
                    })?;
            let parent_raw = self.load_raw(&parent_path)?;

            lineage.push(parent);
            chain.push(Arc::clone(&parent_raw));
            current = parent_raw;
        }

        chain.reverse();
        Ok(chain)
    }

    /// Settle identity, then substitute placeholders everywhere.
    fn interpolate(
        &self,
        path: &Path,
        raw: &RawManifest,
        folded: Folded,
    ) -> Result<Resolving, ResolveError> {
        // lenient mode falls back to the identity implied by the file location
        let from_path = if self.config.strict {
            None
        } else {
            self.source.coordinate_for(path)
        };
        let missing = |field| ResolveError::MissingField {
            path: path.to_path_buf(),
            field,
        };

        let artifact = raw
            .artifact
            .clone()
            .or_else(|| from_path.as_ref().map(|c| c.artifact.clone()))
            .ok_or_else(|| missing("artifactId"))?;
        let group = folded
            .group
            .clone()
            .or_else(|| from_path.as_ref().map(|c| c.group.clone()))
            .ok_or_else(|| missing("groupId"))?;
        let version = folded
            .version
            .clone()
            .or_else(|| from_path.as_ref().map(|c| c.version.clone()))
            .ok_or_else(|| missing("version"))?;

        let properties = settle_properties(folded.properties);
        let parent = raw.parent.as_ref().map(|p| p.coordinate());

        let mut lookup = properties.clone();
        insert_builtins(&mut lookup, &properties, &group, &artifact, &version, parent.as_ref());
        let group = substitute(&group, &lookup).into_owned();
        let version = substitute(&version, &lookup).into_owned();
        insert_builtins(&mut lookup, &properties, &group, &artifact, &version, parent.as_ref());

        let text = |value: &Option<String>| value.as_deref().map(|v| substitute(v, &lookup).into_owned());

        let dependencies = folded
            .dependencies
            .iter()
            .map(|d| Dependency {
                group: substitute(&d.group, &lookup).into_owned(),
                artifact: substitute(&d.artifact, &lookup).into_owned(),
                version: text(&d.version),
                scope: text(&d.scope),
                optional: d.optional,
            })
            .collect();

        let interpolate_managed = |m: &ManagedDependency| ManagedDependency {
            group: substitute(&m.group, &lookup).into_owned(),
            artifact: substitute(&m.artifact, &lookup).into_owned(),
            version: text(&m.version),
            scope: text(&m.scope),
            kind: text(&m.kind),
        };

        let mut managed = BTreeMap::new();
        for entry in folded.managed.values().map(&interpolate_managed) {
            managed.insert(entry.key(), entry);
        }
        let imports = folded.imports.iter().map(&interpolate_managed).collect();

        Ok(Resolving {
            coordinate: Coordinate::new(group, artifact, version),
            packaging: text(&raw.packaging).unwrap_or_else(|| DEFAULT_PACKAGING.to_string()),
            name: text(&raw.name),
            description: text(&folded.description),
            url: text(&folded.url),
            parent,
            properties,
            dependencies,
            managed,
            imports,
            source: path.to_path_buf(),
        })
    }

    /// Merge the dependency management of imported BOMs.
    ///
    /// Entries declared locally win over imported ones; among imports the
    /// first declaration wins.
    async fn expand_imports(
        &self,
        effective: &mut Resolving,
        subject: &str,
        mut importers: Vec<Coordinate>,
    ) -> Result<(), ResolveError> {
        if effective.imports.is_empty() {
            return Ok(());
        }
        importers.push(effective.coordinate.clone());

        for import in std::mem::take(&mut effective.imports) {
            let Some(bom) = import
                .version
                .as_deref()
                .map(|v| Coordinate::new(&import.group, &import.artifact, normalize_version(v)))
                .filter(Coordinate::is_concrete)
            else {
                if self.config.strict {
                    return Err(ResolveError::UnresolvedDependencyVersion {
                        subject: subject.to_string(),
                        dependency: import.key(),
                    });
                }
                warn!(subject, import = %import.key(), "Skipping BOM import without a usable version");
                continue;
            };

            let result = if importers.contains(&bom) {
                Err(ResolveError::CycleOrDepth {
                    subject: subject.to_string(),
                    reason: format!("imports {} recursively", bom),
                })
            } else if importers.len() > self.config.max_parent_depth {
                Err(ResolveError::CycleOrDepth {
                    subject: subject.to_string(),
                    reason: format!("nests BOM imports beyond {} levels", self.config.max_parent_depth),
                })
            } else {
                self.resolve_import(&bom, subject, importers.clone()).await
            };

            match result {
                Ok(imported) => {
                    debug!(subject, bom = %bom, entries = imported.dependency_management.len(), "Imported BOM");
                    for entry in imported.dependency_management {
                        effective.managed.entry(entry.key()).or_insert(entry);
                    }
                }
                Err(e) if !self.config.strict => {
                    warn!(subject, bom = %bom, error = %e, "Ignoring failed BOM import");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn resolve_import(
        &self,
        bom: &Coordinate,
        subject: &str,
        importers: Vec<Coordinate>,
    ) -> Result<EffectiveManifest, ResolveError> {
        let path = self
            .source
            .ensure_local(bom)
            .await
            .map_err(|source| ResolveError::Fetch {
                subject: subject.to_string(),
                relation: "import",
                coordinate: bom.clone(),
                source,
            })?;
        self.resolve_guarded(path, importers).await
    }

    /// Fill versions and scopes from dependency management, collapse ranges.
    fn apply_management(&self, effective: &mut Resolving, subject: &str) -> Result<(), ResolveError> {
        for dep in &mut effective.dependencies {
            let managed = effective.managed.get(&dep.key());
            if dep.version.is_none() {
                dep.version = managed.and_then(|m| m.version.clone());
            }
            if dep.scope.is_none() {
                dep.scope = managed.and_then(|m| m.scope.clone());
            }

            match dep.version.as_deref() {
                Some(version) => dep.version = Some(normalize_version(version)),
                None if self.config.strict => {
                    return Err(ResolveError::UnresolvedDependencyVersion {
                        subject: subject.to_string(),
                        dependency: dep.key(),
                    });
                }
                None => debug!(subject, dependency = %dep.key(), "Dependency version left unresolved"),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ManifestResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestResolver")
            .field("config", &self.config)
            .field("cache", &self.cache_metrics())
            .finish()
    }
}

// ============================================================================
// Folding
// ============================================================================

/// The parent chain merged into one uninterpolated model.
#[derive(Default)]
struct Folded {
    group: Option<String>,
    version: Option<String>,
    description: Option<String>,
    url: Option<String>,
    properties: BTreeMap<String, String>,
    dependencies: Vec<Dependency>,
    managed: BTreeMap<String, ManagedDependency>,
    imports: Vec<ManagedDependency>,
}

impl Folded {
    fn from_chain(chain: &[Arc<RawManifest>]) -> Self {
        let mut folded = Folded::default();
        for level in chain {
            folded.merge(level);
        }
        folded
    }

    fn merge(&mut self, level: &RawManifest) {
        let parent = level.parent.as_ref();
        if let Some(group) = level.group.clone().or_else(|| parent.map(|p| p.group.clone())) {
            self.group = Some(group);
        }
        if let Some(version) = level
            .version
            .clone()
            .or_else(|| parent.map(|p| p.version.clone()))
        {
            self.version = Some(version);
        }
        if level.description.is_some() {
            self.description = level.description.clone();
        }
        if level.url.is_some() {
            self.url = level.url.clone();
        }

        self.properties.extend(level.properties.clone());

        for entry in &level.dependency_management {
            if entry.is_import() {
                self.imports.retain(|i| i.key() != entry.key());
                self.imports.push(entry.clone());
            } else {
                self.managed.insert(entry.key(), entry.clone());
            }
        }

        // a level replaces inherited declarations of the same artifact
        let declared: HashSet<String> = level.dependencies.iter().map(Dependency::key).collect();
        self.dependencies.retain(|d| !declared.contains(&d.key()));
        self.dependencies.extend(level.dependencies.iter().cloned());
    }
}

/// Intermediate state between interpolation and the final manifest.
struct Resolving {
    coordinate: Coordinate,
    packaging: String,
    name: Option<String>,
    description: Option<String>,
    url: Option<String>,
    parent: Option<Coordinate>,
    properties: BTreeMap<String, String>,
    dependencies: Vec<Dependency>,
    managed: BTreeMap<String, ManagedDependency>,
    imports: Vec<ManagedDependency>,
    source: PathBuf,
}

impl Resolving {
    fn into_manifest(self) -> EffectiveManifest {
        EffectiveManifest {
            coordinate: self.coordinate,
            packaging: self.packaging,
            name: self.name,
            description: self.description,
            url: self.url,
            parent: self.parent,
            properties: self.properties,
            dependencies: self.dependencies,
            dependency_management: self.managed.into_values().collect(),
            source: self.source,
        }
    }
}

// ============================================================================
// Interpolation
// ============================================================================

/// Replace `${name}` placeholders until nothing changes.
///
/// Unknown names are left in place verbatim.
pub fn substitute<'a>(text: &'a str, properties: &BTreeMap<String, String>) -> Cow<'a, str> {
    if !text.contains("${") {
        return Cow::Borrowed(text);
    }

    let mut current = text.to_string();
    for _ in 0..MAX_INTERPOLATION_PASSES {
        let next = placeholder().replace_all(&current, |caps: &regex::Captures<'_>| {
            properties
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        });
        if next == current {
            break;
        }
        current = next.into_owned();
    }
    Cow::Owned(current)
}

/// Resolve properties that refer to other properties.
fn settle_properties(mut properties: BTreeMap<String, String>) -> BTreeMap<String, String> {
    for _ in 0..MAX_INTERPOLATION_PASSES {
        let snapshot = properties.clone();
        let mut changed = false;
        for value in properties.values_mut() {
            let resolved = substitute(value, &snapshot).into_owned();
            if resolved != *value {
                *value = resolved;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    properties
}

fn insert_builtins(
    lookup: &mut BTreeMap<String, String>,
    declared: &BTreeMap<String, String>,
    group: &str,
    artifact: &str,
    version: &str,
    parent: Option<&Coordinate>,
) {
    let own = [("groupId", group), ("artifactId", artifact), ("version", version)];
    for (field, value) in own {
        lookup.insert(format!("project.{}", field), value.to_string());
        lookup.insert(format!("pom.{}", field), value.to_string());
        // bare aliases never shadow a declared property
        if !declared.contains_key(field) {
            lookup.insert(field.to_string(), value.to_string());
        }
    }

    let Some(parent) = parent else {
        return;
    };
    let inherited = [
        ("groupId", &parent.group),
        ("artifactId", &parent.artifact),
        ("version", &parent.version),
    ];
    for (field, value) in inherited {
        lookup.insert(format!("project.parent.{}", field), value.clone());
        let alias = format!("parent.{}", field);
        if !declared.contains_key(&alias) {
            lookup.insert(alias, value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    /// Serves manifests from a local directory only.
    struct LocalSource {
        root: TempDir,
    }

    impl LocalSource {
        fn new() -> Self {
            Self {
                root: tempfile::tempdir().unwrap(),
            }
        }

        fn write(&self, coordinate: &str, content: &str) -> PathBuf {
            let c: Coordinate = coordinate.parse().unwrap();
            let path = self.local_path(&c);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, content).unwrap();
            path
        }
    }

    #[async_trait]
    impl ManifestSource for LocalSource {
        fn local_path(&self, coordinate: &Coordinate) -> PathBuf {
            coordinate.local_path(self.root.path(), "pom")
        }

        fn coordinate_for(&self, path: &Path) -> Option<Coordinate> {
            Coordinate::from_relative_path(path.strip_prefix(self.root.path()).ok()?, "pom")
        }

        async fn ensure_local(&self, coordinate: &Coordinate) -> Result<PathBuf, FetchError> {
            let path = self.local_path(coordinate);
            if path.is_file() {
                Ok(path)
            } else {
                Err(FetchError::Exhausted {
                    coordinate: coordinate.clone(),
                    mirrors: 0,
                    last_error: "offline".into(),
                })
            }
        }
    }

    fn resolver(source: &Arc<LocalSource>, strict: bool) -> ManifestResolver {
        ManifestResolver::new(
            Arc::clone(source) as Arc<dyn ManifestSource>,
            ResolverConfig {
                strict,
                max_parent_depth: 4,
                raw_cache_capacity: 16,
            },
        )
    }

    fn pom(body: &str) -> String {
        format!("<project><modelVersion>4.0.0</modelVersion>{}</project>", body)
    }

    fn parent(group: &str, artifact: &str, version: &str) -> String {
        format!(
            "<parent><groupId>{}</groupId><artifactId>{}</artifactId><version>{}</version></parent>",
            group, artifact, version
        )
    }

    fn dep(group: &str, artifact: &str, version: Option<&str>) -> String {
        let version = version
            .map(|v| format!("<version>{}</version>", v))
            .unwrap_or_default();
        format!(
            "<dependency><groupId>{}</groupId><artifactId>{}</artifactId>{}</dependency>",
            group, artifact, version
        )
    }

    #[tokio::test]
    async fn test_inherits_identity_properties_and_management() {
        let source = Arc::new(LocalSource::new());
        source.write(
            "org.ex:parent:7",
            &pom(&format!(
                "<groupId>org.ex</groupId><artifactId>parent</artifactId><version>7</version>\
                 <properties><lib.version>1.0</lib.version><other>x</other></properties>\
                 <dependencyManagement><dependencies>{}</dependencies></dependencyManagement>",
                dep("org.lib", "managed", Some("${lib.version}"))
            )),
        );
        let child = source.write(
            "org.ex:child:7",
            &pom(&format!(
                "{}<artifactId>child</artifactId>\
                 <properties><lib.version>2.0</lib.version></properties>\
                 <dependencies>{}{}</dependencies>",
                parent("org.ex", "parent", "7"),
                dep("org.lib", "managed", None),
                dep("org.ex", "sibling", Some("${project.version}"))
            )),
        );

        let effective = resolver(&source, false).resolve_effective(&child).await.unwrap();

        assert_eq!(effective.coordinate, Coordinate::new("org.ex", "child", "7"));
        assert_eq!(effective.parent, Some(Coordinate::new("org.ex", "parent", "7")));
        assert_eq!(effective.properties.get("lib.version").unwrap(), "2.0");
        assert_eq!(effective.properties.get("other").unwrap(), "x");
        // child property overrides the one referenced by the parent's management
        assert_eq!(effective.dependencies[0].version.as_deref(), Some("2.0"));
        assert_eq!(effective.dependencies[1].version.as_deref(), Some("7"));
        assert_eq!(effective.display_name(), "child");
        assert_eq!(effective.packaging, "jar");
    }

    #[tokio::test]
    async fn test_builtin_aliases() {
        let source = Arc::new(LocalSource::new());
        source.write(
            "g:base:4",
            &pom("<groupId>g</groupId><artifactId>base</artifactId><version>4</version>"),
        );
        let path = source.write(
            "g:mod:4",
            &pom(&format!(
                "{}<artifactId>mod</artifactId>\
                 <properties><artifactId>declared</artifactId></properties>\
                 <dependencies>{}{}{}</dependencies>",
                parent("g", "base", "4"),
                dep("${groupId}", "sib", Some("${parent.version}")),
                dep("g", "${artifactId}", Some("${pom.version}")),
                dep("g", "x", Some("${project.parent.artifactId}"))
            )),
        );

        let effective = resolver(&source, false).resolve_effective(&path).await.unwrap();
        let deps: Vec<String> = effective
            .dependencies
            .iter()
            .filter_map(|d| d.coordinate())
            .map(|c| c.to_string())
            .collect();
        assert_eq!(deps, vec!["g:sib:4", "g:declared:4", "g:x:base"]);
    }

    #[tokio::test]
    async fn test_unknown_placeholder_left_literal() {
        let source = Arc::new(LocalSource::new());
        let path = source.write(
            "g:a:1",
            &pom(&format!(
                "<groupId>g</groupId><artifactId>a</artifactId><version>1</version>\
                 <description>built with ${{missing.prop}}</description>\
                 <dependencies>{}</dependencies>",
                dep("g", "b", Some("${missing.version}"))
            )),
        );

        let effective = resolver(&source, false).resolve_effective(&path).await.unwrap();
        assert_eq!(effective.description.as_deref(), Some("built with ${missing.prop}"));
        assert_eq!(effective.dependencies[0].version.as_deref(), Some("${missing.version}"));
        assert_eq!(effective.dependencies[0].coordinate(), None);
    }

    #[tokio::test]
    async fn test_parent_cycle_detected() {
        let source = Arc::new(LocalSource::new());
        source.write(
            "g:x:1",
            &pom(&format!("{}<artifactId>x</artifactId>", parent("g", "y", "1"))),
        );
        let y = source.write(
            "g:y:1",
            &pom(&format!("{}<artifactId>y</artifactId>", parent("g", "x", "1"))),
        );

        let err = resolver(&source, false).resolve_effective(&y).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::CycleOrDepth);
    }

    #[tokio::test]
    async fn test_parent_depth_limit() {
        let source = Arc::new(LocalSource::new());
        source.write(
            "g:p0:1",
            &pom("<groupId>g</groupId><artifactId>p0</artifactId><version>1</version>"),
        );
        let mut last = PathBuf::new();
        for i in 1..=6 {
            last = source.write(
                &format!("g:p{}:1", i),
                &pom(&format!(
                    "{}<artifactId>p{}</artifactId>",
                    parent("g", &format!("p{}", i - 1), "1"),
                    i
                )),
            );
        }

        let err = resolver(&source, false).resolve_effective(&last).await.unwrap_err();
        assert!(matches!(err, ResolveError::CycleOrDepth { .. }));
    }

    #[tokio::test]
    async fn test_missing_parent_is_fetch_failure() {
        let source = Arc::new(LocalSource::new());
        let path = source.write(
            "g:a:1",
            &pom(&format!("{}<artifactId>a</artifactId>", parent("g", "gone", "1"))),
        );

        let err = resolver(&source, false).resolve_effective(&path).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Fetch);
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_versionless_dependency() {
        let source = Arc::new(LocalSource::new());
        let path = source.write(
            "g:a:1",
            &pom(&format!(
                "<groupId>g</groupId><artifactId>a</artifactId><version>1</version>\
                 <dependencies>{}</dependencies>",
                dep("g", "b", None)
            )),
        );

        let lenient = resolver(&source, false).resolve_effective(&path).await.unwrap();
        assert_eq!(lenient.dependencies[0].version, None);

        let err = resolver(&source, true).resolve_effective(&path).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::UnresolvedDependencyVersion);
    }

    #[tokio::test]
    async fn test_lenient_mode_takes_identity_from_path() {
        let source = Arc::new(LocalSource::new());
        let path = source.write("g:a:1", &pom("<artifactId>a</artifactId>"));

        let effective = resolver(&source, false).resolve_effective(&path).await.unwrap();
        assert_eq!(effective.coordinate, Coordinate::new("g", "a", "1"));

        let err = resolver(&source, true).resolve_effective(&path).await.unwrap_err();
        assert!(matches!(err, ResolveError::MissingField { field: "groupId", .. }));
    }

    #[tokio::test]
    async fn test_version_range_collapsed() {
        let source = Arc::new(LocalSource::new());
        let path = source.write(
            "g:a:1",
            &pom(&format!(
                "<groupId>g</groupId><artifactId>a</artifactId><version>1</version>\
                 <dependencies>{}</dependencies>",
                dep("g", "b", Some("[1.2,1.5)"))
            )),
        );

        let effective = resolver(&source, false).resolve_effective(&path).await.unwrap();
        assert_eq!(effective.dependencies[0].version.as_deref(), Some("1.2"));
    }

    #[tokio::test]
    async fn test_bom_import_fills_versions() {
        let source = Arc::new(LocalSource::new());
        source.write(
            "org.platform:bom:5",
            &pom(&format!(
                "<groupId>org.platform</groupId><artifactId>bom</artifactId><version>5</version>\
                 <packaging>pom</packaging>\
                 <dependencyManagement><dependencies>{}{}</dependencies></dependencyManagement>",
                dep("org.lib", "core", Some("3.3")),
                dep("org.lib", "extra", Some("9.9"))
            )),
        );
        let path = source.write(
            "g:app:1",
            &pom(&format!(
                "<groupId>g</groupId><artifactId>app</artifactId><version>1</version>\
                 <dependencyManagement><dependencies>\
                 <dependency><groupId>org.platform</groupId><artifactId>bom</artifactId>\
                 <version>5</version><type>pom</type><scope>import</scope></dependency>\
                 {}</dependencies></dependencyManagement>\
                 <dependencies>{}{}</dependencies>",
                dep("org.lib", "extra", Some("1.0")),
                dep("org.lib", "core", None),
                dep("org.lib", "extra", None)
            )),
        );

        let effective = resolver(&source, true).resolve_effective(&path).await.unwrap();
        assert_eq!(effective.dependencies[0].version.as_deref(), Some("3.3"));
        // local management wins over the BOM
        assert_eq!(effective.dependencies[1].version.as_deref(), Some("1.0"));
        assert!(effective.managed("org.platform", "bom").is_none());
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic_and_cached() {
        let source = Arc::new(LocalSource::new());
        source.write(
            "g:parent:1",
            &pom("<groupId>g</groupId><artifactId>parent</artifactId><version>1</version>"),
        );
        let path = source.write(
            "g:a:1",
            &pom(&format!("{}<artifactId>a</artifactId>", parent("g", "parent", "1"))),
        );

        let resolver = resolver(&source, false);
        let first = resolver.resolve_effective(&path).await.unwrap();
        let second = resolver.resolve_effective(&path).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.cache_metrics().misses, 2);
        assert_eq!(resolver.cache_metrics().hits, 2);
    }

    #[tokio::test]
    async fn test_malformed_manifest() {
        let source = Arc::new(LocalSource::new());
        let path = source.write("g:a:1", "<project><artifactId>");

        let err = resolver(&source, false).resolve_effective(&path).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Malformed);
        assert_eq!(err.malformed_path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_malformed_parent_names_parent_file() {
        let source = Arc::new(LocalSource::new());
        let parent = source.write("g:parent:1", "<project><groupId>");
        let child = source.write(
            "g:a:1",
            "<project><parent><groupId>g</groupId><artifactId>parent</artifactId>\
             <version>1</version></parent><artifactId>a</artifactId></project>",
        );

        let err = resolver(&source, false).resolve_effective(&child).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Malformed);
        assert_eq!(err.malformed_path(), Some(parent.as_path()));
    }

    #[test]
    fn test_substitute_nested_and_self_reference() {
        let mut props = BTreeMap::new();
        props.insert("a".to_string(), "${b}-x".to_string());
        props.insert("b".to_string(), "1".to_string());
        props.insert("loop".to_string(), "${loop}".to_string());

        assert_eq!(substitute("v${a}", &props), "v1-x");
        assert_eq!(substitute("${loop}", &props), "${loop}");
        assert_eq!(substitute("plain", &props), "plain");

        let settled = settle_properties(props);
        assert_eq!(settled.get("a").unwrap(), "1-x");
    }
}
