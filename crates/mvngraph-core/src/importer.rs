//! Two-pass import of resolved manifests into a [`GraphStore`].
//!
//! Pass 1 materializes a Group -> Artifact -> Version chain for every
//! manifest. Pass 2 links each version to the versions it depends on,
//! creating placeholder version nodes (flagged `missing`) for targets that
//! were never resolved. Running pass 2 only after pass 1 has committed means a
//! dependency on any imported manifest always finds the real node.
//!
//! Both passes commit every [`BatchAccumulator`] threshold operations. On a
//! store failure the open batch is rolled back and the import stops; batches
//! committed before that point stay in place.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::coordinate::{artifact_key, Coordinate};
use crate::manifest::Dependency;
use crate::resolver::EffectiveManifest;
use crate::store::{props, EdgeAttributes, EdgeType, GraphStore, IndexName, Properties, StoreError, StoredNode};

/// Operations per committed batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Version key component used for dependencies without a usable version.
pub const UNRESOLVED_VERSION: &str = "unresolved";

/// Scope recorded on dependency edges that declare none.
pub const DEFAULT_SCOPE: &str = "compile";

/// Errors that abort an import.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Graph store failure during {phase}: {source}")]
    Store {
        phase: ImportPhase,
        #[source]
        source: StoreError,
    },
}

/// Which pass an import error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImportPhase {
    Versions,
    Dependencies,
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportPhase::Versions => write!(f, "version materialization"),
            ImportPhase::Dependencies => write!(f, "dependency materialization"),
        }
    }
}

// ============================================================================
// BatchAccumulator
// ============================================================================

/// Counts operations and commits the store's batch every `threshold` of them.
#[derive(Debug)]
pub struct BatchAccumulator {
    threshold: usize,
    pending: usize,
    committed: usize,
}

impl BatchAccumulator {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            pending: 0,
            committed: 0,
        }
    }

    /// Open the first batch.
    pub fn begin(&mut self, store: &dyn GraphStore) -> Result<(), StoreError> {
        self.pending = 0;
        store.begin_batch()
    }

    /// Count one operation; commits and reopens the batch when full.
    ///
    /// Returns whether a commit happened.
    pub fn record(&mut self, store: &dyn GraphStore) -> Result<bool, StoreError> {
        self.pending += 1;
        if self.pending < self.threshold {
            return Ok(false);
        }
        store.commit_batch()?;
        self.committed += 1;
        self.pending = 0;
        store.begin_batch()?;
        Ok(true)
    }

    /// Commit whatever remains in the open batch.
    pub fn finish(&mut self, store: &dyn GraphStore) -> Result<(), StoreError> {
        store.commit_batch()?;
        if self.pending > 0 {
            self.committed += 1;
        }
        self.pending = 0;
        Ok(())
    }

    /// Operations recorded since the last commit.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Non-empty batches committed so far.
    pub fn committed(&self) -> usize {
        self.committed
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters describing what an import did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub manifests: usize,
    pub groups_created: usize,
    pub artifacts_created: usize,
    pub versions_created: usize,
    /// Version nodes that already existed as real nodes
    pub versions_reused: usize,
    /// Placeholders turned into real nodes
    pub versions_promoted: usize,
    pub placeholders_created: usize,
    pub dependency_edges_created: usize,
    /// Dependency edges that were already present
    pub dependency_edges_existing: usize,
    /// Dependencies linked to an `unresolved` placeholder
    pub unresolved_dependencies: usize,
    pub batches_committed: usize,
}

// ============================================================================
// GraphImporter
// ============================================================================

/// Writes resolved manifests into a graph store.
pub struct GraphImporter<'a> {
    store: &'a dyn GraphStore,
    batch_size: usize,
    stats: ImportStats,
}

impl<'a> GraphImporter<'a> {
    pub fn new(store: &'a dyn GraphStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size,
            stats: ImportStats::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> &ImportStats {
        &self.stats
    }

    /// Run both passes.
    pub fn import(mut self, manifests: &[EffectiveManifest]) -> Result<ImportStats, ImportError> {
        info!(manifests = manifests.len(), "Importing manifests");
        self.stats.manifests = manifests.len();
        self.materialize_versions(manifests)?;
        self.materialize_dependencies(manifests)?;
        info!(
            versions = self.stats.versions_created,
            promoted = self.stats.versions_promoted,
            placeholders = self.stats.placeholders_created,
            edges = self.stats.dependency_edges_created,
            "Import complete"
        );
        Ok(self.stats)
    }

    /// Pass 1: a Group -> Artifact -> Version chain per manifest.
    pub fn materialize_versions(&mut self, manifests: &[EffectiveManifest]) -> Result<(), ImportError> {
        self.run_pass(ImportPhase::Versions, manifests, |importer, batch, manifest| {
            importer.import_version(batch, manifest)
        })
    }

    /// Pass 2: dependency edges from every imported version.
    pub fn materialize_dependencies(
        &mut self,
        manifests: &[EffectiveManifest],
    ) -> Result<(), ImportError> {
        self.run_pass(ImportPhase::Dependencies, manifests, |importer, batch, manifest| {
            importer.import_dependencies(batch, manifest)
        })
    }

    fn run_pass<F>(
        &mut self,
        phase: ImportPhase,
        manifests: &[EffectiveManifest],
        mut step: F,
    ) -> Result<(), ImportError>
    where
        F: FnMut(&mut Self, &mut BatchAccumulator, &EffectiveManifest) -> Result<(), StoreError>,
    {
        let store = self.store;
        let fail = |source| ImportError::Store { phase, source };
        let mut batch = BatchAccumulator::new(self.batch_size);
        batch.begin(store).map_err(fail)?;

        for manifest in manifests {
            if let Err(e) = step(self, &mut batch, manifest) {
                warn!(%phase, coordinate = %manifest.coordinate, error = %e, "Rolling back batch");
                if let Err(rollback) = store.rollback_batch() {
                    warn!(error = %rollback, "Rollback failed");
                }
                self.stats.batches_committed += batch.committed();
                return Err(fail(e));
            }
        }

        batch.finish(store).map_err(fail)?;
        self.stats.batches_committed += batch.committed();
        debug!(%phase, batches = batch.committed(), "Pass complete");
        Ok(())
    }

    fn import_version(
        &mut self,
        batch: &mut BatchAccumulator,
        manifest: &EffectiveManifest,
    ) -> Result<(), StoreError> {
        let c = &manifest.coordinate;
        let artifact = self.ensure_artifact(batch, &c.group, &c.artifact, manifest.name.as_deref())?;

        let properties = version_properties(manifest);
        let (version, created) = self
            .store
            .get_or_create_node(IndexName::Versions, &c.to_string(), &properties)?;
        batch.record(self.store)?;

        if created {
            self.stats.versions_created += 1;
        } else if version.is_missing() {
            // placeholder from an earlier run: keep its id and edges
            self.store.update_properties(version.id, &properties)?;
            batch.record(self.store)?;
            self.stats.versions_promoted += 1;
            debug!(coordinate = %c, "Promoted placeholder version");
        } else {
            self.stats.versions_reused += 1;
        }

        self.store
            .create_edge(artifact.id, version.id, EdgeType::HasVersion, &EdgeAttributes::default())?;
        batch.record(self.store)?;
        Ok(())
    }

    fn import_dependencies(
        &mut self,
        batch: &mut BatchAccumulator,
        manifest: &EffectiveManifest,
    ) -> Result<(), StoreError> {
        let key = manifest.coordinate.to_string();
        let Some(source) = self.store.find_exact(IndexName::Versions, &key)?.into_iter().next() else {
            warn!(coordinate = %key, "Version node missing in dependency pass; skipping");
            return Ok(());
        };

        for dep in &manifest.dependencies {
            let target = self.dependency_target(batch, dep)?;
            let attributes = EdgeAttributes::dependency(
                dep.scope.as_deref().unwrap_or(DEFAULT_SCOPE),
                dep.optional.unwrap_or(false),
            );
            let (_, created) =
                self.store
                    .create_edge(source.id, target.id, EdgeType::HasDependency, &attributes)?;
            batch.record(self.store)?;
            if created {
                self.stats.dependency_edges_created += 1;
            } else {
                self.stats.dependency_edges_existing += 1;
            }
        }
        Ok(())
    }

    /// Existing version node for a dependency, or a new placeholder.
    fn dependency_target(
        &mut self,
        batch: &mut BatchAccumulator,
        dep: &Dependency,
    ) -> Result<StoredNode, StoreError> {
        let target = match dep.coordinate() {
            Some(c) => c,
            None => {
                self.stats.unresolved_dependencies += 1;
                Coordinate::new(&dep.group, &dep.artifact, UNRESOLVED_VERSION)
            }
        };

        let key = target.to_string();
        if let Some(node) = self.store.find_exact(IndexName::Versions, &key)?.into_iter().next() {
            return Ok(node);
        }

        let artifact = self.ensure_artifact(batch, &target.group, &target.artifact, None)?;
        let (node, created) = self.store.get_or_create_node(
            IndexName::Versions,
            &key,
            &placeholder_properties(&target),
        )?;
        batch.record(self.store)?;
        if created {
            self.stats.placeholders_created += 1;
        }
        self.store
            .create_edge(artifact.id, node.id, EdgeType::HasVersion, &EdgeAttributes::default())?;
        batch.record(self.store)?;
        Ok(node)
    }

    /// Group and Artifact nodes, linked once.
    fn ensure_artifact(
        &mut self,
        batch: &mut BatchAccumulator,
        group: &str,
        artifact: &str,
        name: Option<&str>,
    ) -> Result<StoredNode, StoreError> {
        let mut group_props = Properties::new();
        group_props.insert(props::GROUP_ID.into(), group.into());
        let (group_node, created) =
            self.store
                .get_or_create_node(IndexName::Groups, group, &group_props)?;
        batch.record(self.store)?;
        if created {
            self.stats.groups_created += 1;
        }

        let mut artifact_props = group_props;
        artifact_props.insert(props::ARTIFACT_ID.into(), artifact.into());
        if let Some(name) = name {
            artifact_props.insert(props::NAME.into(), name.into());
        }
        let (artifact_node, created) = self.store.get_or_create_node(
            IndexName::Artifacts,
            &artifact_key(group, artifact),
            &artifact_props,
        )?;
        batch.record(self.store)?;
        if created {
            self.stats.artifacts_created += 1;
        } else if name.is_some() && artifact_node.text(props::NAME) != name {
            self.store.update_properties(artifact_node.id, &artifact_props)?;
            batch.record(self.store)?;
        }

        if !self.store.has_incoming(artifact_node.id, EdgeType::HasArtifact)? {
            self.store.create_edge(
                group_node.id,
                artifact_node.id,
                EdgeType::HasArtifact,
                &EdgeAttributes::default(),
            )?;
            batch.record(self.store)?;
        }
        Ok(artifact_node)
    }
}

fn version_properties(manifest: &EffectiveManifest) -> Properties {
    let c = &manifest.coordinate;
    let mut p = Properties::new();
    p.insert(props::GROUP_ID.into(), c.group.as_str().into());
    p.insert(props::ARTIFACT_ID.into(), c.artifact.as_str().into());
    p.insert(props::VERSION.into(), c.version.as_str().into());
    p.insert(props::NAME.into(), manifest.display_name().into());
    p.insert(props::PACKAGING.into(), manifest.packaging.as_str().into());
    if let Some(description) = &manifest.description {
        p.insert(props::DESCRIPTION.into(), description.as_str().into());
    }
    if let Some(url) = &manifest.url {
        p.insert(props::URL.into(), url.as_str().into());
    }
    p.insert(props::MISSING.into(), false.into());
    p
}

fn placeholder_properties(target: &Coordinate) -> Properties {
    let mut p = Properties::new();
    p.insert(props::GROUP_ID.into(), target.group.as_str().into());
    p.insert(props::ARTIFACT_ID.into(), target.artifact.as_str().into());
    p.insert(props::VERSION.into(), target.version.as_str().into());
    p.insert(props::NAME.into(), target.artifact.as_str().into());
    p.insert(props::MISSING.into(), true.into());
    p
}
