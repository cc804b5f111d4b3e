//! mvngraph Core - Maven repository crawling and dependency graph construction
//!
//! This crate provides the core engine:
//! - Coordinates and the repository layout
//! - Repository fetching with mirror fallback and atomic writes
//! - Effective manifest resolution (parent chain, interpolation, dependency management)
//! - Dependency closure crawling to a fixed point
//! - Two-pass graph import into a pluggable graph store
//! - Seed parsing, local repository scans and directory-listing discovery

pub mod closure;
pub mod coordinate;
pub mod fetcher;
pub mod importer;
pub mod listing;
pub mod manifest;
pub mod report;
pub mod resolver;
pub mod seeds;
pub mod store;

// Coordinate re-exports
pub use coordinate::{
    is_version_range, normalize_version, Coordinate, ParseCoordinateError,
    DEFAULT_MANIFEST_EXTENSION,
};

// Manifest re-exports
pub use manifest::{
    parse_manifest, read_manifest, Dependency, ManagedDependency, ManifestError, ParentRef,
    RawManifest,
};

// Fetcher re-exports
pub use fetcher::{FetchError, FetcherConfig, ManifestSource, Mirror, RepositoryFetcher, CENTRAL_URL};

// Resolver re-exports
pub use resolver::{
    CacheMetrics, EffectiveManifest, ManifestResolver, ResolveError, ResolverConfig,
};

// Closure re-exports
pub use closure::{ClosureConfig, ClosureCrawler, ClosureReport};

// Report re-exports
pub use report::{Failure, FailureKind, FailureReport};

// Store re-exports
pub use store::{
    EdgeAttributes, EdgeType, GraphStats, GraphStore, IndexName, MemoryGraphStore, NodeId,
    PropertyValue, SqliteGraphStore, StoreError, StoredEdge, StoredNode,
};

pub use store::schema::GRAPH_SCHEMA_VERSION;

// Importer re-exports
pub use importer::{
    BatchAccumulator, GraphImporter, ImportError, ImportPhase, ImportStats, DEFAULT_BATCH_SIZE,
};

// Discovery re-exports
pub use listing::{ListingConfig, ListingCrawler, ListingError};
pub use seeds::{parse_seed_list, read_seed_file, scan_local_repository, SeedError, SeedList};
