//! Graph store abstraction.
//!
//! The importer writes through the [`GraphStore`] trait, which offers keyed
//! get-or-create for nodes, idempotent edge creation and explicit batches.
//! Two implementations are provided:
//!
//! - [`MemoryGraphStore`]: petgraph-backed, for tests and one-shot runs
//! - [`SqliteGraphStore`]: persistent, with uniqueness enforced by the schema
//!
//! Nodes live in one of three keyed indices ([`IndexName`]); a key is unique
//! within its index. Edges are unique per
//! `(source, target, edge type, scope)`.

mod memory;
pub mod schema;
mod sqlite;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryGraphStore;
pub use sqlite::SqliteGraphStore;

/// Stable node identifier assigned by the store.
pub type NodeId = u64;

/// Stable edge identifier assigned by the store.
pub type EdgeId = u64;

// ============================================================================
// Errors
// ============================================================================

/// Errors from graph store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Property (de)serialization failure
    #[error("Property serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Referenced node does not exist
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    /// begin/commit/rollback called out of order
    #[error("Invalid batch state: {0}")]
    BatchState(&'static str),

    /// Stored data does not match the expected shape
    #[error("Corrupt store data: {0}")]
    Corrupt(String),
}

// ============================================================================
// Indices, properties, edges
// ============================================================================

/// Keyed node index; doubles as the node label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndexName {
    /// Key: `group`
    Groups,
    /// Key: `group:artifact`
    Artifacts,
    /// Key: `group:artifact:version`
    Versions,
}

impl IndexName {
    pub const ALL: [IndexName; 3] = [IndexName::Groups, IndexName::Artifacts, IndexName::Versions];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexName::Groups => "groups",
            IndexName::Artifacts => "artifacts",
            IndexName::Versions => "versions",
        }
    }

    /// Node label for nodes in this index.
    pub fn label(&self) -> &'static str {
        match self {
            IndexName::Groups => "Group",
            IndexName::Artifacts => "Artifact",
            IndexName::Versions => "Version",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.as_str() == s)
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A node property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Flag(bool),
    Text(String),
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Flag(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

/// Node properties, kept sorted for stable serialization.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Property names shared by the importer and queries.
pub mod props {
    pub const GROUP_ID: &str = "groupId";
    pub const ARTIFACT_ID: &str = "artifactId";
    pub const VERSION: &str = "version";
    pub const NAME: &str = "name";
    pub const PACKAGING: &str = "packaging";
    pub const DESCRIPTION: &str = "description";
    pub const URL: &str = "url";
    pub const MISSING: &str = "missing";
}

/// A node as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNode {
    pub id: NodeId,
    pub index: IndexName,
    pub key: String,
    pub properties: Properties,
}

impl StoredNode {
    /// Text property, if present.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.properties.get(name) {
            Some(PropertyValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Boolean property; absent means false.
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.properties.get(name), Some(PropertyValue::Flag(true)))
    }

    /// Whether this is a placeholder for a manifest that was never resolved.
    pub fn is_missing(&self) -> bool {
        self.flag(props::MISSING)
    }
}

/// Relationship type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeType {
    /// Group -> Artifact
    HasArtifact,
    /// Artifact -> Version
    HasVersion,
    /// Version -> Version
    HasDependency,
}

impl EdgeType {
    pub const ALL: [EdgeType; 3] = [EdgeType::HasArtifact, EdgeType::HasVersion, EdgeType::HasDependency];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::HasArtifact => "HAS_ARTIFACT",
            EdgeType::HasVersion => "HAS_VERSION",
            EdgeType::HasDependency => "HAS_DEPENDENCY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Attributes carried by dependency edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeAttributes {
    pub scope: Option<String>,
    pub optional: bool,
}

impl EdgeAttributes {
    pub fn dependency(scope: impl Into<String>, optional: bool) -> Self {
        Self {
            scope: Some(scope.into()),
            optional,
        }
    }
}

/// An edge as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: EdgeType,
    pub attributes: EdgeAttributes,
}

/// Node and edge counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub nodes: BTreeMap<String, usize>,
    pub edges: BTreeMap<String, usize>,
    /// Version nodes flagged as placeholders
    pub missing_versions: usize,
}

impl GraphStats {
    pub fn node_count(&self) -> usize {
        self.nodes.values().sum()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().sum()
    }
}

// ============================================================================
// GraphStore trait
// ============================================================================

/// Keyed property graph with batch semantics.
///
/// Writes outside an open batch take effect immediately. Inside a batch they
/// become durable on [`commit_batch`](GraphStore::commit_batch) and are
/// discarded by [`rollback_batch`](GraphStore::rollback_batch).
pub trait GraphStore: Send + Sync {
    /// Return the node at `(index, key)`, creating it with `properties` if absent.
    ///
    /// The boolean is true when the node was created by this call. Concurrent
    /// callers racing on the same key observe a single node.
    fn get_or_create_node(
        &self,
        index: IndexName,
        key: &str,
        properties: &Properties,
    ) -> Result<(StoredNode, bool), StoreError>;

    /// Nodes stored under exactly `key` (zero or one).
    fn find_exact(&self, index: IndexName, key: &str) -> Result<Vec<StoredNode>, StoreError>;

    fn get_node(&self, id: NodeId) -> Result<Option<StoredNode>, StoreError>;

    /// Merge `properties` into a node, overwriting values of the same name.
    fn update_properties(&self, id: NodeId, properties: &Properties) -> Result<(), StoreError>;

    /// Create an edge unless an identical one exists.
    ///
    /// The boolean is true when the edge was created by this call.
    fn create_edge(
        &self,
        source: NodeId,
        target: NodeId,
        edge_type: EdgeType,
        attributes: &EdgeAttributes,
    ) -> Result<(EdgeId, bool), StoreError>;

    /// Edges of `edge_type` leaving `id`.
    fn outgoing_edges(&self, id: NodeId, edge_type: EdgeType) -> Result<Vec<StoredEdge>, StoreError>;

    /// Whether any edge of `edge_type` enters `id`.
    fn has_incoming(&self, id: NodeId, edge_type: EdgeType) -> Result<bool, StoreError>;

    fn begin_batch(&self) -> Result<(), StoreError>;

    fn commit_batch(&self) -> Result<(), StoreError>;

    fn rollback_batch(&self) -> Result<(), StoreError>;

    fn stats(&self) -> Result<GraphStats, StoreError>;
}
