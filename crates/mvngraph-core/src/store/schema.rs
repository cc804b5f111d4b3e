//! SQLite schema for the persistent graph store.
//!
//! Uniqueness of index keys and of edges is enforced by the schema itself, so
//! `INSERT OR IGNORE` is enough to make creation idempotent.

/// Schema version stored in `graph_metadata`
pub const GRAPH_SCHEMA_VERSION: &str = "1.0";

/// SQL to create the nodes table
///
/// `(index_name, index_key)` is the keyed index; properties are a JSON object.
pub const SCHEMA_CREATE_NODES: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,

    -- groups, artifacts or versions
    index_name TEXT NOT NULL,
    index_key TEXT NOT NULL,

    properties_json TEXT NOT NULL DEFAULT '{}',

    UNIQUE(index_name, index_key)
)
"#;

/// SQL to create the edges table
///
/// An absent scope is stored as the empty string so that it participates in
/// the uniqueness constraint.
pub const SCHEMA_CREATE_EDGES: &str = r#"
CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,

    source INTEGER NOT NULL REFERENCES nodes(id),
    target INTEGER NOT NULL REFERENCES nodes(id),

    -- HAS_ARTIFACT, HAS_VERSION, HAS_DEPENDENCY
    edge_type TEXT NOT NULL,

    scope TEXT NOT NULL DEFAULT '',
    optional INTEGER NOT NULL DEFAULT 0,

    UNIQUE(source, target, edge_type, scope)
)
"#;

/// SQL to create indexes for traversal queries
pub const SCHEMA_CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source, edge_type);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target, edge_type);
"#;

/// SQL to create the metadata table
pub const SCHEMA_CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS graph_metadata (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;
