//! Persistent graph store on SQLite.
//!
//! A batch maps onto one SQLite transaction. Outside a batch every statement
//! autocommits.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};

use super::schema::{
    GRAPH_SCHEMA_VERSION, SCHEMA_CREATE_EDGES, SCHEMA_CREATE_INDEXES, SCHEMA_CREATE_METADATA,
    SCHEMA_CREATE_NODES,
};
use super::{
    EdgeAttributes, EdgeId, EdgeType, GraphStats, GraphStore, IndexName, NodeId, Properties,
    StoreError, StoredEdge, StoredNode,
};

struct Inner {
    conn: Connection,
    in_batch: bool,
}

/// Graph store persisted in a SQLite database file.
pub struct SqliteGraphStore {
    inner: Mutex<Inner>,
    path: Option<PathBuf>,
}

impl SqliteGraphStore {
    /// Open (creating if needed) a store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Corrupt(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)?;
        Self::configure_connection(&conn)?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute(SCHEMA_CREATE_NODES, [])?;
        conn.execute(SCHEMA_CREATE_EDGES, [])?;
        conn.execute(SCHEMA_CREATE_METADATA, [])?;
        conn.execute_batch(SCHEMA_CREATE_INDEXES)?;

        let found: Option<String> = conn
            .query_row(
                "SELECT value FROM graph_metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match found {
            None => {
                conn.execute(
                    "INSERT INTO graph_metadata (key, value) VALUES ('schema_version', ?1)",
                    params![GRAPH_SCHEMA_VERSION],
                )?;
            }
            Some(v) if v == GRAPH_SCHEMA_VERSION => {}
            Some(v) => {
                return Err(StoreError::Corrupt(format!(
                    "schema version mismatch: expected {}, found {}",
                    GRAPH_SCHEMA_VERSION, v
                )))
            }
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                in_batch: false,
            }),
            path,
        })
    }

    /// Configure connection with optimal settings
    fn configure_connection(conn: &Connection) -> SqliteResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "cache_size", -64000)?; // 64MB cache
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        Ok(())
    }

    /// Database file, if not in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn row_to_node(row: &rusqlite::Row<'_>) -> SqliteResult<(NodeId, String, String, String)> {
        Ok((
            row.get::<_, i64>(0)? as NodeId,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
        ))
    }

    fn decode_node(raw: (NodeId, String, String, String)) -> Result<StoredNode, StoreError> {
        let (id, index, key, json) = raw;
        let index = IndexName::parse(&index)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown index '{}'", index)))?;
        let properties: Properties = serde_json::from_str(&json)?;
        Ok(StoredNode {
            id,
            index,
            key,
            properties,
        })
    }

    fn query_node(conn: &Connection, id: NodeId) -> Result<Option<StoredNode>, StoreError> {
        conn.query_row(
            "SELECT id, index_name, index_key, properties_json FROM nodes WHERE id = ?1",
            params![id as i64],
            Self::row_to_node,
        )
        .optional()?
        .map(Self::decode_node)
        .transpose()
    }

    fn query_keyed(conn: &Connection, index: IndexName, key: &str) -> Result<Option<StoredNode>, StoreError> {
        conn.query_row(
            "SELECT id, index_name, index_key, properties_json FROM nodes
             WHERE index_name = ?1 AND index_key = ?2",
            params![index.as_str(), key],
            Self::row_to_node,
        )
        .optional()?
        .map(Self::decode_node)
        .transpose()
    }

    fn require_node(conn: &Connection, id: NodeId) -> Result<(), StoreError> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE id = ?1)",
            params![id as i64],
            |row| row.get(0),
        )?;
        if exists {
            Ok(())
        } else {
            Err(StoreError::NodeNotFound(id))
        }
    }
}

impl GraphStore for SqliteGraphStore {
    fn get_or_create_node(
        &self,
        index: IndexName,
        key: &str,
        properties: &Properties,
    ) -> Result<(StoredNode, bool), StoreError> {
        let inner = self.inner.lock();
        let json = serde_json::to_string(properties)?;
        let inserted = inner.conn.execute(
            "INSERT OR IGNORE INTO nodes (index_name, index_key, properties_json) VALUES (?1, ?2, ?3)",
            params![index.as_str(), key, json],
        )?;
        let node = Self::query_keyed(&inner.conn, index, key)?
            .ok_or_else(|| StoreError::Corrupt(format!("node {}:{} vanished after insert", index, key)))?;
        Ok((node, inserted == 1))
    }

    fn find_exact(&self, index: IndexName, key: &str) -> Result<Vec<StoredNode>, StoreError> {
        let inner = self.inner.lock();
        Ok(Self::query_keyed(&inner.conn, index, key)?.into_iter().collect())
    }

    fn get_node(&self, id: NodeId) -> Result<Option<StoredNode>, StoreError> {
        let inner = self.inner.lock();
        Self::query_node(&inner.conn, id)
    }

    fn update_properties(&self, id: NodeId, properties: &Properties) -> Result<(), StoreError> {
        let inner = self.inner.lock();
        let mut node = Self::query_node(&inner.conn, id)?.ok_or(StoreError::NodeNotFound(id))?;
        node.properties
            .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        inner.conn.execute(
            "UPDATE nodes SET properties_json = ?1 WHERE id = ?2",
            params![serde_json::to_string(&node.properties)?, id as i64],
        )?;
        Ok(())
    }

    fn create_edge(
        &self,
        source: NodeId,
        target: NodeId,
        edge_type: EdgeType,
        attributes: &EdgeAttributes,
    ) -> Result<(EdgeId, bool), StoreError> {
        let inner = self.inner.lock();
        Self::require_node(&inner.conn, source)?;
        Self::require_node(&inner.conn, target)?;

        let scope = attributes.scope.clone().unwrap_or_default();
        let inserted = inner.conn.execute(
            "INSERT OR IGNORE INTO edges (source, target, edge_type, scope, optional)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                source as i64,
                target as i64,
                edge_type.as_str(),
                scope,
                attributes.optional
            ],
        )?;
        let id: i64 = inner.conn.query_row(
            "SELECT id FROM edges WHERE source = ?1 AND target = ?2 AND edge_type = ?3 AND scope = ?4",
            params![source as i64, target as i64, edge_type.as_str(), scope],
            |row| row.get(0),
        )?;
        Ok((id as EdgeId, inserted == 1))
    }

    fn outgoing_edges(&self, id: NodeId, edge_type: EdgeType) -> Result<Vec<StoredEdge>, StoreError> {
        let inner = self.inner.lock();
        Self::require_node(&inner.conn, id)?;
        let mut stmt = inner.conn.prepare(
            "SELECT id, target, scope, optional FROM edges
             WHERE source = ?1 AND edge_type = ?2 ORDER BY id",
        )?;
        let edges = stmt
            .query_map(params![id as i64, edge_type.as_str()], |row| {
                let scope: String = row.get(2)?;
                Ok(StoredEdge {
                    id: row.get::<_, i64>(0)? as EdgeId,
                    source: id,
                    target: row.get::<_, i64>(1)? as NodeId,
                    edge_type,
                    attributes: EdgeAttributes {
                        scope: (!scope.is_empty()).then_some(scope),
                        optional: row.get(3)?,
                    },
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(edges)
    }

    fn has_incoming(&self, id: NodeId, edge_type: EdgeType) -> Result<bool, StoreError> {
        let inner = self.inner.lock();
        Self::require_node(&inner.conn, id)?;
        Ok(inner.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM edges WHERE target = ?1 AND edge_type = ?2)",
            params![id as i64, edge_type.as_str()],
            |row| row.get(0),
        )?)
    }

    fn begin_batch(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.in_batch {
            return Err(StoreError::BatchState("a batch is already open"));
        }
        inner.conn.execute_batch("BEGIN IMMEDIATE")?;
        inner.in_batch = true;
        Ok(())
    }

    fn commit_batch(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.in_batch {
            return Err(StoreError::BatchState("no open batch to commit"));
        }
        inner.conn.execute_batch("COMMIT")?;
        inner.in_batch = false;
        Ok(())
    }

    fn rollback_batch(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.in_batch {
            return Err(StoreError::BatchState("no open batch to roll back"));
        }
        inner.in_batch = false;
        inner.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn stats(&self) -> Result<GraphStats, StoreError> {
        let inner = self.inner.lock();
        let mut stats = GraphStats::default();

        let mut stmt = inner
            .conn
            .prepare("SELECT index_name, COUNT(*) FROM nodes GROUP BY index_name")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (index, count) = row?;
            let label = IndexName::parse(&index)
                .map(|i| i.label().to_string())
                .unwrap_or(index);
            stats.nodes.insert(label, count as usize);
        }

        let mut stmt = inner
            .conn
            .prepare("SELECT edge_type, COUNT(*) FROM edges GROUP BY edge_type")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (edge_type, count) = row?;
            stats.edges.insert(edge_type, count as usize);
        }

        let missing: i64 = inner.conn.query_row(
            "SELECT COUNT(*) FROM nodes
             WHERE index_name = 'versions' AND json_extract(properties_json, '$.missing') = 1",
            [],
            |row| row.get(0),
        )?;
        stats.missing_versions = missing as usize;

        Ok(stats)
    }
}

impl std::fmt::Debug for SqliteGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteGraphStore")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::props;

    fn flagged() -> Properties {
        let mut p = Properties::new();
        p.insert(props::MISSING.into(), true.into());
        p
    }

    #[test]
    fn test_keyed_nodes_roundtrip_properties() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let (node, created) = store
            .get_or_create_node(IndexName::Versions, "g:a:1", &flagged())
            .unwrap();
        assert!(created);
        assert!(node.is_missing());

        let (again, created) = store
            .get_or_create_node(IndexName::Versions, "g:a:1", &Properties::new())
            .unwrap();
        assert!(!created);
        assert_eq!(again, node);
    }

    #[test]
    fn test_update_properties_merges() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let (node, _) = store
            .get_or_create_node(IndexName::Versions, "g:a:1", &flagged())
            .unwrap();

        let mut update = Properties::new();
        update.insert(props::MISSING.into(), false.into());
        update.insert(props::NAME.into(), "a".into());
        store.update_properties(node.id, &update).unwrap();

        let node = store.get_node(node.id).unwrap().unwrap();
        assert!(!node.is_missing());
        assert_eq!(node.text(props::NAME), Some("a"));
    }

    #[test]
    fn test_rollback_and_commit() {
        let store = SqliteGraphStore::in_memory().unwrap();

        store.begin_batch().unwrap();
        store
            .get_or_create_node(IndexName::Groups, "discarded", &Properties::new())
            .unwrap();
        store.rollback_batch().unwrap();
        assert!(store.find_exact(IndexName::Groups, "discarded").unwrap().is_empty());

        store.begin_batch().unwrap();
        store
            .get_or_create_node(IndexName::Groups, "kept", &Properties::new())
            .unwrap();
        store.commit_batch().unwrap();
        assert_eq!(store.find_exact(IndexName::Groups, "kept").unwrap().len(), 1);
    }

    #[test]
    fn test_stats_counts_missing_versions() {
        let store = SqliteGraphStore::in_memory().unwrap();
        let (g, _) = store
            .get_or_create_node(IndexName::Groups, "g", &Properties::new())
            .unwrap();
        let (a, _) = store
            .get_or_create_node(IndexName::Artifacts, "g:a", &Properties::new())
            .unwrap();
        store
            .get_or_create_node(IndexName::Versions, "g:a:1", &flagged())
            .unwrap();
        store
            .create_edge(g.id, a.id, EdgeType::HasArtifact, &EdgeAttributes::default())
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.nodes.get("Group"), Some(&1));
        assert_eq!(stats.node_count(), 3);
        assert_eq!(stats.edges.get("HAS_ARTIFACT"), Some(&1));
        assert_eq!(stats.missing_versions, 1);
    }

    #[test]
    fn test_reopen_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        {
            let store = SqliteGraphStore::open(&path).unwrap();
            store
                .get_or_create_node(IndexName::Groups, "g", &Properties::new())
                .unwrap();
        }
        let store = SqliteGraphStore::open(&path).unwrap();
        assert_eq!(store.find_exact(IndexName::Groups, "g").unwrap().len(), 1);
    }
}
