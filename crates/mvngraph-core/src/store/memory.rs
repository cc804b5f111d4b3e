//! In-memory graph store over `petgraph::StableGraph`.
//!
//! `StableGraph` keeps indices valid across removals, which is what lets a
//! rolled-back batch delete the nodes it created without disturbing the ids
//! handed out for everything else.

use std::collections::HashMap;

use parking_lot::RwLock;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use super::{
    EdgeAttributes, EdgeId, EdgeType, GraphStats, GraphStore, IndexName, NodeId, Properties,
    StoreError, StoredEdge, StoredNode,
};

#[derive(Debug, Clone)]
struct NodeData {
    index: IndexName,
    key: String,
    properties: Properties,
}

#[derive(Debug, Clone)]
struct EdgeData {
    edge_type: EdgeType,
    attributes: EdgeAttributes,
}

/// Uniqueness key of an edge; the scope is `""` when absent.
type EdgeKey = (NodeIndex, NodeIndex, EdgeType, String);

/// Undo record for the open batch.
#[derive(Debug)]
enum JournalEntry {
    NodeCreated(NodeIndex),
    EdgeCreated(EdgeIndex),
    PropertiesReplaced(NodeIndex, Properties),
}

#[derive(Debug, Default)]
struct Inner {
    graph: StableGraph<NodeData, EdgeData>,
    /// Keyed index: (index, key) -> node
    node_index_map: HashMap<(IndexName, String), NodeIndex>,
    edge_index_map: HashMap<EdgeKey, EdgeIndex>,
    /// Present while a batch is open
    journal: Option<Vec<JournalEntry>>,
}

impl Inner {
    fn lookup(&self, index: IndexName, key: &str) -> Option<NodeIndex> {
        self.node_index_map.get(&(index, key.to_string())).copied()
    }

    fn stored(&self, idx: NodeIndex) -> Result<StoredNode, StoreError> {
        let data = self
            .graph
            .node_weight(idx)
            .ok_or(StoreError::NodeNotFound(idx.index() as NodeId))?;
        Ok(StoredNode {
            id: idx.index() as NodeId,
            index: data.index,
            key: data.key.clone(),
            properties: data.properties.clone(),
        })
    }

    fn existing(&self, id: NodeId) -> Result<NodeIndex, StoreError> {
        let idx = NodeIndex::new(id as usize);
        if self.graph.contains_node(idx) {
            Ok(idx)
        } else {
            Err(StoreError::NodeNotFound(id))
        }
    }

    fn record(&mut self, entry: JournalEntry) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(entry);
        }
    }

    fn undo(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::EdgeCreated(e) => {
                if let Some((source, target)) = self.graph.edge_endpoints(e) {
                    if let Some(data) = self.graph.remove_edge(e) {
                        let scope = data.attributes.scope.unwrap_or_default();
                        self.edge_index_map
                            .remove(&(source, target, data.edge_type, scope));
                    }
                }
            }
            JournalEntry::NodeCreated(n) => {
                if let Some(data) = self.graph.remove_node(n) {
                    self.node_index_map.remove(&(data.index, data.key));
                }
            }
            JournalEntry::PropertiesReplaced(n, old) => {
                if let Some(data) = self.graph.node_weight_mut(n) {
                    data.properties = old;
                }
            }
        }
    }
}

/// Graph store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    inner: RwLock<Inner>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a batch is currently open.
    pub fn in_batch(&self) -> bool {
        self.inner.read().journal.is_some()
    }
}

impl GraphStore for MemoryGraphStore {
    fn get_or_create_node(
        &self,
        index: IndexName,
        key: &str,
        properties: &Properties,
    ) -> Result<(StoredNode, bool), StoreError> {
        {
            let inner = self.inner.read();
            if let Some(idx) = inner.lookup(index, key) {
                return Ok((inner.stored(idx)?, false));
            }
        }

        let mut inner = self.inner.write();
        // re-check: another writer may have created it between the locks
        if let Some(idx) = inner.lookup(index, key) {
            return Ok((inner.stored(idx)?, false));
        }

        let idx = inner.graph.add_node(NodeData {
            index,
            key: key.to_string(),
            properties: properties.clone(),
        });
        inner.node_index_map.insert((index, key.to_string()), idx);
        inner.record(JournalEntry::NodeCreated(idx));
        Ok((inner.stored(idx)?, true))
    }

    fn find_exact(&self, index: IndexName, key: &str) -> Result<Vec<StoredNode>, StoreError> {
        let inner = self.inner.read();
        inner
            .lookup(index, key)
            .map(|idx| inner.stored(idx))
            .into_iter()
            .collect()
    }

    fn get_node(&self, id: NodeId) -> Result<Option<StoredNode>, StoreError> {
        let inner = self.inner.read();
        match inner.existing(id) {
            Ok(idx) => inner.stored(idx).map(Some),
            Err(_) => Ok(None),
        }
    }

    fn update_properties(&self, id: NodeId, properties: &Properties) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let idx = inner.existing(id)?;
        let old = {
            let data = inner
                .graph
                .node_weight_mut(idx)
                .ok_or(StoreError::NodeNotFound(id))?;
            let old = data.properties.clone();
            data.properties
                .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
            old
        };
        inner.record(JournalEntry::PropertiesReplaced(idx, old));
        Ok(())
    }

    fn create_edge(
        &self,
        source: NodeId,
        target: NodeId,
        edge_type: EdgeType,
        attributes: &EdgeAttributes,
    ) -> Result<(EdgeId, bool), StoreError> {
        let mut inner = self.inner.write();
        let s = inner.existing(source)?;
        let t = inner.existing(target)?;

        let key = (s, t, edge_type, attributes.scope.clone().unwrap_or_default());
        if let Some(&e) = inner.edge_index_map.get(&key) {
            return Ok((e.index() as EdgeId, false));
        }

        let e = inner.graph.add_edge(
            s,
            t,
            EdgeData {
                edge_type,
                attributes: attributes.clone(),
            },
        );
        inner.edge_index_map.insert(key, e);
        inner.record(JournalEntry::EdgeCreated(e));
        Ok((e.index() as EdgeId, true))
    }

    fn outgoing_edges(&self, id: NodeId, edge_type: EdgeType) -> Result<Vec<StoredEdge>, StoreError> {
        let inner = self.inner.read();
        let idx = inner.existing(id)?;
        Ok(inner
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| e.weight().edge_type == edge_type)
            .map(|e| StoredEdge {
                id: e.id().index() as EdgeId,
                source: e.source().index() as NodeId,
                target: e.target().index() as NodeId,
                edge_type,
                attributes: e.weight().attributes.clone(),
            })
            .collect())
    }

    fn has_incoming(&self, id: NodeId, edge_type: EdgeType) -> Result<bool, StoreError> {
        let inner = self.inner.read();
        let idx = inner.existing(id)?;
        Ok(inner
            .graph
            .edges_directed(idx, Direction::Incoming)
            .any(|e| e.weight().edge_type == edge_type))
    }

    fn begin_batch(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.journal.is_some() {
            return Err(StoreError::BatchState("a batch is already open"));
        }
        inner.journal = Some(Vec::new());
        Ok(())
    }

    fn commit_batch(&self) -> Result<(), StoreError> {
        self.inner
            .write()
            .journal
            .take()
            .map(|_| ())
            .ok_or(StoreError::BatchState("no open batch to commit"))
    }

    fn rollback_batch(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let journal = inner
            .journal
            .take()
            .ok_or(StoreError::BatchState("no open batch to roll back"))?;
        for entry in journal.into_iter().rev() {
            inner.undo(entry);
        }
        Ok(())
    }

    fn stats(&self) -> Result<GraphStats, StoreError> {
        let inner = self.inner.read();
        let mut stats = GraphStats::default();
        for data in inner.graph.node_weights() {
            *stats.nodes.entry(data.index.label().to_string()).or_insert(0) += 1;
            if data.index == IndexName::Versions
                && matches!(
                    data.properties.get(super::props::MISSING),
                    Some(super::PropertyValue::Flag(true))
                )
            {
                stats.missing_versions += 1;
            }
        }
        for data in inner.graph.edge_weights() {
            *stats
                .edges
                .entry(data.edge_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        Ok(stats)
    }
}
