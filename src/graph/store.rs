//! In-memory knowledge graph with dual-indexing and edge masking.
//!
//! Uses `petgraph` for the graph structure and `DashMap` for fast lookups
//! by node name, relation type, or id. Edges carry an `active` flag so that
//! train/test masking never invalidates ids mid-run.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef as _;

use crate::error::GraphError;

use super::{Dir, EdgeId, EdgeRef, Instance, NodeId, RelId};

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Edge payload stored on petgraph edges.
#[derive(Debug, Clone)]
struct EdgeRecord {
    edge: EdgeId,
    rel: RelId,
    active: bool,
}

/// In-memory knowledge graph backed by petgraph with dual-indexing.
///
/// Provides O(1) node lookups by id or name and per-type edge enumeration
/// through secondary indexes. All reads see only active (unmasked) edges.
pub struct GraphStore {
    /// The directed multigraph: nodes are NodeIds, edges carry EdgeRecords.
    graph: RwLock<DiGraph<NodeId, EdgeRecord>>,
    /// NodeId → NodeIndex mapping.
    node_index: DashMap<NodeId, NodeIndex>,
    /// EdgeId → EdgeIndex mapping.
    edge_index: DashMap<EdgeId, EdgeIndex>,
    /// Node name registry (both directions).
    node_names: DashMap<NodeId, String>,
    name_index: DashMap<String, NodeId>,
    /// Relation type registry (both directions).
    rel_names: DashMap<RelId, String>,
    rel_index: DashMap<String, RelId>,
    /// Relation type → edge ids of that type.
    type_edges: DashMap<RelId, Vec<EdgeId>>,
    next_node: AtomicU64,
    next_edge: AtomicU64,
    next_rel: AtomicU64,
}

impl GraphStore {
    /// Create a new empty graph store.
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(DiGraph::new()),
            node_index: DashMap::new(),
            edge_index: DashMap::new(),
            node_names: DashMap::new(),
            name_index: DashMap::new(),
            rel_names: DashMap::new(),
            rel_index: DashMap::new(),
            type_edges: DashMap::new(),
            next_node: AtomicU64::new(0),
            next_edge: AtomicU64::new(0),
            next_rel: AtomicU64::new(0),
        }
    }

    /// Get or create the node with the given name.
    pub fn intern_node(&self, name: &str) -> NodeId {
        if let Some(id) = self.name_index.get(name) {
            return *id.value();
        }
        let mut graph = self.graph.write().expect("graph lock poisoned");
        // Double-check after acquiring the write lock.
        if let Some(id) = self.name_index.get(name) {
            return *id.value();
        }
        let id = NodeId(self.next_node.fetch_add(1, Ordering::Relaxed));
        let idx = graph.add_node(id);
        self.node_index.insert(id, idx);
        self.node_names.insert(id, name.to_string());
        self.name_index.insert(name.to_string(), id);
        id
    }

    /// Get or create the relation type with the given name.
    pub fn intern_relation(&self, name: &str) -> RelId {
        if let Some(id) = self.rel_index.get(name) {
            return *id.value();
        }
        let id = RelId(self.next_rel.fetch_add(1, Ordering::Relaxed));
        match self.rel_index.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(e) => *e.get(),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(id);
                self.rel_names.insert(id, name.to_string());
                id
            }
        }
    }

    /// Insert an edge between existing nodes. Returns its stable id.
    pub fn insert_edge(&self, sub: NodeId, rel: RelId, obj: NodeId) -> GraphResult<EdgeId> {
        let sub_idx = self.index_of(sub)?;
        let obj_idx = self.index_of(obj)?;
        let id = EdgeId(self.next_edge.fetch_add(1, Ordering::Relaxed));
        {
            let mut graph = self.graph.write().expect("graph lock poisoned");
            let idx = graph.add_edge(
                sub_idx,
                obj_idx,
                EdgeRecord {
                    edge: id,
                    rel,
                    active: true,
                },
            );
            self.edge_index.insert(id, idx);
        }
        self.type_edges.entry(rel).or_default().push(id);
        Ok(id)
    }

    /// Convenience: intern all three names and insert the edge.
    pub fn insert_triple(&self, sub: &str, rel: &str, obj: &str) -> GraphResult<Instance> {
        let s = self.intern_node(sub);
        let r = self.intern_relation(rel);
        let o = self.intern_node(obj);
        let edge = self.insert_edge(s, r, o)?;
        Ok(Instance {
            edge,
            rel: r,
            sub: s,
            obj: o,
        })
    }

    fn index_of(&self, node: NodeId) -> GraphResult<NodeIndex> {
        self.node_index
            .get(&node)
            .map(|e| *e.value())
            .ok_or(GraphError::NodeNotFound { id: node.0 })
    }

    /// The registered name of a node.
    pub fn node_name(&self, node: NodeId) -> GraphResult<String> {
        self.node_names
            .get(&node)
            .map(|e| e.value().clone())
            .ok_or(GraphError::NodeNotFound { id: node.0 })
    }

    /// Look up a node by name.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.name_index.get(name).map(|e| *e.value())
    }

    /// The registered name of a relation type.
    pub fn rel_name(&self, rel: RelId) -> GraphResult<String> {
        self.rel_names
            .get(&rel)
            .map(|e| e.value().clone())
            .ok_or(GraphError::UnknownRelation {
                name: rel.to_string(),
            })
    }

    /// Look up a relation type by name.
    pub fn rel_id(&self, name: &str) -> Option<RelId> {
        self.rel_index.get(name).map(|e| *e.value())
    }

    /// All registered relation types.
    pub fn relation_types(&self) -> Vec<RelId> {
        self.rel_names.iter().map(|e| *e.key()).collect()
    }

    /// All active edges of the given relation type, in stored orientation.
    pub fn edges_of_type(&self, rel: RelId) -> Vec<EdgeRef> {
        let ids = match self.type_edges.get(&rel) {
            Some(v) => v.value().clone(),
            None => return vec![],
        };
        let graph = self.graph.read().expect("graph lock poisoned");
        ids.iter()
            .filter_map(|id| {
                let idx = *self.edge_index.get(id)?.value();
                let record = graph.edge_weight(idx)?;
                if !record.active {
                    return None;
                }
                let (s, t) = graph.edge_endpoints(idx)?;
                Some(EdgeRef {
                    edge: record.edge,
                    rel: record.rel,
                    source: *graph.node_weight(s)?,
                    target: *graph.node_weight(t)?,
                })
            })
            .collect()
    }

    /// Active edges of one relation type incident to `node` in the given
    /// pattern direction (`Forward` = outgoing, `Inverse` = incoming).
    pub fn neighbors(&self, node: NodeId, rel: RelId, dir: Dir) -> Vec<EdgeRef> {
        let petdir = match dir {
            Dir::Forward => Direction::Outgoing,
            Dir::Inverse => Direction::Incoming,
        };
        let idx = match self.node_index.get(&node) {
            Some(e) => *e.value(),
            None => return vec![],
        };
        let graph = self.graph.read().expect("graph lock poisoned");
        graph
            .edges_directed(idx, petdir)
            .filter(|e| e.weight().active && e.weight().rel == rel)
            .filter_map(|e| {
                Some(EdgeRef {
                    edge: e.weight().edge,
                    rel: e.weight().rel,
                    source: *graph.node_weight(e.source())?,
                    target: *graph.node_weight(e.target())?,
                })
            })
            .collect()
    }

    /// All active edges incident to `node`, both directions, any type.
    ///
    /// Self-loops appear once per direction, matching the underlying
    /// multigraph's edge listing.
    pub fn incident_edges(&self, node: NodeId) -> Vec<EdgeRef> {
        let idx = match self.node_index.get(&node) {
            Some(e) => *e.value(),
            None => return vec![],
        };
        let graph = self.graph.read().expect("graph lock poisoned");
        let mut result = Vec::new();
        for petdir in [Direction::Outgoing, Direction::Incoming] {
            for e in graph.edges_directed(idx, petdir) {
                if !e.weight().active {
                    continue;
                }
                let (Some(&source), Some(&target)) =
                    (graph.node_weight(e.source()), graph.node_weight(e.target()))
                else {
                    continue;
                };
                // A self-loop is yielded by both direction queries; keep one.
                if source == target && petdir == Direction::Incoming {
                    continue;
                }
                result.push(EdgeRef {
                    edge: e.weight().edge,
                    rel: e.weight().rel,
                    source,
                    target,
                });
            }
        }
        result
    }

    /// Resolve an edge id into an [`Instance`], whether masked or not.
    pub fn instance(&self, edge: EdgeId) -> GraphResult<Instance> {
        let idx = *self
            .edge_index
            .get(&edge)
            .ok_or(GraphError::EdgeNotFound { id: edge.0 })?
            .value();
        let graph = self.graph.read().expect("graph lock poisoned");
        let record = graph
            .edge_weight(idx)
            .ok_or(GraphError::EdgeNotFound { id: edge.0 })?;
        let (s, t) = graph
            .edge_endpoints(idx)
            .ok_or(GraphError::EdgeNotFound { id: edge.0 })?;
        Ok(Instance {
            edge,
            rel: record.rel,
            sub: *graph
                .node_weight(s)
                .ok_or(GraphError::EdgeNotFound { id: edge.0 })?,
            obj: *graph
                .node_weight(t)
                .ok_or(GraphError::EdgeNotFound { id: edge.0 })?,
        })
    }

    /// All active instances of the given relation type.
    pub fn instances_of(&self, rel: RelId) -> Vec<Instance> {
        self.edges_of_type(rel)
            .into_iter()
            .map(|e| Instance {
                edge: e.edge,
                rel: e.rel,
                sub: e.source,
                obj: e.target,
            })
            .collect()
    }

    /// Hide the given edges from all reads.
    ///
    /// Runs under a single write-lock window; must not overlap with any
    /// concurrent graph access. Masking an already-masked edge is a no-op.
    pub fn mask_edges(&self, edges: &[EdgeId]) -> GraphResult<()> {
        self.set_active(edges, false)
    }

    /// Restore previously masked edges.
    pub fn unmask_edges(&self, edges: &[EdgeId]) -> GraphResult<()> {
        self.set_active(edges, true)
    }

    fn set_active(&self, edges: &[EdgeId], active: bool) -> GraphResult<()> {
        let mut graph = self.graph.write().expect("graph lock poisoned");
        for id in edges {
            let idx = *self
                .edge_index
                .get(id)
                .ok_or(GraphError::EdgeNotFound { id: id.0 })?
                .value();
            let record = graph
                .edge_weight_mut(idx)
                .ok_or(GraphError::EdgeNotFound { id: id.0 })?;
            record.active = active;
        }
        Ok(())
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.node_index.len()
    }

    /// Number of edges, masked or not.
    pub fn edge_count(&self) -> usize {
        self.edge_index.len()
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .field("relation_types", &self.rel_names.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc_store() -> (GraphStore, Instance, Instance) {
        let store = GraphStore::new();
        let ab = store.insert_triple("a", "likes", "b").unwrap();
        let bc = store.insert_triple("b", "likes", "c").unwrap();
        (store, ab, bc)
    }

    #[test]
    fn intern_is_idempotent() {
        let store = GraphStore::new();
        let a1 = store.intern_node("a");
        let a2 = store.intern_node("a");
        assert_eq!(a1, a2);
        assert_eq!(store.node_count(), 1);

        let r1 = store.intern_relation("likes");
        let r2 = store.intern_relation("likes");
        assert_eq!(r1, r2);
    }

    #[test]
    fn insert_and_query() {
        let (store, ab, _) = abc_store();
        let likes = store.rel_id("likes").unwrap();

        assert_eq!(store.node_count(), 3);
        assert_eq!(store.edge_count(), 2);
        assert_eq!(store.edges_of_type(likes).len(), 2);
        assert_eq!(store.node_name(ab.sub).unwrap(), "a");
        assert_eq!(store.rel_name(likes).unwrap(), "likes");
    }

    #[test]
    fn neighbors_respect_direction() {
        let (store, ab, _) = abc_store();
        let likes = store.rel_id("likes").unwrap();
        let b = store.node_id("b").unwrap();

        let out = store.neighbors(b, likes, Dir::Forward);
        assert_eq!(out.len(), 1);
        assert_eq!(store.node_name(out[0].target).unwrap(), "c");

        let inc = store.neighbors(b, likes, Dir::Inverse);
        assert_eq!(inc.len(), 1);
        assert_eq!(inc[0].edge, ab.edge);
    }

    #[test]
    fn incident_edges_cover_both_directions() {
        let (store, _, _) = abc_store();
        let b = store.node_id("b").unwrap();
        assert_eq!(store.incident_edges(b).len(), 2);
    }

    #[test]
    fn masking_hides_and_restores() {
        let (store, ab, _) = abc_store();
        let likes = store.rel_id("likes").unwrap();

        store.mask_edges(&[ab.edge]).unwrap();
        assert_eq!(store.edges_of_type(likes).len(), 1);
        assert!(
            store
                .neighbors(ab.sub, likes, Dir::Forward)
                .is_empty()
        );
        // Ids survive masking.
        assert_eq!(store.instance(ab.edge).unwrap().sub, ab.sub);

        store.unmask_edges(&[ab.edge]).unwrap();
        assert_eq!(store.edges_of_type(likes).len(), 2);
    }

    #[test]
    fn instances_of_excludes_masked() {
        let (store, ab, _) = abc_store();
        let likes = store.rel_id("likes").unwrap();
        store.mask_edges(&[ab.edge]).unwrap();
        let instances = store.instances_of(likes);
        assert_eq!(instances.len(), 1);
        assert_ne!(instances[0].edge, ab.edge);
    }

    #[test]
    fn unknown_lookups_error() {
        let store = GraphStore::new();
        assert!(store.node_name(NodeId(9)).is_err());
        assert!(store.instance(EdgeId(9)).is_err());
        assert!(store.node_id("nope").is_none());
    }

    #[test]
    fn parallel_edges_are_kept() {
        let store = GraphStore::new();
        store.insert_triple("a", "likes", "b").unwrap();
        store.insert_triple("a", "likes", "b").unwrap();
        let likes = store.rel_id("likes").unwrap();
        assert_eq!(store.edges_of_type(likes).len(), 2);
    }
}
