//! In-memory tuple store
//!
//! Nodes live in a `StableDiGraph` arena with a side index from node to
//! arena slot. The whole graph sits behind an `Arc`: writers take the write
//! lock and mutate through `Arc::make_mut`, so a snapshot still held by a
//! running check keeps the version it started with.

use crate::{
    error::RebacError,
    models::*,
    repository::{GraphSnapshot, TupleStore},
};
use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Edge payload stored in the arena.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EdgeLabel {
    label: Relation,
    source_relation: Option<Relation>,
}

impl From<&Edge> for EdgeLabel {
    fn from(edge: &Edge) -> Self {
        Self {
            label: edge.label.clone(),
            source_relation: edge.source_relation.clone(),
        }
    }
}

/// One version of the relationship graph.
#[derive(Debug, Clone, Default)]
pub struct RelationGraph {
    graph: StableDiGraph<Node, EdgeLabel>,
    index: AHashMap<Node, NodeIndex>,
    revision: u64,
}

impl RelationGraph {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn ensure_node(&mut self, node: &Node) -> NodeIndex {
        if let Some(idx) = self.index.get(node) {
            return *idx;
        }
        let idx = self.graph.add_node(node.clone());
        self.index.insert(node.clone(), idx);
        idx
    }

    fn find_edge(&self, edge: &Edge) -> Option<EdgeIndex> {
        let from = *self.index.get(&edge.source)?;
        let to = *self.index.get(&Node::Resource(edge.target.clone()))?;
        let label = EdgeLabel::from(edge);
        self.graph
            .edges_directed(from, Direction::Outgoing)
            .find(|e| e.target() == to && *e.weight() == label)
            .map(|e| e.id())
    }

    /// Returns false when an identical edge already exists.
    pub fn insert_edge(&mut self, edge: &Edge) -> bool {
        if self.find_edge(edge).is_some() {
            return false;
        }
        let from = self.ensure_node(&edge.source);
        let to = self.ensure_node(&Node::Resource(edge.target.clone()));
        self.graph.add_edge(from, to, EdgeLabel::from(edge));
        self.revision += 1;
        true
    }

    /// Drop `idx` once nothing points into or out of it.
    fn prune_if_isolated(&mut self, idx: NodeIndex) {
        let isolated = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.graph.edges_directed(idx, Direction::Incoming))
            .next()
            .is_none();
        if isolated {
            if let Some(node) = self.graph.remove_node(idx) {
                self.index.remove(&node);
            }
        }
    }

    /// Removes an exact match. Endpoints left without edges are dropped too.
    pub fn remove_edge(&mut self, edge: &Edge) -> bool {
        let Some(id) = self.find_edge(edge) else {
            return false;
        };
        let endpoints = self.graph.edge_endpoints(id);
        self.graph.remove_edge(id);
        if let Some((from, to)) = endpoints {
            self.prune_if_isolated(from);
            if to != from {
                self.prune_if_isolated(to);
            }
        }
        self.revision += 1;
        true
    }

    /// Removes the node together with its incoming and outgoing edges.
    pub fn remove_node(&mut self, node: &Node) -> usize {
        let Some(idx) = self.index.remove(node) else {
            return 0;
        };
        let mut incident: HashSet<EdgeIndex> = HashSet::new();
        let mut neighbours: HashSet<NodeIndex> = HashSet::new();
        for e in self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.graph.edges_directed(idx, Direction::Incoming))
        {
            incident.insert(e.id());
            neighbours.insert(e.source());
            neighbours.insert(e.target());
        }
        neighbours.remove(&idx);
        self.graph.remove_node(idx);
        for neighbour in neighbours {
            self.prune_if_isolated(neighbour);
        }
        self.revision += 1;
        incident.len()
    }

    /// Empties the graph. The revision keeps counting up.
    pub fn clear(&mut self) -> usize {
        let removed = self.graph.edge_count();
        *self = Self {
            revision: self.revision + 1,
            ..Self::default()
        };
        removed
    }

    fn to_edge(&self, source: &Node, target: NodeIndex, weight: &EdgeLabel) -> Option<Edge> {
        match self.graph.node_weight(target)? {
            Node::Resource(resource) => Some(Edge {
                source: source.clone(),
                label: weight.label.clone(),
                target: resource.clone(),
                source_relation: weight.source_relation.clone(),
            }),
            Node::Principal(_) => None,
        }
    }

    pub fn outgoing_edges(&self, node: &Node) -> Vec<Edge> {
        let Some(idx) = self.index.get(node) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(*idx, Direction::Outgoing)
            .filter_map(|e| self.to_edge(node, e.target(), e.weight()))
            .collect()
    }

    /// Edges arriving at `resource`, the reverse of `outgoing_edges`.
    pub fn incoming_edges(&self, resource: &Resource) -> Vec<Edge> {
        let Some(idx) = self.index.get(&Node::Resource(resource.clone())) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(*idx, Direction::Incoming)
            .filter_map(|e| {
                let source = self.graph.node_weight(e.source())?;
                self.to_edge(source, e.target(), e.weight())
            })
            .collect()
    }

    pub fn edges(&self) -> Vec<Edge> {
        self.graph
            .edge_references()
            .filter_map(|e| {
                let source = self.graph.node_weight(e.source())?;
                self.to_edge(source, e.target(), e.weight())
            })
            .collect()
    }
}

struct MemorySnapshot {
    graph: Arc<RelationGraph>,
}

#[async_trait]
impl GraphSnapshot for MemorySnapshot {
    fn revision(&self) -> u64 {
        self.graph.revision()
    }

    async fn outgoing_edges(&self, node: &Node) -> Result<Vec<Edge>, RebacError> {
        Ok(self.graph.outgoing_edges(node))
    }

    async fn incoming_edges(&self, resource: &Resource) -> Result<Vec<Edge>, RebacError> {
        Ok(self.graph.incoming_edges(resource))
    }

    async fn edges(&self) -> Result<Vec<Edge>, RebacError> {
        Ok(self.graph.edges())
    }
}

/// In-memory tuple store for embedding, testing and development
pub struct InMemoryTupleStore {
    graph: RwLock<Arc<RelationGraph>>,
}

impl InMemoryTupleStore {
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(Arc::new(RelationGraph::default())),
        }
    }

    /// The current graph version, without going through the async trait.
    pub fn current(&self) -> Arc<RelationGraph> {
        self.graph.read().clone()
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut RelationGraph) -> T) -> T {
        let mut guard = self.graph.write();
        f(Arc::make_mut(&mut guard))
    }
}

impl Default for InMemoryTupleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TupleStore for InMemoryTupleStore {
    async fn upsert_edge(&self, edge: &Edge) -> Result<bool, RebacError> {
        let inserted = self.mutate(|graph| graph.insert_edge(edge));
        debug!(edge = %edge, inserted, "upsert edge");
        Ok(inserted)
    }

    async fn delete_edge(&self, edge: &Edge) -> Result<bool, RebacError> {
        let removed = self.mutate(|graph| graph.remove_edge(edge));
        debug!(edge = %edge, removed, "delete edge");
        Ok(removed)
    }

    async fn delete_node(&self, node: &Node) -> Result<usize, RebacError> {
        let removed = self.mutate(|graph| graph.remove_node(node));
        debug!(node = %node, removed, "delete node");
        Ok(removed)
    }

    async fn clear(&self) -> Result<usize, RebacError> {
        let removed = self.mutate(RelationGraph::clear);
        debug!(removed, "clear graph");
        Ok(removed)
    }

    async fn snapshot(&self) -> Result<Arc<dyn GraphSnapshot>, RebacError> {
        Ok(Arc::new(MemorySnapshot {
            graph: self.current(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: u64) -> Resource {
        Resource::new("doc", id).unwrap()
    }

    fn group(id: u64) -> Resource {
        Resource::new("group", id).unwrap()
    }

    fn rel(name: &str) -> Relation {
        Relation::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = InMemoryTupleStore::new();

        assert!(store.upsert_direct_edge(PrincipalId(2), &rel("owner"), &doc(1)).await.unwrap());
        assert!(!store.upsert_direct_edge(PrincipalId(2), &rel("OWNER"), &doc(1)).await.unwrap());

        let graph = store.current();
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.revision(), 1);
    }

    #[tokio::test]
    async fn test_edges_differing_in_source_relation_are_distinct() {
        let store = InMemoryTupleStore::new();

        store
            .upsert_resource_edge(&group(5), &rel("member"), &doc(1), &rel("viewer"))
            .await
            .unwrap();
        store
            .upsert_resource_edge(&group(5), &rel("admin"), &doc(1), &rel("viewer"))
            .await
            .unwrap();

        let edges = store.outgoing_edges(&Node::Resource(group(5))).await.unwrap();
        assert_eq!(edges.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_edge_absent_is_not_error() {
        let store = InMemoryTupleStore::new();
        assert!(!store.delete_direct_edge(PrincipalId(1), &rel("viewer"), &doc(1)).await.unwrap());

        store.upsert_direct_edge(PrincipalId(1), &rel("viewer"), &doc(1)).await.unwrap();
        assert!(store.delete_direct_edge(PrincipalId(1), &rel("viewer"), &doc(1)).await.unwrap());
        assert!(store.outgoing_edges(&Node::Principal(PrincipalId(1))).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_node_cascades_both_directions() {
        let store = InMemoryTupleStore::new();
        store.upsert_direct_edge(PrincipalId(2), &rel("member"), &group(5)).await.unwrap();
        store.upsert_direct_edge(PrincipalId(3), &rel("member"), &group(5)).await.unwrap();
        store
            .upsert_resource_edge(&group(5), &rel("member"), &doc(1), &rel("viewer"))
            .await
            .unwrap();
        store.upsert_direct_edge(PrincipalId(2), &rel("owner"), &doc(9)).await.unwrap();

        let removed = store.delete_resource_node(&group(5)).await.unwrap();
        assert_eq!(removed, 3);

        let remaining = store.snapshot().await.unwrap().edges().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].target, doc(9));

        assert_eq!(store.delete_principal_node(PrincipalId(2)).await.unwrap(), 1);
        assert_eq!(store.delete_principal_node(PrincipalId(2)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_writes() {
        let store = InMemoryTupleStore::new();
        store.upsert_direct_edge(PrincipalId(1), &rel("viewer"), &doc(1)).await.unwrap();

        let snapshot = store.snapshot().await.unwrap();
        store.upsert_direct_edge(PrincipalId(1), &rel("editor"), &doc(1)).await.unwrap();
        store.delete_principal_node(PrincipalId(1)).await.unwrap();

        let seen = snapshot.outgoing_edges(&Node::Principal(PrincipalId(1))).await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(snapshot.revision(), 1);
        assert!(store.current().revision() > snapshot.revision());
    }

    #[tokio::test]
    async fn test_isolated_nodes_are_dropped() {
        let store = InMemoryTupleStore::new();
        store.upsert_direct_edge(PrincipalId(2), &rel("member"), &group(5)).await.unwrap();
        store
            .upsert_resource_edge(&group(5), &rel("member"), &doc(1), &rel("viewer"))
            .await
            .unwrap();
        assert_eq!(store.current().node_count(), 3);

        store
            .delete_resource_edge(&group(5), &rel("member"), &doc(1), &rel("viewer"))
            .await
            .unwrap();
        // doc:1 had no other edge; group:5 still holds the membership
        assert_eq!(store.current().node_count(), 2);

        store.delete_direct_edge(PrincipalId(2), &rel("member"), &group(5)).await.unwrap();
        assert_eq!(store.current().node_count(), 0);

        for id in 0..100 {
            store.upsert_direct_edge(PrincipalId(id), &rel("viewer"), &doc(id)).await.unwrap();
            store.delete_direct_edge(PrincipalId(id), &rel("viewer"), &doc(id)).await.unwrap();
        }
        assert_eq!(store.current().node_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_node_drops_orphaned_neighbours() {
        let store = InMemoryTupleStore::new();
        store.upsert_direct_edge(PrincipalId(2), &rel("member"), &group(5)).await.unwrap();
        store.upsert_direct_edge(PrincipalId(2), &rel("owner"), &doc(9)).await.unwrap();
        store.upsert_direct_edge(PrincipalId(3), &rel("member"), &group(5)).await.unwrap();

        assert_eq!(store.delete_resource_node(&group(5)).await.unwrap(), 2);
        // principal 3 had no other edge, principal 2 still owns doc:9
        let graph = store.current();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.outgoing_edges(&Node::Principal(PrincipalId(2))).len(), 1);
    }

    #[tokio::test]
    async fn test_incoming_edges() {
        let store = InMemoryTupleStore::new();
        store.upsert_direct_edge(PrincipalId(2), &rel("owner"), &doc(1)).await.unwrap();
        store
            .upsert_resource_edge(&group(5), &rel("member"), &doc(1), &rel("viewer"))
            .await
            .unwrap();

        let snapshot = store.snapshot().await.unwrap();
        let mut incoming = snapshot.incoming_edges(&doc(1)).await.unwrap();
        incoming.sort_by(|a, b| a.source.cmp(&b.source));
        assert_eq!(incoming.len(), 2);
        assert_eq!(incoming[0].source, Node::Principal(PrincipalId(2)));
        assert_eq!(incoming[1].source, Node::Resource(group(5)));
        assert!(snapshot.incoming_edges(&doc(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_empties_graph_and_bumps_revision() {
        let store = InMemoryTupleStore::new();
        store.upsert_direct_edge(PrincipalId(2), &rel("owner"), &doc(1)).await.unwrap();
        store.upsert_direct_edge(PrincipalId(3), &rel("owner"), &doc(1)).await.unwrap();
        let before = store.current().revision();

        assert_eq!(store.clear().await.unwrap(), 2);
        let graph = store.current();
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.node_count(), 0);
        assert!(graph.revision() > before);
        assert_eq!(store.clear().await.unwrap(), 0);
    }
}
