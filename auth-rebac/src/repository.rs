//! Tuple store abstraction
//!
//! The check engine only ever talks to a [`TupleStore`] and the
//! [`GraphSnapshot`]s it hands out, so the backing graph can live in memory
//! or behind a network round trip.

use crate::{error::RebacError, models::*};
use async_trait::async_trait;
use std::sync::Arc;

pub mod deadline;
pub mod memory;

pub use deadline::DeadlineStore;
pub use memory::InMemoryTupleStore;

/// A consistent, read-only version of the relationship graph.
///
/// One snapshot is taken per check so a traversal never observes a
/// partially applied mutation.
#[async_trait]
pub trait GraphSnapshot: Send + Sync {
    /// Revision of the graph this snapshot was taken at. Increases with
    /// every mutation that changes the graph.
    fn revision(&self) -> u64;

    /// All edges leaving `node`. Unknown nodes have no edges.
    async fn outgoing_edges(&self, node: &Node) -> Result<Vec<Edge>, RebacError>;

    /// All edges arriving at `resource`.
    async fn incoming_edges(&self, resource: &Resource) -> Result<Vec<Edge>, RebacError>;

    /// Every edge in the snapshot.
    async fn edges(&self) -> Result<Vec<Edge>, RebacError>;
}

/// Storage interface for relationship tuples
#[async_trait]
pub trait TupleStore: Send + Sync {
    /// Insert an edge unless an identical one exists. Returns whether the
    /// graph changed.
    async fn upsert_edge(&self, edge: &Edge) -> Result<bool, RebacError>;

    /// Remove an exact match. Returns whether the graph changed; absence
    /// is not an error.
    async fn delete_edge(&self, edge: &Edge) -> Result<bool, RebacError>;

    /// Remove a node and every edge incident to it. Returns the number of
    /// edges removed.
    async fn delete_node(&self, node: &Node) -> Result<usize, RebacError>;

    /// Remove every node and edge. Returns the number of edges removed.
    async fn clear(&self) -> Result<usize, RebacError>;

    /// Take a consistent snapshot for reading.
    async fn snapshot(&self) -> Result<Arc<dyn GraphSnapshot>, RebacError>;

    async fn upsert_direct_edge(
        &self,
        principal: PrincipalId,
        relation: &Relation,
        resource: &Resource,
    ) -> Result<bool, RebacError> {
        self.upsert_edge(&Edge::direct(principal, relation.clone(), resource.clone()))
            .await
    }

    async fn upsert_resource_edge(
        &self,
        from: &Resource,
        source_relation: &Relation,
        to: &Resource,
        to_relation: &Relation,
    ) -> Result<bool, RebacError> {
        self.upsert_edge(&Edge::userset(
            from.clone(),
            source_relation.clone(),
            to.clone(),
            to_relation.clone(),
        ))
        .await
    }

    async fn delete_direct_edge(
        &self,
        principal: PrincipalId,
        relation: &Relation,
        resource: &Resource,
    ) -> Result<bool, RebacError> {
        self.delete_edge(&Edge::direct(principal, relation.clone(), resource.clone()))
            .await
    }

    async fn delete_resource_edge(
        &self,
        from: &Resource,
        source_relation: &Relation,
        to: &Resource,
        to_relation: &Relation,
    ) -> Result<bool, RebacError> {
        self.delete_edge(&Edge::userset(
            from.clone(),
            source_relation.clone(),
            to.clone(),
            to_relation.clone(),
        ))
        .await
    }

    async fn delete_principal_node(&self, principal: PrincipalId) -> Result<usize, RebacError> {
        self.delete_node(&Node::Principal(principal)).await
    }

    async fn delete_resource_node(&self, resource: &Resource) -> Result<usize, RebacError> {
        self.delete_node(&Node::Resource(resource.clone())).await
    }

    /// Convenience read of a node's outgoing edges from a fresh snapshot.
    async fn outgoing_edges(&self, node: &Node) -> Result<Vec<Edge>, RebacError> {
        self.snapshot().await?.outgoing_edges(node).await
    }
}
