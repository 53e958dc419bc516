//! Deadline enforcement for stores reached over the network.
//!
//! Every round trip, including each `outgoing_edges` call made during a
//! traversal, is bounded by the same deadline. A miss is reported as
//! [`RebacError::StoreUnavailable`] so it can never be read as "access
//! denied".

use crate::{
    error::RebacError,
    models::*,
    repository::{GraphSnapshot, TupleStore},
};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

async fn with_deadline<T>(
    operation: &'static str,
    deadline: Duration,
    fut: impl Future<Output = Result<T, RebacError>> + Send,
) -> Result<T, RebacError> {
    match timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            let timeout_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
            warn!(operation, timeout_ms, "store deadline exceeded");
            Err(RebacError::StoreUnavailable {
                operation,
                timeout_ms,
            })
        }
    }
}

/// Wraps a store so that no call can block past `deadline`.
pub struct DeadlineStore<S> {
    inner: S,
    deadline: Duration,
}

impl<S: TupleStore> DeadlineStore<S> {
    pub fn new(inner: S, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

}

struct DeadlineSnapshot {
    inner: Arc<dyn GraphSnapshot>,
    deadline: Duration,
}

#[async_trait]
impl GraphSnapshot for DeadlineSnapshot {
    fn revision(&self) -> u64 {
        self.inner.revision()
    }

    async fn outgoing_edges(&self, node: &Node) -> Result<Vec<Edge>, RebacError> {
        with_deadline("outgoing_edges", self.deadline, self.inner.outgoing_edges(node)).await
    }

    async fn incoming_edges(&self, resource: &Resource) -> Result<Vec<Edge>, RebacError> {
        with_deadline("incoming_edges", self.deadline, self.inner.incoming_edges(resource)).await
    }

    async fn edges(&self) -> Result<Vec<Edge>, RebacError> {
        with_deadline("edges", self.deadline, self.inner.edges()).await
    }
}

#[async_trait]
impl<S: TupleStore> TupleStore for DeadlineStore<S> {
    async fn upsert_edge(&self, edge: &Edge) -> Result<bool, RebacError> {
        with_deadline("upsert_edge", self.deadline, self.inner.upsert_edge(edge)).await
    }

    async fn delete_edge(&self, edge: &Edge) -> Result<bool, RebacError> {
        with_deadline("delete_edge", self.deadline, self.inner.delete_edge(edge)).await
    }

    async fn delete_node(&self, node: &Node) -> Result<usize, RebacError> {
        with_deadline("delete_node", self.deadline, self.inner.delete_node(node)).await
    }

    async fn clear(&self) -> Result<usize, RebacError> {
        with_deadline("clear", self.deadline, self.inner.clear()).await
    }

    async fn snapshot(&self) -> Result<Arc<dyn GraphSnapshot>, RebacError> {
        let inner = with_deadline("snapshot", self.deadline, self.inner.snapshot()).await?;
        Ok(Arc::new(DeadlineSnapshot {
            inner,
            deadline: self.deadline,
        }))
    }
}
