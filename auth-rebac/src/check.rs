use crate::{
    error::{RebacError, Result},
    models::*,
    repository::{GraphSnapshot, TupleStore},
    rules::{RewriteRules, RuleTableHandle},
};
use ahash::AHashSet;
use dashmap::DashMap;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Tuning for the check engine.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// Upper bound on concurrent node expansions within one traversal level.
    pub max_concurrency: usize,
    /// Deadline for a whole check. `None` waits as long as the store allows.
    pub check_timeout: Option<Duration>,
    /// Entries kept in the decision cache; `None` disables caching.
    pub cache_capacity: Option<usize>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            check_timeout: None,
            cache_capacity: None,
        }
    }
}

/// One step of a path being explored: the resource reached, the label of
/// the edge that reached it, and the rest of the path behind it. Tails are
/// shared between sibling paths.
struct PathStep {
    node: Resource,
    arrived_by: Relation,
    parent: Option<Arc<PathStep>>,
}

impl PathStep {
    fn depth(&self) -> usize {
        self.ancestors().count()
    }

    fn ancestors(&self) -> impl Iterator<Item = &PathStep> {
        std::iter::successors(Some(self), |step| step.parent.as_deref())
    }

    fn visits(&self, resource: &Resource) -> bool {
        self.ancestors().any(|step| step.node == *resource)
    }
}

enum Expansion {
    Satisfied,
    Continue(Vec<Arc<PathStep>>),
}

/// Per-request inputs shared by every expansion of one traversal.
struct Traversal<'a> {
    snapshot: &'a dyn GraphSnapshot,
    rules: &'a RewriteRules,
    target: &'a Resource,
    accepted: &'a BTreeSet<Relation>,
    reachable: &'a AHashSet<Resource>,
}

impl Traversal<'_> {
    /// Follow the edges leaving the head of `step`. An edge may extend the
    /// path only if the label that reached the current resource is accepted
    /// for the edge's source relation on that resource's namespace.
    async fn expand(&self, step: Arc<PathStep>) -> Result<Expansion> {
        let edges = self
            .snapshot
            .outgoing_edges(&Node::Resource(step.node.clone()))
            .await?;

        let mut next = Vec::new();
        for edge in edges {
            let Some(ref entry) = edge.source_relation else {
                continue;
            };
            if !self.rules.accepts(&step.node.namespace, entry, &step.arrived_by) {
                continue;
            }
            if edge.target == *self.target {
                if self.accepted.contains(&edge.label) {
                    return Ok(Expansion::Satisfied);
                }
                continue;
            }
            if !self.reachable.contains(&edge.target) || step.visits(&edge.target) {
                continue;
            }
            next.push(Arc::new(PathStep {
                node: edge.target,
                arrived_by: edge.label,
                parent: Some(step.clone()),
            }));
        }
        Ok(Expansion::Continue(next))
    }
}

/// Resources with a chain of edges into `target` whose last hop carries an
/// accepted label. A path that leaves this set can never satisfy the check.
async fn reaching_target(
    snapshot: &dyn GraphSnapshot,
    target: &Resource,
    accepted: &BTreeSet<Relation>,
) -> Result<AHashSet<Resource>> {
    let mut reachable = AHashSet::new();
    let mut pending = Vec::new();

    let last_hops = snapshot.incoming_edges(target).await?;
    for edge in last_hops {
        if !accepted.contains(&edge.label) {
            continue;
        }
        if let Node::Resource(source) = edge.source {
            if source != *target && reachable.insert(source.clone()) {
                pending.push(source);
            }
        }
    }

    while let Some(resource) = pending.pop() {
        for edge in snapshot.incoming_edges(&resource).await? {
            if let Node::Resource(source) = edge.source {
                if source != *target && reachable.insert(source.clone()) {
                    pending.push(source);
                }
            }
        }
    }
    Ok(reachable)
}

#[derive(Debug, Clone, Copy)]
struct CachedDecision {
    revision: u64,
    generation: u64,
    allowed: bool,
}

/// Permission checker: a direct lookup followed by a breadth-first search
/// over userset chains.
pub struct CheckEngine {
    store: Arc<dyn TupleStore>,
    rules: Arc<RuleTableHandle>,
    config: CheckConfig,
    cache: Option<DashMap<CheckRequest, CachedDecision>>,
}

impl CheckEngine {
    pub fn new(store: Arc<dyn TupleStore>, rules: Arc<RuleTableHandle>) -> Self {
        Self::with_config(store, rules, CheckConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn TupleStore>,
        rules: Arc<RuleTableHandle>,
        config: CheckConfig,
    ) -> Self {
        let cache = config.cache_capacity.map(|_| DashMap::new());
        Self {
            store,
            rules,
            config,
            cache,
        }
    }

    /// Check if the principal holds `relation` on the resource. "No access"
    /// is `Ok(false)`; errors mean the question could not be answered.
    pub async fn check(&self, request: &CheckRequest) -> Result<bool> {
        match self.config.check_timeout {
            Some(limit) => timeout(limit, self.check_inner(request))
                .await
                .map_err(|_| {
                    RebacError::CheckTimeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))
                })?,
            None => self.check_inner(request).await,
        }
    }

    async fn check_inner(&self, request: &CheckRequest) -> Result<bool> {
        let (generation, rules) = self.rules.current();
        let snapshot = self.store.snapshot().await?;
        let revision = snapshot.revision();

        if let Some(allowed) = self.cached(request, revision, generation) {
            debug!("Cache hit for permission check: {}", request);
            return Ok(allowed);
        }

        let allowed = self.resolve(snapshot.as_ref(), &rules, request).await?;

        if let (Some(cache), Some(capacity)) = (&self.cache, self.config.cache_capacity) {
            if cache.len() >= capacity {
                cache.clear();
            }
            cache.insert(
                request.clone(),
                CachedDecision {
                    revision,
                    generation,
                    allowed,
                },
            );
        }
        Ok(allowed)
    }

    fn cached(&self, request: &CheckRequest, revision: u64, generation: u64) -> Option<bool> {
        let entry = self.cache.as_ref()?.get(request)?;
        (entry.revision == revision && entry.generation == generation).then_some(entry.allowed)
    }

    async fn resolve(
        &self,
        snapshot: &dyn GraphSnapshot,
        rules: &RewriteRules,
        request: &CheckRequest,
    ) -> Result<bool> {
        let accepted = rules.lookup(&request.resource.namespace, &request.relation);
        if accepted.is_empty() {
            debug!("No rule for {}.{}", request.resource.namespace, request.relation);
            return Ok(false);
        }

        // 1. Direct check: one edge from the principal with an accepted label.
        let initial = snapshot
            .outgoing_edges(&Node::Principal(request.principal))
            .await?;
        if initial
            .iter()
            .any(|edge| edge.target == request.resource && accepted.contains(&edge.label))
        {
            debug!("Direct permission found: {}", request);
            return Ok(true);
        }

        // 2. Transitive check. Paths never pass through the target: reaching
        // it with a rejected label ends that path.
        let reachable = reaching_target(snapshot, &request.resource, accepted).await?;
        if reachable.is_empty() {
            debug!("No userset chain can end at {}", request.resource);
            return Ok(false);
        }

        let mut frontier: Vec<Arc<PathStep>> = initial
            .into_iter()
            .filter(|edge| edge.target != request.resource && reachable.contains(&edge.target))
            .map(|edge| {
                Arc::new(PathStep {
                    node: edge.target,
                    arrived_by: edge.label,
                    parent: None,
                })
            })
            .collect();

        let traversal = Traversal {
            snapshot,
            rules,
            target: &request.resource,
            accepted,
            reachable: &reachable,
        };
        let fan_out = self.config.max_concurrency.max(1);

        while !frontier.is_empty() {
            debug!(
                depth = frontier.first().map_or(0, |step| step.depth()),
                paths = frontier.len(),
                "Expanding traversal level for {}",
                request
            );
            let mut expansions = stream::iter(frontier)
                .map(|step| traversal.expand(step))
                .buffer_unordered(fan_out);

            let mut next = Vec::new();
            // Returning early drops the stream, cancelling in-flight expansions.
            while let Some(expansion) = expansions.try_next().await? {
                match expansion {
                    Expansion::Satisfied => {
                        debug!("Transitive permission found: {}", request);
                        return Ok(true);
                    }
                    Expansion::Continue(steps) => next.extend(steps),
                }
            }
            frontier = next;
        }

        Ok(false)
    }
}
