use crate::{
    check::{CheckConfig, CheckEngine},
    config::EngineConfig,
    error::RebacError,
    models::*,
    mutation::MutationApi,
    repository::{DeadlineStore, GraphSnapshot, InMemoryTupleStore, TupleStore},
    rules::{RewriteRules, RuleTableHandle},
};
use futures::future::try_join_all;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Relationship-based authorization engine
///
/// Owns the handles to the tuple store and the rewrite rule table and
/// wires them into the check engine and the mutation API.
pub struct AuthorizationEngine {
    store: Arc<dyn TupleStore>,
    rules: Arc<RuleTableHandle>,
    checker: CheckEngine,
    mutations: MutationApi,
}

impl AuthorizationEngine {
    /// Create an engine over `store` with default check settings.
    pub fn new(store: Arc<dyn TupleStore>, rules: RewriteRules) -> Self {
        Self::with_check_config(store, rules, CheckConfig::default())
    }

    /// Create an engine backed by a fresh in-memory store.
    pub fn in_memory(rules: RewriteRules) -> Self {
        Self::new(Arc::new(InMemoryTupleStore::new()), rules)
    }

    pub fn with_check_config(
        store: Arc<dyn TupleStore>,
        rules: RewriteRules,
        config: CheckConfig,
    ) -> Self {
        let rules = Arc::new(RuleTableHandle::new(rules));
        let checker = CheckEngine::with_config(store.clone(), rules.clone(), config);
        let mutations = MutationApi::new(store.clone());
        Self {
            store,
            rules,
            checker,
            mutations,
        }
    }

    /// Build an engine from configuration: loads the rule table named by
    /// `rules_path` and applies the store deadline, if any, around `store`.
    pub fn from_config<S>(store: S, config: &EngineConfig) -> Result<Self, RebacError>
    where
        S: TupleStore + 'static,
    {
        config.validate()?;
        let rules = match config.rules_path {
            Some(ref path) => RewriteRules::from_path(path)?,
            None => RewriteRules::default(),
        };
        let store: Arc<dyn TupleStore> = match config.store_timeout() {
            Some(deadline) => Arc::new(DeadlineStore::new(store, deadline)),
            None => Arc::new(store),
        };
        info!(
            rules = rules.len(),
            max_concurrency = config.max_concurrency,
            cache = config.cache_enabled,
            "Authorization engine initialized"
        );
        Ok(Self::with_check_config(store, rules, config.check_config()))
    }

    // =============================================================================
    // Core Authorization Operations
    // =============================================================================

    /// Does `principal_id` hold `relation` on `namespace:resource_id`?
    pub async fn check_access(
        &self,
        principal_id: u64,
        resource_id: u64,
        namespace: &str,
        relation: &str,
    ) -> Result<bool, RebacError> {
        let request = CheckRequest::new(principal_id, resource_id, namespace, relation)?;
        self.check(&request).await
    }

    pub async fn check(&self, request: &CheckRequest) -> Result<bool, RebacError> {
        let allowed = self.checker.check(request).await?;
        debug!("Check {} -> {}", request, allowed);
        Ok(allowed)
    }

    /// Run independent checks concurrently; answers come back in request order.
    pub async fn batch_check(&self, requests: &[CheckRequest]) -> Result<Vec<bool>, RebacError> {
        try_join_all(requests.iter().map(|request| self.checker.check(request))).await
    }

    // =============================================================================
    // Tuple Management
    // =============================================================================

    pub fn mutations(&self) -> &MutationApi {
        &self.mutations
    }

    pub async fn snapshot(&self) -> Result<Arc<dyn GraphSnapshot>, RebacError> {
        self.store.snapshot().await
    }

    // =============================================================================
    // Rule Management
    // =============================================================================

    pub fn rules(&self) -> Arc<RewriteRules> {
        self.rules.current().1
    }

    /// Atomically replace the rule table. Checks already running finish on
    /// the table they started with.
    pub fn reload_rules(&self, rules: RewriteRules) {
        self.rules.replace(rules);
    }

    pub fn reload_rules_from_path(&self, path: impl AsRef<Path>) -> Result<(), RebacError> {
        let rules = RewriteRules::from_path(path)?;
        self.reload_rules(rules);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RewriteRules {
        RewriteRules::from_yaml_str("doc:\n  viewer: viewer|owner|editor\n  editor: editor|owner\n").unwrap()
    }

    #[tokio::test]
    async fn test_basic_check() {
        let engine = AuthorizationEngine::in_memory(rules());

        assert!(!engine.check_access(2, 1, "doc", "editor").await.unwrap());

        engine.mutations().create_direct_relation(2, "owner", 1, "doc").await.unwrap();

        assert!(engine.check_access(2, 1, "doc", "editor").await.unwrap());
        assert!(engine.check_access(2, 1, "doc", "viewer").await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_request_is_validation_error() {
        let engine = AuthorizationEngine::in_memory(rules());
        let err = engine.check_access(2, 1, "", "viewer").await.unwrap_err();
        assert!(err.is_validation());
        let err = engine.check_access(2, 1, "doc", " ").await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_batch_check_preserves_order() {
        let engine = AuthorizationEngine::in_memory(rules());
        engine.mutations().create_direct_relation(1, "viewer", 10, "doc").await.unwrap();

        let requests = vec![
            CheckRequest::new(1, 10, "doc", "viewer").unwrap(),
            CheckRequest::new(1, 10, "doc", "editor").unwrap(),
            CheckRequest::new(2, 10, "doc", "viewer").unwrap(),
        ];
        let answers = engine.batch_check(&requests).await.unwrap();
        assert_eq!(answers, vec![true, false, false]);
    }

    #[tokio::test]
    async fn test_from_config_loads_rules() {
        let dir = tempfile::tempdir().unwrap();
        let rules_path = dir.path().join("usersets.yaml");
        std::fs::write(&rules_path, "doc:\n  viewer: owner\n").unwrap();

        let config = EngineConfig {
            rules_path: Some(rules_path),
            store_timeout_ms: Some(1_000),
            ..EngineConfig::default()
        };
        let engine = AuthorizationEngine::from_config(InMemoryTupleStore::new(), &config).unwrap();
        engine.mutations().create_direct_relation(7, "owner", 3, "doc").await.unwrap();

        assert_eq!(engine.rules().len(), 1);
        assert!(engine.check_access(7, 3, "doc", "viewer").await.unwrap());
    }

    #[tokio::test]
    async fn test_reload_rules_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usersets.yaml");
        std::fs::write(&path, "doc:\n  viewer: commenter\n").unwrap();

        let engine = AuthorizationEngine::in_memory(rules());
        engine.mutations().create_direct_relation(4, "commenter", 1, "doc").await.unwrap();
        assert!(!engine.check_access(4, 1, "doc", "viewer").await.unwrap());

        engine.reload_rules_from_path(&path).unwrap();
        assert!(engine.check_access(4, 1, "doc", "viewer").await.unwrap());

        // a broken table leaves the current one in place
        std::fs::write(&path, "doc:\n  viewer: ~\n").unwrap();
        assert!(matches!(
            engine.reload_rules_from_path(&path),
            Err(RebacError::ConfigError(_))
        ));
        assert!(engine.check_access(4, 1, "doc", "viewer").await.unwrap());
    }
}
