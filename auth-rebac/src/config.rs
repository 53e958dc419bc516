//! Engine configuration, read from an optional YAML file and `REBAC_*`
//! environment variables (environment wins).

use crate::{check::CheckConfig, error::RebacError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "REBAC";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rewrite rule table to load at start-up
    pub rules_path: Option<PathBuf>,
    /// Deadline for one whole check
    pub check_timeout_ms: Option<u64>,
    /// Deadline for each store round trip
    pub store_timeout_ms: Option<u64>,
    /// Concurrent expansions per traversal level
    pub max_concurrency: usize,
    pub cache_enabled: bool,
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            check_timeout_ms: None,
            store_timeout_ms: None,
            max_concurrency: 16,
            cache_enabled: false,
            cache_capacity: 10_000,
        }
    }
}

impl EngineConfig {
    /// Load from `path` (if given) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, RebacError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RebacError> {
        if self.max_concurrency == 0 {
            return Err(RebacError::config("max_concurrency must be at least 1"));
        }
        if self.cache_enabled && self.cache_capacity == 0 {
            return Err(RebacError::config("cache_capacity must be at least 1 when caching is enabled"));
        }
        if self.check_timeout_ms == Some(0) || self.store_timeout_ms == Some(0) {
            return Err(RebacError::config("timeouts must be greater than zero"));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Option<Duration> {
        self.store_timeout_ms.map(Duration::from_millis)
    }

    pub fn check_config(&self) -> CheckConfig {
        CheckConfig {
            max_concurrency: self.max_concurrency,
            check_timeout: self.check_timeout_ms.map(Duration::from_millis),
            cache_capacity: self.cache_enabled.then_some(self.cache_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());

        let check = config.check_config();
        assert_eq!(check.max_concurrency, 16);
        assert_eq!(check.check_timeout, None);
        assert_eq!(check.cache_capacity, None);
        assert_eq!(config.store_timeout(), None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rebac.yaml");
        std::fs::write(
            &path,
            "rules_path: config/usersets.yaml\nstore_timeout_ms: 250\nmax_concurrency: 4\ncache_enabled: true\n",
        )
        .unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.rules_path, Some(PathBuf::from("config/usersets.yaml")));
        assert_eq!(config.store_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.check_config().max_concurrency, 4);
        assert_eq!(config.check_config().cache_capacity, Some(10_000));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rebac.yaml");
        std::fs::write(&path, "max_concurrency: 0\n").unwrap();
        assert!(matches!(
            EngineConfig::load(Some(&path)),
            Err(RebacError::ConfigError(_))
        ));

        assert!(EngineConfig::load(Some(&dir.path().join("missing.yaml"))).is_err());
    }
}
