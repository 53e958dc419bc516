use thiserror::Error;

#[derive(Error, Debug)]
pub enum RebacError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Store unavailable: {operation} exceeded its {timeout_ms}ms deadline")]
    StoreUnavailable {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Check timed out after {0}ms")]
    CheckTimeout(u64),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl RebacError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Errors caused by the caller's input rather than by the engine or its store.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::ValidationError(_))
    }

    /// Store and deadline failures; retrying the same request may succeed.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. } | Self::CheckTimeout(_))
    }
}

impl From<serde_yaml::Error> for RebacError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ConfigError(format!("invalid YAML: {}", err))
    }
}

impl From<config::ConfigError> for RebacError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RebacError>;
