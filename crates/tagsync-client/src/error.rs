//! Error types for the monitoring client.

use thiserror::Error;

use tagsync_core::CacheError;

/// Errors raised while preparing or running a monitoring session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Settings could not be loaded or deserialized.
    #[error("failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),

    /// Settings were loaded but describe an unusable cache.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    /// A cache operation failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ClientError {
    pub fn invalid_settings(msg: impl Into<String>) -> Self {
        Self::InvalidSettings(msg.into())
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
