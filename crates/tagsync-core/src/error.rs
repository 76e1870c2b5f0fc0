//! Error types for tagsync.
//!
//! Three layers of failure exist in the client cache:
//!
//! - [`ServiceError`]: a call to the remote request service failed at the
//!   transport level (connection lost, timeout, rejected request).
//! - [`RegistryError`]: registering or unregistering a tag with the push-update
//!   registry or the supervision router failed. These are logged and never
//!   propagated to callers.
//! - [`CacheError`]: the public error returned by cache operations. A
//!   synchronization failure always carries the [`ServiceError`] that caused it.
//!
//! # Example
//!
//! ```
//! use tagsync_core::{CacheError, ServiceError};
//!
//! let cause = ServiceError::transport("broker unreachable");
//! let error = CacheError::synchronization("could not initialise 3 tags", cause);
//!
//! assert!(error.is_synchronization());
//! assert!(error.is_transient());
//! assert_eq!(
//!     error.to_string(),
//!     "cache synchronization failed: could not initialise 3 tags"
//! );
//! ```

use thiserror::Error;

use crate::tag::TagId;

/// Failure of a remote request service call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The transport (broker connection, socket) failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request did not complete in time.
    #[error("request timed out after {millis}ms")]
    Timeout {
        /// Configured timeout that expired
        millis: u64,
    },

    /// The server answered but refused the request.
    #[error("server rejected request: {0}")]
    Rejected(String),
}

impl ServiceError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a rejected-request error.
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Returns true if retrying the call later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

/// Failure while (un)registering a tag with the push registry or supervision router.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The tag was expected to be registered but is not.
    #[error("tag {0} is not registered")]
    NotRegistered(TagId),

    /// The registry could not be reached.
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

impl RegistryError {
    /// Creates an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Main error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A remote call needed to populate, refresh or subscribe tags failed.
    #[error("cache synchronization failed: {message}")]
    Synchronization {
        /// What the cache was trying to do
        message: String,
        /// The originating service failure
        #[source]
        cause: ServiceError,
    },

    /// The caller passed an argument the cache cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The cache was configured or assembled incorrectly.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    // ============================================
    // Convenience constructors
    // ============================================

    /// Creates a synchronization error wrapping the given service failure.
    pub fn synchronization(message: impl Into<String>, cause: ServiceError) -> Self {
        Self::Synchronization {
            message: message.into(),
            cause,
        }
    }

    /// Creates an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates an InvalidConfig error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    // ============================================
    // Type checking methods
    // ============================================

    /// Returns true if this is a synchronization failure.
    pub fn is_synchronization(&self) -> bool {
        matches!(self, Self::Synchronization { .. })
    }

    /// Returns true if the whole operation may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Synchronization { cause, .. } => cause.is_transient(),
            _ => false,
        }
    }

    /// Returns the underlying service failure, if any.
    pub fn service_cause(&self) -> Option<&ServiceError> {
        match self {
            Self::Synchronization { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_service_error_display() {
        assert_eq!(
            ServiceError::transport("socket closed").to_string(),
            "transport error: socket closed"
        );
        assert_eq!(
            ServiceError::Timeout { millis: 1500 }.to_string(),
            "request timed out after 1500ms"
        );
        assert_eq!(
            ServiceError::rejected("unknown request type").to_string(),
            "server rejected request: unknown request type"
        );
    }

    #[test]
    fn test_synchronization_keeps_cause() {
        let err = CacheError::synchronization("refresh failed", ServiceError::transport("down"));

        let source = err.source().expect("synchronization error must carry a cause");
        assert_eq!(source.to_string(), "transport error: down");
        assert_eq!(
            err.service_cause(),
            Some(&ServiceError::Transport("down".to_string()))
        );
    }

    #[test]
    fn test_is_transient() {
        assert!(ServiceError::transport("x").is_transient());
        assert!(ServiceError::Timeout { millis: 10 }.is_transient());
        assert!(!ServiceError::rejected("x").is_transient());

        assert!(CacheError::synchronization("x", ServiceError::transport("y")).is_transient());
        assert!(!CacheError::synchronization("x", ServiceError::rejected("y")).is_transient());
        assert!(!CacheError::invalid_argument("empty").is_transient());
    }

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::NotRegistered(TagId::new(42));
        assert_eq!(err.to_string(), "tag 42 is not registered");
        assert_eq!(
            RegistryError::unavailable("proxy stopped").to_string(),
            "registry unavailable: proxy stopped"
        );
    }

    #[test]
    fn test_error_propagation_with_question_mark() {
        fn step() -> Result<()> {
            Err(CacheError::invalid_config("subscription_workers must be > 0"))
        }

        fn outer() -> Result<u32> {
            step()?;
            Ok(1)
        }

        let err = outer().unwrap_err();
        assert!(!err.is_synchronization());
        assert!(err.to_string().contains("subscription_workers"));
    }
}
