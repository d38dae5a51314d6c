//! Error types for pool operations
use std::time::Duration;

use thiserror::Error;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pool operations.
///
/// `acquire` returns exactly one of `Creation`, `Timeout`, `Cancelled`, or
/// `Closed`; `Configuration` can only come out of [`Pool::new`](crate::Pool::new).
/// Capacity exhaustion and validation failures are internal signals (the
/// former queues the caller, the latter retires the resource) and are never
/// surfaced through this enum.
#[derive(Error, Debug)]
pub enum Error {
    /// Pool configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// The factory failed to produce a resource
    #[error("Resource creation failed: {message}")]
    Creation {
        /// The failure reason
        message: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The acquisition deadline elapsed while queued
    #[error("Acquisition timed out after {waited:?} on pool '{pool}': {in_use}/{max_size} in use")]
    Timeout {
        /// The pool (factory) name
        pool: String,
        /// How long the caller waited
        waited: Duration,
        /// Slots in use when the deadline elapsed
        in_use: usize,
        /// Maximum pool size
        max_size: usize,
    },

    /// The caller's cancellation token fired while queued
    #[error("Acquisition cancelled after {waited:?} on pool '{pool}'")]
    Cancelled {
        /// The pool (factory) name
        pool: String,
        /// How long the caller waited before cancellation
        waited: Duration,
    },

    /// The pool has been closed
    #[error("Pool '{pool}' is closed")]
    Closed {
        /// The pool (factory) name
        pool: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a resource-creation error
    pub fn creation<S: Into<String>>(message: S) -> Self {
        Self::Creation {
            message: message.into(),
            source: None,
        }
    }

    /// Create a resource-creation error wrapping an underlying error
    pub fn creation_with<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Creation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if this error is worth retrying
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_retryable() {
        let err = Error::Timeout {
            pool: "db".into(),
            waited: Duration::from_secs(30),
            in_use: 20,
            max_size: 20,
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn cancelled_and_closed_are_not_retryable() {
        let cancelled = Error::Cancelled {
            pool: "db".into(),
            waited: Duration::from_millis(500),
        };
        let closed = Error::Closed { pool: "db".into() };
        assert!(!cancelled.is_retryable());
        assert!(!closed.is_retryable());
    }

    #[test]
    fn creation_preserves_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::creation_with("connect failed", io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
