//! Error types for hub synchronization.
//!
//! Upload failures are categorized so the engine can tell a hub that is
//! temporarily unavailable from one that rejects the payload outright.

use std::time::Duration;

use cadence_core::CoreError;
use thiserror::Error;

/// Result type alias for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;

/// Errors raised while talking to the hub or reading the update queue.
#[derive(Debug, Clone, Error)]
pub enum HubError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Description of the failure.
        message: String,
    },

    /// Request timed out.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Configured timeout.
        timeout_seconds: u64,
    },

    /// Hub rejected the batch (4xx).
    #[error("hub rejected batch: HTTP {status_code}")]
    Rejected {
        /// HTTP status code.
        status_code: u16,
        /// Response body.
        body: String,
    },

    /// Hub failed while handling the batch (5xx).
    #[error("hub server error: HTTP {status_code}")]
    Server {
        /// HTTP status code.
        status_code: u16,
        /// Response body.
        body: String,
    },

    /// Reading or stamping the update queue failed.
    #[error("storage error: {message}")]
    Storage {
        /// Underlying error message.
        message: String,
    },

    /// Invalid client or engine configuration.
    #[error("invalid hub configuration: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// Background loops did not stop in time.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that was exceeded.
        timeout: Duration,
    },

    /// A background loop panicked.
    #[error("{task} loop panicked: {error}")]
    TaskPanic {
        /// Which loop failed.
        task: &'static str,
        /// Join error message.
        error: String,
    },
}

impl HubError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates an error from a non-success HTTP response.
    pub fn from_status(status_code: u16, body: impl Into<String>) -> Self {
        if status_code >= 500 {
            Self::Server { status_code, body: body.into() }
        } else {
            Self::Rejected { status_code, body: body.into() }
        }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Returns true for failures that may clear up on their own.
    ///
    /// Pending updates are re-offered on the next cycle either way; this
    /// only decides the log level and how long the engine backs off.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::Server { .. } | Self::Storage { .. } => {
                true
            },
            Self::Rejected { .. }
            | Self::Configuration { .. }
            | Self::ShutdownTimeout { .. }
            | Self::TaskPanic { .. } => false,
        }
    }

    /// HTTP status returned by the hub, if the request got that far.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Rejected { status_code, .. } | Self::Server { status_code, .. } => {
                Some(*status_code)
            },
            _ => None,
        }
    }
}

impl From<CoreError> for HubError {
    fn from(err: CoreError) -> Self {
        Self::storage(err.to_string())
    }
}
