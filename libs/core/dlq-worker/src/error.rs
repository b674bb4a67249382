//! Error types for the worker pool, the subscription receiver and the GCP adapters.
//!
//! Propagation rules:
//! - [`GatewayError`] is isolated per item inside the pool and returned directly
//!   from single-subscription calls.
//! - [`ReceiveError`] ends the current receive loop.
//! - [`HandlerError`] only decides the disposition of one message; it is logged,
//!   never returned from `receive`.
//! - [`ConfigError`] is detected before any task is spawned.

use thiserror::Error;

/// Failure talking to an external Pub/Sub or Cloud Monitoring endpoint.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body did not match the expected shape
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Credentials missing, unreadable or rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Non-success status from the API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The call was abandoned because its cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// Anything else reported by a gateway implementation
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether a later attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Http(e) => e.is_timeout() || e.is_connect(),
            GatewayError::Api { status, .. } => *status == 429 || *status >= 500,
            GatewayError::Parse(_)
            | GatewayError::Auth(_)
            | GatewayError::Cancelled
            | GatewayError::Other(_) => false,
        }
    }
}

/// Error returned by a user-supplied message handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler reported a failure
    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The handler panicked; the panic was caught by the dispatch task
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Failure of a `receive` call.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// Pulling the next message failed; remaining pulls are not attempted
    #[error("error receiving message: {0}")]
    Pull(#[source] GatewayError),

    /// The cancellation token fired while waiting for a message
    #[error("receive cancelled")]
    Cancelled,
}

/// Invalid arguments, detected before any concurrent work starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("project id must not be empty")]
    EmptyProjectId,

    #[error("worker count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),

    #[error("the number of most offenders must be >= 0, got {0}")]
    NegativeTopK(i64),

    #[error("scheduler period must be greater than zero")]
    ZeroPeriod,
}

/// Pool-level failure. Per-item gateway errors are not pool errors; they are
/// reported in `PoolReport::failures`.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{count} worker task(s) panicked: {message}")]
    WorkerPanicked { count: usize, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let throttled = GatewayError::Api {
            status: 429,
            message: "quota".to_string(),
        };
        assert!(throttled.is_transient());

        let unavailable = GatewayError::Api {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(unavailable.is_transient());

        let not_found = GatewayError::Api {
            status: 404,
            message: "no such subscription".to_string(),
        };
        assert!(!not_found.is_transient());

        assert!(!GatewayError::auth("expired").is_transient());
        assert!(!GatewayError::Cancelled.is_transient());
    }

    #[test]
    fn test_pull_error_keeps_source() {
        let err = ReceiveError::Pull(GatewayError::other("connection reset"));
        assert_eq!(err.to_string(), "error receiving message: connection reset");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_handler_error_with_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = HandlerError::with_source("could not persist", io);
        assert_eq!(err.to_string(), "could not persist");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_config_error_messages() {
        assert_eq!(
            ConfigError::NegativeTopK(-1).to_string(),
            "the number of most offenders must be >= 0, got -1"
        );
        let pool: PoolError = ConfigError::InvalidWorkerCount(0).into();
        assert!(pool.to_string().contains("worker count must be at least 1"));
    }
}
