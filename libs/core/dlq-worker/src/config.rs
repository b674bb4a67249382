//! Pool and receiver configuration
//!
//! Validation happens here so that invalid input is rejected before any task
//! is spawned.

use crate::error::ConfigError;

/// Default number of pool workers
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Default number of subscriptions reported by a top-K ranking
pub const DEFAULT_TOP_K: usize = 5;

/// Configuration for a [`crate::WorkerPool`] run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Project whose subscriptions are measured
    pub project_id: String,

    /// Number of concurrent workers
    pub worker_count: usize,

    /// How many subscriptions a ranking keeps
    pub top_k: usize,
}

impl PoolConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            worker_count: DEFAULT_WORKER_COUNT,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Set the number of workers
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the ranking size from a signed command-line value
    pub fn with_top_k(mut self, top_k: i64) -> Result<Self, ConfigError> {
        self.top_k = validate_top_k(top_k)?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_pool_args(&self.project_id, self.worker_count)
    }
}

/// Configuration for a [`crate::SubscriptionReceiver`] run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    pub project_id: String,
    pub subscription_id: String,

    /// Number of messages to pull; `<= 0` pulls nothing
    pub limit: i64,
}

impl ReceiverConfig {
    pub fn new(project_id: impl Into<String>, subscription_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            subscription_id: subscription_id.into(),
            limit: 1,
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::EmptyProjectId);
        }
        Ok(())
    }
}

pub(crate) fn validate_pool_args(project_id: &str, worker_count: usize) -> Result<(), ConfigError> {
    if project_id.trim().is_empty() {
        return Err(ConfigError::EmptyProjectId);
    }
    if worker_count == 0 {
        return Err(ConfigError::InvalidWorkerCount(worker_count));
    }
    Ok(())
}

/// Converts a signed "most offenders" count into a ranking size.
pub fn validate_top_k(top_k: i64) -> Result<usize, ConfigError> {
    usize::try_from(top_k).map_err(|_| ConfigError::NegativeTopK(top_k))
}
