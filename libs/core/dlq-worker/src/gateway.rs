//! Subscription identifiers, metric samples and the metrics gateway seam.

use crate::error::GatewayError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Naming convention for dead-letter-queue subscriptions.
pub const DLQ_SUBSCRIPTION_MARKER: &str = ".push.dlq.pull";

/// Opaque subscription name, scoped to a project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds an id from either a bare id or a full resource name
    /// (`projects/{project}/subscriptions/{id}`).
    pub fn from_resource_name(name: &str) -> Self {
        Self(name.rsplit('/').next().unwrap_or(name).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_dlq(&self) -> bool {
        self.0.contains(DLQ_SUBSCRIPTION_MARKER)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SubscriptionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriptionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SubscriptionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Undelivered-message mean for one subscription, as measured by a worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub project_id: String,
    pub subscription_id: SubscriptionId,
    /// Mean of `num_undelivered_messages` over the trailing 5 minutes
    pub undelivered_mean: f64,
}

impl MetricSample {
    pub fn new(
        project_id: impl Into<String>,
        subscription_id: SubscriptionId,
        undelivered_mean: f64,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            subscription_id,
            undelivered_mean,
        }
    }
}

/// Listing and metric queries against the Pub/Sub project.
///
/// Implemented over REST by [`crate::gcp::GcpGateway`]; tests use mocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsGateway: Send + Sync {
    /// Subscriptions whose name carries [`DLQ_SUBSCRIPTION_MARKER`], in the
    /// order the service returned them. Empty when there are none.
    async fn list_dlq_subscriptions(
        &self,
        project_id: &str,
    ) -> Result<Vec<SubscriptionId>, GatewayError>;

    /// Mean undelivered-message count over a 5 minute window of 1 minute
    /// buckets. `0.0` when the series has no points in the window.
    async fn mean_undelivered_messages(
        &self,
        project_id: &str,
        subscription_id: &SubscriptionId,
    ) -> Result<f64, GatewayError>;
}
