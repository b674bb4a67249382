//! Counters and histograms for the pool and the receiver.
//!
//! Uses the `metrics` facade only; the host binary decides whether a recorder
//! is installed. Without one every call is a no-op.

use metrics::{counter, histogram};
use std::time::Duration;

/// Labelled metric helper shared by pool workers and dispatch tasks.
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    project_id: String,
}

impl WorkerMetrics {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Record a successful gateway query
    pub fn sample_collected(&self, duration: Duration) {
        counter!(
            "dlq_worker_samples_total",
            "project" => self.project_id.clone(),
            "status" => "success"
        )
        .increment(1);

        histogram!(
            "dlq_worker_gateway_duration_seconds",
            "project" => self.project_id.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a gateway query that failed or was cancelled
    pub fn sample_failed(&self) {
        counter!(
            "dlq_worker_samples_total",
            "project" => self.project_id.clone(),
            "status" => "failed"
        )
        .increment(1);
    }

    pub fn message_pulled(&self, subscription: &str) {
        counter!(
            "dlq_worker_messages_pulled_total",
            "project" => self.project_id.clone(),
            "subscription" => subscription.to_string()
        )
        .increment(1);
    }

    /// Record the terminal disposition of one message
    pub fn message_settled(&self, subscription: &str, disposition: &'static str) {
        counter!(
            "dlq_worker_messages_settled_total",
            "project" => self.project_id.clone(),
            "subscription" => subscription.to_string(),
            "disposition" => disposition
        )
        .increment(1);
    }

    pub fn handler_duration(&self, subscription: &str, duration: Duration) {
        histogram!(
            "dlq_worker_handler_duration_seconds",
            "project" => self.project_id.clone(),
            "subscription" => subscription.to_string()
        )
        .record(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        let metrics = WorkerMetrics::new("jojo-project");
        assert_eq!(metrics.project_id(), "jojo-project");
        metrics.sample_collected(Duration::from_millis(5));
        metrics.sample_failed();
        metrics.message_pulled("s");
        metrics.message_settled("s", "acked");
        metrics.handler_duration("s", Duration::from_millis(1));
    }
}
