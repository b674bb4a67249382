//! Fan-out/fan-in worker pool for per-subscription metric queries.
//!
//! ```text
//!                  ┌──────────┐
//!              ┌──▶│ worker 0 │──┐
//! ┌──────────┐ │   └──────────┘  │   ┌────────────┐
//! │ producer │─┤       ...       ├──▶│ aggregator │──▶ PoolReport
//! └──────────┘ │   ┌──────────┐  │   └────────────┘
//!   input (1)  └──▶│ worker N │──┘    output (N)
//!                  └──────────┘
//! ```
//!
//! - The producer is the only writer of the input channel and drops its sender
//!   after the last item, which ends every worker's receive loop.
//! - Workers share the single input receiver behind an async mutex, so each
//!   item is taken by exactly one worker.
//! - Every worker owns a clone of the output sender and the pool drops its own
//!   before aggregating: the output channel closes exactly once, when the last
//!   worker returns, and no worker ever closes it explicitly.
//! - After the output channel closes the pool joins every task, so nothing it
//!   spawned outlives [`WorkerPool::run`].

use crate::config::validate_pool_args;
use crate::error::{GatewayError, PoolError};
use crate::gateway::{MetricSample, MetricsGateway, SubscriptionId};
use crate::metrics::WorkerMetrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

type SharedReceiver = Arc<Mutex<mpsc::Receiver<SubscriptionId>>>;

/// A subscription whose metric query did not produce a sample.
#[derive(Debug)]
pub struct ItemFailure {
    pub subscription_id: SubscriptionId,
    pub error: GatewayError,
}

/// Everything a pool run produced: samples in completion order plus the
/// items that failed.
#[derive(Debug, Default)]
pub struct PoolReport {
    pub samples: Vec<MetricSample>,
    pub failures: Vec<ItemFailure>,
}

impl PoolReport {
    /// Number of items accounted for
    pub fn total(&self) -> usize {
        self.samples.len() + self.failures.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Top `k` samples by undelivered mean; see [`crate::rank_top_k`].
    pub fn top_k(&self, k: usize) -> Vec<MetricSample> {
        crate::ranking::rank_top_k(self.samples.clone(), k)
    }
}

enum WorkerEvent {
    Sample(MetricSample),
    Failure(ItemFailure),
}

/// Distributes subscription ids across a fixed number of workers, each of
/// which asks the [`MetricsGateway`] for the undelivered-message mean.
pub struct WorkerPool<G: ?Sized> {
    gateway: Arc<G>,
}

impl<G> WorkerPool<G>
where
    G: MetricsGateway + ?Sized + 'static,
{
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    /// Measure every item with `worker_count` concurrent workers.
    ///
    /// Per-item gateway failures never abort the run; they are returned in
    /// [`PoolReport::failures`]. An empty item list returns an empty report
    /// without spawning anything.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Config`] for an empty project or zero workers, before any
    ///   task starts.
    /// - [`PoolError::WorkerPanicked`] if a worker task panicked.
    pub async fn run(
        &self,
        project_id: &str,
        items: Vec<SubscriptionId>,
        worker_count: usize,
    ) -> Result<PoolReport, PoolError> {
        self.run_with_cancel(project_id, items, worker_count, &CancellationToken::new())
            .await
    }

    /// Like [`WorkerPool::run`], stopping early when `cancel` fires.
    ///
    /// Items that were never started, and in-flight queries abandoned because
    /// of the cancellation, are reported as [`GatewayError::Cancelled`]
    /// failures, so `samples + failures` always equals the number of items.
    pub async fn run_with_cancel(
        &self,
        project_id: &str,
        items: Vec<SubscriptionId>,
        worker_count: usize,
        cancel: &CancellationToken,
    ) -> Result<PoolReport, PoolError> {
        validate_pool_args(project_id, worker_count)?;

        if items.is_empty() {
            debug!(project_id = %project_id, "No subscriptions to process");
            return Ok(PoolReport::default());
        }

        let total = items.len();
        info!(
            project_id = %project_id,
            items = total,
            workers = worker_count,
            "Starting worker pool"
        );

        let project_id: Arc<str> = Arc::from(project_id);
        let metrics = WorkerMetrics::new(&*project_id);

        let (input_tx, input_rx) = mpsc::channel::<SubscriptionId>(1);
        let (output_tx, mut output_rx) = mpsc::channel::<WorkerEvent>(worker_count);

        let producer = tokio::spawn(produce(items, input_tx, cancel.clone()));

        let input_rx: SharedReceiver = Arc::new(Mutex::new(input_rx));
        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(worker_loop(
                worker_id,
                Arc::clone(&self.gateway),
                Arc::clone(&project_id),
                Arc::clone(&input_rx),
                output_tx.clone(),
                cancel.clone(),
                metrics.clone(),
            ));
        }
        // Only workers may keep these alive.
        drop(input_rx);
        drop(output_tx);

        let mut report = PoolReport {
            samples: Vec::with_capacity(total),
            failures: Vec::new(),
        };
        while let Some(event) = output_rx.recv().await {
            match event {
                WorkerEvent::Sample(sample) => report.samples.push(sample),
                WorkerEvent::Failure(failure) => report.failures.push(failure),
            }
        }

        let mut panics = Vec::new();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(project_id = %project_id, error = %e, "Worker task failed");
                panics.push(e.to_string());
            }
        }

        match producer.await {
            Ok(unsent) => {
                report
                    .failures
                    .extend(unsent.into_iter().map(|subscription_id| ItemFailure {
                        subscription_id,
                        error: GatewayError::Cancelled,
                    }));
            }
            Err(e) => {
                error!(project_id = %project_id, error = %e, "Producer task failed");
                panics.push(e.to_string());
            }
        }

        if !panics.is_empty() {
            return Err(PoolError::WorkerPanicked {
                count: panics.len(),
                message: panics.join("; "),
            });
        }

        info!(
            project_id = %project_id,
            samples = report.samples.len(),
            failures = report.failures.len(),
            "Worker pool finished"
        );

        Ok(report)
    }
}

/// Sends every item, in order, until the list is exhausted or `cancel` fires.
/// Returns the items that were never handed to a worker.
async fn produce(
    mut items: Vec<SubscriptionId>,
    input: mpsc::Sender<SubscriptionId>,
    cancel: CancellationToken,
) -> Vec<SubscriptionId> {
    let mut sent = 0;
    for item in items.iter().cloned() {
        let delivered = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            res = input.send(item) => res.is_ok(),
        };
        if !delivered {
            break;
        }
        sent += 1;
    }
    trace!(sent, "Producer finished");
    items.split_off(sent)
}

async fn worker_loop<G>(
    worker_id: usize,
    gateway: Arc<G>,
    project_id: Arc<str>,
    input: SharedReceiver,
    output: mpsc::Sender<WorkerEvent>,
    cancel: CancellationToken,
    metrics: WorkerMetrics,
) where
    G: MetricsGateway + ?Sized,
{
    trace!(worker_id, "Worker started");

    loop {
        let next = input.lock().await.recv().await;
        let Some(subscription_id) = next else {
            break;
        };

        debug!(
            worker_id,
            project_id = %project_id,
            subscription_id = %subscription_id,
            "Worker processing subscription"
        );

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            res = gateway.mean_undelivered_messages(&project_id, &subscription_id) => res,
        };

        let event = match result {
            Ok(undelivered_mean) => {
                metrics.sample_collected(started.elapsed());
                WorkerEvent::Sample(MetricSample {
                    project_id: project_id.to_string(),
                    subscription_id,
                    undelivered_mean,
                })
            }
            Err(error) => {
                metrics.sample_failed();
                warn!(
                    worker_id,
                    project_id = %project_id,
                    subscription_id = %subscription_id,
                    error = %error,
                    "Failed to get the number of undelivered messages"
                );
                WorkerEvent::Failure(ItemFailure {
                    subscription_id,
                    error,
                })
            }
        };

        if output.send(event).await.is_err() {
            warn!(worker_id, "Aggregator gone, stopping worker");
            break;
        }
    }

    trace!(worker_id, "Worker stopped");
}
