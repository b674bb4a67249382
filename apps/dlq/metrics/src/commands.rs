//! Command implementations, generic over the gateway and message source so
//! they can be driven by fakes in tests.

use dlq_worker::{
    handler_fn, CancellationToken, Disposition, Message, MessageSource, MetricSample,
    MetricsGateway, PoolConfig, ReceiverConfig, Scheduler, SubscriptionId, SubscriptionReceiver,
    WorkerPool,
};
use eyre::{Result, WrapErr};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Undelivered-message mean for a single subscription.
pub async fn subscription_mean<G>(
    gateway: &G,
    project_id: &str,
    subscription_id: &str,
) -> Result<MetricSample>
where
    G: MetricsGateway + ?Sized,
{
    let subscription_id = SubscriptionId::new(subscription_id);
    let mean = gateway
        .mean_undelivered_messages(project_id, &subscription_id)
        .await
        .wrap_err("Error getting the number of undelivered messages")?;

    Ok(MetricSample::new(project_id, subscription_id, mean))
}

pub async fn list_dlq<G>(gateway: &G, project_id: &str) -> Result<Vec<SubscriptionId>>
where
    G: MetricsGateway + ?Sized,
{
    gateway
        .list_dlq_subscriptions(project_id)
        .await
        .wrap_err("Error listing the DLQ subscriptions")
}

/// List every DLQ subscription, measure them through the worker pool and
/// return the worst `config.top_k`.
pub async fn top_offenders<G>(
    gateway: Arc<G>,
    config: &PoolConfig,
    cancel: &CancellationToken,
) -> Result<Vec<MetricSample>>
where
    G: MetricsGateway + ?Sized + 'static,
{
    config.validate()?;

    let subscriptions = list_dlq(gateway.as_ref(), &config.project_id).await?;
    info!(len = subscriptions.len(), "DLQ subscriptions");

    let report = WorkerPool::new(gateway)
        .run_with_cancel(
            &config.project_id,
            subscriptions,
            config.worker_count,
            cancel,
        )
        .await
        .wrap_err("Worker pool failed")?;

    for failure in &report.failures {
        warn!(
            subscription_id = %failure.subscription_id,
            error = %failure.error,
            "Subscription skipped"
        );
    }

    Ok(report.top_k(config.top_k))
}

pub fn log_offenders(samples: &[MetricSample]) {
    for sample in samples {
        info!(
            subscription = %sample.subscription_id,
            undelivered_messages_mean = sample.undelivered_mean,
            "DLQ subscription"
        );
    }
}

/// Pull `config.limit` messages, log each body and ack it. Waits until every
/// message has settled.
pub async fn receive_messages<S>(
    source: Arc<S>,
    config: &ReceiverConfig,
    cancel: &CancellationToken,
) -> Result<Vec<Disposition>>
where
    S: MessageSource + ?Sized + 'static,
{
    config.validate()?;
    info!(
        subscription = %config.subscription_id,
        messages = config.limit,
        "Starting receiver"
    );

    let handler = Arc::new(handler_fn(|msg: Message| async move {
        info!(message_id = %msg.message_id, message = %msg.body_lossy(), "message received");
        Ok(())
    }));

    let receiver = SubscriptionReceiver::new(source, config.project_id.clone());
    let dispatched = receiver
        .receive(cancel, config.limit, handler)
        .await
        .wrap_err("Error receiving messages")?;

    Ok(dispatched.settled().await)
}

/// Run the top-offender report every `period` until `shutdown` resolves.
pub async fn watch<G, F>(
    gateway: Arc<G>,
    config: PoolConfig,
    period: Duration,
    shutdown: F,
) -> Result<()>
where
    G: MetricsGateway + ?Sized + 'static,
    F: Future<Output = ()>,
{
    config.validate()?;
    let scheduler = Scheduler::new(period)?;
    let cancel = CancellationToken::new();

    info!(
        project_id = %config.project_id,
        period_secs = period.as_secs(),
        "Watching DLQ subscriptions"
    );

    let handle = {
        let cancel = cancel.clone();
        scheduler.start_async(move || {
            let gateway = Arc::clone(&gateway);
            let config = config.clone();
            let cancel = cancel.clone();
            async move {
                match top_offenders(gateway, &config, &cancel).await {
                    Ok(top) => log_offenders(&top),
                    Err(e) => error!(error = ?e, "DLQ report failed"),
                }
            }
        })
    };

    shutdown.await;
    cancel.cancel();
    handle.stop().await;
    Ok(())
}
