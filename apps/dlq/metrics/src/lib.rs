//! DLQ Metrics CLI
//!
//! Inspects Pub/Sub dead-letter-queue subscriptions of a GCP project.
//!
//! ## Commands
//!
//! - *(none)*: undelivered-message mean of `--subscriptionID`
//! - `list` (`l`): every subscription whose name contains `.push.dlq.pull`
//! - `metrics-dlq` (`mdlq`): the `--numMostOffenders` worst DLQ subscriptions
//! - `receive` (`r`): pull messages, log their bodies and ack them
//! - `watch` (`w`): the `metrics-dlq` report on a fixed interval
//!
//! Credentials and endpoints come from the environment, see
//! [`core_config::gcp::GcpConfig`]. A `.env` file is loaded when present.

pub mod cli;
pub mod commands;

use clap::Parser;
use cli::{Cli, Command};
use core_config::gcp::GcpConfig;
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::{Environment, FromEnv};
use dlq_worker::{
    CancellationToken, GcpClient, GcpGateway, GcpSubscription, PoolConfig, ReceiverConfig,
};
use eyre::{eyre, Result, WrapErr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

/// Parse the command line and run the selected command.
pub async fn run() -> Result<()> {
    install_color_eyre();
    let _ = dotenvy::dotenv();

    let environment = Environment::from_env();
    init_tracing(&environment);

    let cli = Cli::parse();
    let config = GcpConfig::from_env().wrap_err("Failed to load GCP configuration")?;

    let project_id = cli
        .project_id
        .clone()
        .or_else(|| config.project_id.clone())
        .ok_or_else(|| eyre!("--projectID is required (or set GCP_PROJECT_ID)"))?;
    let pool_config = pool_config(cli.command.as_ref(), &project_id)?;

    let client = GcpClient::from_config(&config).wrap_err("Failed to create GCP client")?;
    let gateway = Arc::new(GcpGateway::new(client.clone()));

    match cli.command {
        None => {
            let subscription_id = cli
                .subscription_id
                .ok_or_else(|| eyre!("--subscriptionID is required"))?;

            let sample =
                commands::subscription_mean(gateway.as_ref(), &project_id, &subscription_id)
                    .await?;

            info!(
                undelivered_messages_mean = sample.undelivered_mean,
                project_id = %project_id,
                subscription_id = %sample.subscription_id,
                "The number of undelivered messages is"
            );
        }

        Some(Command::List) => {
            for subscription in commands::list_dlq(gateway.as_ref(), &project_id).await? {
                info!(subscription = %subscription, "DLQ subscription");
            }
        }

        Some(Command::MetricsDlq { .. }) => {
            let pool_config = pool_config.ok_or_else(|| eyre!("Missing worker pool configuration"))?;

            let cancel = CancellationToken::new();
            let top = tokio::select! {
                res = commands::top_offenders(gateway, &pool_config, &cancel) => res?,
                res = shutdown_signal() => {
                    res?;
                    cancel.cancel();
                    return Ok(());
                }
            };
            commands::log_offenders(&top);
        }

        Some(Command::Receive {
            subscription_id,
            messages,
        }) => {
            let receiver_config =
                ReceiverConfig::new(project_id.clone(), subscription_id.clone()).with_limit(messages);
            let source = Arc::new(GcpSubscription::new(client, &project_id, subscription_id));

            let cancel = CancellationToken::new();
            let watcher = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(e) = shutdown_signal().await {
                        error!(error = %e, "Error waiting for shutdown signal");
                    }
                    cancel.cancel();
                })
            };

            let result = commands::receive_messages(source, &receiver_config, &cancel).await;
            watcher.abort();

            let dispositions = result?;
            info!(settled = dispositions.len(), "Receiver finished");
        }

        Some(Command::Watch { interval_secs, .. }) => {
            let pool_config = pool_config.ok_or_else(|| eyre!("Missing worker pool configuration"))?;

            commands::watch(
                gateway,
                pool_config,
                Duration::from_secs(interval_secs),
                async {
                    if let Err(e) = shutdown_signal().await {
                        error!(error = %e, "Error waiting for shutdown signal");
                    }
                },
            )
            .await?;
        }
    }

    Ok(())
}

/// Worker pool settings for the commands that fan out over subscriptions,
/// validated before any client is built.
fn pool_config(command: Option<&Command>, project_id: &str) -> Result<Option<PoolConfig>> {
    let (num_most_offenders, workers) = match command {
        Some(Command::MetricsDlq {
            num_most_offenders,
            workers,
        })
        | Some(Command::Watch {
            num_most_offenders,
            workers,
            ..
        }) => (*num_most_offenders, *workers),
        _ => return Ok(None),
    };

    let config = PoolConfig::new(project_id)
        .with_worker_count(workers)
        .with_top_k(num_most_offenders)?;
    config.validate()?;
    Ok(Some(config))
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.wrap_err("Failed to listen for Ctrl+C") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        res = ctrl_c => {
            res?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        res = terminate => {
            res?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
