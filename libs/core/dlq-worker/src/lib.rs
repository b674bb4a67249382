//! Dead-letter-queue worker toolkit
//!
//! Building blocks for inspecting and draining Pub/Sub dead-letter
//! subscriptions.
//!
//! ## Features
//!
//! - **Worker pool**: `WorkerPool` fans subscription ids out to N workers and
//!   collects one metric sample per subscription
//! - **Ranking**: `rank_top_k` picks the worst offenders
//! - **Receiver**: `SubscriptionReceiver` pulls a bounded number of messages
//!   and settles each one with ack or nack from a handler task
//! - **Scheduler**: fixed-interval callbacks with an owned stop handle
//! - **GCP adapters**: Pub/Sub v1 and Cloud Monitoring v3 over REST
//!
//! ## Example
//!
//! ```ignore
//! use dlq_worker::{GcpClient, GcpGateway, MetricsGateway, WorkerPool};
//!
//! let client = GcpClient::from_config(&gcp_config)?;
//! let gateway = Arc::new(GcpGateway::new(client));
//!
//! let subscriptions = gateway.list_dlq_subscriptions("my-project").await?;
//! let report = WorkerPool::new(gateway)
//!     .run("my-project", subscriptions, 2)
//!     .await?;
//!
//! for sample in report.top_k(5) {
//!     println!("{} {}", sample.subscription_id, sample.undelivered_mean);
//! }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod gcp;
pub mod message;
pub mod metrics;
mod pool;
mod ranking;
mod receiver;
mod scheduler;

// Re-export main types
pub use config::{PoolConfig, ReceiverConfig, DEFAULT_TOP_K, DEFAULT_WORKER_COUNT};
pub use error::{ConfigError, GatewayError, HandlerError, PoolError, ReceiveError};
pub use gateway::{MetricSample, MetricsGateway, SubscriptionId, DLQ_SUBSCRIPTION_MARKER};
pub use gcp::{GcpClient, GcpGateway, GcpSubscription};
pub use message::{handler_fn, Disposition, Message, MessageHandler, MessageSource};
pub use self::metrics::WorkerMetrics;
pub use pool::{ItemFailure, PoolReport, WorkerPool};
pub use ranking::rank_top_k;
pub use receiver::{Dispatched, SubscriptionReceiver};
pub use scheduler::{Scheduler, SchedulerHandle};

// Cancellation tokens appear in public signatures
pub use tokio_util::sync::CancellationToken;
