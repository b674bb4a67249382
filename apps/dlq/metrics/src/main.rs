//! DLQ Metrics - Entry Point

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dlq_metrics::run().await
}
