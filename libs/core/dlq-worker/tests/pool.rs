mod common;

use common::{ids, FakeGateway, PROJECT};
use dlq_worker::{
    CancellationToken, GatewayError, MetricsGateway, PoolError, SubscriptionId, WorkerPool,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn many(n: usize) -> Vec<SubscriptionId> {
    (0..n)
        .map(|i| SubscriptionId::new(format!("sub-{i:03}.push.dlq.pull")))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_item_is_processed_by_exactly_one_worker() {
    let gateway = Arc::new(FakeGateway::default().with_delay(Duration::from_millis(2)));
    let items = many(50);

    let report = WorkerPool::new(Arc::clone(&gateway))
        .run(PROJECT, items.clone(), 4)
        .await
        .unwrap();

    assert_eq!(report.samples.len(), 50);
    assert!(report.failures.is_empty());

    let calls = gateway.calls();
    assert_eq!(calls.len(), 50);
    let unique: HashSet<_> = calls.into_iter().collect();
    assert_eq!(unique, items.into_iter().collect::<HashSet<_>>());

    assert!(gateway.peak_concurrency() <= 4);
}

#[tokio::test]
async fn more_workers_than_items() {
    let gateway = Arc::new(FakeGateway::with_means(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]));

    let report = WorkerPool::new(Arc::clone(&gateway))
        .run(PROJECT, ids(&["a", "b", "c"]), 10)
        .await
        .unwrap();

    assert_eq!(report.samples.len(), 3);
    assert_eq!(gateway.calls().len(), 3);
}

#[tokio::test]
async fn empty_item_list_is_not_an_error() {
    let gateway = Arc::new(FakeGateway::default());
    let report = WorkerPool::new(Arc::clone(&gateway))
        .run(PROJECT, Vec::new(), 2)
        .await
        .unwrap();

    assert_eq!(report.total(), 0);
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn failures_are_reported_alongside_samples() {
    let gateway = Arc::new(
        FakeGateway::with_means(&[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)])
            .failing_on("b")
            .failing_on("d"),
    );

    let report = WorkerPool::new(gateway)
        .run(PROJECT, ids(&["a", "b", "c", "d"]), 2)
        .await
        .unwrap();

    assert_eq!(report.total(), 4);
    let mut failed: Vec<_> = report
        .failures
        .iter()
        .map(|f| f.subscription_id.as_str())
        .collect();
    failed.sort();
    assert_eq!(failed, ["b", "d"]);
    assert!(report
        .failures
        .iter()
        .all(|f| matches!(f.error, GatewayError::Api { status: 500, .. })));
}

#[tokio::test]
async fn top_offenders_from_pool_results() {
    let gateway = Arc::new(FakeGateway::with_means(&[
        ("a", 5.0),
        ("b", 9.0),
        ("c", 1.0),
        ("d", 9.0),
    ]));

    let report = WorkerPool::new(gateway)
        .run(PROJECT, ids(&["a", "b", "c", "d"]), 3)
        .await
        .unwrap();

    let top: Vec<_> = report
        .top_k(2)
        .into_iter()
        .map(|s| s.subscription_id.to_string())
        .collect();
    assert_eq!(top, ["b", "d"]);
}

#[tokio::test]
async fn works_with_trait_objects() {
    let gateway: Arc<dyn MetricsGateway> = Arc::new(FakeGateway::with_means(&[("a", 7.5)]));
    let report = WorkerPool::new(gateway)
        .run(PROJECT, ids(&["a"]), 1)
        .await
        .unwrap();

    assert_eq!(report.samples[0].undelivered_mean, 7.5);
    assert_eq!(report.samples[0].project_id, PROJECT);
}

#[tokio::test]
async fn zero_workers_rejected_before_any_call() {
    let gateway = Arc::new(FakeGateway::default());
    let err = WorkerPool::new(Arc::clone(&gateway))
        .run(PROJECT, ids(&["a"]), 0)
        .await
        .unwrap_err();

    assert!(matches!(err, PoolError::Config(_)));
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn cancellation_accounts_for_every_item() {
    let gateway = Arc::new(FakeGateway::default().with_delay(Duration::from_millis(50)));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(80)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let report = WorkerPool::new(Arc::clone(&gateway))
        .run_with_cancel(PROJECT, many(20), 2, &cancel)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(report.total(), 20);
    assert!(report.samples.len() < 20);
    assert!(report
        .failures
        .iter()
        .any(|f| matches!(f.error, GatewayError::Cancelled)));
}

#[tokio::test]
async fn run_leaves_no_tasks_behind() {
    let gateway = Arc::new(FakeGateway::with_means(&[("a", 1.0), ("b", 2.0)]));
    let pool = WorkerPool::new(Arc::clone(&gateway));

    pool.run(PROJECT, ids(&["a", "b"]), 4).await.unwrap();
    drop(pool);

    assert_eq!(Arc::strong_count(&gateway), 1);
}

#[tokio::test]
async fn cancelled_run_leaves_no_tasks_behind() {
    let gateway = Arc::new(FakeGateway::default().with_delay(Duration::from_millis(50)));
    let pool = WorkerPool::new(Arc::clone(&gateway));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    pool.run_with_cancel(PROJECT, many(10), 2, &cancel)
        .await
        .unwrap();
    drop(pool);

    assert_eq!(Arc::strong_count(&gateway), 1);
}

#[tokio::test]
async fn panicking_worker_is_reported() {
    let gateway = Arc::new(
        FakeGateway::with_means(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]).panicking_on("b"),
    );

    let err = WorkerPool::new(Arc::clone(&gateway))
        .run(PROJECT, ids(&["a", "b", "c"]), 2)
        .await
        .unwrap_err();

    match err {
        PoolError::WorkerPanicked { count, message } => {
            assert_eq!(count, 1);
            assert!(message.contains("panic"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(Arc::strong_count(&gateway), 1);
}
