//! End-to-end properties of the queue storage engine and poller.
//!
//! These tests run against the in-memory store, which conforms to the same
//! `QueueStore` contract as the Redis backend, so no live Redis is needed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use crawlq::poller::{PollerConfig, StaticProjects};
use crawlq::{MemoryStore, ProjectQueue, QueuePoller, QueueStore, Record};

fn record(id: &str, name: &str) -> Record {
    Record::new(id, name)
}

fn job_params(job: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("_job".to_string(), json!(job));
    map
}

/// At every observable point, the ready-set and the record store hold
/// exactly the same set of ids.
#[tokio::test]
async fn put_pop_pairing_invariant() {
    let store = MemoryStore::new("test", false);

    async fn assert_paired(store: &MemoryStore, queue: &str) {
        assert_eq!(store.ready_ids(queue).await, store.stored_ids(queue).await);
    }

    for i in 0..10 {
        let id = format!("job-{i}");
        store.put("news", &id, &record(&id, "search"), i as f64).await;
        assert_paired(&store, "news").await;
    }

    store.remove("news", "job-3").await;
    assert_paired(&store, "news").await;

    while store.pop("news", true).await.is_some() {
        assert_paired(&store, "news").await;
    }
    assert!(store.ready_ids("news").await.is_empty());
}

/// Higher priority pops strictly first when enqueued at the same time.
#[tokio::test]
async fn priority_ordering() {
    let store = MemoryStore::new("test", false);
    store.put("news", "low", &record("low", "a"), 1.0).await;
    store.put("news", "high", &record("high", "b"), 2.0).await;

    let first = store.pop("news", true).await.expect("first pop");
    let second = store.pop("news", true).await.expect("second pop");
    assert_eq!(first.id, "high");
    assert_eq!(second.id, "low");
}

/// Two concurrent pops on a one-item queue never both get the item.
#[tokio::test]
async fn no_duplicate_pop() {
    for _ in 0..50 {
        let store = Arc::new(MemoryStore::new("test", false));
        store.put("news", "only", &record("only", "s"), 1.0).await;

        let a = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.pop("news", true).await }
        });
        let b = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.pop("news", true).await }
        });

        let (a, b) = tokio::join!(a, b);
        let a = a.expect("task ok");
        let b = b.expect("task ok");
        assert!(
            a.is_some() != b.is_some(),
            "exactly one concurrent pop must win"
        );
    }
}

/// Removing the same id twice is safe; the second call is a no-op.
#[tokio::test]
async fn removal_idempotence() {
    let store = MemoryStore::new("test", false);
    store.put("news", "job-1", &record("job-1", "s"), 1.0).await;
    store.put("news", "job-2", &record("job-2", "s"), 1.0).await;

    assert!(store.remove("news", "job-1").await);
    let after_first = store.ready_ids("news").await;

    assert!(!store.remove("news", "job-1").await);
    assert_eq!(store.ready_ids("news").await, after_first);
    assert_eq!(store.count("news").await, 1);
}

/// Under unified mode all logical queues collapse into one physical one.
#[tokio::test]
async fn unified_mode_collapsing() {
    let store = Arc::new(MemoryStore::new("test", true));
    let a = ProjectQueue::new(Arc::clone(&store) as Arc<dyn QueueStore>, "A");
    let b = ProjectQueue::new(Arc::clone(&store) as Arc<dyn QueueStore>, "B");

    assert!(a.add("spider-a", 1.0, job_params("job-a")).await);
    assert!(b.add("spider-b", 1.0, job_params("job-b")).await);

    let queues = store.queues().await;
    assert_eq!(queues, HashSet::from(["default".to_string()]));

    // Both facades observe the one shared physical queue.
    assert_eq!(a.count().await, 2);
    assert_eq!(b.count().await, 2);
    assert_eq!(store.count("default").await, 2);

    // Records keep their true origin.
    let origins: HashSet<Option<String>> = store
        .list("default", true, -1)
        .await
        .into_iter()
        .map(|r| r.project)
        .collect();
    assert_eq!(
        origins,
        HashSet::from([Some("A".to_string()), Some("B".to_string())])
    );
}

/// Clearing a queue with thousands of entries leaves nothing behind.
#[tokio::test]
async fn clear_completeness() {
    let store = MemoryStore::new("test", false);
    for i in 0..2500 {
        let id = format!("job-{i}");
        store.put("news", &id, &record(&id, "search"), 1.0).await;
    }
    assert_eq!(store.count("news").await, 2500);

    store.clear("news").await;

    assert_eq!(store.count("news").await, 0);
    assert!(store.list("news", true, -1).await.is_empty());
    assert!(store.stored_ids("news").await.is_empty());
    assert!(store.queues().await.is_empty());
}

/// The end-to-end scenario: two jobs with different priorities drain in
/// priority order, then the queue is empty.
#[tokio::test]
async fn end_to_end_priority_scenario() {
    let store = MemoryStore::new("test", false);

    let mut first = record("job-1", "search");
    first.extra.insert("_job".to_string(), json!("job-1"));
    let mut second = record("job-2", "search");
    second.extra.insert("_job".to_string(), json!("job-2"));

    assert!(store.put("news", "job-1", &first, 2.0).await);
    assert!(store.put("news", "job-2", &second, 1.0).await);

    let popped = store.pop("news", true).await.expect("first pop");
    assert_eq!(popped.id, "job-1");
    let popped = store.pop("news", true).await.expect("second pop");
    assert_eq!(popped.id, "job-2");
    assert_eq!(store.pop("news", true).await, None);
}

/// A poll pass with no waiting consumer never touches any ready-set.
#[tokio::test]
async fn poller_backpressure() {
    let store = Arc::new(MemoryStore::new("test", false));
    let news = ProjectQueue::new(Arc::clone(&store) as Arc<dyn QueueStore>, "news");
    let ads = ProjectQueue::new(Arc::clone(&store) as Arc<dyn QueueStore>, "ads");
    news.add("search", 1.0, job_params("j1")).await;
    ads.add("banner", 1.0, job_params("j2")).await;

    let mut poller = QueuePoller::new(
        Arc::clone(&store) as Arc<dyn QueueStore>,
        Arc::new(StaticProjects::new(["news", "ads"])),
        PollerConfig::default(),
    )
    .await;

    for _ in 0..5 {
        poller.poll().await;
    }

    assert_eq!(store.count("news").await, 1);
    assert_eq!(store.count("ads").await, 1);

    // Once a consumer shows up, exactly one job moves.
    let handle = poller.handle();
    let consumer = tokio::spawn(async move { handle.next().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    poller.poll().await;

    assert!(consumer.await.expect("task ok").is_some());
    assert_eq!(
        store.count("news").await + store.count("ads").await,
        1
    );
}

/// A failed job is requeued with its retry count bumped until the cap,
/// then dropped.
#[tokio::test]
async fn retry_cap() {
    let store = MemoryStore::new("test", false);
    let max_retries = 3;

    store.put("news", "flaky", &record("flaky", "search"), 1.0).await;

    for attempt in 1..=max_retries {
        let failed = store.pop("news", true).await.expect("job should be pending");
        assert!(
            store
                .requeue_failed("news", "flaky", &failed, 1.0, max_retries)
                .await
        );
        let requeued = store.list("news", true, -1).await;
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].retry_count, attempt);
    }

    // Fourth failure: the cap is reached, the job is dropped for good.
    let failed = store.pop("news", true).await.expect("job should be pending");
    assert_eq!(failed.retry_count, max_retries);
    assert!(
        !store
            .requeue_failed("news", "flaky", &failed, 1.0, max_retries)
            .await
    );
    assert_eq!(store.count("news").await, 0);
    assert!(store.stored_ids("news").await.is_empty());
}
