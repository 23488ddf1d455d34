use std::time::Duration;

use chrono::{TimeDelta, Utc};
use herald_core::job::{EnqueueOptions, Priority, QueueStatus};
use herald_core::job_queue::JobQueue;
use herald_db::QueueRepository;

use crate::integration::common::setup_test_db;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn enqueue_and_verify_fields() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);

    let job = repo
        .enqueue(
            "extract-links",
            serde_json::json!({"source": "a"}),
            EnqueueOptions {
                priority: Priority::High,
                retry_limit: 5,
                retry_delay: Duration::from_secs(30),
                expire_after: Some(Duration::from_secs(3600)),
            },
        )
        .await
        .unwrap();

    assert_eq!(job.job_name, "extract-links");
    assert_eq!(job.status, QueueStatus::Pending);
    assert_eq!(job.priority, Priority::High);
    assert_eq!(job.retry_limit, 5);
    assert_eq!(job.retry_delay_ms, 30_000);
    assert!(job.expire_at.is_some());
    assert!(job.worker_id.is_none());
}

#[tokio::test]
async fn claim_sets_running_and_worker() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);

    repo.enqueue("a", serde_json::Value::Null, EnqueueOptions::default())
        .await
        .unwrap();

    let claimed = repo
        .claim("worker-1", &names(&["a"]))
        .await
        .unwrap()
        .expect("Should claim the job");

    assert_eq!(claimed.status, QueueStatus::Running);
    assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
    assert!(claimed.started_at.is_some());

    assert!(repo.claim("worker-2", &names(&["a"])).await.unwrap().is_none());
}

#[tokio::test]
async fn claim_only_takes_handled_job_names() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);

    repo.enqueue("other", serde_json::Value::Null, EnqueueOptions::default())
        .await
        .unwrap();

    assert!(repo.claim("worker-1", &names(&["a"])).await.unwrap().is_none());
}

#[tokio::test]
async fn claim_orders_by_priority_then_age() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);

    let low = repo
        .enqueue(
            "a",
            serde_json::Value::Null,
            EnqueueOptions {
                priority: Priority::Low,
                ..EnqueueOptions::default()
            },
        )
        .await
        .unwrap();
    let first_normal = repo
        .enqueue("a", serde_json::Value::Null, EnqueueOptions::default())
        .await
        .unwrap();
    let critical = repo
        .enqueue(
            "a",
            serde_json::Value::Null,
            EnqueueOptions {
                priority: Priority::Critical,
                ..EnqueueOptions::default()
            },
        )
        .await
        .unwrap();
    let second_normal = repo
        .enqueue("a", serde_json::Value::Null, EnqueueOptions::default())
        .await
        .unwrap();

    let handled = names(&["a"]);
    let mut order = Vec::new();
    while let Some(job) = repo.claim("w", &handled).await.unwrap() {
        order.push(job.id);
    }

    assert_eq!(order, vec![critical.id, first_normal.id, second_normal.id, low.id]);
}

#[tokio::test]
async fn claim_skips_future_retries() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);

    let job = repo
        .enqueue("a", serde_json::Value::Null, EnqueueOptions::default())
        .await
        .unwrap();
    repo.claim("worker-1", &names(&["a"])).await.unwrap();
    repo.fail(job.id, "temporary error", Some(Utc::now() + TimeDelta::minutes(5)))
        .await
        .unwrap();

    let updated = repo.get(job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, QueueStatus::Pending);
    assert_eq!(updated.retry_count, 1);
    assert_eq!(updated.error_message.as_deref(), Some("temporary error"));
    assert!(updated.worker_id.is_none());

    assert!(repo.claim("worker-1", &names(&["a"])).await.unwrap().is_none());
}

#[tokio::test]
async fn fail_without_retry_marks_failed() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);

    let job = repo
        .enqueue("a", serde_json::Value::Null, EnqueueOptions::default())
        .await
        .unwrap();
    repo.claim("worker-1", &names(&["a"])).await.unwrap();
    repo.fail(job.id, "permanent error", None).await.unwrap();

    let updated = repo.get(job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, QueueStatus::Failed);
    assert_eq!(updated.retry_count, 0);
    assert!(updated.completed_at.is_some());
}

#[tokio::test]
async fn complete_sets_completed_status() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);

    let job = repo
        .enqueue("a", serde_json::Value::Null, EnqueueOptions::default())
        .await
        .unwrap();
    repo.claim("worker-1", &names(&["a"])).await.unwrap();
    repo.complete(job.id).await.unwrap();

    let updated = repo.get(job.id).await.unwrap().unwrap();
    assert_eq!(updated.status, QueueStatus::Completed);
    assert!(updated.completed_at.is_some());
    assert!(updated.worker_id.is_none());
}

#[tokio::test]
async fn overdue_jobs_expire_instead_of_running() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);

    let job = repo
        .enqueue(
            "a",
            serde_json::Value::Null,
            EnqueueOptions {
                expire_after: Some(Duration::ZERO),
                ..EnqueueOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(repo.claim("worker-1", &names(&["a"])).await.unwrap().is_none());
    assert_eq!(repo.expire_overdue().await.unwrap(), 1);
    assert_eq!(
        repo.get(job.id).await.unwrap().unwrap().status,
        QueueStatus::Expired
    );
}

#[tokio::test]
async fn release_worker_jobs_on_shutdown() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);

    let handled = names(&["a"]);
    repo.enqueue("a", serde_json::Value::Null, EnqueueOptions::default())
        .await
        .unwrap();
    repo.enqueue("a", serde_json::Value::Null, EnqueueOptions::default())
        .await
        .unwrap();
    repo.claim("worker-1", &handled).await.unwrap();
    repo.claim("worker-1", &handled).await.unwrap();

    let released = repo.release_worker_jobs("worker-1").await.unwrap();
    assert_eq!(released, 2);
    assert_eq!(repo.job_stats("a").await.unwrap().pending, 2);
}

#[tokio::test]
async fn stats_group_by_job_and_status() {
    let (pool, _container) = setup_test_db().await;
    let repo = QueueRepository::new(pool);

    let job = repo
        .enqueue("a", serde_json::Value::Null, EnqueueOptions::default())
        .await
        .unwrap();
    repo.enqueue("a", serde_json::Value::Null, EnqueueOptions::default())
        .await
        .unwrap();
    repo.enqueue("b", serde_json::Value::Null, EnqueueOptions::default())
        .await
        .unwrap();
    repo.claim("w", &names(&["a"])).await.unwrap();
    repo.complete(job.id).await.unwrap();

    let stats = repo.stats().await.unwrap();
    assert_eq!(stats.totals.total(), 3);
    assert_eq!(stats.totals.pending, 2);
    assert_eq!(stats.per_job["a"].completed, 1);
    assert_eq!(stats.per_job["b"].pending, 1);

    let listed = repo.list(Some(QueueStatus::Pending), 10).await.unwrap();
    assert_eq!(listed.len(), 2);
}
