use std::time::Duration;

use chrono::Utc;
use herald_core::circuit_breaker::{CircuitState, CircuitStatus};
use herald_core::job::{JobDefinition, JobRun, Priority, RunStatus};
use herald_core::traits::{CircuitStore, RunStore};
use herald_db::{CircuitRepository, JobRunRepository};

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn definition_versions_only_grow_on_change() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobRunRepository::new(pool);

    let def = JobDefinition::new("extract-links", "content")
        .with_schedule("0 */30 * * * *")
        .with_priority(Priority::High);

    assert_eq!(repo.save_definition(&def).await.unwrap(), 1);
    assert_eq!(repo.save_definition(&def).await.unwrap(), 1);

    let changed = def.clone().with_retry(7, Duration::from_secs(5));
    assert_eq!(repo.save_definition(&changed).await.unwrap(), 2);

    let latest = repo.latest_definition("extract-links").await.unwrap().unwrap();
    assert_eq!(latest.version, 2);
    assert_eq!(latest.retry_limit, 7);
    assert_eq!(latest.priority, Priority::High);
    assert_eq!(latest.schedule.as_deref(), Some("0 */30 * * * *"));
}

#[tokio::test]
async fn run_lifecycle_and_summary() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobRunRepository::new(pool);

    let ok = JobRun::start("j", serde_json::json!({}));
    repo.start_run(&ok).await.unwrap();
    repo.complete_run(ok.id, 100, 3, serde_json::json!({"links": 3}))
        .await
        .unwrap();

    let bad = JobRun::start("j", serde_json::json!({}));
    repo.start_run(&bad).await.unwrap();
    repo.fail_run(bad.id, 300, "boom", "trace").await.unwrap();

    let runs = repo.recent_runs("j", 10).await.unwrap();
    assert_eq!(runs.len(), 2);
    let completed = runs.iter().find(|r| r.id == ok.id).unwrap();
    assert_eq!(completed.status, RunStatus::Completed);
    assert_eq!(completed.items_processed, Some(3));
    assert_eq!(completed.metadata["links"], 3);

    let summary = repo.summary("j").await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.active, 0);
    assert_eq!(summary.avg_duration_ms, Some(200.0));
}

#[tokio::test]
async fn finished_runs_cannot_transition_again() {
    let (pool, _container) = setup_test_db().await;
    let repo = JobRunRepository::new(pool);

    let run = JobRun::start("j", serde_json::Value::Null);
    repo.start_run(&run).await.unwrap();
    repo.complete_run(run.id, 10, 1, serde_json::Value::Null)
        .await
        .unwrap();

    assert!(repo.fail_run(run.id, 10, "late", "").await.is_err());
    let stored = repo.recent_runs("j", 1).await.unwrap();
    assert_eq!(stored[0].status, RunStatus::Completed);
}

#[tokio::test]
async fn circuit_state_round_trips() {
    let (pool, _container) = setup_test_db().await;
    let repo = CircuitRepository::new(pool);

    assert!(repo.load("extract-links").await.unwrap().is_none());

    let mut status = CircuitStatus::closed("extract-links");
    status.state = CircuitState::Open;
    status.failure_count = 5;
    status.last_failure_at = Some(Utc::now());
    repo.save(&status).await.unwrap();

    let loaded = repo.load("extract-links").await.unwrap().unwrap();
    assert_eq!(loaded.state, CircuitState::Open);
    assert_eq!(loaded.failure_count, 5);

    status.state = CircuitState::HalfOpen;
    repo.save(&status).await.unwrap();
    assert_eq!(
        repo.load("extract-links").await.unwrap().unwrap().state,
        CircuitState::HalfOpen
    );
    assert_eq!(repo.list().await.unwrap().len(), 1);
}
