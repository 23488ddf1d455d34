//! Test utilities: in-memory and mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::circuit_breaker::{CircuitEvent, CircuitListener, CircuitStatus};
use crate::error::AppError;
use crate::job::{
    EnqueueOptions, JobDefinition, JobRun, QueueStatus, QueuedJob, RunStatus, RunSummary,
};
use crate::job_queue::{JobQueue, QueueStats, StatusCounts};
use crate::models::{CandidateLink, ClassifiedUrl, ContentSource};
use crate::runner::{RunEvent, RunReporter};
use crate::traits::{
    CircuitStore, FeedEntry, FeedReader, HarvestedPage, LinkStore, PageAnchor, PageRenderer,
    RobotsPolicy, RunStore, SourceStore,
};
use crate::worker::{WorkerEvent, WorkerReporter};

// ---------------------------------------------------------------------------
// MemoryCircuitStore
// ---------------------------------------------------------------------------

/// Circuit store backed by a shared map. Clones share state, so a second
/// breaker built on a clone behaves like a restarted process.
#[derive(Clone, Default)]
pub struct MemoryCircuitStore {
    statuses: Arc<Mutex<HashMap<String, CircuitStatus>>>,
    fail_saves: bool,
}

impl MemoryCircuitStore {
    pub fn failing_saves() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    pub fn saved(&self, name: &str) -> Option<CircuitStatus> {
        self.statuses.lock().unwrap().get(name).cloned()
    }
}

impl CircuitStore for MemoryCircuitStore {
    async fn load(&self, job_name: &str) -> Result<Option<CircuitStatus>, AppError> {
        Ok(self.statuses.lock().unwrap().get(job_name).cloned())
    }

    async fn save(&self, status: &CircuitStatus) -> Result<(), AppError> {
        if self.fail_saves {
            return Err(AppError::DatabaseError("connection lost".into()));
        }
        self.statuses
            .lock()
            .unwrap()
            .insert(status.job_name.clone(), status.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingListener
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingListener {
    pub events: Mutex<Vec<CircuitEvent>>,
}

impl CircuitListener for RecordingListener {
    fn on_transition(&self, event: &CircuitEvent) -> Result<(), AppError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryRunStore
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryRunStore {
    definitions: Arc<Mutex<Vec<JobDefinition>>>,
    runs: Arc<Mutex<Vec<JobRun>>>,
}

impl MemoryRunStore {
    pub fn definitions(&self) -> Vec<JobDefinition> {
        self.definitions.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<JobRun> {
        self.runs.lock().unwrap().clone()
    }

    fn finish(&self, run_id: Uuid, apply: impl FnOnce(&mut JobRun)) -> Result<(), AppError> {
        let mut runs = self.runs.lock().unwrap();
        match runs
            .iter_mut()
            .find(|r| r.id == run_id && r.status == RunStatus::Active)
        {
            Some(run) => {
                apply(run);
                Ok(())
            }
            None => Err(AppError::DatabaseError(format!("No active run {run_id}"))),
        }
    }
}

impl RunStore for MemoryRunStore {
    async fn save_definition(&self, definition: &JobDefinition) -> Result<u32, AppError> {
        let mut definitions = self.definitions.lock().unwrap();
        let latest = definitions
            .iter()
            .filter(|d| d.name == definition.name)
            .max_by_key(|d| d.version)
            .cloned();
        match latest {
            Some(latest) if latest.same_shape(definition) => Ok(latest.version),
            latest => {
                let mut stored = definition.clone();
                stored.version = latest.map_or(1, |l| l.version + 1);
                let version = stored.version;
                definitions.push(stored);
                Ok(version)
            }
        }
    }

    async fn start_run(&self, run: &JobRun) -> Result<(), AppError> {
        self.runs.lock().unwrap().push(run.clone());
        Ok(())
    }

    async fn complete_run(
        &self,
        run_id: Uuid,
        duration_ms: i64,
        items_processed: i64,
        metadata: serde_json::Value,
    ) -> Result<(), AppError> {
        self.finish(run_id, |run| {
            run.status = RunStatus::Completed;
            run.duration_ms = Some(duration_ms);
            run.items_processed = Some(items_processed);
            run.metadata = metadata;
        })
    }

    async fn fail_run(
        &self,
        run_id: Uuid,
        duration_ms: i64,
        error_message: &str,
        error_trace: &str,
    ) -> Result<(), AppError> {
        self.finish(run_id, |run| {
            run.status = RunStatus::Failed;
            run.duration_ms = Some(duration_ms);
            run.error_message = Some(error_message.to_string());
            run.error_trace = Some(error_trace.to_string());
        })
    }

    async fn recent_runs(&self, job_name: &str, limit: usize) -> Result<Vec<JobRun>, AppError> {
        let mut runs: Vec<JobRun> = self
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.job_name == job_name)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn summary(&self, job_name: &str) -> Result<RunSummary, AppError> {
        let runs = self.runs.lock().unwrap();
        let mut summary = RunSummary {
            job_name: job_name.to_string(),
            ..RunSummary::default()
        };
        let mut durations = Vec::new();
        for run in runs.iter().filter(|r| r.job_name == job_name) {
            match run.status {
                RunStatus::Active => summary.active += 1,
                RunStatus::Completed => summary.completed += 1,
                RunStatus::Failed => summary.failed += 1,
            }
            if let Some(d) = run.duration_ms {
                durations.push(d as f64);
            }
        }
        if !durations.is_empty() {
            summary.avg_duration_ms = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// MemorySourceStore
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemorySourceStore {
    sources: Arc<Mutex<Vec<ContentSource>>>,
}

impl MemorySourceStore {
    pub fn new(sources: Vec<ContentSource>) -> Self {
        Self {
            sources: Arc::new(Mutex::new(sources)),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<ContentSource> {
        self.sources
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }
}

impl SourceStore for MemorySourceStore {
    async fn due_sources(&self, limit: usize) -> Result<Vec<ContentSource>, AppError> {
        let now = Utc::now();
        let mut due: Vec<ContentSource> = self
            .sources
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.has_failed)
            .filter(|s| {
                s.refreshed_at.is_none_or(|at| {
                    at + TimeDelta::minutes(s.scrape_frequency_minutes as i64) <= now
                })
            })
            .cloned()
            .collect();
        due.sort_by_key(|s| s.refreshed_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn mark_refreshed(&self, source_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut sources = self.sources.lock().unwrap();
        let source = sources
            .iter_mut()
            .find(|s| s.id == source_id)
            .ok_or_else(|| AppError::DatabaseError(format!("No source {source_id}")))?;
        source.refreshed_at = Some(at);
        source.failure_count = 0;
        Ok(())
    }

    async fn record_failure(
        &self,
        source_id: Uuid,
        max_failures: i32,
    ) -> Result<ContentSource, AppError> {
        let mut sources = self.sources.lock().unwrap();
        let source = sources
            .iter_mut()
            .find(|s| s.id == source_id)
            .ok_or_else(|| AppError::DatabaseError(format!("No source {source_id}")))?;
        source.failure_count += 1;
        if source.failure_count >= max_failures {
            source.has_failed = true;
        }
        Ok(source.clone())
    }
}

// ---------------------------------------------------------------------------
// MemoryLinkStore
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryLinkStore {
    links: Arc<Mutex<Vec<(Uuid, CandidateLink)>>>,
    classified: Arc<Mutex<Vec<ClassifiedUrl>>>,
    classified_batches: Arc<Mutex<Vec<usize>>>,
    save_attempts: Arc<AtomicUsize>,
    fail_saves: bool,
}

impl MemoryLinkStore {
    /// `save_links` always fails with a database error.
    pub fn failing_saves(mut self) -> Self {
        self.fail_saves = true;
        self
    }

    pub fn saved_links(&self) -> Vec<CandidateLink> {
        self.links
            .lock()
            .unwrap()
            .iter()
            .map(|(_, l)| l.clone())
            .collect()
    }

    pub fn classified(&self) -> Vec<ClassifiedUrl> {
        self.classified.lock().unwrap().clone()
    }

    /// Size of each `save_classified` call, in order.
    pub fn classified_batches(&self) -> Vec<usize> {
        self.classified_batches.lock().unwrap().clone()
    }

    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }
}

impl LinkStore for MemoryLinkStore {
    async fn save_links(&self, source_id: Uuid, links: &[CandidateLink]) -> Result<u64, AppError> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves {
            return Err(AppError::DatabaseError("deadlock detected".into()));
        }
        let mut stored = self.links.lock().unwrap();
        let mut inserted = 0;
        for link in links {
            if !stored.iter().any(|(_, l)| l.url == link.url) {
                stored.push((source_id, link.clone()));
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn save_classified(&self, records: &[ClassifiedUrl]) -> Result<u64, AppError> {
        self.classified_batches.lock().unwrap().push(records.len());
        self.classified
            .lock()
            .unwrap()
            .extend(records.iter().cloned());
        Ok(records.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// MockFeedReader
// ---------------------------------------------------------------------------

/// Feed reader with canned responses per URL. Unknown URLs fail.
#[derive(Clone, Default)]
pub struct MockFeedReader {
    feeds: HashMap<String, Result<Vec<FeedEntry>, String>>,
}

impl MockFeedReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, url: &str, entries: Vec<FeedEntry>) -> Self {
        self.feeds.insert(url.to_string(), Ok(entries));
        self
    }

    pub fn with_failure(mut self, url: &str, error: AppError) -> Self {
        self.feeds.insert(url.to_string(), Err(error.to_string()));
        self
    }
}

impl FeedReader for MockFeedReader {
    async fn read_feed(&self, url: &str) -> Result<Vec<FeedEntry>, AppError> {
        match self.feeds.get(url) {
            Some(Ok(entries)) => Ok(entries.clone()),
            Some(Err(message)) => Err(AppError::FeedError(message.clone())),
            None => Err(AppError::FeedError(format!("no such feed: {url}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// MockPageRenderer
// ---------------------------------------------------------------------------

/// Renderer that returns the same anchors for every page and counts calls.
#[derive(Clone)]
pub struct MockPageRenderer {
    anchors: Vec<PageAnchor>,
    error: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl MockPageRenderer {
    pub fn new(anchors: Vec<PageAnchor>) -> Self {
        Self {
            anchors,
            error: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every call fails with a network error carrying `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PageRenderer for MockPageRenderer {
    async fn harvest_links(&self, url: &str, selectors: &[String]) -> Result<HarvestedPage, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.error {
            return Err(AppError::NetworkError(message.clone()));
        }
        Ok(HarvestedPage {
            url: url.to_string(),
            matched_selector: selectors.first().cloned(),
            anchors: self.anchors.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// MockRobots
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum RobotsMode {
    AllowAll,
    DenyPrefix(String),
    Failing,
}

#[derive(Clone)]
pub struct MockRobots {
    mode: RobotsMode,
}

impl MockRobots {
    pub fn allow_all() -> Self {
        Self {
            mode: RobotsMode::AllowAll,
        }
    }

    pub fn deny_prefix(prefix: &str) -> Self {
        Self {
            mode: RobotsMode::DenyPrefix(prefix.to_string()),
        }
    }

    /// robots.txt can never be fetched.
    pub fn failing() -> Self {
        Self {
            mode: RobotsMode::Failing,
        }
    }
}

impl RobotsPolicy for MockRobots {
    async fn is_allowed(&self, url: &str, _agent: &str) -> Result<bool, AppError> {
        match &self.mode {
            RobotsMode::AllowAll => Ok(true),
            RobotsMode::DenyPrefix(prefix) => Ok(!url.starts_with(prefix.as_str())),
            RobotsMode::Failing => Err(AppError::NetworkError("connection refused".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryJobQueue
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryJobQueue {
    jobs: Arc<Mutex<Vec<QueuedJob>>>,
}

impl MemoryJobQueue {
    pub fn all(&self) -> Vec<QueuedJob> {
        self.jobs.lock().unwrap().clone()
    }

    fn update(&self, job_id: Uuid, apply: impl FnOnce(&mut QueuedJob)) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| AppError::DatabaseError(format!("No job {job_id}")))?;
        apply(job);
        job.updated_at = Utc::now();
        Ok(())
    }
}

impl JobQueue for MemoryJobQueue {
    async fn enqueue(
        &self,
        job_name: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<QueuedJob, AppError> {
        let now = Utc::now();
        let job = QueuedJob {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            payload,
            priority: options.priority,
            status: QueueStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            retry_limit: options.retry_limit,
            retry_delay_ms: options.retry_delay.as_millis() as u64,
            expire_at: options
                .expire_after
                .and_then(|d| TimeDelta::from_std(d).ok())
                .map(|d| now + d),
            next_retry_at: None,
            error_message: None,
            worker_id: None,
        };
        self.jobs.lock().unwrap().push(job.clone());
        Ok(job)
    }

    async fn claim(
        &self,
        worker_id: &str,
        job_names: &[String],
    ) -> Result<Option<QueuedJob>, AppError> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().unwrap();
        let next = jobs
            .iter_mut()
            .filter(|j| j.status == QueueStatus::Pending)
            .filter(|j| job_names.iter().any(|n| n == &j.job_name))
            .filter(|j| j.next_retry_at.is_none_or(|at| at <= now))
            .filter(|j| !j.is_expired(now))
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            });
        Ok(next.map(|job| {
            job.status = QueueStatus::Running;
            job.started_at = Some(now);
            job.updated_at = now;
            job.worker_id = Some(worker_id.to_string());
            job.clone()
        }))
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), AppError> {
        self.update(job_id, |job| {
            job.status = QueueStatus::Completed;
            job.completed_at = Some(Utc::now());
        })
    }

    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        self.update(job_id, |job| {
            job.error_message = Some(error.to_string());
            job.worker_id = None;
            match next_retry_at {
                Some(at) => {
                    job.status = QueueStatus::Pending;
                    job.retry_count += 1;
                    job.next_retry_at = Some(at);
                }
                None => {
                    job.status = QueueStatus::Failed;
                    job.completed_at = Some(Utc::now());
                }
            }
        })
    }

    async fn expire_overdue(&self) -> Result<u64, AppError> {
        let now = Utc::now();
        let mut expired = 0;
        for job in self.jobs.lock().unwrap().iter_mut() {
            if job.status == QueueStatus::Pending && job.is_expired(now) {
                job.status = QueueStatus::Expired;
                job.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<QueuedJob>, AppError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == job_id)
            .cloned())
    }

    async fn release_worker_jobs(&self, worker_id: &str) -> Result<u64, AppError> {
        let mut released = 0;
        for job in self.jobs.lock().unwrap().iter_mut() {
            if job.status == QueueStatus::Running && job.worker_id.as_deref() == Some(worker_id) {
                job.status = QueueStatus::Pending;
                job.worker_id = None;
                job.started_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn stats(&self) -> Result<QueueStats, AppError> {
        let rows: Vec<(String, QueueStatus, i64)> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .map(|j| (j.job_name.clone(), j.status, 1))
            .collect();
        Ok(QueueStats::from_rows(rows))
    }

    async fn job_stats(&self, job_name: &str) -> Result<StatusCounts, AppError> {
        let mut counts = StatusCounts::default();
        for job in self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.job_name == job_name)
        {
            counts.add(job.status, 1);
        }
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Reporters
// ---------------------------------------------------------------------------

/// Records run events as `"<kind>:<job>"` strings.
#[derive(Default)]
pub struct MockRunReporter {
    events: Mutex<Vec<String>>,
}

impl MockRunReporter {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl RunReporter for MockRunReporter {
    fn report(&self, event: RunEvent<'_>) {
        let line = match event {
            RunEvent::Started { job_name, .. } => format!("started:{job_name}"),
            RunEvent::Completed { outcome } => format!("completed:{}", outcome.job_name),
            RunEvent::Failed { job_name, .. } => format!("failed:{job_name}"),
        };
        self.events.lock().unwrap().push(line);
    }
}

/// Records worker events as short strings.
#[derive(Default)]
pub struct MockWorkerReporter {
    events: Mutex<Vec<String>>,
}

impl MockWorkerReporter {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl WorkerReporter for MockWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let line = match event {
            WorkerEvent::Started { .. } => "started".to_string(),
            WorkerEvent::Polling => "polling".to_string(),
            WorkerEvent::Expired { count } => format!("expired:{count}"),
            WorkerEvent::JobClaimed { job } => format!("claimed:{}", job.job_name),
            WorkerEvent::JobCompleted { job_name, .. } => format!("completed:{job_name}"),
            WorkerEvent::JobFailed {
                job_name,
                will_retry,
                ..
            } => format!("failed:{job_name}:{will_retry}"),
            WorkerEvent::ShuttingDown { .. } => "shutting_down".to_string(),
            WorkerEvent::Stopped { .. } => "stopped".to_string(),
        };
        self.events.lock().unwrap().push(line);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::job::Priority;

    #[tokio::test]
    async fn queue_claims_by_priority_then_age() {
        let queue = MemoryJobQueue::default();
        let names = vec!["a".to_string()];
        let low = queue.enqueue("a", serde_json::Value::Null, EnqueueOptions::default()).await.unwrap();
        let high = queue
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

        assert_eq!(queue.claim("w", &names).await.unwrap().unwrap().id, high.id);
        assert_eq!(queue.claim("w", &names).await.unwrap().unwrap().id, low.id);
        assert!(queue.claim("w", &names).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queue_expires_overdue_jobs() {
        let queue = MemoryJobQueue::default();
        queue
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

        assert!(queue.claim("w", &["a".to_string()]).await.unwrap().is_none());
        assert_eq!(queue.expire_overdue().await.unwrap(), 1);
        assert_eq!(queue.stats().await.unwrap().totals.expired, 1);
    }

    #[tokio::test]
    async fn run_store_appends_versions_only_on_change() {
        let store = MemoryRunStore::default();
        let def = JobDefinition::new("j", "d");
        assert_eq!(store.save_definition(&def).await.unwrap(), 1);
        assert_eq!(store.save_definition(&def).await.unwrap(), 1);
        let changed = def.clone().with_timeout(Duration::from_secs(5));
        assert_eq!(store.save_definition(&changed).await.unwrap(), 2);
        assert_eq!(store.definitions().len(), 2);
    }

    #[tokio::test]
    async fn run_store_rejects_backward_transitions() {
        let store = MemoryRunStore::default();
        let run = JobRun::start("j", serde_json::Value::Null);
        store.start_run(&run).await.unwrap();
        store
            .complete_run(run.id, 10, 1, serde_json::Value::Null)
            .await
            .unwrap();
        assert!(store.fail_run(run.id, 10, "late", "").await.is_err());
        let summary = store.summary("j").await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.avg_duration_ms, Some(10.0));
    }
}
