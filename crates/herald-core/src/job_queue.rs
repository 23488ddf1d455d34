use std::collections::BTreeMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{EnqueueOptions, QueueStatus, QueuedJob};

/// Job counts by queue status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub expired: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: QueueStatus, count: i64) {
        match status {
            QueueStatus::Pending => self.pending += count,
            QueueStatus::Running => self.running += count,
            QueueStatus::Completed => self.completed += count,
            QueueStatus::Failed => self.failed += count,
            QueueStatus::Expired => self.expired += count,
        }
    }

    pub fn get(&self, status: QueueStatus) -> i64 {
        match status {
            QueueStatus::Pending => self.pending,
            QueueStatus::Running => self.running,
            QueueStatus::Completed => self.completed,
            QueueStatus::Failed => self.failed,
            QueueStatus::Expired => self.expired,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.running + self.completed + self.failed + self.expired
    }
}

/// Queue-wide counts plus a per-job breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub totals: StatusCounts,
    pub per_job: BTreeMap<String, StatusCounts>,
}

impl QueueStats {
    /// Build from `(job_name, status, count)` rows, as returned by a grouped query.
    pub fn from_rows(rows: impl IntoIterator<Item = (String, QueueStatus, i64)>) -> Self {
        let mut stats = QueueStats::default();
        for (job_name, status, count) in rows {
            stats.totals.add(status, count);
            stats.per_job.entry(job_name).or_default().add(status, count);
        }
        stats
    }
}

/// Durable queue of named jobs with at-least-once delivery.
///
/// Implementations must support atomic claiming via `SELECT FOR UPDATE SKIP LOCKED`
/// or equivalent to prevent multiple workers from claiming the same job.
pub trait JobQueue: Send + Sync + Clone + 'static {
    fn enqueue(
        &self,
        job_name: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> impl Future<Output = Result<QueuedJob, AppError>> + Send;

    /// Atomically claim the next runnable job among `job_names`.
    ///
    /// Runnable means pending, past its `next_retry_at`, and not expired.
    /// Higher priority wins, then age. Returns `None` if nothing is runnable.
    fn claim(
        &self,
        worker_id: &str,
        job_names: &[String],
    ) -> impl Future<Output = Result<Option<QueuedJob>, AppError>> + Send;

    fn complete(&self, job_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Mark a job as failed. If `next_retry_at` is provided, the job is
    /// reset to `pending` for retry; otherwise it is marked as permanently `failed`.
    fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Move pending jobs whose `expire_at` has passed to `expired`.
    fn expire_overdue(&self) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn get(&self, job_id: Uuid) -> impl Future<Output = Result<Option<QueuedJob>, AppError>> + Send;

    /// Release all jobs held by a specific worker (for graceful shutdown).
    fn release_worker_jobs(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn stats(&self) -> impl Future<Output = Result<QueueStats, AppError>> + Send;

    fn job_stats(
        &self,
        job_name: &str,
    ) -> impl Future<Output = Result<StatusCounts, AppError>> + Send;
}
