use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use herald_core::error::AppError;
use herald_core::job::{EnqueueOptions, Priority, QueueStatus, QueuedJob};
use herald_core::job_queue::{JobQueue, QueueStats, StatusCounts};

/// PostgreSQL-backed job queue using `SELECT FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct QueueRepository {
    pool: Pool<Postgres>,
}

impl QueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Most recent jobs, optionally filtered by status.
    pub async fn list(
        &self,
        status: Option<QueueStatus>,
        limit: usize,
    ) -> Result<Vec<QueuedJob>, AppError> {
        let rows = sqlx::query_as::<_, QueueJobRow>(
            r#"
            SELECT * FROM queue_jobs
            WHERE ($1::varchar IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct QueueJobRow {
    id: Uuid,
    job_name: String,
    payload: serde_json::Value,
    priority: i16,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    retry_count: i32,
    retry_limit: i32,
    retry_delay_ms: i64,
    expire_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    worker_id: Option<String>,
}

impl From<QueueJobRow> for QueuedJob {
    fn from(row: QueueJobRow) -> Self {
        QueuedJob {
            id: row.id,
            job_name: row.job_name,
            payload: row.payload,
            priority: Priority::from_rank(row.priority),
            status: row.status.parse().unwrap_or(QueueStatus::Pending),
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            retry_count: row.retry_count.max(0) as u32,
            retry_limit: row.retry_limit.max(0) as u32,
            retry_delay_ms: row.retry_delay_ms.max(0) as u64,
            expire_at: row.expire_at,
            next_retry_at: row.next_retry_at,
            error_message: row.error_message,
            worker_id: row.worker_id,
        }
    }
}

impl JobQueue for QueueRepository {
    async fn enqueue(
        &self,
        job_name: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<QueuedJob, AppError> {
        let expire_at = options
            .expire_after
            .and_then(|d| TimeDelta::from_std(d).ok())
            .map(|d| Utc::now() + d);

        let row = sqlx::query_as::<_, QueueJobRow>(
            r#"
            INSERT INTO queue_jobs (job_name, payload, priority, retry_limit, retry_delay_ms, expire_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(job_name)
        .bind(&payload)
        .bind(options.priority.rank())
        .bind(options.retry_limit as i32)
        .bind(options.retry_delay.as_millis() as i64)
        .bind(expire_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.into())
    }

    async fn claim(
        &self,
        worker_id: &str,
        job_names: &[String],
    ) -> Result<Option<QueuedJob>, AppError> {
        let row = sqlx::query_as::<_, QueueJobRow>(
            r#"
            UPDATE queue_jobs
            SET status = 'running', worker_id = $1, started_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM queue_jobs
                WHERE status = 'pending'
                  AND job_name = ANY($2)
                  AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                  AND (expire_at IS NULL OR expire_at > NOW())
                ORDER BY priority DESC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(job_names)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE queue_jobs
            SET status = 'completed', completed_at = NOW(), updated_at = NOW(),
                error_message = NULL, worker_id = NULL
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        // A retry time puts the job back to pending; otherwise it fails for good.
        sqlx::query(
            r#"
            UPDATE queue_jobs
            SET
                status = CASE WHEN $3::timestamptz IS NOT NULL THEN 'pending' ELSE 'failed' END,
                retry_count = CASE WHEN $3::timestamptz IS NOT NULL THEN retry_count + 1 ELSE retry_count END,
                next_retry_at = $3,
                error_message = $2,
                updated_at = NOW(),
                worker_id = NULL,
                started_at = CASE WHEN $3::timestamptz IS NOT NULL THEN NULL ELSE started_at END,
                completed_at = CASE WHEN $3::timestamptz IS NOT NULL THEN NULL ELSE NOW() END
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn expire_overdue(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET status = 'expired', updated_at = NOW()
            WHERE status = 'pending' AND expire_at IS NOT NULL AND expire_at <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<QueuedJob>, AppError> {
        let row = sqlx::query_as::<_, QueueJobRow>(r#"SELECT * FROM queue_jobs WHERE id = $1"#)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn release_worker_jobs(&self, worker_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET status = 'pending', worker_id = NULL, started_at = NULL, updated_at = NOW()
            WHERE worker_id = $1 AND status = 'running'
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<QueueStats, AppError> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT job_name, status, COUNT(*)
            FROM queue_jobs
            GROUP BY job_name, status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(QueueStats::from_rows(rows.into_iter().filter_map(
            |(job_name, status, count)| status.parse().ok().map(|s| (job_name, s, count)),
        )))
    }

    async fn job_stats(&self, job_name: &str) -> Result<StatusCounts, AppError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*)
            FROM queue_jobs
            WHERE job_name = $1
            GROUP BY status
            "#,
        )
        .bind(job_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            if let Ok(status) = status.parse::<QueueStatus>() {
                counts.add(status, count);
            }
        }
        Ok(counts)
    }
}
