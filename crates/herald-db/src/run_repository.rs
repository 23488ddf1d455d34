use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use herald_core::error::AppError;
use herald_core::job::{BreakerSettings, JobDefinition, JobRun, Priority, RunStatus, RunSummary};
use herald_core::traits::RunStore;

/// Job definitions (append-only, versioned) and the run audit log.
#[derive(Clone)]
pub struct JobRunRepository {
    pool: Pool<Postgres>,
}

impl JobRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Latest stored version of a definition.
    pub async fn latest_definition(&self, name: &str) -> Result<Option<JobDefinition>, AppError> {
        let row = sqlx::query_as::<_, DefinitionRow>(
            r#"
            SELECT * FROM job_definitions
            WHERE name = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }
}

#[derive(sqlx::FromRow)]
struct DefinitionRow {
    name: String,
    version: i32,
    domain: String,
    schedule: Option<String>,
    priority: String,
    timeout_ms: i64,
    retry_limit: i32,
    retry_delay_ms: i64,
    breaker_enabled: bool,
    failure_threshold: i32,
    reset_timeout_ms: i64,
}

impl From<DefinitionRow> for JobDefinition {
    fn from(row: DefinitionRow) -> Self {
        JobDefinition {
            name: row.name,
            domain: row.domain,
            version: row.version.max(1) as u32,
            schedule: row.schedule,
            priority: row.priority.parse().unwrap_or(Priority::Normal),
            timeout: millis(row.timeout_ms),
            retry_limit: row.retry_limit.max(0) as u32,
            retry_delay: millis(row.retry_delay_ms),
            circuit_breaker: BreakerSettings {
                enabled: row.breaker_enabled,
                failure_threshold: row.failure_threshold.max(1) as u32,
                reset_timeout: millis(row.reset_timeout_ms),
            },
        }
    }
}

fn millis(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    job_name: String,
    started_at: DateTime<Utc>,
    status: String,
    duration_ms: Option<i64>,
    items_processed: Option<i64>,
    error_message: Option<String>,
    error_trace: Option<String>,
    metadata: serde_json::Value,
}

impl From<RunRow> for JobRun {
    fn from(row: RunRow) -> Self {
        JobRun {
            id: row.id,
            job_name: row.job_name,
            started_at: row.started_at,
            status: row.status.parse().unwrap_or(RunStatus::Failed),
            duration_ms: row.duration_ms,
            items_processed: row.items_processed,
            error_message: row.error_message,
            error_trace: row.error_trace,
            metadata: row.metadata,
        }
    }
}

impl RunStore for JobRunRepository {
    async fn save_definition(&self, definition: &JobDefinition) -> Result<u32, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let latest: Option<JobDefinition> = sqlx::query_as::<_, DefinitionRow>(
            r#"
            SELECT * FROM job_definitions
            WHERE name = $1
            ORDER BY version DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(&definition.name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?
        .map(Into::into);

        if let Some(latest) = &latest
            && latest.same_shape(definition)
        {
            tx.rollback()
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;
            return Ok(latest.version);
        }

        let version = latest.map_or(1, |l| l.version + 1);
        sqlx::query(
            r#"
            INSERT INTO job_definitions
                (name, version, domain, schedule, priority, timeout_ms, retry_limit,
                 retry_delay_ms, breaker_enabled, failure_threshold, reset_timeout_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&definition.name)
        .bind(version as i32)
        .bind(&definition.domain)
        .bind(&definition.schedule)
        .bind(definition.priority.as_str())
        .bind(definition.timeout.as_millis() as i64)
        .bind(definition.retry_limit as i32)
        .bind(definition.retry_delay.as_millis() as i64)
        .bind(definition.circuit_breaker.enabled)
        .bind(definition.circuit_breaker.failure_threshold as i32)
        .bind(definition.circuit_breaker.reset_timeout.as_millis() as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::info!(job = %definition.name, version, "Stored new job definition version");
        Ok(version)
    }

    async fn start_run(&self, run: &JobRun) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO job_runs (id, job_name, started_at, status, metadata)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(run.id)
        .bind(&run.job_name)
        .bind(run.started_at)
        .bind(run.status.as_str())
        .bind(&run.metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn complete_run(
        &self,
        run_id: Uuid,
        duration_ms: i64,
        items_processed: i64,
        metadata: serde_json::Value,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE job_runs
            SET status = 'completed', duration_ms = $2, items_processed = $3, metadata = $4
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(run_id)
        .bind(duration_ms)
        .bind(items_processed)
        .bind(&metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::DatabaseError(format!("No active run {run_id}")));
        }
        Ok(())
    }

    async fn fail_run(
        &self,
        run_id: Uuid,
        duration_ms: i64,
        error_message: &str,
        error_trace: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE job_runs
            SET status = 'failed', duration_ms = $2, error_message = $3, error_trace = $4
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(run_id)
        .bind(duration_ms)
        .bind(error_message)
        .bind(error_trace)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::DatabaseError(format!("No active run {run_id}")));
        }
        Ok(())
    }

    async fn recent_runs(&self, job_name: &str, limit: usize) -> Result<Vec<JobRun>, AppError> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, job_name, started_at, status, duration_ms, items_processed,
                   error_message, error_trace, metadata
            FROM job_runs
            WHERE job_name = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(job_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn summary(&self, job_name: &str) -> Result<RunSummary, AppError> {
        let (active, completed, failed, avg_duration_ms): (i64, i64, i64, Option<f64>) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*) FILTER (WHERE status = 'active'),
                    COUNT(*) FILTER (WHERE status = 'completed'),
                    COUNT(*) FILTER (WHERE status = 'failed'),
                    AVG(duration_ms)::float8
                FROM job_runs
                WHERE job_name = $1
                "#,
            )
            .bind(job_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(RunSummary {
            job_name: job_name.to_string(),
            active,
            completed,
            failed,
            avg_duration_ms,
        })
    }
}
