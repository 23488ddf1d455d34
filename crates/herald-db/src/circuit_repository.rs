use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use herald_core::circuit_breaker::{CircuitState, CircuitStatus};
use herald_core::error::AppError;
use herald_core::traits::CircuitStore;

/// Circuit-breaker state persisted in `circuit_breakers`, one row per name.
#[derive(Clone)]
pub struct CircuitRepository {
    pool: Pool<Postgres>,
}

impl CircuitRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Every persisted breaker, by name.
    pub async fn list(&self) -> Result<Vec<CircuitStatus>, AppError> {
        let rows = sqlx::query_as::<_, CircuitRow>(
            r#"
            SELECT job_name, state, failure_count, last_failure_at, last_success_at
            FROM circuit_breakers
            ORDER BY job_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[derive(sqlx::FromRow)]
struct CircuitRow {
    job_name: String,
    state: String,
    failure_count: i32,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
}

impl From<CircuitRow> for CircuitStatus {
    fn from(row: CircuitRow) -> Self {
        CircuitStatus {
            state: row.state.parse().unwrap_or_else(|e| {
                tracing::warn!(circuit = %row.job_name, error = %e, "Unreadable breaker state, treating as closed");
                CircuitState::Closed
            }),
            job_name: row.job_name,
            failure_count: row.failure_count.max(0) as u32,
            last_failure_at: row.last_failure_at,
            last_success_at: row.last_success_at,
        }
    }
}

impl CircuitStore for CircuitRepository {
    async fn load(&self, job_name: &str) -> Result<Option<CircuitStatus>, AppError> {
        let row = sqlx::query_as::<_, CircuitRow>(
            r#"
            SELECT job_name, state, failure_count, last_failure_at, last_success_at
            FROM circuit_breakers
            WHERE job_name = $1
            "#,
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn save(&self, status: &CircuitStatus) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO circuit_breakers
                (job_name, state, failure_count, last_failure_at, last_success_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (job_name) DO UPDATE SET
                state = EXCLUDED.state,
                failure_count = EXCLUDED.failure_count,
                last_failure_at = EXCLUDED.last_failure_at,
                last_success_at = EXCLUDED.last_success_at,
                updated_at = NOW()
            "#,
        )
        .bind(&status.job_name)
        .bind(status.state.as_str())
        .bind(status.failure_count as i32)
        .bind(status.last_failure_at)
        .bind(status.last_success_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}
