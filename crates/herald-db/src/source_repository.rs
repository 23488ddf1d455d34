use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use herald_core::error::AppError;
use herald_core::models::ContentSource;
use herald_core::traits::SourceStore;

const SOURCE_COLUMNS: &str = "id, url, rss_urls, content_type, scrape_frequency_minutes, \
                              failure_count, has_failed, refreshed_at";

/// Content sources and their crawl health.
#[derive(Clone)]
pub struct SourceRepository {
    pool: Pool<Postgres>,
}

impl SourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a source, or update its feeds and settings if the URL exists.
    pub async fn upsert(&self, source: &ContentSource) -> Result<ContentSource, AppError> {
        let row = sqlx::query_as::<_, SourceRow>(&format!(
            r#"
            INSERT INTO content_sources
                (id, url, rss_urls, content_type, scrape_frequency_minutes)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (url) DO UPDATE SET
                rss_urls = EXCLUDED.rss_urls,
                content_type = EXCLUDED.content_type,
                scrape_frequency_minutes = EXCLUDED.scrape_frequency_minutes
            RETURNING {SOURCE_COLUMNS}
            "#
        ))
        .bind(source.id)
        .bind(&source.url)
        .bind(&source.rss_urls)
        .bind(&source.content_type)
        .bind(source.scrape_frequency_minutes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.into())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ContentSource>, AppError> {
        let row = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM content_sources WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    pub async fn find_by_url(&self, url: &str) -> Result<Option<ContentSource>, AppError> {
        let row = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM content_sources WHERE url = $1"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: Uuid,
    url: String,
    rss_urls: Vec<String>,
    content_type: String,
    scrape_frequency_minutes: i32,
    failure_count: i32,
    has_failed: bool,
    refreshed_at: Option<DateTime<Utc>>,
}

impl From<SourceRow> for ContentSource {
    fn from(row: SourceRow) -> Self {
        ContentSource {
            id: row.id,
            url: row.url,
            rss_urls: row.rss_urls,
            content_type: row.content_type,
            scrape_frequency_minutes: row.scrape_frequency_minutes,
            failure_count: row.failure_count,
            has_failed: row.has_failed,
            refreshed_at: row.refreshed_at,
        }
    }
}

impl SourceStore for SourceRepository {
    async fn due_sources(&self, limit: usize) -> Result<Vec<ContentSource>, AppError> {
        let rows = sqlx::query_as::<_, SourceRow>(&format!(
            r#"
            SELECT {SOURCE_COLUMNS} FROM content_sources
            WHERE has_failed = FALSE
              AND (refreshed_at IS NULL
                   OR refreshed_at + make_interval(mins => scrape_frequency_minutes) <= NOW())
            ORDER BY refreshed_at NULLS FIRST
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_refreshed(&self, source_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE content_sources
            SET refreshed_at = $2, failure_count = 0
            WHERE id = $1
            "#,
        )
        .bind(source_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn record_failure(
        &self,
        source_id: Uuid,
        max_failures: i32,
    ) -> Result<ContentSource, AppError> {
        let row = sqlx::query_as::<_, SourceRow>(&format!(
            r#"
            UPDATE content_sources
            SET failure_count = failure_count + 1,
                has_failed = has_failed OR failure_count + 1 >= $2
            WHERE id = $1
            RETURNING {SOURCE_COLUMNS}
            "#
        ))
        .bind(source_id)
        .bind(max_failures)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(Into::into)
            .ok_or_else(|| AppError::DatabaseError(format!("No source {source_id}")))
    }
}
