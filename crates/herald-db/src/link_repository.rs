use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres, QueryBuilder};
use uuid::Uuid;

use herald_core::error::AppError;
use herald_core::models::{CandidateLink, ClassifiedUrl};
use herald_core::traits::LinkStore;

/// Rows per `classified_urls` insert transaction.
pub const CLASSIFIED_CHUNK: usize = 100;

/// Persistence for extracted article links and classifier decisions.
#[derive(Clone)]
pub struct LinkRepository {
    pool: Pool<Postgres>,
}

impl LinkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Links stored for a source, newest first.
    pub async fn links_for_source(
        &self,
        source_id: Uuid,
        limit: usize,
    ) -> Result<Vec<CandidateLink>, AppError> {
        let rows = sqlx::query_as::<_, LinkRow>(
            r#"
            SELECT url, title, author, description, published_at, featured_image, keywords
            FROM content_links
            WHERE source_id = $1
            ORDER BY created_at DESC, url
            LIMIT $2
            "#,
        )
        .bind(source_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// How many classifier decisions have been recorded for `url`.
    pub async fn count_classified(&self, url: &str) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM classified_urls WHERE url = $1"#)
                .bind(url)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count)
    }
}

#[derive(sqlx::FromRow)]
struct LinkRow {
    url: String,
    title: Option<String>,
    author: Option<String>,
    description: Option<String>,
    published_at: Option<DateTime<Utc>>,
    featured_image: Option<String>,
    keywords: Vec<String>,
}

impl From<LinkRow> for CandidateLink {
    fn from(row: LinkRow) -> Self {
        CandidateLink {
            url: row.url,
            title: row.title,
            author: row.author,
            description: row.description,
            published_at: row.published_at,
            featured_image: row.featured_image,
            keywords: row.keywords,
        }
    }
}

impl LinkStore for LinkRepository {
    async fn save_links(&self, source_id: Uuid, links: &[CandidateLink]) -> Result<u64, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut inserted = 0;
        for link in links {
            let result = sqlx::query(
                r#"
                INSERT INTO content_links
                    (url, source_id, title, author, description, published_at, featured_image, keywords)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (url) DO NOTHING
                "#,
            )
            .bind(&link.url)
            .bind(source_id)
            .bind(&link.title)
            .bind(&link.author)
            .bind(&link.description)
            .bind(link.published_at)
            .bind(&link.featured_image)
            .bind(&link.keywords)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(%source_id, offered = links.len(), inserted, "Links saved");
        Ok(inserted)
    }

    async fn save_classified(&self, records: &[ClassifiedUrl]) -> Result<u64, AppError> {
        let mut written = 0;
        for chunk in records.chunks(CLASSIFIED_CHUNK) {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO classified_urls (url, category, confidence, created_at) ");
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(record.url.clone())
                    .push_bind(record.category.as_str())
                    .push_bind(record.confidence)
                    .push_bind(record.created_at);
            });

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            tx.commit()
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;
            written += result.rows_affected();
        }
        Ok(written)
    }
}
