use herald_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::circuit_repository::CircuitRepository;
use crate::config::DatabaseConfig;
use crate::link_repository::LinkRepository;
use crate::queue_repository::QueueRepository;
use crate::run_repository::JobRunRepository;
use crate::source_repository::SourceRepository;

/// Central database facade: owns the connection pool, runs migrations,
/// and vends repository instances.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    pub fn circuit_repo(&self) -> CircuitRepository {
        CircuitRepository::new(self.pool.clone())
    }

    pub fn run_repo(&self) -> JobRunRepository {
        JobRunRepository::new(self.pool.clone())
    }

    pub fn queue_repo(&self) -> QueueRepository {
        QueueRepository::new(self.pool.clone())
    }

    pub fn source_repo(&self) -> SourceRepository {
        SourceRepository::new(self.pool.clone())
    }

    pub fn link_repo(&self) -> LinkRepository {
        LinkRepository::new(self.pool.clone())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
