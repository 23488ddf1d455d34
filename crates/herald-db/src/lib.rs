pub mod circuit_repository;
pub mod config;
pub mod database;
pub mod link_repository;
pub mod queue_repository;
pub mod run_repository;
pub mod source_repository;

pub use circuit_repository::CircuitRepository;
pub use config::DatabaseConfig;
pub use database::Database;
pub use link_repository::LinkRepository;
pub use queue_repository::QueueRepository;
pub use run_repository::JobRunRepository;
pub use source_repository::SourceRepository;
