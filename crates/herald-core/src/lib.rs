pub mod acquisition;
pub mod batch;
pub mod circuit_breaker;
pub mod classifier;
pub mod error;
pub mod extract;
pub mod filter;
pub mod job;
pub mod job_queue;
pub mod models;
pub mod runner;
pub mod scheduler;
pub mod stash;
pub mod traits;
pub mod urls;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use acquisition::{AcquisitionConfig, AcquisitionReport, EXTRACT_LINKS_JOB, LinkExtractionJob};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStatus};
pub use classifier::{Prediction, UrlClassifier};
pub use error::AppError;
pub use extract::{ExtractorConfig, LinkExtractor};
pub use filter::{ArticleDecision, ArticleFilter, ArticleFilterConfig};
pub use job::{
    EnqueueOptions, JobDefinition, JobRun, Priority, QueueStatus, QueuedJob, RunContext,
    RunStatus, WorkerConfig,
};
pub use job_queue::{JobQueue, QueueStats, StatusCounts};
pub use models::{CandidateLink, ClassifiedUrl, ContentSource, UrlCategory, compute_hash};
pub use runner::{Job, JobHandler, JobRegistry, JobRunner, RunOutcome};
pub use scheduler::Scheduler;
pub use stash::ContentStash;
pub use traits::{
    CircuitStore, FeedEntry, FeedReader, Fetcher, LinkStore, PageRenderer, RobotsPolicy, RunStore,
    SourceStore,
};
pub use worker::WorkerService;
