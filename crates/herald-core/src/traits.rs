use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::circuit_breaker::CircuitStatus;
use crate::error::AppError;
use crate::job::{JobDefinition, JobRun, RunSummary};
use crate::models::{CandidateLink, ClassifiedUrl, ContentSource};

/// Fetches raw response bodies from a URL.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Persists circuit-breaker state so it survives restarts.
pub trait CircuitStore: Send + Sync + Clone + 'static {
    fn load(
        &self,
        job_name: &str,
    ) -> impl Future<Output = Result<Option<CircuitStatus>, AppError>> + Send;

    fn save(&self, status: &CircuitStatus) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Records job definitions and run metrics.
pub trait RunStore: Send + Sync + Clone + 'static {
    /// Store `definition` as a new version if it differs from the latest one.
    /// Returns the version number now current for this job.
    fn save_definition(
        &self,
        definition: &JobDefinition,
    ) -> impl Future<Output = Result<u32, AppError>> + Send;

    fn start_run(&self, run: &JobRun) -> impl Future<Output = Result<(), AppError>> + Send;

    fn complete_run(
        &self,
        run_id: Uuid,
        duration_ms: i64,
        items_processed: i64,
        metadata: serde_json::Value,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn fail_run(
        &self,
        run_id: Uuid,
        duration_ms: i64,
        error_message: &str,
        error_trace: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn recent_runs(
        &self,
        job_name: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<JobRun>, AppError>> + Send;

    fn summary(&self, job_name: &str) -> impl Future<Output = Result<RunSummary, AppError>> + Send;
}

/// Reads content sources and tracks their health.
pub trait SourceStore: Send + Sync + Clone + 'static {
    /// Active sources whose scrape frequency has elapsed, least recently refreshed first.
    fn due_sources(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ContentSource>, AppError>> + Send;

    /// Stamp `refreshed_at` and clear the failure counter.
    fn mark_refreshed(
        &self,
        source_id: Uuid,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Increment the failure counter, flagging the source once it reaches
    /// `max_failures`. Returns the updated source.
    fn record_failure(
        &self,
        source_id: Uuid,
        max_failures: i32,
    ) -> impl Future<Output = Result<ContentSource, AppError>> + Send;
}

/// Persists extraction output.
pub trait LinkStore: Send + Sync + Clone + 'static {
    /// Insert links for a source, ignoring URLs already stored.
    /// Returns the number of newly inserted rows.
    fn save_links(
        &self,
        source_id: Uuid,
        links: &[CandidateLink],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Append classifier decisions in one transaction.
    fn save_classified(
        &self,
        records: &[ClassifiedUrl],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// One entry returned by a feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub link: String,
    pub title: Option<String>,
    pub creator: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub image: Option<String>,
    pub categories: Vec<String>,
}

/// Fetches and parses an RSS or Atom feed.
pub trait FeedReader: Send + Sync + Clone {
    fn read_feed(&self, url: &str) -> impl Future<Output = Result<Vec<FeedEntry>, AppError>> + Send;
}

/// An anchor found on a rendered page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageAnchor {
    pub href: String,
    pub text: String,
}

/// Anchors harvested from one rendered page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarvestedPage {
    /// Final URL after redirects, used to resolve relative hrefs.
    pub url: String,
    /// Selector that matched the main-content region, `None` if the whole
    /// document was used.
    pub matched_selector: Option<String>,
    pub anchors: Vec<PageAnchor>,
}

/// Renders a page and harvests its anchors.
///
/// Implementations try `selectors` in order and harvest anchors inside the
/// first region that matches; when none matches, the whole document is used.
pub trait PageRenderer: Send + Sync + Clone {
    fn harvest_links(
        &self,
        url: &str,
        selectors: &[String],
    ) -> impl Future<Output = Result<HarvestedPage, AppError>> + Send;
}

/// Answers robots.txt policy questions.
pub trait RobotsPolicy: Send + Sync + Clone {
    /// Fetches (or reuses) `{origin}/robots.txt` and checks `url` for `agent`.
    /// An error means the policy could not be determined.
    fn is_allowed(
        &self,
        url: &str,
        agent: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Sink that discards classifier records and links.
#[derive(Debug, Clone, Default)]
pub struct NullLinkStore;

impl LinkStore for NullLinkStore {
    async fn save_links(&self, _source_id: Uuid, links: &[CandidateLink]) -> Result<u64, AppError> {
        Ok(links.len() as u64)
    }

    async fn save_classified(&self, records: &[ClassifiedUrl]) -> Result<u64, AppError> {
        Ok(records.len() as u64)
    }
}
