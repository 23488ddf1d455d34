//! The content-acquisition job: extract links for every due source and store them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::batch::{BatchRunner, RetryPolicy, with_retry};
use crate::error::AppError;
use crate::extract::LinkExtractor;
use crate::job::{JobDefinition, Priority, RunContext};
use crate::models::{ContentSource, SourceHarvest};
use crate::runner::Job;
use crate::traits::{FeedReader, LinkStore, PageRenderer, RobotsPolicy, SourceStore};

pub const EXTRACT_LINKS_JOB: &str = "extract-links";

#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionConfig {
    /// Cron for the job; `None` leaves it to manual enqueues.
    pub schedule: Option<String>,
    pub sources_per_run: usize,
    pub batch_size: usize,
    /// Consecutive failed passes before a source is flagged `has_failed`.
    pub max_failures: i32,
    pub timeout: Duration,
    pub persist_retry: RetryPolicy,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            schedule: Some("0 */30 * * * *".to_string()),
            sources_per_run: 50,
            batch_size: 10,
            max_failures: 5,
            timeout: Duration::from_secs(20 * 60),
            persist_retry: RetryPolicy::default(),
        }
    }
}

/// Totals for one acquisition run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AcquisitionReport {
    pub sources: usize,
    pub links_found: usize,
    pub links_saved: u64,
}

impl From<Vec<SourceHarvest>> for AcquisitionReport {
    fn from(harvests: Vec<SourceHarvest>) -> Self {
        Self {
            sources: harvests.len(),
            links_found: harvests.iter().map(|h| h.links.len()).sum(),
            links_saved: 0,
        }
    }
}

pub struct LinkExtractionJob<F, P, R, L, S>
where
    F: FeedReader,
    P: PageRenderer,
    R: RobotsPolicy,
    L: LinkStore,
    S: SourceStore,
{
    extractor: Arc<LinkExtractor<F, P, R, L>>,
    sources: S,
    links: L,
    config: AcquisitionConfig,
}

impl<F, P, R, L, S> LinkExtractionJob<F, P, R, L, S>
where
    F: FeedReader,
    P: PageRenderer,
    R: RobotsPolicy,
    L: LinkStore,
    S: SourceStore,
{
    pub fn new(
        extractor: Arc<LinkExtractor<F, P, R, L>>,
        sources: S,
        links: L,
        config: AcquisitionConfig,
    ) -> Self {
        Self {
            extractor,
            sources,
            links,
            config,
        }
    }

    async fn extract_chunk(&self, chunk: Vec<ContentSource>) -> Result<Vec<SourceHarvest>, AppError> {
        let mut harvests = Vec::with_capacity(chunk.len());
        for source in chunk {
            match self.extractor.extract_blog_links(&source).await {
                Ok(links) => {
                    harvests.push(SourceHarvest {
                        source_id: source.id,
                        links,
                    });
                }
                Err(e) => {
                    tracing::warn!(source_id = %source.id, url = %source.url, error = %e, "Extraction failed for source");
                    match self
                        .sources
                        .record_failure(source.id, self.config.max_failures)
                        .await
                    {
                        Ok(updated) if updated.has_failed => tracing::warn!(
                            source_id = %source.id,
                            failures = updated.failure_count,
                            "Source deactivated after repeated failures"
                        ),
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(source_id = %source.id, error = %e, "Failed to record source failure");
                        }
                    }
                }
            }
        }
        Ok(harvests)
    }
}

impl<F, P, R, L, S> Job for LinkExtractionJob<F, P, R, L, S>
where
    F: FeedReader + 'static,
    P: PageRenderer + 'static,
    R: RobotsPolicy + 'static,
    L: LinkStore,
    S: SourceStore,
{
    type Input = ContentSource;
    type Processed = SourceHarvest;
    type Output = AcquisitionReport;

    fn definition(&self) -> JobDefinition {
        let definition = JobDefinition::new(EXTRACT_LINKS_JOB, "content")
            .with_priority(Priority::High)
            .with_timeout(self.config.timeout);
        match &self.config.schedule {
            Some(cron) => definition.with_schedule(cron.clone()),
            None => definition,
        }
    }

    async fn before_process(&self, ctx: &RunContext) -> Result<Vec<ContentSource>, AppError> {
        let sources = self.sources.due_sources(self.config.sources_per_run).await?;
        // A retried run must see the links a failed run already stashed.
        for source in &sources {
            self.extractor.forget_source(source);
        }
        tracing::info!(job = %ctx.job_name, sources = sources.len(), "Sources due for extraction");
        Ok(sources)
    }

    async fn process(
        &self,
        inputs: Vec<ContentSource>,
        _ctx: &RunContext,
    ) -> Result<Vec<SourceHarvest>, AppError> {
        let outcome = BatchRunner::new(EXTRACT_LINKS_JOB)
            .process(inputs, self.config.batch_size, |chunk| self.extract_chunk(chunk))
            .await;
        if outcome.all_failed() {
            return Err(AppError::JobFailed {
                job: EXTRACT_LINKS_JOB.to_string(),
                message: format!("all {} batches failed", outcome.batches_total),
            });
        }
        Ok(outcome.results)
    }

    async fn after_process(&self, results: Vec<SourceHarvest>) -> Result<AcquisitionReport, AppError> {
        let mut saved = 0;
        for harvest in &results {
            if !harvest.links.is_empty() {
                saved += with_retry("save-links", &self.config.persist_retry, |_attempt| {
                    self.links.save_links(harvest.source_id, &harvest.links)
                })
                .await?;
            }
            // Only a persisted harvest takes the source off the due list.
            if let Err(e) = self.sources.mark_refreshed(harvest.source_id, Utc::now()).await {
                tracing::error!(source_id = %harvest.source_id, error = %e, "Failed to mark source refreshed");
            }
        }
        let mut report = AcquisitionReport::from(results);
        report.links_saved = saved;
        Ok(report)
    }

    async fn on_success(&self, output: &AcquisitionReport) {
        tracing::info!(
            sources = output.sources,
            links_found = output.links_found,
            links_saved = output.links_saved,
            "Link acquisition finished"
        );
    }
}
