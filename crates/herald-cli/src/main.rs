use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use herald_client::{FeedClient, ReqwestFetcher, RobotsClient};
use herald_core::circuit_breaker::TracingCircuitListener;
use herald_core::classifier::{FileModelStore, TrainingConfig};
use herald_core::job::{JobRun, QueueStatus, WorkerConfig};
use herald_core::models::{CandidateLink, ContentSource};
use herald_core::traits::{LinkStore, NullLinkStore, RunStore, SourceStore};
use herald_core::worker::TracingWorkerReporter;
use herald_core::{
    AcquisitionConfig, CircuitBreaker, CircuitBreakerConfig, ContentStash, ExtractorConfig,
    JobQueue, JobRegistry, LinkExtractionJob, LinkExtractor, Scheduler, UrlClassifier,
    WorkerService,
};
use herald_db::{Database, DatabaseConfig};

#[cfg(feature = "browser")]
type Renderer = herald_client::BrowserRenderer;
#[cfg(not(feature = "browser"))]
type Renderer = herald_client::StaticPageRenderer<ReqwestFetcher>;

#[derive(Parser)]
#[command(name = "herald", version, about = "News link acquisition and job orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every command that touches the network or the classifier.
#[derive(clap::Args, Clone)]
struct Pipeline {
    /// User-Agent for page, feed, and robots.txt requests
    #[arg(long, env = "HERALD_USER_AGENT")]
    user_agent: Option<String>,

    /// Per-request timeout for feeds and robots.txt, in seconds
    #[arg(long, env = "HERALD_FETCH_TIMEOUT_SECS", default_value_t = 10)]
    fetch_timeout_secs: u64,

    /// Concurrent feed reads and robots checks per source
    #[arg(long, env = "HERALD_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,

    /// Directory holding the trained classifier model
    #[arg(long, env = "HERALD_MODEL_DIR", default_value = "models")]
    model_dir: PathBuf,

    /// Labeled CSV (url,label) used to train the classifier
    #[arg(long, env = "HERALD_DATASET")]
    dataset: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and a queue worker until interrupted
    Run {
        #[command(flatten)]
        pipeline: Pipeline,

        /// Cron for the link extraction job (six fields, seconds first)
        #[arg(long, env = "HERALD_EXTRACT_CRON", default_value = "0 */30 * * * *")]
        cron: String,

        /// Only run the worker; leave scheduling to another process
        #[arg(long, default_value_t = false)]
        no_schedule: bool,

        /// Due sources picked up per extraction run
        #[arg(long, default_value_t = 50)]
        sources_per_run: usize,

        /// Seconds between queue polls when idle
        #[arg(long, default_value_t = 5)]
        poll_secs: u64,

        /// Seconds between dataset change checks (0 disables)
        #[arg(long, default_value_t = 300)]
        retrain_check_secs: u64,
    },

    /// Extract article links from one site and print them as JSON
    Extract {
        /// Site URL
        #[arg(short, long)]
        url: String,

        /// Feed URLs to try before scraping the page
        #[arg(short, long = "feed")]
        feeds: Vec<String>,

        /// Store the source and its links (requires DATABASE_URL)
        #[arg(long, default_value_t = false)]
        save: bool,

        #[command(flatten)]
        pipeline: Pipeline,
    },

    /// Classify a URL as news, jobs, or unknown
    Classify {
        url: String,

        #[command(flatten)]
        pipeline: Pipeline,
    },

    /// Train the classifier from the dataset and store the model
    Train {
        #[command(flatten)]
        pipeline: Pipeline,
    },

    /// Enqueue a run of a registered job
    Enqueue {
        job: String,

        /// JSON payload handed to the job
        #[arg(long, default_value = "null")]
        payload: String,
    },

    /// Inspect or reset circuit breakers
    Breaker {
        #[command(subcommand)]
        action: BreakerAction,
    },

    /// Inspect the job queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Show the links stored for a source and how often each was classified
    Links {
        /// Site URL the source was saved under
        url: String,

        /// Number of links to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show recent runs of a job
    Runs {
        job: String,

        /// Number of runs to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum BreakerAction {
    /// Show every persisted breaker
    Status,
    /// Close a breaker and clear its failure count
    Reset { job: String },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Job counts by status
    Stats,
    /// Most recent queued jobs
    List {
        /// Filter by status (pending, running, completed, failed, expired)
        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("herald=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            pipeline,
            cron,
            no_schedule,
            sources_per_run,
            poll_secs,
            retrain_check_secs,
        } => {
            let config = AcquisitionConfig {
                schedule: (!no_schedule).then_some(cron),
                sources_per_run,
                ..AcquisitionConfig::default()
            };
            cmd_run(
                &pipeline,
                config,
                Duration::from_secs(poll_secs),
                Duration::from_secs(retrain_check_secs),
            )
            .await?;
        }
        Commands::Extract {
            url,
            feeds,
            save,
            pipeline,
        } => cmd_extract(&url, feeds, save, &pipeline).await?,
        Commands::Classify { url, pipeline } => cmd_classify(&url, &pipeline)?,
        Commands::Train { pipeline } => cmd_train(&pipeline)?,
        Commands::Enqueue { job, payload } => cmd_enqueue(&job, &payload).await?,
        Commands::Breaker { action } => cmd_breaker(action).await?,
        Commands::Queue { action } => cmd_queue(action).await?,
        Commands::Links { url, limit } => cmd_links(&url, limit).await?,
        Commands::Runs { job, limit } => cmd_runs(&job, limit).await?,
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply pending migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to connect to database")?;
    db.migrate()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to run migrations")?;
    Ok(db)
}

impl Pipeline {
    fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| ExtractorConfig::default().user_agent)
    }

    fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig::default()
            .with_concurrency(self.concurrency)
            .with_user_agent(self.user_agent())
            .with_timeouts(self.fetch_timeout())
    }

    fn fetcher(&self) -> Result<ReqwestFetcher> {
        ReqwestFetcher::with_options(&self.user_agent(), self.fetch_timeout())
            .map_err(|e| anyhow::anyhow!(e))
    }

    fn classifier(&self) -> UrlClassifier {
        UrlClassifier::initialize(
            Box::new(FileModelStore::new(&self.model_dir)),
            self.dataset.clone(),
            TrainingConfig::default(),
        )
    }

    fn extractor<L: LinkStore>(
        &self,
        renderer: Renderer,
        store: L,
        classifier: Arc<UrlClassifier>,
    ) -> Result<LinkExtractor<FeedClient<ReqwestFetcher>, Renderer, RobotsClient<ReqwestFetcher>, L>>
    {
        let fetcher = self.fetcher()?;
        Ok(LinkExtractor::new(
            FeedClient::new(fetcher.clone()),
            renderer,
            RobotsClient::new(fetcher),
            store,
            classifier,
            Arc::new(ContentStash::new()),
            self.extractor_config(),
        ))
    }
}

#[cfg(feature = "browser")]
async fn renderer(pipeline: &Pipeline) -> Result<Renderer> {
    herald_client::BrowserRenderer::with_timeout(pipeline.extractor_config().page_timeout)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to launch headless browser")
}

#[cfg(not(feature = "browser"))]
async fn renderer(pipeline: &Pipeline) -> Result<Renderer> {
    Ok(herald_client::StaticPageRenderer::new(pipeline.fetcher()?))
}

async fn cmd_run(
    pipeline: &Pipeline,
    config: AcquisitionConfig,
    poll_interval: Duration,
    retrain_interval: Duration,
) -> Result<()> {
    let db = connect_db().await?;

    let breaker = CircuitBreaker::new(db.circuit_repo(), CircuitBreakerConfig::default());
    breaker.add_listener(Arc::new(TracingCircuitListener));

    let classifier = Arc::new(pipeline.classifier());
    let links = db.link_repo();
    let extractor = pipeline.extractor(
        renderer(pipeline).await?,
        links.clone(),
        Arc::clone(&classifier),
    )?;
    let job = LinkExtractionJob::new(Arc::new(extractor), db.source_repo(), links, config);

    let mut registry = JobRegistry::new(breaker, db.run_repo());
    let definition = registry
        .register(job)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to register link extraction job")?;

    let queue = db.queue_repo();
    let scheduler = Scheduler::new(queue.clone())
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    for definition in registry.definitions() {
        scheduler
            .schedule_definition(&definition)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    scheduler.start().await.map_err(|e| anyhow::anyhow!(e))?;

    let worker = WorkerService::from_registry(
        queue,
        &registry,
        WorkerConfig::default().with_poll_interval(poll_interval),
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
        }
        shutdown.cancel();
    });

    if pipeline.dataset.is_some() && !retrain_interval.is_zero() {
        tokio::spawn(watch_dataset(
            Arc::clone(&classifier),
            retrain_interval,
            cancel.clone(),
        ));
    }

    tracing::info!(
        job = %definition.name,
        version = definition.version,
        schedules = scheduler.entries().len(),
        "Herald running"
    );

    let result = worker.run(cancel, &TracingWorkerReporter).await;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "Scheduler did not shut down cleanly");
    }
    result.map_err(|e| anyhow::anyhow!(e))
}

/// Retrain the classifier whenever the dataset file changes.
async fn watch_dataset(
    classifier: Arc<UrlClassifier>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = cancel.cancelled() => break,
        }
        let classifier = Arc::clone(&classifier);
        match tokio::task::spawn_blocking(move || classifier.retrain_if_changed()).await {
            Ok(Ok(Some(report))) => {
                tracing::info!(accuracy = report.accuracy, "Classifier retrained on new dataset")
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Dataset retrain failed"),
            Err(e) => tracing::error!(error = %e, "Retrain task panicked"),
        }
    }
}

async fn cmd_extract(url: &str, feeds: Vec<String>, save: bool, pipeline: &Pipeline) -> Result<()> {
    let classifier = Arc::new(pipeline.classifier());
    let renderer = renderer(pipeline).await?;

    let links = if save {
        let db = connect_db().await?;
        let sources = db.source_repo();
        let source = sources
            .upsert(&ContentSource::new(url).with_feeds(feeds))
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let store = db.link_repo();
        let extractor = pipeline.extractor(renderer, store.clone(), classifier)?;

        let links = extract_links(&extractor, &source).await?;
        let inserted = store
            .save_links(source.id, &links)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        sources
            .mark_refreshed(source.id, Utc::now())
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        eprintln!("Saved {inserted} new link(s) for source {}", source.id);
        links
    } else {
        let source = ContentSource::new(url).with_feeds(feeds);
        let extractor = pipeline.extractor(renderer, NullLinkStore, classifier)?;
        extract_links(&extractor, &source).await?
    };

    println!("{}", serde_json::to_string_pretty(&links)?);
    Ok(())
}

async fn extract_links<L: LinkStore>(
    extractor: &LinkExtractor<FeedClient<ReqwestFetcher>, Renderer, RobotsClient<ReqwestFetcher>, L>,
    source: &ContentSource,
) -> Result<Vec<CandidateLink>> {
    eprintln!("Extracting links from {}...", source.url);
    let links = extractor
        .extract_blog_links(source)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("Extraction failed for {}", source.url))?;
    eprintln!("Found {} link(s)", links.len());
    Ok(links)
}

fn cmd_classify(url: &str, pipeline: &Pipeline) -> Result<()> {
    let classifier = pipeline.classifier();
    let prediction = classifier.predict(url);
    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(())
}

fn cmd_train(pipeline: &Pipeline) -> Result<()> {
    let dataset = pipeline
        .dataset
        .as_deref()
        .context("No dataset given. Pass --dataset or set HERALD_DATASET.")?;
    ensure_exists(dataset)?;

    let classifier = pipeline.classifier();
    let report = classifier.retrain().map_err(|e| anyhow::anyhow!(e))?;
    eprintln!(
        "Model stored in {}",
        FileModelStore::new(&pipeline.model_dir).path().display()
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Dataset not found: {}", path.display());
    }
    Ok(())
}

async fn cmd_enqueue(job: &str, payload: &str) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("Payload is not valid JSON")?;
    let db = connect_db().await?;

    let options = db
        .run_repo()
        .latest_definition(job)
        .await
        .map_err(|e| anyhow::anyhow!(e))?
        .with_context(|| format!("No job named '{job}' has been registered"))?
        .enqueue_options();

    let queued = db
        .queue_repo()
        .enqueue(job, payload, options)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    println!("{}", serde_json::to_string_pretty(&queued)?);
    Ok(())
}

async fn cmd_breaker(action: BreakerAction) -> Result<()> {
    let db = connect_db().await?;
    let repo = db.circuit_repo();

    match action {
        BreakerAction::Status => {
            let breakers = repo.list().await.map_err(|e| anyhow::anyhow!(e))?;
            if breakers.is_empty() {
                eprintln!("No circuit breakers recorded.");
                return Ok(());
            }
            println!("{}", serde_json::to_string_pretty(&breakers)?);
        }
        BreakerAction::Reset { job } => {
            let breaker = CircuitBreaker::new(repo, CircuitBreakerConfig::default());
            breaker.add_listener(Arc::new(TracingCircuitListener));
            breaker.reset(&job).await;
            let state = breaker.get_state(&job).await;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
    }
    Ok(())
}

async fn cmd_queue(action: QueueAction) -> Result<()> {
    let db = connect_db().await?;
    let queue = db.queue_repo();

    match action {
        QueueAction::Stats => {
            let stats = queue.stats().await.map_err(|e| anyhow::anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        QueueAction::List { status, limit } => {
            let status = status
                .map(|s| s.parse::<QueueStatus>())
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            let jobs = queue
                .list(status, limit)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
    }
    Ok(())
}

async fn cmd_links(url: &str, limit: usize) -> Result<()> {
    let db = connect_db().await?;
    let source = db
        .source_repo()
        .find_by_url(url)
        .await
        .map_err(|e| anyhow::anyhow!(e))?
        .with_context(|| format!("No source saved for {url}"))?;

    let repo = db.link_repo();
    let links = repo
        .links_for_source(source.id, limit)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    let mut rows = Vec::with_capacity(links.len());
    for link in links {
        let classified = repo
            .count_classified(&link.url)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        rows.push(serde_json::json!({ "link": link, "classified": classified }));
    }

    eprintln!(
        "{} link(s) for {} (last refreshed {})",
        rows.len(),
        source.url,
        source
            .refreshed_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".into()),
    );
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

async fn cmd_runs(job: &str, limit: usize) -> Result<()> {
    let db = connect_db().await?;
    let runs = db.run_repo();

    let summary = runs.summary(job).await.map_err(|e| anyhow::anyhow!(e))?;
    let recent: Vec<JobRun> = runs
        .recent_runs(job, limit)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if recent.is_empty() {
        println!("No runs found for {job}");
        return Ok(());
    }

    println!(
        "{job}: {} active, {} completed, {} failed, avg {}",
        summary.active,
        summary.completed,
        summary.failed,
        summary
            .avg_duration_ms
            .map(|ms| format!("{ms:.0}ms"))
            .unwrap_or_else(|| "-".into()),
    );
    println!("{}", "-".repeat(80));
    for run in &recent {
        println!(
            "{}  {}  {:<9}  {:>8}  {}",
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.status.as_str(),
            run.duration_ms
                .map(|ms| format!("{ms}ms"))
                .unwrap_or_else(|| "-".into()),
            run.error_message.as_deref().unwrap_or(""),
        );
    }
    Ok(())
}
