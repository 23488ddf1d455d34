//! Job lifecycle: before → process → after, wrapped in metrics, a whole-run
//! timeout, and (optionally) the job's circuit breaker.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreaker;
use crate::error::AppError;
use crate::job::{JobDefinition, JobRun, RunContext};
use crate::traits::{CircuitStore, RunStore};

/// A typed job. The registry erases these types behind [`JobHandler`].
///
/// `before_process` produces the work units, `process` turns them into
/// results (usually through a [`crate::batch::BatchRunner`]), and
/// `after_process` persists them.
pub trait Job: Send + Sync + 'static {
    type Input: Send + 'static;
    type Processed: Send + 'static;
    type Output: From<Vec<Self::Processed>> + Send + 'static;

    fn definition(&self) -> JobDefinition;

    fn before_process(
        &self,
        ctx: &RunContext,
    ) -> impl Future<Output = Result<Vec<Self::Input>, AppError>> + Send;

    fn process(
        &self,
        inputs: Vec<Self::Input>,
        ctx: &RunContext,
    ) -> impl Future<Output = Result<Vec<Self::Processed>, AppError>> + Send;

    /// Defaults to passing results through unchanged.
    fn after_process(
        &self,
        results: Vec<Self::Processed>,
    ) -> impl Future<Output = Result<Self::Output, AppError>> + Send {
        async move { Ok(Self::Output::from(results)) }
    }

    fn on_success(&self, output: &Self::Output) -> impl Future<Output = ()> + Send {
        let _ = output;
        async {}
    }

    fn on_error(&self, error: &AppError) -> impl Future<Output = ()> + Send {
        let _ = error;
        async {}
    }
}

/// Metrics of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub job_name: String,
    pub items_processed: i64,
    pub duration_ms: i64,
}

/// Lifecycle events for monitoring/logging.
#[derive(Debug, Clone)]
pub enum RunEvent<'a> {
    Started {
        job_name: &'a str,
        run_id: Uuid,
        attempt: u32,
    },
    Completed {
        outcome: &'a RunOutcome,
    },
    Failed {
        job_name: &'a str,
        run_id: Uuid,
        duration_ms: i64,
        error: &'a AppError,
    },
}

/// Trait for receiving run events (decoupled logging).
pub trait RunReporter: Send + Sync {
    fn report(&self, event: RunEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRunReporter;

impl RunReporter for TracingRunReporter {
    fn report(&self, event: RunEvent<'_>) {
        match event {
            RunEvent::Started {
                job_name,
                run_id,
                attempt,
            } => {
                tracing::info!(job = %job_name, %run_id, attempt, "Job run started");
            }
            RunEvent::Completed { outcome } => {
                tracing::info!(
                    job = %outcome.job_name,
                    run_id = %outcome.run_id,
                    items = outcome.items_processed,
                    duration_ms = outcome.duration_ms,
                    "Job run completed"
                );
            }
            RunEvent::Failed {
                job_name,
                run_id,
                duration_ms,
                error,
            } => {
                tracing::error!(job = %job_name, %run_id, duration_ms, %error, "Job run failed");
            }
        }
    }
}

/// Type-erased entry point the worker dispatches to.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn definition(&self) -> &JobDefinition;

    async fn run(&self, ctx: RunContext) -> Result<RunOutcome, AppError>;
}

/// Runs one [`Job`] through the full lifecycle.
pub struct JobRunner<J, CS, RS>
where
    J: Job,
    CS: CircuitStore,
    RS: RunStore,
{
    job: Arc<J>,
    definition: JobDefinition,
    breaker: CircuitBreaker<CS>,
    runs: RS,
    reporter: Arc<dyn RunReporter>,
}

impl<J, CS, RS> JobRunner<J, CS, RS>
where
    J: Job,
    CS: CircuitStore,
    RS: RunStore,
{
    pub fn new(
        job: J,
        definition: JobDefinition,
        breaker: CircuitBreaker<CS>,
        runs: RS,
        reporter: Arc<dyn RunReporter>,
    ) -> Self {
        Self {
            job: Arc::new(job),
            definition,
            breaker,
            runs,
            reporter,
        }
    }

    async fn stages(&self, ctx: &RunContext) -> Result<(J::Output, i64), AppError> {
        let inputs = self.job.before_process(ctx).await?;
        tracing::debug!(job = %ctx.job_name, inputs = inputs.len(), "Inputs ready");
        let processed = self.job.process(inputs, ctx).await?;
        let items = processed.len() as i64;
        let output = self.job.after_process(processed).await?;
        Ok((output, items))
    }

    async fn guarded(&self, ctx: &RunContext) -> Result<(J::Output, i64), AppError> {
        let name = self.definition.name.as_str();
        let timeout = self.definition.timeout;
        if self.definition.circuit_breaker.enabled {
            self.breaker
                .execute(name, || self.stages(ctx), timeout)
                .await
                .map_err(|e| e.into_app_error())
        } else {
            match tokio::time::timeout(timeout, self.stages(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(timeout.as_secs())),
            }
        }
    }
}

#[async_trait]
impl<J, CS, RS> JobHandler for JobRunner<J, CS, RS>
where
    J: Job,
    CS: CircuitStore,
    RS: RunStore,
{
    fn definition(&self) -> &JobDefinition {
        &self.definition
    }

    async fn run(&self, ctx: RunContext) -> Result<RunOutcome, AppError> {
        let started = Instant::now();
        let mut run = JobRun::start(
            ctx.job_name.clone(),
            serde_json::json!({
                "attempt": ctx.attempt,
                "payload": ctx.payload,
                "version": self.definition.version,
            }),
        );
        run.id = ctx.run_id;

        if let Err(e) = self.runs.start_run(&run).await {
            tracing::error!(job = %ctx.job_name, run_id = %run.id, error = %e, "Failed to record run start");
        }
        self.reporter.report(RunEvent::Started {
            job_name: &ctx.job_name,
            run_id: run.id,
            attempt: ctx.attempt,
        });

        let result = self.guarded(&ctx).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match result {
            Ok((output, items_processed)) => {
                let outcome = RunOutcome {
                    run_id: run.id,
                    job_name: ctx.job_name.clone(),
                    items_processed,
                    duration_ms,
                };
                self.job.on_success(&output).await;
                if let Err(e) = self
                    .runs
                    .complete_run(run.id, duration_ms, items_processed, run.metadata.clone())
                    .await
                {
                    tracing::error!(job = %ctx.job_name, run_id = %run.id, error = %e, "Failed to record run completion");
                }
                self.reporter.report(RunEvent::Completed { outcome: &outcome });
                Ok(outcome)
            }
            Err(error) => {
                let trace = format!("{error:?}");
                if let Err(e) = self
                    .runs
                    .fail_run(run.id, duration_ms, &error.to_string(), &trace)
                    .await
                {
                    tracing::error!(job = %ctx.job_name, run_id = %run.id, error = %e, "Failed to record run failure");
                }
                self.reporter.report(RunEvent::Failed {
                    job_name: &ctx.job_name,
                    run_id: run.id,
                    duration_ms,
                    error: &error,
                });
                self.job.on_error(&error).await;
                Err(error)
            }
        }
    }
}

/// Name-keyed map of job handlers, built at startup.
pub struct JobRegistry<CS: CircuitStore, RS: RunStore> {
    breaker: CircuitBreaker<CS>,
    runs: RS,
    reporter: Arc<dyn RunReporter>,
    handlers: BTreeMap<String, Arc<dyn JobHandler>>,
}

impl<CS: CircuitStore, RS: RunStore> JobRegistry<CS, RS> {
    pub fn new(breaker: CircuitBreaker<CS>, runs: RS) -> Self {
        Self {
            breaker,
            runs,
            reporter: Arc::new(TracingRunReporter),
            handlers: BTreeMap::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn RunReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Store the job's definition (appending a version if it changed),
    /// configure its breaker, and install its handler.
    ///
    /// Returns the definition with the current stored version.
    pub async fn register<J: Job>(&mut self, job: J) -> Result<JobDefinition, AppError> {
        let mut definition = job.definition();
        if self.handlers.contains_key(&definition.name) {
            return Err(AppError::ConfigError(format!(
                "Job '{}' is already registered",
                definition.name
            )));
        }

        definition.version = self.runs.save_definition(&definition).await?;
        if definition.circuit_breaker.enabled {
            self.breaker
                .configure(&definition.name, definition.circuit_breaker.config());
        }

        tracing::info!(
            job = %definition.name,
            version = definition.version,
            schedule = definition.schedule.as_deref().unwrap_or("<none>"),
            "Registered job"
        );

        let runner = JobRunner::new(
            job,
            definition.clone(),
            self.breaker.clone(),
            self.runs.clone(),
            Arc::clone(&self.reporter),
        );
        self.handlers
            .insert(definition.name.clone(), Arc::new(runner));
        Ok(definition)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn definitions(&self) -> Vec<JobDefinition> {
        self.handlers
            .values()
            .map(|h| h.definition().clone())
            .collect()
    }

    pub fn breaker(&self) -> &CircuitBreaker<CS> {
        &self.breaker
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
