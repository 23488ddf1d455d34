use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{QueuedJob, RunContext, WorkerConfig};
use crate::job_queue::JobQueue;
use crate::runner::{JobHandler, JobRegistry};
use crate::traits::{CircuitStore, RunStore};

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
        jobs: &'a [String],
    },
    Polling,
    Expired {
        count: u64,
    },
    JobClaimed {
        job: &'a QueuedJob,
    },
    JobCompleted {
        job_id: Uuid,
        job_name: &'a str,
        items_processed: i64,
    },
    JobFailed {
        job_id: Uuid,
        job_name: &'a str,
        error: &'a str,
        will_retry: bool,
    },
    ShuttingDown {
        worker_id: &'a str,
        jobs_released: u64,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id, jobs } => {
                tracing::info!(%worker_id, jobs = ?jobs, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for jobs");
            }
            WorkerEvent::Expired { count } => {
                tracing::warn!(count, "Expired overdue jobs");
            }
            WorkerEvent::JobClaimed { job } => {
                tracing::info!(
                    job_id = %job.id,
                    job = %job.job_name,
                    priority = %job.priority,
                    attempt = job.retry_count + 1,
                    "Job claimed"
                );
            }
            WorkerEvent::JobCompleted {
                job_id,
                job_name,
                items_processed,
            } => {
                tracing::info!(%job_id, job = %job_name, items_processed, "Job completed");
            }
            WorkerEvent::JobFailed {
                job_id,
                job_name,
                error,
                will_retry,
            } => {
                tracing::warn!(%job_id, job = %job_name, %error, %will_retry, "Job failed");
            }
            WorkerEvent::ShuttingDown {
                worker_id,
                jobs_released,
            } => {
                tracing::info!(%worker_id, %jobs_released, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Worker that polls the job queue and dispatches claimed jobs to their handlers.
pub struct WorkerService<Q: JobQueue> {
    queue: Q,
    handlers: BTreeMap<String, Arc<dyn JobHandler>>,
    job_names: Vec<String>,
    config: WorkerConfig,
}

impl<Q: JobQueue> WorkerService<Q> {
    pub fn new(
        queue: Q,
        handlers: impl IntoIterator<Item = Arc<dyn JobHandler>>,
        config: WorkerConfig,
    ) -> Self {
        let handlers: BTreeMap<String, Arc<dyn JobHandler>> = handlers
            .into_iter()
            .map(|h| (h.definition().name.clone(), h))
            .collect();
        let job_names = handlers.keys().cloned().collect();
        Self {
            queue,
            handlers,
            job_names,
            config,
        }
    }

    /// Subscribe to every job in `registry`.
    pub fn from_registry<CS: CircuitStore, RS: RunStore>(
        queue: Q,
        registry: &JobRegistry<CS, RS>,
        config: WorkerConfig,
    ) -> Self {
        let handlers: Vec<Arc<dyn JobHandler>> = registry
            .names()
            .iter()
            .filter_map(|name| registry.get(name))
            .collect();
        Self::new(queue, handlers, config)
    }

    pub fn job_names(&self) -> &[String] {
        &self.job_names
    }

    /// Run the worker loop until cancellation.
    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<(), AppError> {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
            jobs: &self.job_names,
        });

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            reporter.report(WorkerEvent::Polling);

            match self.run_once(reporter).await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim job");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        // Graceful shutdown: release all claimed jobs
        let released = self
            .queue
            .release_worker_jobs(&self.config.worker_id)
            .await
            .unwrap_or(0);

        reporter.report(WorkerEvent::ShuttingDown {
            worker_id: &self.config.worker_id,
            jobs_released: released,
        });
        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });

        Ok(())
    }

    /// Expire overdue jobs, then claim and process at most one.
    /// Returns `true` if a job was processed.
    pub async fn run_once<WR: WorkerReporter>(&self, reporter: &WR) -> Result<bool, AppError> {
        match self.queue.expire_overdue().await {
            Ok(0) => {}
            Ok(count) => reporter.report(WorkerEvent::Expired { count }),
            Err(e) => tracing::warn!(error = %e, "Failed to expire overdue jobs"),
        }

        match self
            .queue
            .claim(&self.config.worker_id, &self.job_names)
            .await?
        {
            Some(job) => {
                reporter.report(WorkerEvent::JobClaimed { job: &job });
                self.process_job(&job, reporter).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn process_job<WR: WorkerReporter>(&self, job: &QueuedJob, reporter: &WR) {
        let Some(handler) = self.handlers.get(&job.job_name) else {
            let error_msg = format!("No handler registered for job '{}'", job.job_name);
            reporter.report(WorkerEvent::JobFailed {
                job_id: job.id,
                job_name: &job.job_name,
                error: &error_msg,
                will_retry: false,
            });
            if let Err(e) = self.queue.fail(job.id, &error_msg, None).await {
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job as failed");
            }
            return;
        };

        let mut ctx = RunContext::new(job.job_name.clone(), job.payload.clone());
        ctx.attempt = job.retry_count + 1;

        match handler.run(ctx).await {
            Ok(outcome) => {
                reporter.report(WorkerEvent::JobCompleted {
                    job_id: job.id,
                    job_name: &job.job_name,
                    items_processed: outcome.items_processed,
                });
                if let Err(e) = self.queue.complete(job.id).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to mark job completed");
                }
            }
            Err(error) => {
                let error_msg = error.to_string();
                let can_retry = job.can_retry() && error.is_retryable();
                reporter.report(WorkerEvent::JobFailed {
                    job_id: job.id,
                    job_name: &job.job_name,
                    error: &error_msg,
                    will_retry: can_retry,
                });

                let next_retry = can_retry.then(|| {
                    let scheduled = job.calculate_next_retry();
                    match &error {
                        // Don't come back before the breaker can half-open.
                        AppError::CircuitOpen {
                            retry_after_secs, ..
                        } => scheduled.max(Utc::now() + TimeDelta::seconds(*retry_after_secs as i64)),
                        _ => scheduled,
                    }
                });

                if let Err(e) = self.queue.fail(job.id, &error_msg, next_retry).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to mark job as failed");
                }
            }
        }
    }
}
