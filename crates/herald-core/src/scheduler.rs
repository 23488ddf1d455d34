//! Cron-driven dispatch: each schedule fires an enqueue, never the job itself.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{EnqueueOptions, JobDefinition, QueuedJob};
use crate::job_queue::JobQueue;

/// A registered cron schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleEntry {
    pub schedule_id: Uuid,
    pub job_name: String,
    pub cron: String,
}

/// Wraps a [`JobScheduler`] whose cron jobs enqueue into a [`JobQueue`].
pub struct Scheduler<Q: JobQueue> {
    inner: JobScheduler,
    queue: Q,
    entries: Arc<Mutex<Vec<ScheduleEntry>>>,
}

impl<Q: JobQueue> Scheduler<Q> {
    pub async fn new(queue: Q) -> Result<Self, AppError> {
        let inner = JobScheduler::new()
            .await
            .map_err(|e| AppError::ConfigError(format!("Failed to create scheduler: {e}")))?;
        Ok(Self {
            inner,
            queue,
            entries: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Enqueue a job run right away.
    pub async fn enqueue(
        &self,
        job_name: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<QueuedJob, AppError> {
        self.queue.enqueue(job_name, payload, options).await
    }

    /// Enqueue `job_name` every time `cron` fires (six fields, seconds first).
    pub async fn schedule_job(
        &self,
        job_name: &str,
        cron: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<Uuid, AppError> {
        let queue = self.queue.clone();
        let name = job_name.to_string();
        let cron_expr = cron.to_string();

        let job = CronJob::new_async(&cron_expr, move |_uuid, _lock| {
            let queue = queue.clone();
            let name = name.clone();
            let payload = payload.clone();
            let options = options.clone();
            Box::pin(async move {
                match queue.enqueue(&name, payload, options).await {
                    Ok(job) => tracing::info!(job = %name, job_id = %job.id, "Scheduled run enqueued"),
                    Err(e) => tracing::error!(job = %name, error = %e, "Failed to enqueue scheduled run"),
                }
            })
        })
        .map_err(|e| AppError::ConfigError(format!("Invalid cron '{cron}' for job '{job_name}': {e}")))?;

        let schedule_id = self
            .inner
            .add(job)
            .await
            .map_err(|e| AppError::ConfigError(format!("Failed to schedule '{job_name}': {e}")))?;

        tracing::info!(job = %job_name, %cron, %schedule_id, "Job scheduled");
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(ScheduleEntry {
                schedule_id,
                job_name: job_name.to_string(),
                cron: cron.to_string(),
            });
        Ok(schedule_id)
    }

    /// Schedule a definition using its own enqueue options.
    /// Returns `None` when the definition has no schedule.
    pub async fn schedule_definition(
        &self,
        definition: &JobDefinition,
    ) -> Result<Option<Uuid>, AppError> {
        let Some(cron) = definition.schedule.as_deref() else {
            tracing::debug!(job = %definition.name, "Scheduling disabled");
            return Ok(None);
        };
        self.schedule_job(
            &definition.name,
            cron,
            serde_json::Value::Null,
            definition.enqueue_options(),
        )
        .await
        .map(Some)
    }

    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub async fn start(&self) -> Result<(), AppError> {
        self.inner
            .start()
            .await
            .map_err(|e| AppError::Generic(format!("Failed to start scheduler: {e}")))
    }

    pub async fn shutdown(&self) -> Result<(), AppError> {
        let mut inner = self.inner.clone();
        inner
            .shutdown()
            .await
            .map_err(|e| AppError::Generic(format!("Failed to stop scheduler: {e}")))
    }
}
