//! Chunked processing with per-chunk failure isolation, plus a retry helper
//! for units of persistence work.

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

/// Summary of one [`BatchRunner::process`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome<R> {
    /// Results of every chunk that succeeded, in chunk order.
    pub results: Vec<R>,
    pub batches_total: usize,
    /// 1-indexed numbers of the chunks whose processor failed.
    pub failed_batches: Vec<usize>,
}

impl<R> BatchOutcome<R> {
    pub fn all_failed(&self) -> bool {
        self.batches_total > 0 && self.failed_batches.len() == self.batches_total
    }
}

/// Slices work into fixed-size chunks and runs them one after another.
///
/// A failing chunk is logged and skipped; the remaining chunks still run.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    label: String,
}

impl BatchRunner {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    /// Run `processor` over `items` in chunks of `batch_size` (0 is treated as 1).
    pub async fn process<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        batch_size: usize,
        mut processor: F,
    ) -> BatchOutcome<R>
    where
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = Result<Vec<R>, AppError>>,
    {
        let batch_size = batch_size.max(1);
        let batches_total = items.len().div_ceil(batch_size);
        let mut outcome = BatchOutcome {
            results: Vec::new(),
            batches_total,
            failed_batches: Vec::new(),
        };

        let mut remaining = items.into_iter().peekable();
        let mut batch_no = 0;
        while remaining.peek().is_some() {
            batch_no += 1;
            let chunk: Vec<T> = remaining.by_ref().take(batch_size).collect();
            let chunk_len = chunk.len();

            match processor(chunk).await {
                Ok(mut results) => {
                    tracing::debug!(
                        batch = %self.label,
                        batch_no,
                        batches_total,
                        items = chunk_len,
                        "Batch processed"
                    );
                    outcome.results.append(&mut results);
                }
                Err(e) => {
                    tracing::error!(
                        batch = %self.label,
                        batch_no,
                        batches_total,
                        items = chunk_len,
                        error = %e,
                        "Batch failed, continuing with remaining batches"
                    );
                    outcome.failed_batches.push(batch_no);
                }
            }
        }

        outcome
    }
}

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed,
    Exponential { multiplier: f32 },
}

/// Retry configuration for a unit of work (usually a database transaction).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff: Backoff::Exponential { multiplier: 2.0 },
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            max_delay: delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff: Backoff::Exponential { multiplier: 2.0 },
        }
    }

    /// Delay to wait after the given failed attempt (1-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential { multiplier } => {
                let exp = attempt.saturating_sub(1).min(16) as i32;
                self.base_delay.mul_f32(multiplier.powi(exp))
            }
        };
        delay.min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` is exhausted.
///
/// Only the final error is returned; earlier ones are logged.
pub async fn with_retry<T, F, Fut>(label: &str, policy: &RetryPolicy, mut operation: F) -> Result<T, AppError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                tracing::error!(%label, attempt, error = %e, "Giving up after final attempt");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    %label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
