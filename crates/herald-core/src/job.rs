use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreakerConfig;

/// Dispatch priority of a job. Higher priorities are claimed first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    /// Numeric rank stored alongside queued jobs for ordering.
    pub fn rank(&self) -> i16 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }

    pub fn from_rank(rank: i16) -> Self {
        match rank {
            i16::MIN..=0 => Priority::Low,
            1 => Priority::Normal,
            2 => Priority::High,
            _ => Priority::Critical,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// Circuit-breaker settings attached to a job definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    #[serde(with = "duration_ms")]
    pub reset_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            enabled: true,
            failure_threshold: defaults.failure_threshold,
            reset_timeout: defaults.reset_timeout,
        }
    }
}

impl BreakerSettings {
    pub fn config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: self.reset_timeout,
        }
    }
}

/// Static description of a scheduled job.
///
/// Definitions are versioned: a changed definition is stored as a new
/// version and never overwrites a previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub domain: String,
    pub version: u32,
    /// Cron expression (six fields, seconds first). `None` disables scheduling.
    pub schedule: Option<String>,
    pub priority: Priority,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    pub retry_limit: u32,
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    pub circuit_breaker: BreakerSettings,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
            version: 1,
            schedule: None,
            priority: Priority::Normal,
            timeout: Duration::from_secs(15 * 60),
            retry_limit: 3,
            retry_delay: Duration::from_secs(60),
            circuit_breaker: BreakerSettings::default(),
        }
    }

    pub fn with_schedule(mut self, cron: impl Into<String>) -> Self {
        self.schedule = Some(cron.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, limit: u32, delay: Duration) -> Self {
        self.retry_limit = limit;
        self.retry_delay = delay;
        self
    }

    pub fn with_breaker(mut self, settings: BreakerSettings) -> Self {
        self.circuit_breaker = settings;
        self
    }

    pub fn without_breaker(mut self) -> Self {
        self.circuit_breaker.enabled = false;
        self
    }

    /// Queue options derived from this definition.
    pub fn enqueue_options(&self) -> EnqueueOptions {
        EnqueueOptions {
            priority: self.priority,
            retry_limit: self.retry_limit,
            retry_delay: self.retry_delay,
            expire_after: Some(self.timeout * 4),
        }
    }

    /// True when everything except the version number matches.
    pub fn same_shape(&self, other: &JobDefinition) -> bool {
        let mut a = self.clone();
        a.version = other.version;
        &a == other
    }
}

/// Status of a single job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Active,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Active => "active",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Active)
    }

    /// Runs only move forward: active → completed | failed.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Active, RunStatus::Completed) | (RunStatus::Active, RunStatus::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(RunStatus::Active),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Audit record of one job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub duration_ms: Option<i64>,
    pub items_processed: Option<i64>,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
    pub metadata: serde_json::Value,
}

impl JobRun {
    pub fn start(job_name: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.into(),
            started_at: Utc::now(),
            status: RunStatus::Active,
            duration_ms: None,
            items_processed: None,
            error_message: None,
            error_trace: None,
            metadata,
        }
    }
}

/// Grouped run counts for one job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub job_name: String,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub avg_duration_ms: Option<f64>,
}

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Expired,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 5] = [
        QueueStatus::Pending,
        QueueStatus::Running,
        QueueStatus::Completed,
        QueueStatus::Failed,
        QueueStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Running => "running",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Expired
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(QueueStatus::Pending),
            "running" => Ok(QueueStatus::Running),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            "expired" => Ok(QueueStatus::Expired),
            _ => Err(format!("Unknown queue status: {}", s)),
        }
    }
}

/// Delivery options for an enqueued job.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueOptions {
    pub priority: Priority,
    pub retry_limit: u32,
    pub retry_delay: Duration,
    /// Jobs still pending after this long are expired instead of run.
    pub expire_after: Option<Duration>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            retry_limit: 3,
            retry_delay: Duration::from_secs(60),
            expire_after: None,
        }
    }
}

/// A job instance waiting in (or claimed from) the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: Uuid,
    pub job_name: String,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub retry_limit: u32,
    pub retry_delay_ms: u64,
    pub expire_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
}

impl QueuedJob {
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.retry_limit
    }

    pub fn calculate_next_retry(&self) -> DateTime<Utc> {
        let delay = TimeDelta::milliseconds(self.retry_delay_ms as i64);
        Utc::now() + delay
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|at| at <= now)
    }
}

/// Per-run context handed to a job's process stage.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub job_name: String,
    pub attempt: u32,
    pub payload: serde_json::Value,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(job_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            job_name: job_name.into(),
            attempt: 1,
            payload,
            started_at: Utc::now(),
        }
    }
}

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
