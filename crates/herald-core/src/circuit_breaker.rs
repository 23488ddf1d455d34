//! Named, persisted circuit breakers guarding unreliable operations.
//!
//! One [`CircuitBreaker`] instance tracks any number of breakers keyed by
//! name (usually the job name). State is mirrored in an in-memory cache and
//! written through to a [`CircuitStore`] so it survives restarts.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures]--> OPEN (rejecting) --[reset timeout]--> HALF_OPEN (probing)
//!                                                                              |
//!                                       <--[failure]--                         |
//!                                                                              |
//! CLOSED <-------------------------------[success]-----------------------------+
//! ```
//!
//! The Open → HalfOpen transition is lazy: it happens on the next read after
//! the reset timeout has elapsed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::traits::CircuitStore;

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally.
    Closed,
    /// Circuit is open - requests are rejected immediately.
    Open,
    /// Circuit is half-open - one trial request is allowed to test recovery.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half-open" | "half_open" => Ok(CircuitState::HalfOpen),
            _ => Err(format!("Unknown circuit state: {}", s)),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit.
    pub failure_threshold: u32,

    /// Time to wait before transitioning from Open to Half-Open.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Persisted state of one named breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStatus {
    pub job_name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl CircuitStatus {
    pub fn closed(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            last_success_at: None,
        }
    }

    /// Remaining cooldown while open, `None` in any other state.
    pub fn time_until_half_open(&self, reset_timeout: Duration, now: DateTime<Utc>) -> Option<Duration> {
        if self.state != CircuitState::Open {
            return None;
        }
        let elapsed = self
            .last_failure_at
            .map(|t| (now - t).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(reset_timeout);
        Some(reset_timeout.saturating_sub(elapsed))
    }
}

/// State change notification emitted whenever a breaker actually changes state.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitEvent {
    pub name: String,
    pub previous: CircuitState,
    pub current: CircuitState,
    pub failure_count: u32,
}

/// Receives breaker state changes (metrics, alerts).
///
/// Delivery is synchronous. An error or panic in one listener is logged and
/// does not reach the other listeners or the breaker itself.
pub trait CircuitListener: Send + Sync {
    fn on_transition(&self, event: &CircuitEvent) -> Result<(), AppError>;
}

/// Listener that logs transitions with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCircuitListener;

impl CircuitListener for TracingCircuitListener {
    fn on_transition(&self, event: &CircuitEvent) -> Result<(), AppError> {
        match event.current {
            CircuitState::Open => tracing::warn!(
                circuit = %event.name,
                from = %event.previous,
                failures = event.failure_count,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => tracing::info!(
                circuit = %event.name,
                from = %event.previous,
                "Circuit breaker half-open, allowing a trial request"
            ),
            CircuitState::Closed => tracing::info!(
                circuit = %event.name,
                from = %event.previous,
                "Circuit breaker closed"
            ),
        }
        Ok(())
    }
}

/// Error type for guarded operations.
#[derive(Debug)]
pub enum CircuitBreakerError {
    /// Circuit is open - the operation was not invoked.
    Open { name: String, retry_after: Duration },
    /// The operation did not finish in time; its result is discarded.
    Timeout { name: String, after: Duration },
    /// The operation itself failed.
    Inner(AppError),
}

impl CircuitBreakerError {
    /// Flatten into an [`AppError`] for callers that don't need the distinction.
    pub fn into_app_error(self) -> AppError {
        match self {
            CircuitBreakerError::Open { name, retry_after } => AppError::CircuitOpen {
                name,
                retry_after_secs: retry_after.as_secs(),
            },
            CircuitBreakerError::Timeout { after, .. } => AppError::Timeout(after.as_secs()),
            CircuitBreakerError::Inner(e) => e,
        }
    }
}

impl fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerError::Open { name, retry_after } => {
                write!(
                    f,
                    "Circuit breaker '{}' is open. Retry after {} seconds.",
                    name,
                    retry_after.as_secs()
                )
            }
            CircuitBreakerError::Timeout { name, after } => {
                write!(f, "Operation '{}' timed out after {}ms", name, after.as_millis())
            }
            CircuitBreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

struct Shared<S> {
    store: S,
    default_config: CircuitBreakerConfig,
    configs: Mutex<HashMap<String, CircuitBreakerConfig>>,
    cache: Mutex<HashMap<String, CircuitStatus>>,
    trials: Mutex<HashSet<String>>,
    listeners: RwLock<Vec<Arc<dyn CircuitListener>>>,
}

/// Thread-safe registry of named, persisted circuit breakers.
///
/// Construct once per process and share clones; all clones see the same cache.
pub struct CircuitBreaker<S: CircuitStore> {
    shared: Arc<Shared<S>>,
}

impl<S: CircuitStore> Clone for CircuitBreaker<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: CircuitStore> CircuitBreaker<S> {
    pub fn new(store: S, default_config: CircuitBreakerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                default_config,
                configs: Mutex::new(HashMap::new()),
                cache: Mutex::new(HashMap::new()),
                trials: Mutex::new(HashSet::new()),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Override threshold and reset timeout for one breaker.
    pub fn configure(&self, name: &str, config: CircuitBreakerConfig) {
        lock(&self.shared.configs, name).insert(name.to_string(), config);
    }

    pub fn config_for(&self, name: &str) -> CircuitBreakerConfig {
        lock(&self.shared.configs, name)
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.shared.default_config.clone())
    }

    pub fn add_listener(&self, listener: Arc<dyn CircuitListener>) {
        let mut listeners = self
            .shared
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.push(listener);
    }

    /// Drop the cached copy so the next access reloads from the store.
    pub fn invalidate(&self, name: &str) {
        lock(&self.shared.cache, name).remove(name);
    }

    /// Snapshot of every breaker loaded by this process.
    pub fn cached(&self) -> Vec<CircuitStatus> {
        let mut all: Vec<_> = lock(&self.shared.cache, "*").values().cloned().collect();
        all.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        all
    }

    /// Returns the current status, loading it from the store on first access
    /// and applying the lazy Open → HalfOpen transition.
    pub async fn get_state(&self, name: &str) -> CircuitStatus {
        self.ensure_loaded(name).await;
        let config = self.config_for(name);
        let (status, event) = self.mutate(name, |status| {
            maybe_transition_to_half_open(status, &config, Utc::now());
        });
        if let Some(event) = event {
            self.persist(&status).await;
            self.emit(&event);
        }
        status
    }

    /// Record a successful operation. Closes a half-open breaker.
    pub async fn record_success(&self, name: &str) {
        self.ensure_loaded(name).await;
        let config = self.config_for(name);
        let now = Utc::now();
        let (status, event) = self.mutate(name, |status| {
            maybe_transition_to_half_open(status, &config, now);
            status.last_success_at = Some(now);
            match status.state {
                CircuitState::HalfOpen => {
                    status.state = CircuitState::Closed;
                    status.failure_count = 0;
                }
                CircuitState::Closed => status.failure_count = 0,
                CircuitState::Open => {}
            }
        });
        self.persist(&status).await;
        if let Some(event) = event {
            self.emit(&event);
        }
    }

    /// Record a failed operation, opening the breaker at the threshold.
    pub async fn record_failure(&self, name: &str, error: &AppError) {
        self.ensure_loaded(name).await;
        let config = self.config_for(name);
        let now = Utc::now();
        let (status, event) = self.mutate(name, |status| {
            maybe_transition_to_half_open(status, &config, now);
            status.failure_count = status.failure_count.saturating_add(1);
            status.last_failure_at = Some(now);
            match status.state {
                CircuitState::Closed if status.failure_count >= config.failure_threshold => {
                    status.state = CircuitState::Open;
                }
                CircuitState::HalfOpen => status.state = CircuitState::Open,
                _ => {}
            }
        });
        tracing::debug!(
            circuit = %name,
            failures = status.failure_count,
            error = %error,
            "Recorded circuit failure"
        );
        self.persist(&status).await;
        if let Some(event) = event {
            self.emit(&event);
        }
    }

    /// Force a breaker back to closed with a zero failure count.
    pub async fn reset(&self, name: &str) {
        self.ensure_loaded(name).await;
        let (status, event) = self.mutate(name, |status| {
            status.state = CircuitState::Closed;
            status.failure_count = 0;
        });
        tracing::info!(circuit = %name, "Circuit breaker manually reset");
        self.persist(&status).await;
        if let Some(event) = event {
            self.emit(&event);
        }
    }

    /// Runs `operation` through the breaker, racing it against `timeout`.
    ///
    /// - Open: returns [`CircuitBreakerError::Open`] without invoking `operation`.
    /// - HalfOpen: allows a single trial request; concurrent callers are rejected as open.
    /// - Errors and timeouts are recorded as failures, anything else as success.
    pub async fn execute<F, T, Fut>(
        &self,
        name: &str,
        operation: F,
        timeout: Duration,
    ) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let status = self.get_state(name).await;
        let config = self.config_for(name);

        let _trial = match status.state {
            CircuitState::Open => {
                return Err(CircuitBreakerError::Open {
                    name: name.to_string(),
                    retry_after: status
                        .time_until_half_open(config.reset_timeout, Utc::now())
                        .unwrap_or(config.reset_timeout),
                });
            }
            CircuitState::HalfOpen => match TrialGuard::acquire(&self.shared.trials, name) {
                Some(guard) => Some(guard),
                None => {
                    return Err(CircuitBreakerError::Open {
                        name: name.to_string(),
                        retry_after: Duration::ZERO,
                    });
                }
            },
            CircuitState::Closed => None,
        };

        match tokio::time::timeout(timeout, operation()).await {
            Ok(Ok(value)) => {
                self.record_success(name).await;
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure(name, &e).await;
                Err(CircuitBreakerError::Inner(e))
            }
            Err(_) => {
                self.record_failure(name, &AppError::Timeout(timeout.as_secs()))
                    .await;
                Err(CircuitBreakerError::Timeout {
                    name: name.to_string(),
                    after: timeout,
                })
            }
        }
    }

    async fn ensure_loaded(&self, name: &str) {
        if lock(&self.shared.cache, name).contains_key(name) {
            return;
        }

        let loaded = match self.shared.store.load(name).await {
            Ok(Some(status)) => status,
            Ok(None) => CircuitStatus::closed(name),
            Err(e) => {
                tracing::warn!(circuit = %name, error = %e, "Failed to load circuit state, starting closed");
                CircuitStatus::closed(name)
            }
        };

        lock(&self.shared.cache, name)
            .entry(name.to_string())
            .or_insert(loaded);
    }

    /// Apply `f` to the cached status and report a state change, if any.
    fn mutate(
        &self,
        name: &str,
        f: impl FnOnce(&mut CircuitStatus),
    ) -> (CircuitStatus, Option<CircuitEvent>) {
        let mut cache = lock(&self.shared.cache, name);
        let status = cache
            .entry(name.to_string())
            .or_insert_with(|| CircuitStatus::closed(name));
        let previous = status.state;
        f(status);
        let event = (status.state != previous).then(|| CircuitEvent {
            name: name.to_string(),
            previous,
            current: status.state,
            failure_count: status.failure_count,
        });
        (status.clone(), event)
    }

    async fn persist(&self, status: &CircuitStatus) {
        if let Err(e) = self.shared.store.save(status).await {
            tracing::warn!(
                circuit = %status.job_name,
                error = %e,
                "Failed to persist circuit state; in-memory state remains authoritative"
            );
        }
    }

    fn emit(&self, event: &CircuitEvent) {
        let listeners = self
            .shared
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for listener in listeners {
            match std::panic::catch_unwind(AssertUnwindSafe(|| listener.on_transition(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(circuit = %event.name, error = %e, "Circuit listener failed");
                }
                Err(_) => {
                    tracing::error!(circuit = %event.name, "Circuit listener panicked");
                }
            }
        }
    }
}

fn maybe_transition_to_half_open(
    status: &mut CircuitStatus,
    config: &CircuitBreakerConfig,
    now: DateTime<Utc>,
) {
    if status.state != CircuitState::Open {
        return;
    }
    let elapsed = match status.last_failure_at {
        Some(t) => (now - t).to_std().unwrap_or(Duration::ZERO),
        None => config.reset_timeout,
    };
    if elapsed >= config.reset_timeout {
        status.state = CircuitState::HalfOpen;
    }
}

/// Acquires a std mutex, recovering from poison if necessary.
fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(circuit = %name, "Recovered from poisoned mutex");
        poisoned.into_inner()
    })
}

/// Marks a half-open breaker as having a trial request in flight until dropped.
struct TrialGuard<'a> {
    trials: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> TrialGuard<'a> {
    fn acquire(trials: &'a Mutex<HashSet<String>>, name: &str) -> Option<Self> {
        if !lock(trials, name).insert(name.to_string()) {
            return None;
        }
        Some(Self {
            trials,
            name: name.to_string(),
        })
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        lock(self.trials, &self.name).remove(&self.name);
    }
}
