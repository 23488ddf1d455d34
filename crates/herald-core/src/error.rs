use thiserror::Error;

/// Application-wide error types for Herald.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a page, feed, or robots.txt).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Server answered with a non-success status code.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// A URL or input value failed validation.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Feed could not be fetched or parsed.
    #[error("Feed error: {0}")]
    FeedError(String),

    /// Classifier model is missing, incompatible, or could not be trained.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// A job hook failed.
    #[error("Job '{job}' failed: {message}")]
    JobFailed { job: String, message: String },

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A circuit breaker refused to run the operation.
    #[error("Circuit breaker '{name}' is open, retry after {retry_after_secs}s")]
    CircuitOpen { name: String, retry_after_secs: u64 },

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::CircuitOpen { .. }
            | AppError::DatabaseError(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            AppError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            AppError::JobFailed { .. } => true,
            _ => false,
        }
    }
}
