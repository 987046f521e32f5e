use thiserror::Error;

/// Submission-time failures of the worker pool.
///
/// These are returned synchronously to whoever called `submit`,
/// `submit_and_wait` or `submit_batch`; the pool never logs them itself.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool is not running")]
    NotRunning,

    #[error("job queue is full")]
    QueueFull,

    #[error("worker pool is shutting down")]
    ShuttingDown,
}

/// Application-wide error types for the lifecycle monitor.
#[derive(Error, Debug)]
pub enum AppError {
    /// Fetching a product page failed.
    #[error("Fetch error: {0}")]
    FetchError(String),

    /// The page loaded but lacked the data we need.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Sending an email notification failed.
    #[error("Notification error: {0}")]
    NotificationError(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The periodic trigger could not be registered or stopped.
    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    /// Submission to the worker pool was rejected.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// One job of a batch could not be enqueued; the whole batch was withdrawn.
    #[error("failed to submit job {code}: {source}")]
    BatchSubmit {
        code: String,
        #[source]
        source: PoolError,
    },

    /// The caller stopped waiting before a result arrived.
    #[error("operation cancelled")]
    Cancelled,

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::FetchError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            AppError::Pool(PoolError::QueueFull) => true,
            _ => false,
        }
    }

    /// The pool-level cause, if this error came from a rejected submission.
    pub fn pool_error(&self) -> Option<PoolError> {
        match self {
            AppError::Pool(e) => Some(*e),
            AppError::BatchSubmit { source, .. } => Some(*source),
            _ => None,
        }
    }
}
