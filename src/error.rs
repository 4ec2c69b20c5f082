use std::time::Duration;
use thiserror::Error;

/// Result type for gate operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Errors that can occur while setting up or running the gate
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Errors returned by counter cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// The key is absent or has expired.
    #[error("cache miss")]
    Miss,

    /// The cache was configured off. Permanent, never worth retrying.
    #[error("cache disabled")]
    Disabled,

    #[error("cache connection closed")]
    Closed,

    /// The caller's deadline had already passed when the operation was issued.
    #[error("deadline exceeded before cache operation was issued")]
    DeadlineExceeded,

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid cached value: {0}")]
    InvalidValue(String),

    #[error("Redis error: {0}")]
    Backend(#[from] redis::RedisError),
}

impl CacheError {
    /// True for outcomes that mean "nothing there": a genuine miss or a disabled cache.
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss | CacheError::Disabled)
    }

    /// True for transient failures talking to the backend.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            CacheError::Backend(_)
                | CacheError::Timeout(_)
                | CacheError::DeadlineExceeded
                | CacheError::Closed
        )
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::Miss => "miss",
            CacheError::Disabled => "disabled",
            CacheError::Closed => "closed",
            CacheError::DeadlineExceeded => "deadline_exceeded",
            CacheError::Timeout(_) => "timeout",
            CacheError::InvalidValue(_) => "invalid_value",
            CacheError::Backend(_) => "backend",
        }
    }
}

/// The only error surfaced by the rate limiter: the request must be rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("too many requests")]
pub struct RateLimitExceeded;
