//! Reviewer Gate
//!
//! Request admission for the document review service: a fixed-window rate
//! limiter whose counters live in a shared cache backend, so any number of
//! service replicas enforce one limit per client. The limiter fails open when
//! the cache is degraded.

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod limiter;
pub mod memory;
pub mod metrics;
pub mod redis;
pub mod service;
pub mod utils;

// Re-export main types
pub use cache::{CounterCache, DisabledCache};
pub use config::AppConfig;
pub use error::{CacheError, GateError, RateLimitExceeded, Result};
pub use limiter::{Decision, LimiterSettings, RateLimiter};
pub use service::AdmissionService;
pub use utils::Deadline;
