use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::{
    cache::CounterCache,
    config::RateLimiterConfig,
    error::RateLimitExceeded,
    utils::{rate_limit_key, Deadline, PROBE_KEY},
};

/// Immutable fixed-window settings for a limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSettings {
    pub enabled: bool,
    pub window: Duration,
    /// Maximum admitted requests per identity per window. Zero or negative
    /// means no enforcement.
    pub limit: i64,
}

impl From<&RateLimiterConfig> for LimiterSettings {
    fn from(config: &RateLimiterConfig) -> Self {
        Self {
            enabled: config.enabled,
            window: config.window(),
            limit: config.requests_per_window,
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Counted and within the limit.
    Admitted { count: u64 },
    /// Limiter disabled or limit non-positive; the cache was not consulted.
    Bypassed,
    /// The counter could not be incremented; admitted anyway.
    FailedOpen,
    /// Over the limit; the caller must reject the request.
    Rejected { count: u64 },
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Decision::Rejected { .. })
    }

    /// Metrics label for this outcome
    pub fn outcome(&self) -> &'static str {
        match self {
            Decision::Admitted { .. } => "admitted",
            Decision::Bypassed => "bypassed",
            Decision::FailedOpen => "failed_open",
            Decision::Rejected { .. } => "rejected",
        }
    }
}

/// Fixed-window request admission over an external counter cache.
///
/// Holds no per-identity state: every count lives in the cache, so any number
/// of replicas can share one backend. Cache failures admit the request.
pub struct RateLimiter {
    cache: Arc<dyn CounterCache>,
    settings: LimiterSettings,
}

impl RateLimiter {
    /// Create a new rate limiter over the given cache implementation
    pub fn new(cache: Arc<dyn CounterCache>, settings: LimiterSettings) -> Self {
        Self { cache, settings }
    }

    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    /// Whether requests are actually counted
    pub fn is_enforcing(&self) -> bool {
        self.settings.enabled && self.settings.limit > 0
    }

    /// Admit or reject one request for `identity`.
    pub async fn allow(&self, identity: &str, deadline: Deadline) -> Result<(), RateLimitExceeded> {
        match self.check(identity, deadline).await {
            Decision::Rejected { .. } => Err(RateLimitExceeded),
            _ => Ok(()),
        }
    }

    /// Count one request for `identity` and report why it was admitted or rejected.
    pub async fn check(&self, identity: &str, deadline: Deadline) -> Decision {
        if !self.is_enforcing() {
            return Decision::Bypassed;
        }

        self.count(&rate_limit_key(identity), identity, deadline).await
    }

    /// Run the admission path against a dedicated counter that no client can reach.
    ///
    /// An admitted probe hands its count back, so repeated probes never exhaust
    /// the window and the result only reflects whether the cache is usable.
    pub async fn probe(&self, deadline: Deadline) -> Decision {
        if !self.is_enforcing() {
            return Decision::Bypassed;
        }

        let decision = self.count(PROBE_KEY, PROBE_KEY, deadline).await;
        if let Decision::Admitted { .. } = decision {
            if let Err(e) = self.cache.decrement(PROBE_KEY, 1, deadline).await {
                debug!(error = %e, "Failed to release probe count");
            }
        }
        decision
    }

    async fn count(&self, key: &str, identity: &str, deadline: Deadline) -> Decision {
        let count = match self.cache.increment(key, 1, deadline).await {
            Ok(count) => count,
            Err(e) if e.is_unavailable() => {
                warn!(identity, error = %e, "Rate limit counter unavailable, admitting request");
                return Decision::FailedOpen;
            }
            Err(e) => {
                // Disabled cache or unusable stored value; not a transient outage
                debug!(identity, error = %e, "Rate limit counter not in use, admitting request");
                return Decision::FailedOpen;
            }
        };

        // First hit of a fresh window: the window starts now. Later hits keep this expiry.
        if count == 1 {
            if let Err(e) = self.cache.touch(key, self.settings.window, deadline).await {
                warn!(identity, error = %e, "Failed to set rate limit window expiry");
            }
        }

        let limit = self.settings.limit as u64;
        if count > limit {
            if let Err(e) = self.cache.decrement(key, 1, deadline).await {
                warn!(identity, error = %e, "Failed to decrement rate limit counter");
            }
            debug!(identity, count, limit, "Rate limit exceeded");
            return Decision::Rejected { count };
        }

        Decision::Admitted { count }
    }
}
