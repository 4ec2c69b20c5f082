use std::{sync::Arc, time::Duration};
use tracing::debug;

use crate::{
    cache::{CacheResult, CounterCache},
    error::RateLimitExceeded,
    limiter::{Decision, RateLimiter},
    metrics::Metrics,
    utils::Deadline,
};

/// Admission service shared by the HTTP middleware and the health endpoints
pub struct AdmissionService {
    limiter: RateLimiter,
    cache: Arc<dyn CounterCache>,
    metrics: Arc<Metrics>,
    request_timeout: Duration,
}

impl AdmissionService {
    /// Create a new admission service
    pub fn new(
        limiter: RateLimiter,
        cache: Arc<dyn CounterCache>,
        metrics: Arc<Metrics>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            limiter,
            cache,
            metrics,
            request_timeout,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Decide whether a request from `identity` may proceed
    pub async fn check(&self, identity: &str) -> Result<(), RateLimitExceeded> {
        let timer = self.metrics.start_admission_timer();
        let decision = self
            .limiter
            .check(identity, Deadline::after(self.request_timeout))
            .await;
        drop(timer);

        self.metrics.record_admission(decision.outcome());
        debug!(identity, outcome = decision.outcome(), "Admission decision");

        match decision {
            Decision::Rejected { .. } => Err(RateLimitExceeded),
            _ => Ok(()),
        }
    }

    /// Health check for the counter cache
    pub async fn health_check(&self) -> CacheResult<()> {
        self.cache
            .health_check(Deadline::after(self.request_timeout))
            .await
    }

    /// Run one admission check on the limiter's private probe counter.
    ///
    /// `FailedOpen` means the limiter is up but not enforcing.
    pub async fn probe(&self) -> Decision {
        self.limiter
            .probe(Deadline::after(self.request_timeout))
            .await
    }
}
