use async_trait::async_trait;
use std::{sync::Arc, time::{Duration, Instant}};
use tracing::info;

use crate::{
    config::{CacheBackend, CacheConfig},
    error::{CacheError, Result},
    memory::MemoryCache,
    metrics::Metrics,
    redis::RedisCounterCache,
    utils::Deadline,
};

/// Result type for counter cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Capability set over a networked key/value store with expiry and atomic counters.
///
/// Keys passed in are logical keys; implementations namespace them with their
/// configured prefix. Every operation is a single round trip and fails with
/// [`CacheError::DeadlineExceeded`] before touching the backend when the
/// deadline has already passed.
#[async_trait]
pub trait CounterCache: Send + Sync {
    /// Read a value. Absent, expired, or disabled yields [`CacheError::Miss`].
    async fn get(&self, key: &str, deadline: Deadline) -> CacheResult<Vec<u8>>;

    /// Write a value, replacing any existing value and expiry. A zero TTL never expires.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration, deadline: Deadline) -> CacheResult<()>;

    /// Atomically add `delta`. An absent key is created holding `delta` with the default TTL.
    async fn increment(&self, key: &str, delta: u64, deadline: Deadline) -> CacheResult<u64>;

    /// Atomically subtract `delta`, floored at zero. An absent key is created holding zero.
    async fn decrement(&self, key: &str, delta: u64, deadline: Deadline) -> CacheResult<u64>;

    /// Replace the expiry of an existing key without touching its value.
    async fn touch(&self, key: &str, ttl: Duration, deadline: Deadline) -> CacheResult<()>;

    /// Remove a key immediately.
    async fn delete(&self, key: &str, deadline: Deadline) -> CacheResult<()>;

    /// Round trip to every backend server.
    async fn health_check(&self, deadline: Deadline) -> CacheResult<()>;

    /// Release backend connections. Call once, at shutdown.
    async fn close(&self) -> CacheResult<()>;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Cache used when the backend is configured off.
///
/// Reads miss, writes report [`CacheError::Disabled`], deletes are no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCache;

#[async_trait]
impl CounterCache for DisabledCache {
    async fn get(&self, _key: &str, deadline: Deadline) -> CacheResult<Vec<u8>> {
        deadline.check()?;
        Err(CacheError::Miss)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration, deadline: Deadline) -> CacheResult<()> {
        deadline.check()?;
        Err(CacheError::Disabled)
    }

    async fn increment(&self, _key: &str, _delta: u64, deadline: Deadline) -> CacheResult<u64> {
        deadline.check()?;
        Err(CacheError::Disabled)
    }

    async fn decrement(&self, _key: &str, _delta: u64, deadline: Deadline) -> CacheResult<u64> {
        deadline.check()?;
        Err(CacheError::Disabled)
    }

    async fn touch(&self, _key: &str, _ttl: Duration, deadline: Deadline) -> CacheResult<()> {
        deadline.check()?;
        Err(CacheError::Disabled)
    }

    async fn delete(&self, _key: &str, deadline: Deadline) -> CacheResult<()> {
        deadline.check()?;
        Ok(())
    }

    async fn health_check(&self, _deadline: Deadline) -> CacheResult<()> {
        Err(CacheError::Disabled)
    }

    async fn close(&self) -> CacheResult<()> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Build the counter cache described by the configuration.
///
/// An enabled backend that cannot be reached is an error: the process should
/// refuse to start rather than run unthrottled on a misconfigured cache.
pub async fn connect(config: &CacheConfig) -> Result<Arc<dyn CounterCache>> {
    if !config.enable {
        info!("Counter cache disabled by configuration");
        return Ok(Arc::new(DisabledCache));
    }

    match config.backend {
        CacheBackend::Redis => {
            let cache = RedisCounterCache::connect(config).await?;
            Ok(Arc::new(cache))
        }
        CacheBackend::Memory => {
            info!("Using in-process memory counter cache");
            Ok(Arc::new(MemoryCache::new(config)))
        }
    }
}

/// Decorator recording per-operation metrics around another cache
pub struct InstrumentedCache {
    inner: Arc<dyn CounterCache>,
    metrics: Arc<Metrics>,
}

impl InstrumentedCache {
    pub fn new(inner: Arc<dyn CounterCache>, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }

    fn record<T>(&self, operation: &str, started: Instant, result: &CacheResult<T>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        self.metrics.record_cache_operation(operation, outcome);
        self.metrics
            .record_cache_operation_duration(operation, started.elapsed().as_secs_f64());
    }
}

#[async_trait]
impl CounterCache for InstrumentedCache {
    async fn get(&self, key: &str, deadline: Deadline) -> CacheResult<Vec<u8>> {
        let started = Instant::now();
        let result = self.inner.get(key, deadline).await;
        self.record("get", started, &result);
        result
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration, deadline: Deadline) -> CacheResult<()> {
        let started = Instant::now();
        let result = self.inner.set(key, value, ttl, deadline).await;
        self.record("set", started, &result);
        result
    }

    async fn increment(&self, key: &str, delta: u64, deadline: Deadline) -> CacheResult<u64> {
        let started = Instant::now();
        let result = self.inner.increment(key, delta, deadline).await;
        self.record("increment", started, &result);
        result
    }

    async fn decrement(&self, key: &str, delta: u64, deadline: Deadline) -> CacheResult<u64> {
        let started = Instant::now();
        let result = self.inner.decrement(key, delta, deadline).await;
        self.record("decrement", started, &result);
        result
    }

    async fn touch(&self, key: &str, ttl: Duration, deadline: Deadline) -> CacheResult<()> {
        let started = Instant::now();
        let result = self.inner.touch(key, ttl, deadline).await;
        self.record("touch", started, &result);
        result
    }

    async fn delete(&self, key: &str, deadline: Deadline) -> CacheResult<()> {
        let started = Instant::now();
        let result = self.inner.delete(key, deadline).await;
        self.record("delete", started, &result);
        result
    }

    async fn health_check(&self, deadline: Deadline) -> CacheResult<()> {
        let started = Instant::now();
        let result = self.inner.health_check(deadline).await;
        self.record("health_check", started, &result);
        result
    }

    async fn close(&self) -> CacheResult<()> {
        self.inner.close().await
    }

    fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_cache_reads_miss() {
        let cache = DisabledCache;
        let result = cache.get("anything", Deadline::none()).await;
        assert!(matches!(result, Err(CacheError::Miss)));
        assert!(!cache.is_enabled());
    }

    #[tokio::test]
    async fn test_disabled_cache_writes_report_disabled() {
        let cache = DisabledCache;
        let deadline = Deadline::none();

        assert!(matches!(cache.increment("k", 1, deadline).await, Err(CacheError::Disabled)));
        assert!(matches!(cache.decrement("k", 1, deadline).await, Err(CacheError::Disabled)));
        assert!(matches!(
            cache.set("k", b"1", Duration::from_secs(1), deadline).await,
            Err(CacheError::Disabled)
        ));
        assert!(matches!(
            cache.touch("k", Duration::from_secs(1), deadline).await,
            Err(CacheError::Disabled)
        ));
        assert!(cache.delete("k", deadline).await.is_ok());
        assert!(cache.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_cache_honours_expired_deadline() {
        let cache = DisabledCache;
        let expired = Deadline::at(Instant::now() - Duration::from_millis(1));
        assert!(matches!(cache.get("k", expired).await, Err(CacheError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_connect_disabled() {
        let config = CacheConfig {
            enable: false,
            ..Default::default()
        };
        let cache = connect(&config).await.unwrap();
        assert!(!cache.is_enabled());
    }

    #[tokio::test]
    async fn test_connect_unreachable_redis_fails() {
        let config = CacheConfig {
            servers: vec!["redis://127.0.0.1:1".to_string()],
            connect_timeout_ms: 500,
            ..Default::default()
        };
        assert!(connect(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_instrumented_cache_records_operations() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let cache = InstrumentedCache::new(Arc::new(DisabledCache), metrics.clone());

        let _ = cache.get("k", Deadline::none()).await;
        let _ = cache.increment("k", 1, Deadline::none()).await;

        assert_eq!(metrics.cache_operation_count("get", "miss"), 1);
        assert_eq!(metrics.cache_operation_count("increment", "disabled"), 1);
        assert!(!cache.is_enabled());
    }
}
