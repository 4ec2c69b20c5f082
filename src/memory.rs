use async_trait::async_trait;
use moka::{
    future::Cache,
    ops::compute::{CompResult, Op},
    Entry, Expiry,
};
use std::{
    future::ready,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use crate::{
    cache::{CacheResult, CounterCache},
    config::CacheConfig,
    error::CacheError,
    utils::{namespaced_key, Deadline},
};

/// A stored value with its absolute expiry
#[derive(Debug, Clone)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn counter(value: u64, expires_at: Option<Instant>) -> Self {
        Self {
            data: value.to_string().into_bytes(),
            expires_at,
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }

    fn as_counter(&self) -> CacheResult<u64> {
        std::str::from_utf8(&self.data)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| CacheError::InvalidValue("value is not an unsigned integer".to_string()))
    }
}

/// The current value of an entry, ignoring one that has outlived its expiry
fn live_value(current: Option<Entry<String, StoredValue>>) -> Option<StoredValue> {
    current.map(Entry::into_value).filter(StoredValue::is_live)
}

fn expiry_from(ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Some(Instant::now() + ttl)
    }
}

/// Moka expiry driven by the absolute deadline stored in each value
struct ValueExpiry;

impl Expiry<String, StoredValue> for ValueExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        created_at: Instant,
    ) -> Option<Duration> {
        value.expires_at.map(|at| at.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.expires_at.map(|at| at.saturating_duration_since(updated_at))
    }
}

/// In-process counter cache for development and tests.
///
/// Follows the same absent-key and expiry rules as the Redis backend, but the
/// counters are only visible to this process.
pub struct MemoryCache {
    entries: Cache<String, StoredValue>,
    prefix: String,
    default_ttl: Duration,
    closed: AtomicBool,
}

impl MemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_settings(config.key_prefix.clone(), config.default_ttl(), config.max_capacity)
    }

    pub fn with_settings(prefix: String, default_ttl: Duration, max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(ValueExpiry)
            .build();

        Self {
            entries,
            prefix,
            default_ttl,
            closed: AtomicBool::new(false),
        }
    }

    fn key(&self, key: &str, deadline: Deadline) -> CacheResult<String> {
        deadline.check()?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }
        Ok(namespaced_key(&self.prefix, key))
    }

    fn computed_counter(result: CompResult<String, StoredValue>) -> CacheResult<u64> {
        match result {
            CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) => entry.value().as_counter(),
            _ => Err(CacheError::InvalidValue("counter was not written".to_string())),
        }
    }
}

#[async_trait]
impl CounterCache for MemoryCache {
    async fn get(&self, key: &str, deadline: Deadline) -> CacheResult<Vec<u8>> {
        let key = self.key(key, deadline)?;
        self.entries
            .get(&key)
            .await
            .filter(StoredValue::is_live)
            .map(|stored| stored.data)
            .ok_or(CacheError::Miss)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration, deadline: Deadline) -> CacheResult<()> {
        let key = self.key(key, deadline)?;
        let stored = StoredValue {
            data: value.to_vec(),
            expires_at: expiry_from(ttl),
        };
        self.entries.insert(key, stored).await;
        Ok(())
    }

    async fn increment(&self, key: &str, delta: u64, deadline: Deadline) -> CacheResult<u64> {
        let key = self.key(key, deadline)?;
        let default_ttl = self.default_ttl;

        let result = self
            .entries
            .entry(key)
            .and_try_compute_with(|current| {
                let next = match live_value(current) {
                    None => Ok(StoredValue::counter(delta, expiry_from(default_ttl))),
                    Some(stored) => stored
                        .as_counter()
                        .and_then(|value| {
                            value.checked_add(delta).ok_or_else(|| {
                                CacheError::InvalidValue("increment would overflow".to_string())
                            })
                        })
                        .map(|value| StoredValue::counter(value, stored.expires_at)),
                };
                ready(next.map(Op::Put))
            })
            .await?;

        Self::computed_counter(result)
    }

    async fn decrement(&self, key: &str, delta: u64, deadline: Deadline) -> CacheResult<u64> {
        let key = self.key(key, deadline)?;
        let default_ttl = self.default_ttl;

        let result = self
            .entries
            .entry(key)
            .and_try_compute_with(|current| {
                let next = match live_value(current) {
                    None => Ok(StoredValue::counter(0, expiry_from(default_ttl))),
                    Some(stored) => stored
                        .as_counter()
                        .map(|value| StoredValue::counter(value.saturating_sub(delta), stored.expires_at)),
                };
                ready(next.map(Op::Put))
            })
            .await?;

        Self::computed_counter(result)
    }

    async fn touch(&self, key: &str, ttl: Duration, deadline: Deadline) -> CacheResult<()> {
        let key = self.key(key, deadline)?;

        self.entries
            .entry(key)
            .and_try_compute_with(|current| {
                let next = match live_value(current) {
                    None => Err(CacheError::Miss),
                    Some(stored) => Ok(Op::Put(StoredValue {
                        data: stored.data,
                        expires_at: expiry_from(ttl),
                    })),
                };
                ready(next)
            })
            .await?;

        Ok(())
    }

    async fn delete(&self, key: &str, deadline: Deadline) -> CacheResult<()> {
        let key = self.key(key, deadline)?;
        match self.entries.remove(&key).await {
            Some(stored) if stored.is_live() => Ok(()),
            _ => Err(CacheError::Miss),
        }
    }

    async fn health_check(&self, deadline: Deadline) -> CacheResult<()> {
        self.key("", deadline).map(|_| ())
    }

    async fn close(&self) -> CacheResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }
        self.entries.invalidate_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> MemoryCache {
        MemoryCache::with_settings("test".to_string(), Duration::from_secs(60), 1000)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = cache();
        let deadline = Deadline::none();

        cache.set("doc", b"payload", Duration::from_secs(60), deadline).await.unwrap();
        assert_eq!(cache.get("doc", deadline).await.unwrap(), b"payload".to_vec());
        assert!(matches!(cache.get("other", deadline).await, Err(CacheError::Miss)));
    }

    #[tokio::test]
    async fn test_increment_bootstraps_absent_key() {
        let cache = cache();
        let deadline = Deadline::none();

        assert_eq!(cache.increment("hits", 1, deadline).await.unwrap(), 1);
        assert_eq!(cache.increment("hits", 2, deadline).await.unwrap(), 3);
        assert_eq!(cache.get("hits", deadline).await.unwrap(), b"3".to_vec());
    }

    #[tokio::test]
    async fn test_decrement_floors_at_zero() {
        let cache = cache();
        let deadline = Deadline::none();

        assert_eq!(cache.decrement("absent", 1, deadline).await.unwrap(), 0);

        cache.increment("hits", 2, deadline).await.unwrap();
        assert_eq!(cache.decrement("hits", 1, deadline).await.unwrap(), 1);
        assert_eq!(cache.decrement("hits", 5, deadline).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_rejects_non_numeric_value() {
        let cache = cache();
        let deadline = Deadline::none();

        cache.set("doc", b"{\"status\":\"NEW\"}", Duration::ZERO, deadline).await.unwrap();
        assert!(matches!(
            cache.increment("doc", 1, deadline).await,
            Err(CacheError::InvalidValue(_))
        ));
    }

    #[tokio::test]
    async fn test_increment_overflow_is_an_error() {
        let cache = cache();
        let deadline = Deadline::none();

        cache.set("max", u64::MAX.to_string().as_bytes(), Duration::ZERO, deadline).await.unwrap();
        assert!(matches!(
            cache.increment("max", 1, deadline).await,
            Err(CacheError::InvalidValue(_))
        ));
        assert_eq!(cache.get("max", deadline).await.unwrap(), u64::MAX.to_string().into_bytes());
    }

    #[tokio::test]
    async fn test_values_expire() {
        let cache = cache();
        let deadline = Deadline::none();

        cache.set("short", b"1", Duration::from_millis(50), deadline).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(matches!(cache.get("short", deadline).await, Err(CacheError::Miss)));
    }

    #[tokio::test]
    async fn test_increment_keeps_expiry_and_touch_replaces_it() {
        let cache = cache();
        let deadline = Deadline::none();

        cache.increment("window", 1, deadline).await.unwrap();
        cache.touch("window", Duration::from_millis(80), deadline).await.unwrap();
        cache.increment("window", 1, deadline).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(matches!(cache.get("window", deadline).await, Err(CacheError::Miss)));
        assert_eq!(cache.increment("window", 1, deadline).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_touch_absent_key_misses() {
        let cache = cache();
        assert!(matches!(
            cache.touch("absent", Duration::from_secs(1), Deadline::none()).await,
            Err(CacheError::Miss)
        ));
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = cache();
        let deadline = Deadline::none();

        cache.set("doc", b"1", Duration::from_secs(60), deadline).await.unwrap();
        assert!(cache.delete("doc", deadline).await.is_ok());
        assert!(matches!(cache.delete("doc", deadline).await, Err(CacheError::Miss)));
    }

    #[tokio::test]
    async fn test_expired_deadline_fails_fast() {
        let cache = cache();
        let expired = Deadline::at(Instant::now() - Duration::from_millis(1));
        assert!(matches!(
            cache.increment("hits", 1, expired).await,
            Err(CacheError::DeadlineExceeded)
        ));
        assert!(matches!(cache.get("hits", Deadline::none()).await, Err(CacheError::Miss)));
    }

    #[tokio::test]
    async fn test_close_once() {
        let cache = cache();
        assert!(cache.close().await.is_ok());
        assert!(matches!(cache.close().await, Err(CacheError::Closed)));
        assert!(matches!(
            cache.get("k", Deadline::none()).await,
            Err(CacheError::Closed)
        ));
        assert!(cache.health_check(Deadline::none()).await.is_err());
    }
}
