#![allow(dead_code)]

use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use reviewer_gate::{
    cache::{CacheResult, CounterCache},
    error::CacheError,
    limiter::{LimiterSettings, RateLimiter},
    memory::MemoryCache,
    Deadline,
};

/// Operations the scripted cache can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Set,
    Increment,
    Decrement,
    Touch,
    Delete,
    Health,
}

/// Counter cache double with per-operation failure injection and call counts.
/// TTLs are recorded but never expire.
#[derive(Default)]
pub struct ScriptedCache {
    values: Mutex<HashMap<String, u64>>,
    ttls: Mutex<HashMap<String, Duration>>,
    failing: Mutex<Vec<Op>>,
    calls: Mutex<HashMap<Op, usize>>,
    closes: AtomicUsize,
}

impl ScriptedCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every counter operation fails as if the backend were down
    pub fn failing() -> Arc<Self> {
        let cache = Self::default();
        *cache.failing.lock().unwrap() = vec![
            Op::Get,
            Op::Set,
            Op::Increment,
            Op::Decrement,
            Op::Touch,
            Op::Delete,
            Op::Health,
        ];
        Arc::new(cache)
    }

    pub fn failing_on(ops: &[Op]) -> Arc<Self> {
        let cache = Self::default();
        *cache.failing.lock().unwrap() = ops.to_vec();
        Arc::new(cache)
    }

    pub fn calls(&self, op: Op) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    pub fn value(&self, key: &str) -> Option<u64> {
        self.values.lock().unwrap().get(key).copied()
    }

    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.ttls.lock().unwrap().get(key).copied()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn enter(&self, op: Op, deadline: Deadline) -> CacheResult<()> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
        deadline.check()?;
        if self.failing.lock().unwrap().contains(&op) {
            return Err(CacheError::Timeout(Duration::from_millis(1)));
        }
        Ok(())
    }
}

#[async_trait]
impl CounterCache for ScriptedCache {
    async fn get(&self, key: &str, deadline: Deadline) -> CacheResult<Vec<u8>> {
        self.enter(Op::Get, deadline)?;
        self.value(key)
            .map(|v| v.to_string().into_bytes())
            .ok_or(CacheError::Miss)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration, deadline: Deadline) -> CacheResult<()> {
        self.enter(Op::Set, deadline)?;
        let parsed = std::str::from_utf8(value)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| CacheError::InvalidValue(key.to_string()))?;
        self.values.lock().unwrap().insert(key.to_string(), parsed);
        self.ttls.lock().unwrap().insert(key.to_string(), ttl);
        Ok(())
    }

    async fn increment(&self, key: &str, delta: u64, deadline: Deadline) -> CacheResult<u64> {
        self.enter(Op::Increment, deadline)?;
        let mut values = self.values.lock().unwrap();
        let value = values.entry(key.to_string()).or_insert(0);
        *value += delta;
        Ok(*value)
    }

    async fn decrement(&self, key: &str, delta: u64, deadline: Deadline) -> CacheResult<u64> {
        self.enter(Op::Decrement, deadline)?;
        let mut values = self.values.lock().unwrap();
        let value = values.get_mut(key).ok_or(CacheError::Miss)?;
        *value = value.saturating_sub(delta);
        Ok(*value)
    }

    async fn touch(&self, key: &str, ttl: Duration, deadline: Deadline) -> CacheResult<()> {
        self.enter(Op::Touch, deadline)?;
        if self.value(key).is_none() {
            return Err(CacheError::Miss);
        }
        self.ttls.lock().unwrap().insert(key.to_string(), ttl);
        Ok(())
    }

    async fn delete(&self, key: &str, deadline: Deadline) -> CacheResult<()> {
        self.enter(Op::Delete, deadline)?;
        self.values.lock().unwrap().remove(key);
        self.ttls.lock().unwrap().remove(key);
        Ok(())
    }

    async fn health_check(&self, deadline: Deadline) -> CacheResult<()> {
        self.enter(Op::Health, deadline)
    }

    async fn close(&self) -> CacheResult<()> {
        if self.closes.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(CacheError::Closed);
        }
        Ok(())
    }
}

pub fn settings(limit: i64, window: Duration) -> LimiterSettings {
    LimiterSettings {
        enabled: true,
        window,
        limit,
    }
}

pub fn memory_cache() -> Arc<MemoryCache> {
    Arc::new(MemoryCache::with_settings(
        "it".to_string(),
        Duration::from_secs(300),
        10_000,
    ))
}

pub fn limiter(cache: Arc<dyn CounterCache>, limit: i64, window: Duration) -> RateLimiter {
    RateLimiter::new(cache, settings(limit, window))
}
