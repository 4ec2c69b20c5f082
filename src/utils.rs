use std::time::{Duration, Instant};

use crate::error::CacheError;

/// Prefix of every rate limit counter key, ahead of the client identity.
pub const RATE_LIMIT_KEY_PREFIX: &str = "rate_limit";

/// Counter used by readiness checks. Outside the `rate_limit:` namespace, so no
/// client identity maps onto it.
pub const PROBE_KEY: &str = "rate_limit_probe";

/// Caller-supplied deadline carried into every cache operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Fail fast when the deadline has already passed, before any round trip
    pub fn check(&self) -> Result<(), CacheError> {
        if self.is_expired() {
            Err(CacheError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Bound a per-command timeout by the time left on this deadline
    pub fn bound(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => remaining.min(timeout),
            None => timeout,
        }
    }
}

/// Generate the backend key for a logical key: `{prefix}:{key}`
pub fn namespaced_key(prefix: &str, key: &str) -> String {
    format!("{}:{}", prefix, key)
}

/// Generate the logical counter key for a client identity
pub fn rate_limit_key(identity: &str) -> String {
    format!("{}:{}", RATE_LIMIT_KEY_PREFIX, identity)
}

/// Pick a server for a key. FNV-1a keeps the mapping identical across
/// processes, so every replica routes a key to the same server.
pub fn shard_index(key: &str, servers: usize) -> usize {
    if servers <= 1 {
        return 0;
    }

    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }

    (hash % servers as u64) as usize
}

/// Convert a TTL to whole milliseconds for the backend, zero meaning no expiry.
/// Sub-millisecond TTLs round up so they never turn into "no expiry".
pub fn ttl_millis(ttl: Duration) -> u64 {
    if ttl.is_zero() {
        0
    } else {
        (ttl.as_millis() as u64).max(1)
    }
}
