use async_trait::async_trait;
use redis::{aio::ConnectionManager, RedisResult, Script};
use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    cache::{CacheResult, CounterCache},
    config::CacheConfig,
    error::CacheError,
    utils::{namespaced_key, shard_index, ttl_millis, Deadline},
};

/// Absent keys start at `delta` with the default TTL; existing keys keep theirs.
const INCREMENT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  if tonumber(ARGV[2]) > 0 then
    redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
  else
    redis.call('SET', KEYS[1], ARGV[1])
  end
  return tonumber(ARGV[1])
end
return redis.call('INCRBY', KEYS[1], ARGV[1])
"#;

/// Absent keys start at zero with the default TTL; results are floored at zero.
const DECREMENT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  if tonumber(ARGV[2]) > 0 then
    redis.call('SET', KEYS[1], 0, 'PX', ARGV[2])
  else
    redis.call('SET', KEYS[1], 0)
  end
  return 0
end
local value = redis.call('DECRBY', KEYS[1], ARGV[1])
if value < 0 then
  redis.call('INCRBY', KEYS[1], -value)
  value = 0
end
return value
"#;

/// Returns 0 for an absent key, 1 once the expiry has been replaced.
const TOUCH_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
if tonumber(ARGV[1]) > 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
else
  redis.call('PERSIST', KEYS[1])
end
return 1
"#;

/// Redis client configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(1),
        }
    }
}

impl RedisConfig {
    /// One client configuration per server listed in the cache configuration
    pub fn from_cache_config(config: &CacheConfig) -> Vec<Self> {
        config
            .servers
            .iter()
            .map(|url| Self {
                url: url.clone(),
                connection_timeout: config.connect_timeout(),
                command_timeout: config.command_timeout(),
            })
            .collect()
    }
}

/// Redis client wrapper for counter operations against one server
#[derive(Clone)]
pub struct RedisClient {
    connection: ConnectionManager,
    config: RedisConfig,
}

impl RedisClient {
    /// Create a new Redis client and verify the server answers PING
    pub async fn new(config: RedisConfig) -> CacheResult<Self> {
        info!("Creating Redis client for URL: {}", config.url);

        let client = redis::Client::open(config.url.clone()).map_err(|e| {
            warn!("Failed to create Redis client: {}", e);
            CacheError::Backend(e)
        })?;

        let connection = match tokio::time::timeout(
            config.connection_timeout,
            client.get_connection_manager(),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!("Failed to create connection manager: {}", e);
                return Err(CacheError::Backend(e));
            }
            Err(_) => {
                warn!(
                    "Timeout while creating connection manager ({}ms)",
                    config.connection_timeout.as_millis()
                );
                return Err(CacheError::Timeout(config.connection_timeout));
            }
        };

        let client = Self { connection, config };
        client.ping(Deadline::after(client.config.connection_timeout)).await.map_err(|e| {
            warn!("Redis PING failed for {}: {}", client.config.url, e);
            e
        })?;

        info!("Redis client for {} initialized successfully", client.config.url);
        Ok(client)
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Run one command bounded by the command timeout and the caller's deadline
    async fn run<T, F>(&self, deadline: Deadline, command: F) -> CacheResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        deadline.check()?;
        let timeout = deadline.bound(self.config.command_timeout);

        match tokio::time::timeout(timeout, command).await {
            Ok(result) => result.map_err(CacheError::Backend),
            Err(_) => Err(CacheError::Timeout(timeout)),
        }
    }

    pub async fn ping(&self, deadline: Deadline) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        self.run(deadline, async move {
            redis::cmd("PING").query_async::<_, ()>(&mut conn).await
        })
        .await
    }

    pub async fn get(&self, key: &str, deadline: Deadline) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        self.run(deadline, async move {
            redis::cmd("GET")
                .arg(key)
                .query_async::<_, Option<Vec<u8>>>(&mut conn)
                .await
        })
        .await
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration, deadline: Deadline) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let ttl_ms = ttl_millis(ttl);
        self.run(deadline, async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if ttl_ms > 0 {
                cmd.arg("PX").arg(ttl_ms);
            }
            cmd.query_async::<_, ()>(&mut conn).await
        })
        .await
    }

    /// Evaluate a counter script against one key
    pub async fn eval(
        &self,
        script: &Script,
        key: &str,
        args: &[u64],
        deadline: Deadline,
    ) -> CacheResult<i64> {
        let mut conn = self.connection.clone();
        self.run(deadline, async move {
            let mut invocation = script.key(key);
            for arg in args {
                invocation.arg(*arg);
            }
            invocation.invoke_async::<_, i64>(&mut conn).await
        })
        .await
    }

    pub async fn delete(&self, key: &str, deadline: Deadline) -> CacheResult<i64> {
        let mut conn = self.connection.clone();
        self.run(deadline, async move {
            redis::cmd("DEL").arg(key).query_async::<_, i64>(&mut conn).await
        })
        .await
    }
}

/// Redis clients for every configured server, with keys sharded across them
#[derive(Clone)]
pub struct RedisClientPool {
    clients: Vec<RedisClient>,
}

impl RedisClientPool {
    /// Connect to every server. Any unreachable server fails the whole pool.
    pub async fn new(configs: Vec<RedisConfig>) -> CacheResult<Self> {
        info!("Creating Redis client pool for {} server(s)...", configs.len());

        let mut clients = Vec::with_capacity(configs.len());
        for config in configs {
            clients.push(RedisClient::new(config).await?);
        }

        if clients.is_empty() {
            return Err(CacheError::Backend(redis::RedisError::from((
                redis::ErrorKind::InvalidClientConfig,
                "no Redis servers configured",
            ))));
        }

        info!("Redis pool created successfully");
        Ok(Self { clients })
    }

    /// Get the client owning the given backend key
    pub fn client_for(&self, key: &str) -> &RedisClient {
        &self.clients[shard_index(key, self.clients.len())]
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Health check all clients
    pub async fn health_check(&self, deadline: Deadline) -> CacheResult<()> {
        for client in &self.clients {
            if let Err(e) = client.ping(deadline).await {
                warn!("Redis health check failed for {}: {}", client.url(), e);
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Counter cache backed by one or more Redis servers
pub struct RedisCounterCache {
    pool: RwLock<Option<RedisClientPool>>,
    prefix: String,
    default_ttl: Duration,
    increment_script: Script,
    decrement_script: Script,
    touch_script: Script,
    closed: AtomicBool,
}

impl RedisCounterCache {
    /// Connect to the configured servers, failing if any is unreachable
    pub async fn connect(config: &CacheConfig) -> CacheResult<Self> {
        let pool = RedisClientPool::new(RedisConfig::from_cache_config(config)).await?;
        Ok(Self::with_pool(pool, config.key_prefix.clone(), config.default_ttl()))
    }

    pub fn with_pool(pool: RedisClientPool, prefix: String, default_ttl: Duration) -> Self {
        Self {
            pool: RwLock::new(Some(pool)),
            prefix,
            default_ttl,
            increment_script: Script::new(INCREMENT_SCRIPT),
            decrement_script: Script::new(DECREMENT_SCRIPT),
            touch_script: Script::new(TOUCH_SCRIPT),
            closed: AtomicBool::new(false),
        }
    }

    /// Namespace the key and pick the client that owns it
    async fn route(&self, key: &str) -> CacheResult<(RedisClient, String)> {
        let key = namespaced_key(&self.prefix, key);
        let pool = self.pool.read().await;
        match pool.as_ref() {
            Some(pool) => Ok((pool.client_for(&key).clone(), key)),
            None => Err(CacheError::Closed),
        }
    }

    fn counter_delta(delta: u64) -> CacheResult<u64> {
        if delta > i64::MAX as u64 {
            return Err(CacheError::InvalidValue(format!("delta {} out of range", delta)));
        }
        Ok(delta)
    }

    fn counter_value(value: i64) -> CacheResult<u64> {
        u64::try_from(value)
            .map_err(|_| CacheError::InvalidValue(format!("negative counter value {}", value)))
    }
}

#[async_trait]
impl CounterCache for RedisCounterCache {
    async fn get(&self, key: &str, deadline: Deadline) -> CacheResult<Vec<u8>> {
        let (client, key) = self.route(key).await?;
        client.get(&key, deadline).await?.ok_or(CacheError::Miss)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration, deadline: Deadline) -> CacheResult<()> {
        let (client, key) = self.route(key).await?;
        client.set(&key, value, ttl, deadline).await
    }

    async fn increment(&self, key: &str, delta: u64, deadline: Deadline) -> CacheResult<u64> {
        let delta = Self::counter_delta(delta)?;
        let (client, key) = self.route(key).await?;
        let value = client
            .eval(
                &self.increment_script,
                &key,
                &[delta, ttl_millis(self.default_ttl)],
                deadline,
            )
            .await?;
        debug!(key = %key, value, "counter incremented");
        Self::counter_value(value)
    }

    async fn decrement(&self, key: &str, delta: u64, deadline: Deadline) -> CacheResult<u64> {
        let delta = Self::counter_delta(delta)?;
        let (client, key) = self.route(key).await?;
        let value = client
            .eval(
                &self.decrement_script,
                &key,
                &[delta, ttl_millis(self.default_ttl)],
                deadline,
            )
            .await?;
        debug!(key = %key, value, "counter decremented");
        Self::counter_value(value)
    }

    async fn touch(&self, key: &str, ttl: Duration, deadline: Deadline) -> CacheResult<()> {
        let (client, key) = self.route(key).await?;
        match client
            .eval(&self.touch_script, &key, &[ttl_millis(ttl)], deadline)
            .await?
        {
            0 => Err(CacheError::Miss),
            _ => Ok(()),
        }
    }

    async fn delete(&self, key: &str, deadline: Deadline) -> CacheResult<()> {
        let (client, key) = self.route(key).await?;
        match client.delete(&key, deadline).await? {
            0 => Err(CacheError::Miss),
            _ => Ok(()),
        }
    }

    async fn health_check(&self, deadline: Deadline) -> CacheResult<()> {
        let pool = self.pool.read().await;
        match pool.as_ref() {
            Some(pool) => pool.health_check(deadline).await,
            None => Err(CacheError::Closed),
        }
    }

    async fn close(&self) -> CacheResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(CacheError::Closed);
        }

        let pool = self.pool.write().await.take();
        if let Some(pool) = pool {
            info!("Closing {} Redis connection(s)", pool.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config() {
        let config = RedisConfig::default();
        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.command_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_configs_from_cache_config() {
        let cache_config = CacheConfig {
            servers: vec![
                "redis://cache-a:6379".to_string(),
                "redis://cache-b:6379".to_string(),
            ],
            connect_timeout_ms: 250,
            command_timeout_ms: 50,
            ..Default::default()
        };

        let configs = RedisConfig::from_cache_config(&cache_config);
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[1].url, "redis://cache-b:6379");
        assert_eq!(configs[0].connection_timeout, Duration::from_millis(250));
        assert_eq!(configs[0].command_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_counter_bounds() {
        assert!(RedisCounterCache::counter_delta(1).is_ok());
        assert!(RedisCounterCache::counter_delta(u64::MAX).is_err());
        assert_eq!(RedisCounterCache::counter_value(7).unwrap(), 7);
        assert!(matches!(
            RedisCounterCache::counter_value(-1),
            Err(CacheError::InvalidValue(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_pool_rejected() {
        assert!(RedisClientPool::new(vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let config = RedisConfig {
            url: "not-a-url".to_string(),
            ..Default::default()
        };
        assert!(RedisClient::new(config).await.is_err());
    }
}
