// Step-by-step startup check for the counter cache
// Run this with: cargo run --bin debug_startup

use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reviewer_gate::{cache, config::AppConfig, Deadline};

const PROBE_KEY: &str = "debug_startup:probe";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting debug startup test...");
    let start_time = Instant::now();

    let config = AppConfig::load_default()?;
    info!(
        enable = config.cache.enable,
        backend = ?config.cache.backend,
        servers = ?config.cache.servers,
        prefix = %config.cache.key_prefix,
        "Loaded cache configuration"
    );

    test_cache(&config).await?;

    info!("All checks completed in {:?}", start_time.elapsed());
    Ok(())
}

async fn test_cache(config: &AppConfig) -> Result<()> {
    let connect_limit = config.cache.connect_timeout() * 2;
    let connection_start = Instant::now();
    info!("Connecting counter cache with {:?} timeout...", connect_limit);

    let cache = match tokio::time::timeout(connect_limit, cache::connect(&config.cache)).await {
        Ok(Ok(cache)) => {
            info!("Cache connected in {:?}", connection_start.elapsed());
            cache
        }
        Ok(Err(e)) => {
            error!("Cache connection failed: {}", e);
            return Err(e.into());
        }
        Err(_) => {
            error!("Cache connection timed out after {:?}", connect_limit);
            error!("This suggests a network connectivity issue or the server is not responding");
            return Err(anyhow::anyhow!("cache connection timeout"));
        }
    };

    if !cache.is_enabled() {
        info!("Cache disabled by configuration; the rate limiter will fail open");
        return Ok(());
    }

    let deadline = || Deadline::after(config.cache.command_timeout());

    let health_start = Instant::now();
    if let Err(e) = cache.health_check(deadline()).await {
        error!("Health check failed: {}", e);
        let _ = cache.close().await;
        return Err(e.into());
    }
    info!("Health check passed in {:?}", health_start.elapsed());

    let probe = async {
        cache.set(PROBE_KEY, b"0", Duration::from_secs(10), deadline()).await?;
        let value = cache.increment(PROBE_KEY, 1, deadline()).await?;
        let stored = cache.get(PROBE_KEY, deadline()).await?;
        cache.delete(PROBE_KEY, deadline()).await?;
        match cache.get(PROBE_KEY, deadline()).await {
            Err(e) if e.is_miss() => {}
            Err(e) => return Err(e),
            Ok(_) => warn!("Probe key still present after delete"),
        }
        Ok::<_, reviewer_gate::CacheError>((value, stored))
    };

    let result = probe.await;
    cache.close().await?;

    match result {
        Ok((value, stored)) => {
            info!(
                incremented = value,
                stored = %String::from_utf8_lossy(&stored),
                "Probe round trip succeeded"
            );
            Ok(())
        }
        Err(e) => {
            error!("Probe round trip failed: {}", e);
            Err(e.into())
        }
    }
}
