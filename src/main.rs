use anyhow::Result;
use std::{
    net::SocketAddr,
    sync::{atomic::Ordering, Arc},
};
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reviewer_gate::{
    cache::{self, CounterCache, InstrumentedCache},
    config::{AppConfig, LoggingConfig},
    http::{router, AppState},
    limiter::{LimiterSettings, RateLimiter},
    metrics::Metrics,
    service::AdmissionService,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load_default()?;
    init_tracing(&config.logging);

    info!("Starting reviewer gate");

    let metrics = Arc::new(Metrics::new()?);

    // Startup is fatal when an enabled cache cannot be reached
    let backend = match cache::connect(&config.cache).await {
        Ok(backend) => backend,
        Err(e) => {
            error!("Cache initialization failed: {}", e);
            return Err(e.into());
        }
    };
    let cache: Arc<dyn CounterCache> = Arc::new(InstrumentedCache::new(backend, metrics.clone()));

    let result = run(&config, cache.clone(), metrics).await;

    // Close exactly once, whichever way the server stopped
    match cache.close().await {
        Ok(()) => info!("Cache closed"),
        Err(e) => error!("Cache close error: {}", e),
    }

    if let Err(e) = &result {
        error!("Server failed: {}", e);
    }
    info!("Graceful shutdown finished");
    result
}

async fn run(config: &AppConfig, cache: Arc<dyn CounterCache>, metrics: Arc<Metrics>) -> Result<()> {
    let limiter = RateLimiter::new(cache.clone(), LimiterSettings::from(&config.rate_limiter));
    let settings = limiter.settings();
    info!(
        enabled = settings.enabled,
        enforcing = limiter.is_enforcing(),
        limit = settings.limit,
        window_secs = settings.window.as_secs(),
        "Rate limiter configured"
    );

    let service = Arc::new(AdmissionService::new(
        limiter,
        cache,
        metrics,
        config.server.admission_timeout(),
    ));
    let state = AppState::new(service);
    let app = router(state.clone(), &config.metrics);

    let addr = config.server.addr().parse::<SocketAddr>()?;
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {} (pid {})", addr, std::process::id());

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await
    });

    tokio::select! {
        result = &mut server => {
            // The server never stops on its own unless something failed
            return match result {
                Ok(Ok(())) => Err(anyhow::anyhow!("HTTP server exited unexpectedly")),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(e.into()),
            };
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    state.ready.store(false, Ordering::SeqCst);
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(config.server.shutdown_grace(), server).await {
        Ok(Ok(Ok(()))) => info!("HTTP server shutdown complete"),
        Ok(Ok(Err(e))) => warn!("HTTP shutdown error: {}", e),
        Ok(Err(e)) => warn!("HTTP server task failed: {}", e),
        Err(_) => warn!(
            "HTTP server did not drain within {}s",
            config.server.shutdown_grace().as_secs()
        ),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("reviewer_gate={}", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
