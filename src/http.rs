use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, warn};

use crate::{config::MetricsConfig, service::AdmissionService};

/// Identity used when neither a forwarding header nor a peer address is available
pub const UNKNOWN_IDENTITY: &str = "unknown";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AdmissionService>,
    pub ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(service: Arc<AdmissionService>) -> Self {
        Self {
            service,
            ready: Arc::new(AtomicBool::new(true)),
        }
    }
}

/// Build the HTTP surface, with the rate limit middleware in front of every route
pub fn router(state: AppState, metrics: &MetricsConfig) -> Router {
    let mut app = Router::new()
        .route("/ping", get(ping))
        .route("/readyz", get(readyz))
        .route("/healthcheck", get(health_check));

    if metrics.enabled {
        app = app.route(&metrics.path, get(metrics_handler));
    }

    app.layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
}

/// Client identity: first `X-Forwarded-For` entry, else the peer IP
pub fn client_identity(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
}

async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let identity = client_identity(&request);

    match state.service.check(&identity).await {
        Ok(()) => next.run(request).await,
        Err(e) => {
            debug!(identity = %identity, path = %request.uri().path(), "Rejected: {}", e);
            (StatusCode::TOO_MANY_REQUESTS, "Too many requests").into_response()
        }
    }
}

async fn ping() -> &'static str {
    "pong"
}

async fn readyz(State(state): State<AppState>) -> Response {
    if state.ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response()
    }
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let limiter = state.service.probe().await.outcome();
    let timestamp = chrono::Utc::now().to_rfc3339();

    match state.service.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "cache": "ok",
                "limiter": limiter,
                "timestamp": timestamp
            })),
        ),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "cache": e.to_string(),
                    "limiter": limiter,
                    "timestamp": timestamp
                })),
            )
        }
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .service
        .metrics()
        .render()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest};

    #[test]
    fn test_identity_from_forwarded_header() {
        let request = HttpRequest::builder()
            .uri("/ping")
            .header("x-forwarded-for", " 203.0.113.7 , 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_identity(&request), "203.0.113.7");
    }

    #[test]
    fn test_identity_from_peer_address() {
        let mut request = HttpRequest::builder().uri("/ping").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("192.0.2.10:51000".parse::<SocketAddr>().unwrap()));
        assert_eq!(client_identity(&request), "192.0.2.10");
    }

    #[test]
    fn test_identity_fallback() {
        let request = HttpRequest::builder()
            .uri("/ping")
            .header("x-forwarded-for", "  ")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_identity(&request), UNKNOWN_IDENTITY);
    }
}
