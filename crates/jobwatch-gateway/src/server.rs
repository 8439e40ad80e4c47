//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{Router, routing::get};
use jobwatch_core::config::GatewayConfig;
use jobwatch_core::traits::HistorySink;
use jobwatch_monitor::Poller;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::registry::ConnectionRegistry;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    /// Status history; `None` when history is disabled.
    pub history: Option<Arc<dyn HistorySink>>,
    /// Poller whose cycle count `/health` reports.
    pub poller: Option<Arc<Poller>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            history: None,
            poller: None,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_poller(mut self, poller: Arc<Poller>) -> Self {
        self.poller = Some(poller);
        self
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/api/monitoring/history", get(super::routes::history))
        .route("/ws/monitoring/{viewer_id}", get(super::ws::monitoring_ws))
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([axum::http::Method::GET, axum::http::Method::OPTIONS])
                .allow_headers(Any)
                .max_age(std::time::Duration::from_secs(3600));

            // Example: JOBWATCH_CORS_ORIGINS=https://ops.example.com,https://noc.example.com
            if let Ok(origins_str) = std::env::var("JOBWATCH_CORS_ORIGINS") {
                let origins: Vec<_> = origins_str
                    .split(',')
                    .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins)
            } else {
                cors.allow_origin(Any)
            }
        })
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Bind to the configured address and serve until `shutdown` fires.
pub async fn start(
    config: &GatewayConfig,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Gateway listening on http://{addr} (ws: /ws/monitoring/{{viewer_id}})");
    serve(listener, state, shutdown).await
}

/// Serve on an already-bound listener. Viewer connections are closed once
/// `shutdown` fires so that in-flight WebSocket sessions end too.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let registry = state.registry.clone();
    let app = build_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("Shutdown signal received");
            registry.close_all().await;
        })
        .await?;

    tracing::info!("Gateway shut down");
    Ok(())
}
