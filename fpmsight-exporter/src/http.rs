//! HTTP server for Prometheus metrics endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::collector::{SharedCollector, TargetHealth};
use crate::exposition::{self, CONTENT_TYPE};
use crate::status::StatusQuerier;

/// Application state shared across handlers.
struct AppState<Q> {
    collector: SharedCollector<Q>,
}

impl<Q> Clone for AppState<Q> {
    fn clone(&self) -> Self {
        Self {
            collector: self.collector.clone(),
        }
    }
}

/// Create the HTTP router.
fn create_router<Q: StatusQuerier>(collector: SharedCollector<Q>, metrics_path: &str) -> Router {
    let state = AppState { collector };

    Router::new()
        .route(metrics_path, get(metrics_handler::<Q>))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler::<Q>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint. Every request is one scrape.
async fn metrics_handler<Q: StatusQuerier>(State(state): State<AppState<Q>>) -> Response {
    let collector = &state.collector;
    let scrape = collector.collect().await;

    match exposition::render(collector.schema().namespace(), scrape.samples, scrape.stats) {
        Ok(body) => (StatusCode::OK, [("content-type", CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler<Q: StatusQuerier>(State(state): State<AppState<Q>>) -> Response {
    match state.collector.stats().last_health {
        Some(TargetHealth::Up) => (StatusCode::OK, "ready\n").into_response(),
        Some(TargetHealth::Down) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - php-fpm was down on the last scrape\n",
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no scrape yet\n",
        )
            .into_response(),
    }
}

/// HTTP server configuration.
pub struct HttpServer<Q> {
    collector: SharedCollector<Q>,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl<Q: StatusQuerier> HttpServer<Q> {
    /// Create a new HTTP server.
    pub fn new(
        collector: SharedCollector<Q>,
        listen_addr: SocketAddr,
        metrics_path: String,
    ) -> Self {
        Self {
            collector,
            listen_addr,
            metrics_path,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until the shutdown signal is
    /// received.
    pub async fn serve(
        self,
        listener: tokio::net::TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let router = create_router(self.collector, &self.metrics_path);
        let addr = listener.local_addr()?;

        info!(
            addr = %addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
