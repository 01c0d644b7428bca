//! `DominateServer`: the Axum HTTP and WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse, OnlineResponse};
use crate::publisher::Publisher;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::upgrade::ws_handler;

/// Shared state for all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connection membership.
    pub registry: Arc<ConnectionRegistry>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Monotonic start time, for uptime.
    pub start_time: Instant,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The hub's application root: owns the registry and serves it.
pub struct DominateServer {
    state: AppState,
    shutdown: Arc<ShutdownCoordinator>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DominateServer {
    /// Create a server with an empty registry.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            state: AppState {
                registry: Arc::new(ConnectionRegistry::new()),
                config: Arc::new(config),
                start_time: Instant::now(),
                started_at: Utc::now(),
                metrics: None,
            },
            shutdown: Arc::new(ShutdownCoordinator::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/online", get(online_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Handle for publishing events.
    pub fn publisher(&self) -> Publisher {
        Publisher::new(Arc::clone(&self.state.registry))
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.state.registry
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// The shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Bind and start serving in the background.
    ///
    /// Returns the bound address (useful with port `0`).
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind(self.config().bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "http server exited with error");
            }
        });
        self.tasks.lock().push(handle);

        info!(%addr, "dominate server listening");
        Ok(addr)
    }

    /// Stop accepting requests, close every connection and wait for the
    /// server task, bounded by the configured shutdown timeout.
    ///
    /// Upgrades still in flight when this runs are refused by the registry.
    pub async fn shutdown(&self) -> bool {
        self.shutdown.shutdown();
        let closed = self.state.registry.close_all();
        info!(connections = closed, "shutting down");
        let handles = std::mem::take(&mut *self.tasks.lock());
        self.shutdown
            .graceful_shutdown(handles, Some(self.config().shutdown_timeout))
            .await
    }
}

async fn online_handler(State(state): State<AppState>) -> Json<OnlineResponse> {
    Json(OnlineResponse {
        count: state.registry.count(),
    })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.started_at,
        state.registry.count(),
        state.registry.identities(),
    ))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, crate::metrics::render(handle)),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_owned()),
    }
}
