//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, upstream status reporting, and Prometheus
//! metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (upstream session connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::MarketDataSession;
use crate::application::services::{ClientSessionTable, ConnectorState, SessionConnector};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Proxy version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream session status.
    pub upstream: UpstreamStatus,
    /// Connected client count.
    pub clients: usize,
    /// Stream registry statistics.
    pub streams: StreamStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Upstream session connected.
    Healthy,
    /// Still connecting upstream.
    Degraded,
    /// Upstream session down.
    Unhealthy,
}

/// Upstream session status.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamStatus {
    /// Connector state.
    pub state: &'static str,
    /// Whether the session transport is up.
    pub connected: bool,
    /// Identity used by the latest connect attempt.
    pub identity: i32,
}

/// Stream registry statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    /// Distinct upstream streams.
    pub active: usize,
    /// Total watchers across all streams.
    pub watchers: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    connector: Arc<SessionConnector>,
    session: Arc<dyn MarketDataSession>,
    sessions: Arc<ClientSessionTable>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        connector: Arc<SessionConnector>,
        session: Arc<dyn MarketDataSession>,
        sessions: Arc<ClientSessionTable>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            connector,
            session,
            sessions,
        }
    }

    fn is_ready(&self) -> bool {
        self.connector.state() == ConnectorState::Connected && self.session.is_connected()
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Router with all health routes.
    #[must_use]
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let connector_state = state.connector.state();
    let connected = state.session.is_connected();
    let stats = state.sessions.registry().stats();

    HealthResponse {
        status: determine_health_status(connector_state, connected),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream: UpstreamStatus {
            state: connector_state.as_str(),
            connected,
            identity: state.connector.identity(),
        },
        clients: state.sessions.client_count(),
        streams: StreamStatus {
            active: stats.stream_count,
            watchers: stats.watcher_count,
        },
    }
}

const fn determine_health_status(state: ConnectorState, connected: bool) -> HealthStatus {
    match (state, connected) {
        (ConnectorState::Connected, true) => HealthStatus::Healthy,
        (ConnectorState::Connecting, _) => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
