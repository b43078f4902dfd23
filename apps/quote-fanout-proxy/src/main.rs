//! Quote Fan-out Proxy Binary
//!
//! Starts the quote fan-out proxy.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-fanout-proxy
//! ```
//!
//! # Environment Variables
//!
//! - `UPSTREAM_HOST` / `UPSTREAM_PORT`: Broker gateway (default: 127.0.0.1:7496)
//! - `UPSTREAM_CLIENT_ID`: Initial identity token (default: 999)
//! - `UPSTREAM_CLIENT_ID_MIN` / `UPSTREAM_CLIENT_ID_MAX`: Identity range after a conflict
//! - `UPSTREAM_RETRY_DELAY_SECS`: Backoff after a failed connect (default: 5)
//! - `UPSTREAM_CONFLICT_DELAY_MS`: Backoff after an identity conflict (default: 100)
//! - `UPSTREAM_HANDSHAKE_TIMEOUT_SECS`: Gateway handshake bound (default: 10)
//! - `MARKET_DATA_TYPE`: live | frozen | delayed | delayed_frozen (default: delayed)
//! - `WS_HOST` / `WS_PORT`: Client WebSocket bind (default: 127.0.0.1:8765)
//! - `HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8082)
//! - `SYNC_GRACE_MS`: `syncUnderlying` wait (default: 500)
//! - `OUTBOUND_QUEUE_CAPACITY`: Per-client queue (default: 256)
//! - `EVENT_CHANNEL_CAPACITY`: Upstream event queue (default: 4096)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quote_fanout_proxy::infrastructure::gateway::{GatewayConfig, GatewaySession};
use quote_fanout_proxy::infrastructure::health::{HealthServer, HealthServerState};
use quote_fanout_proxy::infrastructure::server::WsServer;
use quote_fanout_proxy::infrastructure::telemetry;
use quote_fanout_proxy::{
    ClientSessionTable, FanoutDispatcher, ProxyConfig, SessionConnector, StreamRegistry,
    init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting quote fan-out proxy");

    let _metrics_handle = init_metrics();

    let config = ProxyConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    // Upstream session and the shared bookkeeping on top of it
    let (event_tx, event_rx) = mpsc::channel(config.fanout.event_channel_capacity.max(1));
    let gateway = Arc::new(GatewaySession::new(
        GatewayConfig::new(config.upstream.url(), config.upstream.handshake_timeout),
        event_tx,
    ));
    let registry = Arc::new(StreamRegistry::new(gateway.clone()));
    let sessions = Arc::new(ClientSessionTable::new(
        gateway.clone(),
        registry,
        config.fanout.sync_grace,
    ));
    let connector = Arc::new(SessionConnector::new(
        gateway.clone(),
        config.upstream.connector_settings(),
    ));

    // Health server comes up first so readiness reflects the connect phase
    if config.server.health_port == 0 {
        tracing::info!("Health server disabled");
    } else {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&connector),
            gateway.clone(),
            Arc::clone(&sessions),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    if let Err(e) = connector.connect(&shutdown_token).await {
        tracing::info!(reason = %e, "Startup interrupted");
        connector.shutdown().await;
        return Ok(());
    }

    let dispatcher = FanoutDispatcher::new(Arc::clone(&sessions));
    let dispatcher_task = tokio::spawn(dispatcher.run(event_rx, shutdown_token.clone()));

    let ws_server = WsServer::new(
        config.server.ws_addr,
        Arc::clone(&sessions),
        config.server.outbound_queue_capacity,
        shutdown_token.clone(),
    );
    let ws_shutdown = shutdown_token.clone();
    let ws_task = tokio::spawn(async move {
        if let Err(e) = ws_server.run().await {
            tracing::error!(error = %e, "WebSocket server error");
            ws_shutdown.cancel();
        }
    });

    tracing::info!("Quote fan-out proxy ready");

    shutdown_token.cancelled().await;

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = ws_task.await;
        let _ = dispatcher_task.await;
    })
    .await
    .is_err()
    {
        tracing::warn!("Shutdown timed out waiting for tasks");
    }

    connector.shutdown().await;

    tracing::info!("Quote fan-out proxy stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ProxyConfig) {
    tracing::info!(
        upstream = %config.upstream.url(),
        client_id = config.upstream.client_id,
        market_data_type = %config.upstream.market_data_type,
        ws_addr = %config.server.ws_addr,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        sync_grace_ms = config.fanout.sync_grace.as_millis(),
        outbound_queue_capacity = config.server.outbound_queue_capacity,
        event_channel_capacity = config.fanout.event_channel_capacity,
        "Fan-out settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();
}
