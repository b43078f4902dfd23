//! Prometheus Metrics Module
//!
//! Exposes proxy metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ticks**: Upstream tick batches and dispatch latency
//! - **Delivery**: Payloads sent to and failed for clients
//! - **Requests**: Malformed client requests and qualification failures
//! - **Upstream**: Connect attempts and open streams
//! - **Clients**: Connected client count
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "quote_proxy_tick_batches_total",
        "Total tick batches received from the upstream session"
    );
    describe_counter!(
        "quote_proxy_payloads_sent_total",
        "Total payloads accepted by client channels"
    );
    describe_counter!(
        "quote_proxy_delivery_failures_total",
        "Total payload deliveries that failed"
    );

    describe_counter!(
        "quote_proxy_qualification_failures_total",
        "Total contract qualification failures by kind"
    );
    describe_counter!(
        "quote_proxy_malformed_requests_total",
        "Total client requests that could not be parsed"
    );
    describe_counter!(
        "quote_proxy_connect_attempts_total",
        "Total upstream connect attempts by outcome"
    );

    describe_gauge!(
        "quote_proxy_upstream_streams",
        "Number of open upstream quote streams"
    );
    describe_gauge!("quote_proxy_clients", "Number of connected clients");

    describe_histogram!(
        "quote_proxy_dispatch_seconds",
        "Time to build payloads for one tick batch"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome labels for upstream connect attempts.
#[derive(Debug, Clone, Copy)]
pub enum ConnectOutcome {
    /// Handshake completed.
    Connected,
    /// Identity token already in use.
    IdentityConflict,
    /// Any other failure.
    Failed,
}

impl ConnectOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::IdentityConflict => "identity_conflict",
            Self::Failed => "failed",
        }
    }
}

/// Record a tick batch received from upstream.
pub fn record_tick_batch() {
    counter!("quote_proxy_tick_batches_total").increment(1);
}

/// Record payloads accepted by client channels.
pub fn record_payloads_sent(count: u64) {
    counter!("quote_proxy_payloads_sent_total").increment(count);
}

/// Record a failed delivery.
pub fn record_delivery_failure() {
    counter!("quote_proxy_delivery_failures_total").increment(1);
}

/// Record a qualification failure.
pub fn record_qualification_failure(kind: &'static str) {
    counter!("quote_proxy_qualification_failures_total", "kind" => kind).increment(1);
}

/// Record a malformed client request.
pub fn record_malformed_request() {
    counter!("quote_proxy_malformed_requests_total").increment(1);
}

/// Record an upstream connect attempt.
pub fn record_connect_attempt(outcome: ConnectOutcome) {
    counter!("quote_proxy_connect_attempts_total", "outcome" => outcome.as_str()).increment(1);
}

/// Update the open upstream stream count.
#[allow(clippy::cast_precision_loss)]
pub fn set_upstream_streams(count: usize) {
    gauge!("quote_proxy_upstream_streams").set(count as f64);
}

/// Update the connected client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_clients(count: usize) {
    gauge!("quote_proxy_clients").set(count as f64);
}

/// Record the time spent building payloads for one batch.
pub fn record_dispatch_duration(duration: Duration) {
    histogram!("quote_proxy_dispatch_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
