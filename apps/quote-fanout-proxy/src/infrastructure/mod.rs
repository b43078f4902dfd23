//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the process
//! plumbing around them.

/// Upstream broker gateway adapter.
pub mod gateway;

/// Client-facing WebSocket server.
pub mod server;

/// Configuration from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
