#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Quote Fan-out Proxy - Broker Market Data Multiplexer
//!
//! Holds a single upstream market-data session to the broker terminal and
//! serves many WebSocket clients. Each client subscribes to one underlying
//! plus a set of option legs and receives a JSON snapshot of display prices
//! every time the upstream delivers a tick batch. Identical instruments
//! requested by several clients share one upstream stream.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Instruments, tick snapshots and pricing rules
//!   - `instrument`: Contract requests and qualified instruments
//!   - `quote`: Raw tick snapshots and live tickers
//!   - `pricing`: Mark price and implied volatility resolution
//!   - `subscription`: Reference-counted upstream stream registry
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream session and client channel interfaces
//!   - `services`: Session table, fan-out dispatcher, connector
//!   - `dto`: Client request and payload shapes
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `gateway`: Upstream session over the broker gateway WebSocket
//!   - `server`: Client-facing WebSocket server
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                     ┌──────────────┐   tick batch   ┌────────────┐
//! Broker gateway ────►│   Gateway    │───────────────►│ Dispatcher │
//!                     │   session    │                └─────┬──────┘
//!                     └──────▲───────┘                      │ payload per client
//!                            │ request / cancel             ▼
//!                     ┌──────┴───────┐  bindings   ┌───────────────┐
//!                     │    Stream    │◄────────────│ Session table │──► Client 1..N
//!                     │   registry   │             └───────────────┘
//!                     └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pricing rules and stream bookkeeping with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::instrument::{ContractId, ContractSpec, ExtraTicks, Instrument, Right};
pub use domain::quote::{LiveTicker, TickSnapshot};
pub use domain::subscription::{StreamHandle, StreamRegistry, StreamSource};

// Application services
pub use application::dto::{ClientRequest, OptionLegRequest, QuotePayload};
pub use application::ports::{ClientChannel, MarketDataSession, SessionEvent};
pub use application::services::{ClientSessionTable, FanoutDispatcher, SessionConnector};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ProxyConfig};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::server::{ServerError, WsServer};

// Upstream adapter
pub use infrastructure::gateway::{GatewayConfig, GatewaySession};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
