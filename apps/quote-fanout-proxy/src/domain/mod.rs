//! Domain Layer - Instruments, ticks, pricing and stream bookkeeping.
//!
//! Pure types and rules with no I/O. The upstream session is reached only
//! through the [`subscription::StreamSource`] trait.

/// Contract requests and qualified instruments.
pub mod instrument;

/// Raw tick snapshots and live tickers.
pub mod quote;

/// Display price and implied volatility resolution.
pub mod pricing;

/// Shared upstream stream registry.
pub mod subscription;
