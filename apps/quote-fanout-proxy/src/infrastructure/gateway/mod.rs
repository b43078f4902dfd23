//! Broker Gateway Adapter
//!
//! Connects to the broker terminal through a gateway bridge speaking JSON
//! over WebSocket and implements the market data session port on top of it.

pub mod messages;
pub mod session;

pub use messages::{GatewayMessage, GatewayRequest};
pub use session::{GatewayConfig, GatewayError, GatewaySession};
