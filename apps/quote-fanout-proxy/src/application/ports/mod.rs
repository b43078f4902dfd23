//! Port Interfaces
//!
//! Contracts that infrastructure adapters implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `MarketDataSession`: the single upstream broker market data session
//! - `ClientChannel`: best-effort delivery of payloads to one client

mod client_channel_port;
mod market_data_session_port;

#[cfg(test)]
pub use client_channel_port::MockClientChannel;
pub use client_channel_port::{ClientChannel, DeliveryError};
pub use market_data_session_port::{
    MarketDataSession, MarketDataType, QualificationError, SessionError, SessionEvent,
};
