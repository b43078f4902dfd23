//! Market Data Session Port (Driven Port)
//!
//! Interface to the single upstream broker session. Stream requests and
//! cancellations come from the [`StreamSource`] supertrait and must not
//! block; tick batches arrive on the [`SessionEvent`] channel the adapter was
//! constructed with.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::domain::instrument::{ContractId, ContractSpec, Instrument};
use crate::domain::subscription::StreamSource;

/// Upstream connection error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// The identity token is already in use by another session.
    #[error("identity {identity} already in use")]
    IdentityConflict {
        /// The rejected identity token.
        identity: i32,
    },

    /// Upstream unreachable or handshake failed.
    #[error("upstream connection failed: {0}")]
    Connection(String),
}

/// Contract qualification error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QualificationError {
    /// No contract matches the request.
    #[error("no contract found for {contract}")]
    NotFound {
        /// The requested contract.
        contract: String,
    },

    /// More than one contract matches the request.
    #[error("ambiguous contract {contract}")]
    Ambiguous {
        /// The requested contract.
        contract: String,
    },

    /// The upstream rejected the request.
    #[error("qualification rejected for {contract}: {message}")]
    Rejected {
        /// The requested contract.
        contract: String,
        /// Upstream error message.
        message: String,
    },

    /// The upstream session closed before answering.
    #[error("upstream session closed")]
    SessionClosed,

    /// The request itself is unusable (e.g. a reserved leg id).
    #[error("invalid leg {leg_id}: {reason}")]
    InvalidLeg {
        /// Client-supplied leg id.
        leg_id: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl QualificationError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Ambiguous { .. } => "ambiguous",
            Self::Rejected { .. } => "rejected",
            Self::SessionClosed => "session_closed",
            Self::InvalidLeg { .. } => "invalid_leg",
        }
    }
}

/// Upstream market data mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarketDataType {
    /// Real-time streaming data.
    Live,
    /// Last recorded data at market close.
    Frozen,
    /// Delayed data, used when live entitlements are unavailable.
    #[default]
    Delayed,
    /// Delayed data frozen at market close.
    DelayedFrozen,
}

impl MarketDataType {
    /// Upstream numeric code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Live => 1,
            Self::Frozen => 2,
            Self::Delayed => 3,
            Self::DelayedFrozen => 4,
        }
    }
}

impl fmt::Display for MarketDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Live => "live",
            Self::Frozen => "frozen",
            Self::Delayed => "delayed",
            Self::DelayedFrozen => "delayed_frozen",
        };
        f.write_str(name)
    }
}

impl FromStr for MarketDataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" | "1" => Ok(Self::Live),
            "frozen" | "2" => Ok(Self::Frozen),
            "delayed" | "3" => Ok(Self::Delayed),
            "delayed_frozen" | "delayed-frozen" | "4" => Ok(Self::DelayedFrozen),
            other => Err(format!("unknown market data type: {other}")),
        }
    }
}

/// Events emitted by the upstream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A batch of tick updates was applied to the listed streams.
    TickBatch(Vec<ContractId>),
    /// The upstream session dropped.
    Disconnected,
}

/// Port for the upstream broker market data session.
#[async_trait]
pub trait MarketDataSession: StreamSource {
    /// Perform the handshake with the given identity token.
    async fn connect(&self, identity: i32) -> Result<(), SessionError>;

    /// Resolve a contract request into a qualified instrument.
    async fn qualify(&self, spec: ContractSpec) -> Result<Instrument, QualificationError>;

    /// Select the market data mode for subsequent streams.
    async fn request_market_data_type(&self, kind: MarketDataType);

    /// Close the upstream session.
    async fn disconnect(&self);

    /// Whether the handshake completed and the session is still open.
    fn is_connected(&self) -> bool;
}
