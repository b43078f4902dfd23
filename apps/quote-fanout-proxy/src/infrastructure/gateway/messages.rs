//! Gateway Wire Messages
//!
//! JSON frames exchanged with the broker gateway bridge.
//!
//! # Requests (tagged by `op`)
//!
//! ```json
//! {"op":"hello","clientId":999}
//! {"op":"qualify","reqId":7,"contract":{"symbol":"AAPL","secType":"STK","exchange":"SMART","currency":"USD"}}
//! {"op":"marketDataType","kind":3}
//! {"op":"reqMktData","conId":265598,"contract":{...},"genericTicks":"106"}
//! {"op":"cancelMktData","conId":265598}
//! ```
//!
//! # Messages (tagged by `type`)
//!
//! ```json
//! {"type":"ready","serverVersion":176}
//! {"type":"error","reqId":7,"code":200,"message":"No security definition has been found"}
//! {"type":"qualified","reqId":7,"contracts":[{"conId":265598,"symbol":"AAPL",...}]}
//! {"type":"ticks","updates":[{"conId":265598,"bid":187.3,"ask":187.34}]}
//! ```
//!
//! # Error Codes
//! - 200: No security definition found
//! - 326: Client id already in use

use serde::{Deserialize, Serialize};

use crate::domain::instrument::{ContractId, ContractSpec, Instrument};
use crate::domain::quote::TickUpdate;

/// Gateway error code for an identity already in use.
pub const CODE_IDENTITY_IN_USE: i32 = 326;

/// Gateway error code for an unknown contract.
pub const CODE_NO_SECURITY_DEFINITION: i32 = 200;

/// Request frames sent to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum GatewayRequest {
    /// Session handshake.
    #[serde(rename_all = "camelCase")]
    Hello {
        /// Identity token.
        client_id: i32,
    },
    /// Contract qualification.
    #[serde(rename_all = "camelCase")]
    Qualify {
        /// Correlation id.
        req_id: u64,
        /// Requested contract.
        contract: ContractSpec,
    },
    /// Market data mode selection.
    MarketDataType {
        /// Upstream mode code.
        kind: u8,
    },
    /// Start a quote stream.
    #[serde(rename_all = "camelCase")]
    ReqMktData {
        /// Contract id used as stream id.
        con_id: ContractId,
        /// Qualified contract.
        contract: ContractSpec,
        /// Generic tick list.
        generic_ticks: String,
    },
    /// Stop a quote stream.
    #[serde(rename_all = "camelCase")]
    CancelMktData {
        /// Contract id of the stream.
        con_id: ContractId,
    },
}

impl GatewayRequest {
    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frames received from the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GatewayMessage {
    /// Handshake accepted.
    #[serde(rename_all = "camelCase")]
    Ready {
        /// Gateway protocol version.
        #[serde(default)]
        server_version: Option<u32>,
    },
    /// Error, optionally tied to a request.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Correlated request, if any.
        #[serde(default)]
        req_id: Option<u64>,
        /// Gateway error code.
        code: i32,
        /// Human-readable message.
        #[serde(default)]
        message: String,
    },
    /// Qualification result.
    #[serde(rename_all = "camelCase")]
    Qualified {
        /// Correlation id.
        req_id: u64,
        /// Matching contracts.
        #[serde(default)]
        contracts: Vec<Instrument>,
    },
    /// Batch of tick updates.
    Ticks {
        /// Updates in arrival order.
        updates: Vec<TickUpdate>,
    },
}

impl GatewayMessage {
    /// Parse a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a known message.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
