//! Client Message DTOs
//!
//! JSON shapes exchanged with downstream clients.
//!
//! Inbound requests are tagged by `action`:
//!
//! ```json
//! {"action":"subscribe","underlying":"AAPL","options":[{"id":"leg1","expDate":"2025-01-17","strike":150,"right":"C"}]}
//! {"action":"sync_underlying","underlying":"AAPL"}
//! ```
//!
//! Outbound payloads always carry both fields:
//!
//! ```json
//! {"underlyingPrice":187.32,"options":{"leg1":{"mark":2.15,"iv":0.27}}}
//! ```

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::ports::QualificationError;
use crate::domain::instrument::{ContractSpec, Right};

/// Leg id reserved for the underlying stream.
pub const UNDERLYING_LEG: &str = "underlying";

/// Client expiry date format.
const EXP_DATE_FORMAT: &str = "%Y-%m-%d";

// =============================================================================
// Inbound
// =============================================================================

/// One option leg of a subscribe request.
///
/// Leg contents are kept as raw JSON and checked per leg by [`Self::contract`],
/// so one bad leg cannot reject the rest of the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionLegRequest {
    /// Client-chosen leg id, echoed back as the payload key.
    pub id: String,
    /// Expiration date (`YYYY-MM-DD`).
    #[serde(default)]
    pub exp_date: Value,
    /// Strike price, a number or numeric string.
    #[serde(default)]
    pub strike: Value,
    /// `C` or `P`.
    #[serde(default)]
    pub right: Value,
}

impl OptionLegRequest {
    /// Leg with already typed fields.
    #[must_use]
    pub fn new(id: impl Into<String>, exp_date: NaiveDate, strike: f64, right: Right) -> Self {
        Self {
            id: id.into(),
            exp_date: Value::String(exp_date.format(EXP_DATE_FORMAT).to_string()),
            strike: Value::from(strike),
            right: Value::String(right.as_str().to_string()),
        }
    }

    /// Contract request for this leg on `underlying`.
    ///
    /// # Errors
    ///
    /// Returns [`QualificationError::InvalidLeg`] when the expiry, strike or
    /// right cannot be read.
    pub fn contract(&self, underlying: &str) -> Result<ContractSpec, QualificationError> {
        let expiry = self
            .exp_date
            .as_str()
            .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), EXP_DATE_FORMAT).ok())
            .ok_or_else(|| self.invalid(format!("bad expDate {}", self.exp_date)))?;

        let strike = match &self.strike {
            Value::Number(n) => n.as_f64(),
            Value::String(raw) => raw.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|s| s.is_finite() && *s > 0.0)
        .ok_or_else(|| self.invalid(format!("bad strike {}", self.strike)))?;

        let right = match self.right.as_str().map(str::trim) {
            Some("C") => Right::Call,
            Some("P") => Right::Put,
            _ => return Err(self.invalid(format!("bad right {}", self.right))),
        };

        Ok(ContractSpec::option(underlying, expiry, strike, right))
    }

    fn invalid(&self, reason: String) -> QualificationError {
        QualificationError::InvalidLeg {
            leg_id: self.id.clone(),
            reason,
        }
    }
}

/// A request sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Replace this client's subscriptions.
    Subscribe {
        /// Underlying symbol.
        underlying: String,
        /// Option legs.
        #[serde(default)]
        options: Vec<OptionLegRequest>,
    },
    /// One-shot underlying price lookup.
    SyncUnderlying {
        /// Underlying symbol.
        underlying: String,
    },
}

impl ClientRequest {
    /// Action name for logging.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::SyncUnderlying { .. } => "sync_underlying",
        }
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Resolved values for one option leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    /// Mark price.
    pub mark: f64,
    /// Implied volatility, omitted when unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<f64>,
}

/// Per-client snapshot payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotePayload {
    /// Underlying display price, `null` when unavailable.
    pub underlying_price: Option<f64>,
    /// Option leg values keyed by leg id.
    pub options: BTreeMap<String, OptionQuote>,
}

impl QuotePayload {
    /// Payload carrying only an underlying price.
    #[must_use]
    pub const fn underlying_only(price: f64) -> Self {
        Self {
            underlying_price: Some(price),
            options: BTreeMap::new(),
        }
    }

    /// Whether the payload carries no data point at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.underlying_price.is_none() && self.options.is_empty()
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_subscribe_request() {
        let raw = r#"{"action":"subscribe","underlying":"AAPL","options":[
            {"id":"leg1","expDate":"2025-01-17","strike":150,"right":"C"},
            {"id":"leg2","expDate":"2025-01-17","strike":140.5,"right":"P"}]}"#;

        let request: ClientRequest = serde_json::from_str(raw).unwrap();
        let ClientRequest::Subscribe {
            underlying,
            options,
        } = request
        else {
            panic!("expected subscribe");
        };

        assert_eq!(underlying, "AAPL");
        assert_eq!(options.len(), 2);
        let first = options[0].contract("AAPL").unwrap();
        assert_eq!(first.expiry, NaiveDate::from_ymd_opt(2025, 1, 17));
        assert_eq!(first.strike, Some(150.0));
        assert_eq!(options[1].contract("AAPL").unwrap().right, Some(Right::Put));
    }

    #[test]
    fn parse_subscribe_without_options() {
        let request: ClientRequest =
            serde_json::from_str(r#"{"action":"subscribe","underlying":"SPY"}"#).unwrap();
        assert_eq!(
            request,
            ClientRequest::Subscribe {
                underlying: "SPY".to_string(),
                options: vec![],
            }
        );
    }

    #[test]
    fn parse_sync_underlying() {
        let request: ClientRequest =
            serde_json::from_str(r#"{"action":"sync_underlying","underlying":"MSFT"}"#).unwrap();
        assert_eq!(request.action(), "sync_underlying");
    }

    #[test]
    fn reject_unknown_action() {
        assert!(serde_json::from_str::<ClientRequest>(r#"{"action":"unsubscribe"}"#).is_err());
    }

    #[test]
    fn bad_leg_fields_parse_but_fail_per_leg() {
        let raw = r#"{"action":"subscribe","underlying":"AAPL","options":[
            {"id":"date","expDate":"2025-02-30","strike":150,"right":"C"},
            {"id":"strike","expDate":"2025-01-17","strike":"abc","right":"C"},
            {"id":"right","expDate":"2025-01-17","strike":150,"right":"X"},
            {"id":"missing"}]}"#;

        let request: ClientRequest = serde_json::from_str(raw).unwrap();
        let ClientRequest::Subscribe { options, .. } = request else {
            panic!("expected subscribe");
        };

        assert_eq!(options.len(), 4);
        for leg in &options {
            match leg.contract("AAPL") {
                Err(QualificationError::InvalidLeg { leg_id, .. }) => assert_eq!(leg_id, leg.id),
                other => panic!("leg {} should be invalid, got {other:?}", leg.id),
            }
        }
    }

    #[test]
    fn numeric_string_strike_is_accepted() {
        let leg: OptionLegRequest = serde_json::from_str(
            r#"{"id":"x","expDate":"2025-01-17","strike":"140.5","right":"P"}"#,
        )
        .unwrap();
        assert_eq!(leg.contract("AAPL").unwrap().strike, Some(140.5));
    }

    #[test]
    fn leg_contract_is_smart_routed_option() {
        let leg = OptionLegRequest::new(
            "leg1",
            NaiveDate::from_ymd_opt(2025, 6, 20).unwrap(),
            200.0,
            Right::Call,
        );
        let spec = leg.contract("AAPL").unwrap();
        assert!(spec.is_option());
        assert_eq!(spec.symbol, "AAPL");
        assert_eq!(spec.exchange, "SMART");
        assert_eq!(spec.expiry, NaiveDate::from_ymd_opt(2025, 6, 20));
    }

    #[test]
    fn payload_serializes_null_underlying_and_omits_missing_iv() {
        let mut payload = QuotePayload::default();
        payload.options.insert(
            "leg1".to_string(),
            OptionQuote {
                mark: 2.15,
                iv: None,
            },
        );

        let json: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert!(json["underlyingPrice"].is_null());
        assert_eq!(json["options"]["leg1"]["mark"], 2.15);
        assert!(json["options"]["leg1"].get("iv").is_none());
    }

    #[test]
    fn sync_payload_has_empty_options() {
        let json = QuotePayload::underlying_only(187.5).to_json().unwrap();
        assert_eq!(json, r#"{"underlyingPrice":187.5,"options":{}}"#);
    }

    #[test]
    fn empty_payload_detection() {
        assert!(QuotePayload::default().is_empty());
        assert!(!QuotePayload::underlying_only(1.0).is_empty());
    }
}
