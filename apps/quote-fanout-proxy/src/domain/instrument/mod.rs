//! Instrument Types
//!
//! Contract descriptions as requested by clients (`ContractSpec`) and as
//! confirmed by the upstream session (`Instrument`). Only qualified
//! instruments can be streamed; equivalence between requests from different
//! clients is decided by the upstream contract id.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Upstream contract identifier assigned during qualification.
pub type ContractId = i64;

/// Default routing exchange for qualification requests.
pub const SMART_EXCHANGE: &str = "SMART";

/// Default currency for qualification requests.
pub const USD: &str = "USD";

/// Equity option contract multiplier.
pub const OPTION_MULTIPLIER: &str = "100";

// =============================================================================
// Security Type / Right
// =============================================================================

/// Security type of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityType {
    /// Common stock or ETF.
    #[serde(rename = "STK")]
    Stock,
    /// Listed equity option.
    #[serde(rename = "OPT")]
    Option,
}

/// Option right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Right {
    /// Call option.
    #[serde(rename = "C")]
    Call,
    /// Put option.
    #[serde(rename = "P")]
    Put,
}

impl Right {
    /// Single-letter code used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Contract Spec (unqualified)
// =============================================================================

/// A contract as requested, before upstream qualification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSpec {
    /// Underlying symbol (e.g. "AAPL").
    pub symbol: String,
    /// Security type.
    pub sec_type: SecurityType,
    /// Routing exchange.
    pub exchange: String,
    /// Currency.
    pub currency: String,
    /// Expiry for options, formatted `YYYYMMDD` on the wire.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "expiry_format"
    )]
    pub expiry: Option<NaiveDate>,
    /// Strike for options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike: Option<f64>,
    /// Right for options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<Right>,
    /// Contract multiplier for options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<String>,
}

impl ContractSpec {
    /// Stock routed through SMART in USD.
    #[must_use]
    pub fn stock(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            sec_type: SecurityType::Stock,
            exchange: SMART_EXCHANGE.to_string(),
            currency: USD.to_string(),
            expiry: None,
            strike: None,
            right: None,
            multiplier: None,
        }
    }

    /// Equity option routed through SMART in USD with the standard multiplier.
    #[must_use]
    pub fn option(symbol: impl Into<String>, expiry: NaiveDate, strike: f64, right: Right) -> Self {
        Self {
            symbol: symbol.into(),
            sec_type: SecurityType::Option,
            exchange: SMART_EXCHANGE.to_string(),
            currency: USD.to_string(),
            expiry: Some(expiry),
            strike: Some(strike),
            right: Some(right),
            multiplier: Some(OPTION_MULTIPLIER.to_string()),
        }
    }

    /// Whether this describes an option contract.
    #[must_use]
    pub const fn is_option(&self) -> bool {
        matches!(self.sec_type, SecurityType::Option)
    }
}

impl fmt::Display for ContractSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.expiry, self.strike, self.right) {
            (Some(expiry), Some(strike), Some(right)) => write!(
                f,
                "{} {} {} {}",
                self.symbol,
                expiry.format("%Y%m%d"),
                strike,
                right
            ),
            _ => f.write_str(&self.symbol),
        }
    }
}

// =============================================================================
// Instrument (qualified)
// =============================================================================

/// A contract confirmed by the upstream session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    /// Upstream contract id.
    pub con_id: ContractId,
    /// Contract details as returned by the upstream.
    #[serde(flatten)]
    pub spec: ContractSpec,
}

impl Instrument {
    /// Create a qualified instrument.
    #[must_use]
    pub const fn new(con_id: ContractId, spec: ContractSpec) -> Self {
        Self { con_id, spec }
    }

    /// Underlying symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.spec.symbol
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (conId {})", self.spec, self.con_id)
    }
}

/// Additional upstream tick types requested with a quote stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExtraTicks {
    /// Default top-of-book ticks only.
    #[default]
    None,
    /// Option implied volatility and model greeks.
    OptionGreeks,
}

impl ExtraTicks {
    /// Upstream generic tick list.
    #[must_use]
    pub const fn generic_tick_list(self) -> &'static str {
        match self {
            Self::None => "",
            Self::OptionGreeks => "106",
        }
    }
}

mod expiry_format {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y%m%d";

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(date) => s.serialize_str(&date.format(FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| NaiveDate::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom))
            .transpose()
    }
}
