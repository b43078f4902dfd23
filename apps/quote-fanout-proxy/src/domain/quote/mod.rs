//! Raw Tick Types
//!
//! The latest raw tick state for one upstream stream. Every numeric field
//! may be absent, NaN, zero or negative; upstream feeds emit those values for
//! "no data yet". Consumers must read fields through [`valid`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::instrument::{ContractId, Instrument};

/// Returns the value only if it is finite and strictly positive.
///
/// This is the single validity filter applied to every numeric tick field.
#[must_use]
pub fn valid(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

/// Model-computed option values from the extended tick set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelGreeks {
    /// Model implied volatility.
    #[serde(default)]
    pub implied_vol: Option<f64>,
    /// Model theoretical option price.
    #[serde(default)]
    pub opt_price: Option<f64>,
    /// Delta.
    #[serde(default)]
    pub delta: Option<f64>,
    /// Gamma.
    #[serde(default)]
    pub gamma: Option<f64>,
    /// Vega.
    #[serde(default)]
    pub vega: Option<f64>,
    /// Theta.
    #[serde(default)]
    pub theta: Option<f64>,
    /// Underlying price used by the model.
    #[serde(default)]
    pub und_price: Option<f64>,
}

/// Latest raw tick values for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickSnapshot {
    /// Best bid.
    pub bid: Option<f64>,
    /// Best ask.
    pub ask: Option<f64>,
    /// Last trade price.
    pub last: Option<f64>,
    /// Previous close.
    pub close: Option<f64>,
    /// Plain implied volatility tick.
    pub implied_volatility: Option<f64>,
    /// Model greeks, present only when the extended tick set was requested.
    pub model_greeks: Option<ModelGreeks>,
}

impl TickSnapshot {
    /// Bid/ask midpoint if both sides are valid.
    #[must_use]
    pub fn midpoint(&self) -> Option<f64> {
        let bid = valid(self.bid)?;
        let ask = valid(self.ask)?;
        valid(Some(f64::midpoint(bid, ask)))
    }

    /// Best available trade/mid price.
    ///
    /// The last trade when it sits inside a valid bid/ask spread, otherwise
    /// the midpoint, otherwise the previous close.
    #[must_use]
    pub fn market_price(&self) -> Option<f64> {
        let inside_spread = match (valid(self.bid), valid(self.ask), valid(self.last)) {
            (Some(bid), Some(ask), Some(last)) if bid <= last && last <= ask => Some(last),
            _ => None,
        };

        inside_spread
            .or_else(|| self.midpoint())
            .or_else(|| valid(self.close))
    }

    /// Merge a tick update into this snapshot.
    ///
    /// Fields absent from the update keep their previous value.
    pub fn apply(&mut self, update: &TickUpdate) {
        merge(&mut self.bid, update.bid);
        merge(&mut self.ask, update.ask);
        merge(&mut self.last, update.last);
        merge(&mut self.close, update.close);
        merge(&mut self.implied_volatility, update.implied_vol);
        if let Some(greeks) = update.model_greeks {
            self.model_greeks = Some(greeks);
        }
    }
}

fn merge(slot: &mut Option<f64>, value: Option<f64>) {
    if value.is_some() {
        *slot = value;
    }
}

/// A raw tick update for one stream, as delivered in a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickUpdate {
    /// Contract the update belongs to.
    pub con_id: ContractId,
    /// Best bid.
    #[serde(default)]
    pub bid: Option<f64>,
    /// Best ask.
    #[serde(default)]
    pub ask: Option<f64>,
    /// Last trade price.
    #[serde(default)]
    pub last: Option<f64>,
    /// Previous close.
    #[serde(default)]
    pub close: Option<f64>,
    /// Plain implied volatility.
    #[serde(default)]
    pub implied_vol: Option<f64>,
    /// Model greeks.
    #[serde(default)]
    pub model_greeks: Option<ModelGreeks>,
}

// =============================================================================
// Live Ticker
// =============================================================================

/// Live view of one upstream quote stream.
///
/// Created by the upstream session when a stream is requested and updated in
/// place as ticks arrive. Readers take a copy of the snapshot.
#[derive(Debug)]
pub struct LiveTicker {
    instrument: Instrument,
    snapshot: RwLock<TickSnapshot>,
}

impl LiveTicker {
    /// Create a ticker with an empty snapshot.
    #[must_use]
    pub fn new(instrument: Instrument) -> Self {
        Self {
            instrument,
            snapshot: RwLock::new(TickSnapshot::default()),
        }
    }

    /// The streamed instrument.
    #[must_use]
    pub const fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Copy of the latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TickSnapshot {
        *self.snapshot.read()
    }

    /// Apply a tick update.
    pub fn apply(&self, update: &TickUpdate) {
        self.snapshot.write().apply(update);
    }
}
