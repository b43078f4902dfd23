//! Quote Value Resolver
//!
//! Derives the single displayable price (and implied volatility for option
//! legs) from a raw tick snapshot.
//!
//! # Fallback chain for option legs
//!
//! 1. Bid/ask midpoint, rounded to 4 decimal places.
//! 2. Model theoretical price, rounded to 4 decimal places.
//! 3. Best available trade/mid price.
//!
//! Implied volatility prefers the model value over the plain tick and is only
//! reported together with a resolved price.

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use super::quote::{TickSnapshot, valid};

/// Decimal places kept for mark and model prices.
pub const PRICE_DECIMALS: u32 = 4;

/// Which kind of leg a snapshot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegKind {
    /// The underlying stock.
    Underlying,
    /// An option leg.
    Derivative,
}

/// A resolved, presentable quote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedQuote {
    /// Display price.
    pub price: f64,
    /// Implied volatility (option legs only).
    pub iv: Option<f64>,
}

/// Resolve a snapshot into a presentable quote.
///
/// Returns `None` when no valid price can be derived.
#[must_use]
pub fn resolve(snapshot: &TickSnapshot, kind: LegKind) -> Option<ResolvedQuote> {
    match kind {
        LegKind::Underlying => {
            underlying_price(snapshot).map(|price| ResolvedQuote { price, iv: None })
        }
        LegKind::Derivative => option_mark(snapshot).map(|price| ResolvedQuote {
            price,
            iv: implied_volatility(snapshot),
        }),
    }
}

/// Display price for the underlying.
#[must_use]
pub fn underlying_price(snapshot: &TickSnapshot) -> Option<f64> {
    snapshot.market_price()
}

/// Mark price for an option leg.
#[must_use]
pub fn option_mark(snapshot: &TickSnapshot) -> Option<f64> {
    snapshot
        .midpoint()
        .and_then(round_price)
        .or_else(|| model_price(snapshot).and_then(round_price))
        .or_else(|| snapshot.market_price())
}

/// Implied volatility for an option leg.
#[must_use]
pub fn implied_volatility(snapshot: &TickSnapshot) -> Option<f64> {
    snapshot
        .model_greeks
        .and_then(|greeks| valid(greeks.implied_vol))
        .or_else(|| valid(snapshot.implied_volatility))
}

fn model_price(snapshot: &TickSnapshot) -> Option<f64> {
    snapshot.model_greeks.and_then(|greeks| valid(greeks.opt_price))
}

/// Round to [`PRICE_DECIMALS`] places with banker's rounding.
///
/// The rounded value goes through the validity filter again, so a tiny
/// positive price that rounds to zero is dropped.
#[must_use]
pub fn round_price(value: f64) -> Option<f64> {
    // Parsing the decimal text yields the f64 closest to the rounded value.
    let rounded = Decimal::from_f64(value)
        .map(|d| d.round_dp(PRICE_DECIMALS))
        .and_then(|d| d.to_string().parse::<f64>().ok())
        .unwrap_or(value);
    valid(Some(rounded))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;
    use crate::domain::quote::ModelGreeks;

    fn option_snapshot(
        bid: Option<f64>,
        ask: Option<f64>,
        model: Option<f64>,
        close: Option<f64>,
    ) -> TickSnapshot {
        TickSnapshot {
            bid,
            ask,
            close,
            model_greeks: model.map(|opt_price| ModelGreeks {
                opt_price: Some(opt_price),
                ..ModelGreeks::default()
            }),
            ..TickSnapshot::default()
        }
    }

    #[test]
    fn midpoint_wins_over_model_price() {
        let snapshot = option_snapshot(Some(10.0), Some(12.0), Some(11.5), None);
        assert_eq!(option_mark(&snapshot), Some(11.0));
    }

    #[test]
    fn model_price_used_when_quotes_are_nan() {
        let snapshot = option_snapshot(Some(f64::NAN), Some(f64::NAN), Some(5.25), None);
        assert_eq!(option_mark(&snapshot), Some(5.25));
    }

    #[test_case(Some(1.0), Some(1.5), None, None => Some(1.25) ; "midpoint")]
    #[test_case(Some(0.0), Some(1.5), Some(1.333_33), None => Some(1.3333) ; "model rounded")]
    #[test_case(None, None, Some(f64::NAN), Some(2.1) => Some(2.1) ; "previous close")]
    #[test_case(None, None, Some(-3.0), Some(0.0) => None ; "nothing valid")]
    #[test_case(Some(0.123_45), Some(0.123_47), None, None => Some(0.1235) ; "midpoint rounded")]
    fn fallback_chain(
        bid: Option<f64>,
        ask: Option<f64>,
        model: Option<f64>,
        close: Option<f64>,
    ) -> Option<f64> {
        option_mark(&option_snapshot(bid, ask, model, close))
    }

    #[test]
    fn iv_prefers_model_value() {
        let snapshot = TickSnapshot {
            implied_volatility: Some(0.30),
            model_greeks: Some(ModelGreeks {
                implied_vol: Some(0.25),
                ..ModelGreeks::default()
            }),
            ..TickSnapshot::default()
        };
        assert_eq!(implied_volatility(&snapshot), Some(0.25));
    }

    #[test]
    fn iv_falls_back_to_plain_tick() {
        let snapshot = TickSnapshot {
            implied_volatility: Some(0.30),
            model_greeks: Some(ModelGreeks {
                implied_vol: Some(f64::NAN),
                ..ModelGreeks::default()
            }),
            ..TickSnapshot::default()
        };
        assert_eq!(implied_volatility(&snapshot), Some(0.30));
    }

    #[test]
    fn iv_not_reported_without_price() {
        let snapshot = TickSnapshot {
            implied_volatility: Some(0.30),
            ..TickSnapshot::default()
        };
        assert_eq!(resolve(&snapshot, LegKind::Derivative), None);
    }

    #[test]
    fn underlying_ignores_model_price() {
        let snapshot = option_snapshot(None, None, Some(5.0), None);
        assert_eq!(resolve(&snapshot, LegKind::Underlying), None);
    }

    #[test]
    fn underlying_reports_market_price() {
        let snapshot = TickSnapshot {
            last: Some(187.32),
            bid: Some(187.30),
            ask: Some(187.34),
            ..TickSnapshot::default()
        };
        let resolved = resolve(&snapshot, LegKind::Underlying).unwrap();
        assert_eq!(resolved.price, 187.32);
        assert_eq!(resolved.iv, None);
    }

    #[test]
    fn round_price_drops_values_that_round_to_zero() {
        assert_eq!(round_price(0.000_01), None);
        assert_eq!(round_price(2.000_05), Some(2.0));
    }

    fn raw_field() -> impl Strategy<Value = Option<f64>> {
        prop_oneof![
            Just(None),
            Just(Some(f64::NAN)),
            Just(Some(0.0)),
            Just(Some(f64::INFINITY)),
            (-1_000.0f64..1_000.0).prop_map(Some),
        ]
    }

    proptest! {
        #[test]
        fn resolved_values_are_always_positive_and_finite(
            bid in raw_field(),
            ask in raw_field(),
            last in raw_field(),
            close in raw_field(),
            iv in raw_field(),
            model_price in raw_field(),
            model_iv in raw_field(),
        ) {
            let snapshot = TickSnapshot {
                bid,
                ask,
                last,
                close,
                implied_volatility: iv,
                model_greeks: Some(ModelGreeks {
                    opt_price: model_price,
                    implied_vol: model_iv,
                    ..ModelGreeks::default()
                }),
            };

            for kind in [LegKind::Underlying, LegKind::Derivative] {
                if let Some(resolved) = resolve(&snapshot, kind) {
                    prop_assert!(resolved.price.is_finite() && resolved.price > 0.0);
                    if let Some(iv) = resolved.iv {
                        prop_assert!(iv.is_finite() && iv > 0.0);
                    }
                }
            }
        }
    }
}
