//! Friction model — spread, slippage, commission, latency and partial fills.
//!
//! Price frictions are directional: buyers pay half the spread plus slippage
//! above the quote, sellers receive the same amount below it. Commission is
//! charged per side in basis points of filled notional.

use serde::{Deserialize, Serialize};

use crate::domain::OrderSide;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrictionModel {
    pub spread_bps: f64,
    pub slippage_bps: f64,
    pub commission_bps: f64,
    /// Bars between signal and entry fill. 0 fills at the signal bar close.
    pub latency_bars: usize,
    /// Share of the intended quantity that fills, in percent.
    pub partial_fill_pct: f64,
}

impl Default for FrictionModel {
    fn default() -> Self {
        Self {
            spread_bps: 2.0,
            slippage_bps: 1.0,
            commission_bps: 0.0,
            latency_bars: 0,
            partial_fill_pct: 100.0,
        }
    }
}

impl FrictionModel {
    pub fn frictionless() -> Self {
        Self {
            spread_bps: 0.0,
            slippage_bps: 0.0,
            commission_bps: 0.0,
            latency_bars: 0,
            partial_fill_pct: 100.0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [
            ("spread_bps", self.spread_bps),
            ("slippage_bps", self.slippage_bps),
            ("commission_bps", self.commission_bps),
        ] {
            if !(v >= 0.0) {
                return Err(format!("{name} must be non-negative"));
            }
        }
        if !(self.partial_fill_pct > 0.0 && self.partial_fill_pct <= 100.0) {
            return Err("partial_fill_pct must be in (0, 100]".into());
        }
        Ok(())
    }

    /// Adverse price shift as a fraction of the quote.
    pub fn adverse_fraction(&self) -> f64 {
        (self.spread_bps / 2.0 + self.slippage_bps) / 10_000.0
    }

    /// Fill price for an order at `quote`.
    pub fn fill_price(&self, quote: f64, side: OrderSide) -> f64 {
        let shift = self.adverse_fraction();
        match side {
            OrderSide::Buy => quote * (1.0 + shift),
            OrderSide::Sell => quote * (1.0 - shift),
        }
    }

    /// Quantity that actually fills out of `intended`.
    pub fn filled_quantity(&self, intended: f64) -> f64 {
        intended * (self.partial_fill_pct / 100.0)
    }

    pub fn commission(&self, fill_price: f64, quantity: f64) -> f64 {
        fill_price * quantity * (self.commission_bps / 10_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frictionless_passes_quote_through() {
        let f = FrictionModel::frictionless();
        assert_eq!(f.fill_price(100.0, OrderSide::Buy), 100.0);
        assert_eq!(f.fill_price(100.0, OrderSide::Sell), 100.0);
        assert_eq!(f.filled_quantity(10.0), 10.0);
        assert_eq!(f.commission(100.0, 10.0), 0.0);
    }

    #[test]
    fn buy_pays_half_spread_plus_slippage() {
        let f = FrictionModel {
            spread_bps: 4.0,
            slippage_bps: 3.0,
            ..FrictionModel::frictionless()
        };
        // (2 + 3) bps = 0.05%
        assert!((f.fill_price(100.0, OrderSide::Buy) - 100.05).abs() < 1e-10);
        assert!((f.fill_price(100.0, OrderSide::Sell) - 99.95).abs() < 1e-10);
    }

    #[test]
    fn partial_fill_and_commission() {
        let f = FrictionModel {
            commission_bps: 5.0,
            partial_fill_pct: 60.0,
            ..FrictionModel::frictionless()
        };
        assert!((f.filled_quantity(10.0) - 6.0).abs() < 1e-12);
        // 100 × 1000 × 5 bps = 50
        assert!((f.commission(100.0, 1_000.0) - 50.0).abs() < 1e-10);
    }

    #[test]
    fn validation_bounds() {
        assert!(FrictionModel::default().validate().is_ok());
        let bad = FrictionModel {
            partial_fill_pct: 0.0,
            ..FrictionModel::default()
        };
        assert!(bad.validate().is_err());
        let bad = FrictionModel {
            slippage_bps: -1.0,
            ..FrictionModel::default()
        };
        assert!(bad.validate().is_err());
    }
}
