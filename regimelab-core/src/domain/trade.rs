//! TradeRecord — a completed round-trip trade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::feature::Feature;
use super::position::Side;

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    MaxHold,
    /// Forced close at the last bar of a replay.
    EndOfData,
    Manual,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::MaxHold => "max_hold",
            ExitReason::EndOfData => "end_of_data",
            ExitReason::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// A complete round-trip trade record: entry → exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    // ── Identification ──
    pub position_id: u64,
    pub symbol: String,
    pub side: Side,

    // ── Entry ──
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,

    // ── Exit ──
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_reason: ExitReason,

    // ── Size ──
    pub quantity: f64,

    // ── PnL ──
    pub gross_pnl: f64,
    /// Entry plus exit commission.
    pub costs: f64,
    pub net_pnl: f64,

    // ── Duration ──
    pub bars_held: usize,

    // ── Signal traceability ──
    pub features: Vec<Feature>,
    pub entry_score: f64,
}

impl TradeRecord {
    /// Return on the trade as a fraction of entry cost.
    pub fn return_pct(&self) -> f64 {
        if self.entry_price == 0.0 || self.quantity == 0.0 {
            return 0.0;
        }
        self.net_pnl / (self.entry_price * self.quantity)
    }

    pub fn is_winner(&self) -> bool {
        self.net_pnl > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_trade(net_pnl: f64) -> TradeRecord {
        TradeRecord {
            position_id: 7,
            symbol: "SPY".into(),
            side: Side::Long,
            entry_time: Utc.with_ymd_and_hms(2024, 1, 5, 15, 0, 0).unwrap(),
            entry_price: 100.0,
            exit_time: Utc.with_ymd_and_hms(2024, 1, 5, 18, 0, 0).unwrap(),
            exit_price: 100.0 + net_pnl / 10.0,
            exit_reason: ExitReason::TakeProfit,
            quantity: 10.0,
            gross_pnl: net_pnl,
            costs: 0.0,
            net_pnl,
            bars_held: 12,
            features: vec![Feature::Trend],
            entry_score: 4.5,
        }
    }

    #[test]
    fn return_pct_uses_entry_notional() {
        assert!((sample_trade(50.0).return_pct() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn flat_trade_is_not_a_winner() {
        assert!(!sample_trade(0.0).is_winner());
        assert!(sample_trade(0.01).is_winner());
    }

    #[test]
    fn exit_reason_display() {
        assert_eq!(ExitReason::StopLoss.to_string(), "stop_loss");
        assert_eq!(ExitReason::EndOfData.to_string(), "end_of_data");
    }
}
