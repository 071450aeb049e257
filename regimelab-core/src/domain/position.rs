//! Position — an open (or just-closed) directional exposure in one symbol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::feature::Feature;

/// Direction of a signal or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1.0 for long, -1.0 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    /// Order side that opens a position in this direction.
    pub fn entry_order(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes a position in this direction.
    pub fn exit_order(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => f.write_str("LONG"),
            Side::Short => f.write_str("SHORT"),
        }
    }
}

/// Order direction as seen by a broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// A position managed by the exit manager.
///
/// `stop_price` is fixed at entry. `trailing_stop` starts unset and only ever
/// moves in the favorable direction once the water mark is beyond entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub quantity: f64,
    pub stop_price: f64,
    pub target_price: Option<f64>,
    /// Trailing distance as a fraction of the water mark; 0 disables trailing.
    pub trailing_pct: f64,
    /// Most favorable price seen since entry (high for longs, low for shorts).
    pub water_mark: f64,
    pub trailing_stop: Option<f64>,
    pub bars_held: usize,
    /// Timestamp of the last bar applied to this position.
    pub last_bar_time: DateTime<Utc>,
    pub status: PositionStatus,
    /// Features active on the entry signal, fed back to learning on close.
    pub features: Vec<Feature>,
    pub entry_score: f64,
    /// Commission paid on entry, charged against the trade on close.
    pub entry_costs: f64,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Mark-to-market PnL at `price`, before exit costs.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.side.sign() * (price - self.entry_price) * self.quantity
    }

    pub fn notional(&self) -> f64 {
        self.entry_price * self.quantity
    }

    /// The tighter of the fixed stop and the trailing stop.
    pub fn effective_stop(&self) -> f64 {
        match (self.side, self.trailing_stop) {
            (Side::Long, Some(trail)) => self.stop_price.max(trail),
            (Side::Short, Some(trail)) => self.stop_price.min(trail),
            (_, None) => self.stop_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(side: Side) -> Position {
        let t = Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap();
        Position {
            id: 1,
            symbol: "SPY".into(),
            side,
            entry_price: 100.0,
            entry_time: t,
            quantity: 10.0,
            stop_price: if side == Side::Long { 98.0 } else { 102.0 },
            target_price: None,
            trailing_pct: 0.01,
            water_mark: 100.0,
            trailing_stop: None,
            bars_held: 0,
            last_bar_time: t,
            status: PositionStatus::Open,
            features: vec![],
            entry_score: 4.0,
            entry_costs: 0.0,
        }
    }

    #[test]
    fn unrealized_pnl_is_directional() {
        assert_eq!(sample(Side::Long).unrealized_pnl(105.0), 50.0);
        assert_eq!(sample(Side::Short).unrealized_pnl(105.0), -50.0);
    }

    #[test]
    fn effective_stop_takes_tighter_level() {
        let mut long = sample(Side::Long);
        assert_eq!(long.effective_stop(), 98.0);
        long.trailing_stop = Some(99.5);
        assert_eq!(long.effective_stop(), 99.5);

        let mut short = sample(Side::Short);
        short.trailing_stop = Some(101.0);
        assert_eq!(short.effective_stop(), 101.0);
    }

    #[test]
    fn order_sides() {
        assert_eq!(Side::Long.entry_order(), OrderSide::Buy);
        assert_eq!(Side::Long.exit_order(), OrderSide::Sell);
        assert_eq!(Side::Short.entry_order(), OrderSide::Sell);
    }
}
