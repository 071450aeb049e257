//! Exit manager — protective levels and per-bar position management.
//!
//! Levels are set once at entry, either as fixed percentages or derived from
//! ATR (each ATR-derived percentage floored and capped). Per bar, in order:
//! 1. `bars_held += 1`
//! 2. the water mark moves in the favorable direction only
//! 3. once the water mark is beyond entry, the trailing stop ratchets
//! 4. stop / trailing, then target, then max-hold are checked
//!
//! Ratchet invariant: a trailing stop may tighten, never loosen. A bar that
//! crosses both the stop side and the target is resolved as a stop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Bar, ExitReason, Feature, Position, PositionStatus, Side, TradeRecord};

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    pub stop_loss_pct: f64,
    /// 0 disables the fixed target.
    pub take_profit_pct: f64,
    /// 0 disables the fixed trailing stop.
    pub trailing_stop_pct: f64,
    pub use_atr_exits: bool,
    pub atr_stop_multiplier: f64,
    pub atr_take_profit_multiplier: f64,
    /// 0 falls back to `trailing_stop_pct`.
    pub atr_trailing_multiplier: f64,
    pub atr_pct_floor: f64,
    pub atr_pct_cap: f64,
    /// 0 disables the time exit.
    pub max_hold_bars: usize,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
            trailing_stop_pct: 0.0,
            use_atr_exits: false,
            atr_stop_multiplier: 1.8,
            atr_take_profit_multiplier: 3.0,
            atr_trailing_multiplier: 0.0,
            atr_pct_floor: 0.005,
            atr_pct_cap: 0.05,
            max_hold_bars: 0,
        }
    }
}

impl ExitConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct < 1.0) {
            return Err("stop_loss_pct must be in (0, 1)".into());
        }
        for (name, v) in [
            ("take_profit_pct", self.take_profit_pct),
            ("trailing_stop_pct", self.trailing_stop_pct),
        ] {
            if !(0.0..1.0).contains(&v) {
                return Err(format!("{name} must be in [0, 1)"));
            }
        }
        for (name, v) in [
            ("atr_stop_multiplier", self.atr_stop_multiplier),
            ("atr_take_profit_multiplier", self.atr_take_profit_multiplier),
            ("atr_trailing_multiplier", self.atr_trailing_multiplier),
        ] {
            if v < 0.0 {
                return Err(format!("{name} must be non-negative"));
            }
        }
        if !(self.atr_pct_floor > 0.0) {
            return Err("atr_pct_floor must be positive".into());
        }
        if self.atr_pct_floor > self.atr_pct_cap || self.atr_pct_cap >= 1.0 {
            return Err("atr_pct_floor <= atr_pct_cap < 1 required".into());
        }
        Ok(())
    }

    /// ATR distance as a fraction of price, floored and capped.
    pub fn atr_pct(&self, atr: f64, multiplier: f64, entry_price: f64) -> f64 {
        (atr * multiplier / entry_price).clamp(self.atr_pct_floor, self.atr_pct_cap)
    }
}

/// Protective levels for a new entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitLevels {
    pub stop: f64,
    pub target: Option<f64>,
    pub trailing_pct: f64,
}

/// A filled entry handed to the exit manager.
#[derive(Debug, Clone)]
pub struct EntryFill {
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub time: DateTime<Utc>,
    /// ATR at the signal bar, for ATR-based levels.
    pub atr: f64,
    pub features: Vec<Feature>,
    pub entry_score: f64,
    pub commission: f64,
}

/// A position that must be closed at `price`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitSignal {
    pub position_id: u64,
    pub reason: ExitReason,
    pub price: f64,
}

// ─── Manager ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExitManager {
    config: ExitConfig,
    positions: Vec<Position>,
    next_id: u64,
}

impl ExitManager {
    pub fn new(config: ExitConfig) -> Self {
        Self::with_positions(config, Vec::new())
    }

    /// Resume with persisted open positions.
    pub fn with_positions(config: ExitConfig, positions: Vec<Position>) -> Self {
        let next_id = positions.iter().map(|p| p.id).max().map_or(1, |m| m + 1);
        let positions = positions.into_iter().filter(|p| p.is_open()).collect();
        Self {
            config,
            positions,
            next_id,
        }
    }

    pub fn config(&self) -> &ExitConfig {
        &self.config
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn open_count(&self, symbol: &str) -> usize {
        self.positions.iter().filter(|p| p.symbol == symbol).count()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn levels(&self, side: Side, entry_price: f64, atr: f64) -> ExitLevels {
        let c = &self.config;
        let atr_ok = c.use_atr_exits && atr.is_finite() && atr > 0.0 && entry_price > 0.0;

        let stop_pct = if atr_ok && c.atr_stop_multiplier > 0.0 {
            c.atr_pct(atr, c.atr_stop_multiplier, entry_price)
        } else {
            c.stop_loss_pct
        };
        let target_pct = if atr_ok && c.atr_take_profit_multiplier > 0.0 {
            c.atr_pct(atr, c.atr_take_profit_multiplier, entry_price)
        } else {
            c.take_profit_pct
        };
        let trailing_pct = if atr_ok && c.atr_trailing_multiplier > 0.0 {
            c.atr_pct(atr, c.atr_trailing_multiplier, entry_price)
        } else {
            c.trailing_stop_pct
        };

        let sign = side.sign();
        ExitLevels {
            stop: entry_price * (1.0 - sign * stop_pct),
            target: (target_pct > 0.0).then(|| entry_price * (1.0 + sign * target_pct)),
            trailing_pct,
        }
    }

    /// Open a position for a filled entry. The entry bar itself is not
    /// replayed against the position.
    pub fn open(&mut self, fill: EntryFill) -> &Position {
        let levels = self.levels(fill.side, fill.price, fill.atr);
        let id = self.next_id;
        self.next_id += 1;

        debug!(
            id,
            symbol = %fill.symbol,
            side = %fill.side,
            price = fill.price,
            qty = fill.quantity,
            stop = levels.stop,
            "position opened"
        );

        self.positions.push(Position {
            id,
            symbol: fill.symbol,
            side: fill.side,
            entry_price: fill.price,
            entry_time: fill.time,
            quantity: fill.quantity,
            stop_price: levels.stop,
            target_price: levels.target,
            trailing_pct: levels.trailing_pct,
            water_mark: fill.price,
            trailing_stop: None,
            bars_held: 0,
            last_bar_time: fill.time,
            status: PositionStatus::Open,
            features: fill.features,
            entry_score: fill.entry_score,
            entry_costs: fill.commission,
        });
        let last = self.positions.len() - 1;
        &self.positions[last]
    }

    /// Apply `bar` to every open position in `symbol` and report the exits it
    /// triggers. Positions stay open until `close` is called; a bar at or
    /// before a position's last processed bar is ignored.
    pub fn on_bar(&mut self, symbol: &str, bar: &Bar) -> Vec<ExitSignal> {
        let max_hold = self.config.max_hold_bars;
        let mut exits = Vec::new();
        for pos in self.positions.iter_mut().filter(|p| p.symbol == symbol) {
            if bar.timestamp <= pos.last_bar_time {
                continue;
            }
            if let Some(signal) = step_position(pos, bar, max_hold) {
                exits.push(signal);
            }
        }
        exits
    }

    /// Close a position at `exit_price`. Terminal: the position leaves the
    /// manager and a trade record is produced.
    pub fn close(
        &mut self,
        position_id: u64,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        reason: ExitReason,
        exit_commission: f64,
    ) -> Option<TradeRecord> {
        let idx = self.positions.iter().position(|p| p.id == position_id)?;
        let mut pos = self.positions.remove(idx);
        pos.status = PositionStatus::Closed;

        let gross = pos.unrealized_pnl(exit_price);
        let costs = pos.entry_costs + exit_commission;
        debug!(
            id = pos.id,
            symbol = %pos.symbol,
            reason = %reason,
            price = exit_price,
            pnl = gross - costs,
            "position closed"
        );

        Some(TradeRecord {
            position_id: pos.id,
            symbol: pos.symbol,
            side: pos.side,
            entry_time: pos.entry_time,
            entry_price: pos.entry_price,
            exit_time,
            exit_price,
            exit_reason: reason,
            quantity: pos.quantity,
            gross_pnl: gross,
            costs,
            net_pnl: gross - costs,
            bars_held: pos.bars_held,
            features: pos.features,
            entry_score: pos.entry_score,
        })
    }
}

/// Advance one position by one bar; returns the exit it triggers, if any.
fn step_position(pos: &mut Position, bar: &Bar, max_hold_bars: usize) -> Option<ExitSignal> {
    pos.last_bar_time = bar.timestamp;
    pos.bars_held += 1;

    match pos.side {
        Side::Long => pos.water_mark = pos.water_mark.max(bar.high),
        Side::Short => pos.water_mark = pos.water_mark.min(bar.low),
    }

    let in_profit = match pos.side {
        Side::Long => pos.water_mark > pos.entry_price,
        Side::Short => pos.water_mark < pos.entry_price,
    };
    if pos.trailing_pct > 0.0 && in_profit {
        let level = pos.water_mark * (1.0 - pos.side.sign() * pos.trailing_pct);
        pos.trailing_stop = Some(match (pos.side, pos.trailing_stop) {
            (Side::Long, Some(prev)) => prev.max(level),
            (Side::Short, Some(prev)) => prev.min(level),
            (_, None) => level,
        });
    }

    let exit = |reason, price| ExitSignal {
        position_id: pos.id,
        reason,
        price,
    };

    match pos.side {
        Side::Long => {
            let stop_hit = bar.low <= pos.stop_price;
            let trail_hit = pos.trailing_stop.is_some_and(|t| bar.low <= t);
            if stop_hit || trail_hit {
                let level = pos.effective_stop();
                let reason = if trail_hit && pos.trailing_stop.is_some_and(|t| t > pos.stop_price) {
                    ExitReason::TrailingStop
                } else {
                    ExitReason::StopLoss
                };
                return Some(exit(reason, bar.open.min(level)));
            }
            if let Some(target) = pos.target_price.filter(|t| bar.high >= *t) {
                return Some(exit(ExitReason::TakeProfit, bar.open.max(target)));
            }
        }
        Side::Short => {
            let stop_hit = bar.high >= pos.stop_price;
            let trail_hit = pos.trailing_stop.is_some_and(|t| bar.high >= t);
            if stop_hit || trail_hit {
                let level = pos.effective_stop();
                let reason = if trail_hit && pos.trailing_stop.is_some_and(|t| t < pos.stop_price) {
                    ExitReason::TrailingStop
                } else {
                    ExitReason::StopLoss
                };
                return Some(exit(reason, bar.open.max(level)));
            }
            if let Some(target) = pos.target_price.filter(|t| bar.low <= *t) {
                return Some(exit(ExitReason::TakeProfit, bar.open.min(target)));
            }
        }
    }

    if max_hold_bars > 0 && pos.bars_held >= max_hold_bars {
        return Some(exit(ExitReason::MaxHold, bar.close));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 5, 13, 30, 0).unwrap() + Duration::minutes(15 * i)
    }

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(t(i), open, high, low, close, 1_000.0)
    }

    fn fill(side: Side, price: f64, atr: f64) -> EntryFill {
        EntryFill {
            symbol: "SPY".into(),
            side,
            price,
            quantity: 10.0,
            time: t(0),
            atr,
            features: vec![Feature::Trend],
            entry_score: 4.0,
            commission: 0.0,
        }
    }

    #[test]
    fn fixed_pct_levels() {
        let em = ExitManager::new(ExitConfig::default());
        let long = em.levels(Side::Long, 100.0, f64::NAN);
        assert!((long.stop - 98.0).abs() < 1e-9);
        assert!((long.target.unwrap() - 104.0).abs() < 1e-9);
        let short = em.levels(Side::Short, 100.0, f64::NAN);
        assert!((short.stop - 102.0).abs() < 1e-9);
        assert!((short.target.unwrap() - 96.0).abs() < 1e-9);
    }

    #[test]
    fn atr_stop_is_floored() {
        let em = ExitManager::new(ExitConfig {
            use_atr_exits: true,
            ..ExitConfig::default()
        });
        // 1.8 × ATR / price = 0.002 → floored to 0.005.
        let atr = 0.002 * 100.0 / 1.8;
        let levels = em.levels(Side::Long, 100.0, atr);
        assert!((levels.stop - 99.5).abs() < 1e-9);
    }

    #[test]
    fn atr_stop_is_capped() {
        let em = ExitManager::new(ExitConfig {
            use_atr_exits: true,
            ..ExitConfig::default()
        });
        let levels = em.levels(Side::Long, 100.0, 10.0);
        assert!((levels.stop - 95.0).abs() < 1e-9);
    }

    #[test]
    fn atr_missing_falls_back_to_fixed() {
        let em = ExitManager::new(ExitConfig {
            use_atr_exits: true,
            ..ExitConfig::default()
        });
        let levels = em.levels(Side::Long, 100.0, f64::NAN);
        assert!((levels.stop - 98.0).abs() < 1e-9);
    }

    #[test]
    fn zero_take_profit_disables_target() {
        let em = ExitManager::new(ExitConfig {
            take_profit_pct: 0.0,
            ..ExitConfig::default()
        });
        assert!(em.levels(Side::Long, 100.0, 1.0).target.is_none());
    }

    #[test]
    fn stop_wins_when_both_levels_cross() {
        let mut em = ExitManager::new(ExitConfig::default());
        em.open(fill(Side::Long, 100.0, 1.0));
        let exits = em.on_bar("SPY", &bar(1, 100.0, 105.0, 97.0, 101.0));
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].reason, ExitReason::StopLoss);
        assert!((exits[0].price - 98.0).abs() < 1e-9);
    }

    #[test]
    fn gap_through_stop_fills_at_open() {
        let mut em = ExitManager::new(ExitConfig::default());
        em.open(fill(Side::Long, 100.0, 1.0));
        let exits = em.on_bar("SPY", &bar(1, 96.0, 96.5, 95.0, 96.0));
        assert_eq!(exits[0].price, 96.0);
    }

    #[test]
    fn target_hit() {
        let mut em = ExitManager::new(ExitConfig::default());
        em.open(fill(Side::Short, 100.0, 1.0));
        let exits = em.on_bar("SPY", &bar(1, 99.0, 99.5, 95.5, 96.0));
        assert_eq!(exits[0].reason, ExitReason::TakeProfit);
        assert!((exits[0].price - 96.0).abs() < 1e-9);
    }

    #[test]
    fn trailing_arms_after_favorable_move_and_ratchets() {
        let mut em = ExitManager::new(ExitConfig {
            take_profit_pct: 0.0,
            trailing_stop_pct: 0.01,
            ..ExitConfig::default()
        });
        let id = em.open(fill(Side::Long, 100.0, 1.0)).id;

        // Adverse bar: water mark stays at entry, trailing not armed.
        assert!(em.on_bar("SPY", &bar(1, 100.0, 100.0, 99.2, 99.5)).is_empty());
        assert!(em.positions()[0].trailing_stop.is_none());

        assert!(em.on_bar("SPY", &bar(2, 100.0, 103.0, 102.5, 102.8)).is_empty());
        let trail = em.positions()[0].trailing_stop.unwrap();
        assert!((trail - 101.97).abs() < 1e-9);

        // Lower high does not loosen the stop.
        assert!(em.on_bar("SPY", &bar(3, 102.6, 102.7, 102.2, 102.4)).is_empty());
        assert_eq!(em.positions()[0].trailing_stop, Some(trail));

        let exits = em.on_bar("SPY", &bar(4, 102.3, 102.4, 101.0, 101.2));
        assert_eq!(exits[0].reason, ExitReason::TrailingStop);
        assert_eq!(exits[0].position_id, id);
        assert!((exits[0].price - trail).abs() < 1e-9);
    }

    #[test]
    fn max_hold_exits_at_close() {
        let mut em = ExitManager::new(ExitConfig {
            max_hold_bars: 2,
            ..ExitConfig::default()
        });
        em.open(fill(Side::Long, 100.0, 1.0));
        assert!(em.on_bar("SPY", &bar(1, 100.0, 100.5, 99.5, 100.2)).is_empty());
        let exits = em.on_bar("SPY", &bar(2, 100.2, 100.6, 99.8, 100.4));
        assert_eq!(exits[0].reason, ExitReason::MaxHold);
        assert_eq!(exits[0].price, 100.4);
    }

    #[test]
    fn same_bar_is_not_applied_twice() {
        let mut em = ExitManager::new(ExitConfig::default());
        em.open(fill(Side::Long, 100.0, 1.0));
        let b = bar(1, 100.0, 100.5, 99.5, 100.2);
        em.on_bar("SPY", &b);
        em.on_bar("SPY", &b);
        assert_eq!(em.positions()[0].bars_held, 1);
        // The entry bar itself is skipped as well.
        em.on_bar("SPY", &bar(0, 100.0, 100.5, 99.5, 100.2));
        assert_eq!(em.positions()[0].bars_held, 1);
    }

    #[test]
    fn close_is_terminal_and_charges_costs() {
        let mut em = ExitManager::new(ExitConfig::default());
        let mut f = fill(Side::Long, 100.0, 1.0);
        f.commission = 1.0;
        let id = em.open(f).id;
        let trade = em
            .close(id, 103.0, t(3), ExitReason::Manual, 1.5)
            .unwrap();
        assert!((trade.gross_pnl - 30.0).abs() < 1e-9);
        assert!((trade.costs - 2.5).abs() < 1e-9);
        assert!((trade.net_pnl - 27.5).abs() < 1e-9);
        assert_eq!(em.open_count("SPY"), 0);
        assert!(em.close(id, 103.0, t(3), ExitReason::Manual, 0.0).is_none());
    }

    #[test]
    fn resume_keeps_ids_unique() {
        let mut em = ExitManager::new(ExitConfig::default());
        em.open(fill(Side::Long, 100.0, 1.0));
        em.open(fill(Side::Long, 101.0, 1.0));
        let resumed = ExitManager::with_positions(ExitConfig::default(), em.positions().to_vec());
        assert_eq!(resumed.next_id(), 3);
        assert_eq!(resumed.open_count("SPY"), 2);
    }
}
