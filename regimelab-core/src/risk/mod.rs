//! Risk manager — the ordered entry gate and the state it guards.
//!
//! Gates are evaluated in a fixed order and the first failure wins:
//! 1. data quality (no bars, stale bars, insufficient warmup)
//! 2. cooldown after a losing streak
//! 3. daily realized-loss limit
//! 4. trades-per-day limit
//! 5. position scaling
//! 6. session hours and blackout windows
//!
//! `RiskState` is only mutated by `roll_day` (inside `check`) and
//! `record_close`. Counters reset when the session-day key advances.

pub mod session;

pub use session::{Blackout, SessionBlock, SessionConfig, TimeWindow};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Equity the daily-loss limit is measured against.
    pub account_equity: f64,
    pub max_daily_loss_pct: f64,
    pub max_trade_risk_pct: f64,
    /// Configured notional per entry before risk capping.
    pub order_notional: f64,
    pub max_trades_per_day: u32,
    pub max_consecutive_losses: u32,
    pub cooldown_minutes: i64,
    pub stale_after_minutes: i64,
    pub warmup_bars: usize,
    pub allow_position_scaling: bool,
    /// Cap on simultaneous positions per symbol when scaling is allowed.
    pub max_open_positions: usize,
    /// UTC hour at which the trading day rolls over.
    pub day_boundary_utc_hour: u32,
    pub session: SessionConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            account_equity: 10_000.0,
            max_daily_loss_pct: 2.0,
            max_trade_risk_pct: 1.0,
            order_notional: 250.0,
            max_trades_per_day: 6,
            max_consecutive_losses: 3,
            cooldown_minutes: 30,
            stale_after_minutes: 240,
            warmup_bars: 50,
            allow_position_scaling: false,
            max_open_positions: 5,
            day_boundary_utc_hour: 0,
            session: SessionConfig::default(),
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.max_daily_loss_pct > 0.0 && self.max_daily_loss_pct <= 20.0) {
            return Err("max_daily_loss_pct must be in (0, 20]".into());
        }
        if !(self.max_trade_risk_pct > 0.0 && self.max_trade_risk_pct <= 10.0) {
            return Err("max_trade_risk_pct must be in (0, 10]".into());
        }
        if !(self.account_equity > 0.0) {
            return Err("account_equity must be positive".into());
        }
        if !(self.order_notional > 0.0) {
            return Err("order_notional must be positive".into());
        }
        if self.max_trades_per_day == 0 {
            return Err("max_trades_per_day must be >= 1".into());
        }
        if self.max_consecutive_losses == 0 {
            return Err("max_consecutive_losses must be >= 1".into());
        }
        if self.cooldown_minutes < 0 {
            return Err("cooldown_minutes must be non-negative".into());
        }
        if self.stale_after_minutes <= 0 {
            return Err("stale_after_minutes must be positive".into());
        }
        if self.max_open_positions == 0 {
            return Err("max_open_positions must be >= 1".into());
        }
        if self.day_boundary_utc_hour > 23 {
            return Err("day_boundary_utc_hour must be in 0..=23".into());
        }
        self.session.validate()
    }

    /// Trading-day key for a timestamp.
    pub fn day_key(&self, at: DateTime<Utc>) -> NaiveDate {
        (at - Duration::hours(self.day_boundary_utc_hour as i64)).date_naive()
    }
}

// ─── State ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    /// Trading day the counters belong to.
    pub day: Option<NaiveDate>,
    pub trades_today: u32,
    pub realized_pnl_today: f64,
    pub consecutive_losses: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

// ─── Gate verdicts ───────────────────────────────────────────────────

/// Gate names in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    DataQuality,
    Cooldown,
    DailyLoss,
    TradeCount,
    PositionScaling,
    Session,
}

impl Gate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gate::DataQuality => "data_quality",
            Gate::Cooldown => "cooldown",
            Gate::DailyLoss => "daily_loss",
            Gate::TradeCount => "trade_count",
            Gate::PositionScaling => "position_scaling",
            Gate::Session => "session",
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected entry, naming the gate that stopped it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum GateRejection {
    NoData,
    StaleData { age_minutes: i64, limit_minutes: i64 },
    InsufficientWarmup { bars: usize, required: usize },
    Cooldown { until: DateTime<Utc> },
    DailyLossLimit { realized: f64, limit: f64 },
    TradeLimit { trades: u32, limit: u32 },
    PositionOpen { open: usize },
    MaxPositions { open: usize, limit: usize },
    Session(SessionBlock),
}

impl GateRejection {
    pub fn gate(&self) -> Gate {
        match self {
            GateRejection::NoData
            | GateRejection::StaleData { .. }
            | GateRejection::InsufficientWarmup { .. } => Gate::DataQuality,
            GateRejection::Cooldown { .. } => Gate::Cooldown,
            GateRejection::DailyLossLimit { .. } => Gate::DailyLoss,
            GateRejection::TradeLimit { .. } => Gate::TradeCount,
            GateRejection::PositionOpen { .. } | GateRejection::MaxPositions { .. } => {
                Gate::PositionScaling
            }
            GateRejection::Session(_) => Gate::Session,
        }
    }
}

impl fmt::Display for GateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.gate())?;
        match self {
            GateRejection::NoData => write!(f, "no bars available"),
            GateRejection::StaleData {
                age_minutes,
                limit_minutes,
            } => write!(
                f,
                "latest bar is {age_minutes} min old (limit {limit_minutes} min)"
            ),
            GateRejection::InsufficientWarmup { bars, required } => {
                write!(f, "{bars} bars available, {required} required for warmup")
            }
            GateRejection::Cooldown { until } => {
                write!(f, "cooldown active until {}", until.to_rfc3339())
            }
            GateRejection::DailyLossLimit { realized, limit } => {
                write!(f, "realized {realized:.2} today breaches limit {limit:.2}")
            }
            GateRejection::TradeLimit { trades, limit } => {
                write!(f, "{trades} trades today (limit {limit})")
            }
            GateRejection::PositionOpen { open } => {
                write!(f, "{open} position(s) already open and scaling disabled")
            }
            GateRejection::MaxPositions { open, limit } => {
                write!(f, "{open} positions open (limit {limit})")
            }
            GateRejection::Session(block) => write!(f, "{block}"),
        }
    }
}

/// Everything the gate needs to know about the candidate's context.
#[derive(Debug, Clone, Copy)]
pub struct GateInput {
    pub now: DateTime<Utc>,
    pub latest_bar: Option<DateTime<Utc>>,
    pub bars_available: usize,
    /// Open (or pending) positions for the candidate's symbol.
    pub open_positions: usize,
}

// ─── Manager ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    state: RiskState,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self::with_state(config, RiskState::default())
    }

    /// Resume from persisted state.
    pub fn with_state(config: RiskConfig, state: RiskState) -> Self {
        Self { config, state }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn set_account_equity(&mut self, equity: f64) {
        if equity > 0.0 {
            self.config.account_equity = equity;
        }
    }

    /// Reset daily counters when `now` falls on a later trading day. An
    /// earlier timestamp never moves the day back: late closes are booked
    /// against the current day.
    pub fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = self.config.day_key(now);
        if self.state.day.map_or(true, |day| today > day) {
            if self.state.day.is_some() {
                info!(
                    day = %today,
                    trades = self.state.trades_today,
                    realized = self.state.realized_pnl_today,
                    "risk day rollover"
                );
            }
            self.state.day = Some(today);
            self.state.trades_today = 0;
            self.state.realized_pnl_today = 0.0;
        }
    }

    /// Evaluate all gates in order. Expired cooldowns are cleared on the way.
    pub fn check(&mut self, input: &GateInput) -> Result<(), GateRejection> {
        self.roll_day(input.now);
        let c = &self.config;

        // 1. Data quality
        let latest = input.latest_bar.ok_or(GateRejection::NoData)?;
        let age = (input.now - latest).num_minutes();
        if age > c.stale_after_minutes {
            return Err(GateRejection::StaleData {
                age_minutes: age,
                limit_minutes: c.stale_after_minutes,
            });
        }
        if input.bars_available < c.warmup_bars {
            return Err(GateRejection::InsufficientWarmup {
                bars: input.bars_available,
                required: c.warmup_bars,
            });
        }

        // 2. Cooldown
        if let Some(until) = self.state.cooldown_until {
            if input.now < until {
                return Err(GateRejection::Cooldown { until });
            }
            debug!(until = %until, "cooldown expired");
            self.state.cooldown_until = None;
        }

        // 3. Daily loss
        let limit = -(c.account_equity * c.max_daily_loss_pct / 100.0);
        if self.state.realized_pnl_today <= limit {
            return Err(GateRejection::DailyLossLimit {
                realized: self.state.realized_pnl_today,
                limit,
            });
        }

        // 4. Trade count
        if self.state.trades_today >= c.max_trades_per_day {
            return Err(GateRejection::TradeLimit {
                trades: self.state.trades_today,
                limit: c.max_trades_per_day,
            });
        }

        // 5. Position scaling
        if input.open_positions > 0 {
            if !c.allow_position_scaling {
                return Err(GateRejection::PositionOpen {
                    open: input.open_positions,
                });
            }
            if input.open_positions >= c.max_open_positions {
                return Err(GateRejection::MaxPositions {
                    open: input.open_positions,
                    limit: c.max_open_positions,
                });
            }
        }

        // 6. Session / blackout
        c.session.check(input.now).map_err(GateRejection::Session)
    }

    /// Apply a closed trade. Returns the cooldown deadline if this close started one.
    pub fn record_close(&mut self, pnl: f64, closed_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.roll_day(closed_at);
        let state = &mut self.state;
        state.trades_today += 1;
        state.realized_pnl_today += pnl;

        if pnl < 0.0 {
            state.consecutive_losses += 1;
        } else {
            state.consecutive_losses = 0;
        }

        if state.consecutive_losses >= self.config.max_consecutive_losses {
            let until = closed_at + Duration::minutes(self.config.cooldown_minutes);
            let until = state.cooldown_until.map_or(until, |existing| existing.max(until));
            state.cooldown_until = Some(until);
            state.consecutive_losses = 0;
            info!(until = %until, "loss streak cooldown started");
            return Some(until);
        }
        None
    }

    /// Entry notional: configured size capped at `max_trade_risk_pct` of equity.
    pub fn suggested_notional(&self, equity: Option<f64>) -> f64 {
        let configured = self.config.order_notional;
        match equity {
            Some(eq) if eq > 0.0 => configured.min(eq * self.config.max_trade_risk_pct / 100.0),
            _ => configured,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 15, 0, 0).unwrap()
    }

    fn input(now: DateTime<Utc>) -> GateInput {
        GateInput {
            now,
            latest_bar: Some(now),
            bars_available: 500,
            open_positions: 0,
        }
    }

    #[test]
    fn fresh_state_admits() {
        let mut rm = RiskManager::new(RiskConfig::default());
        assert!(rm.check(&input(t0())).is_ok());
        assert_eq!(rm.state().day, Some(t0().date_naive()));
    }

    #[test]
    fn data_quality_gate() {
        let mut rm = RiskManager::new(RiskConfig::default());
        let mut i = input(t0());
        i.latest_bar = None;
        assert_eq!(rm.check(&i), Err(GateRejection::NoData));

        i.latest_bar = Some(t0() - Duration::minutes(241));
        assert_eq!(rm.check(&i).unwrap_err().gate(), Gate::DataQuality);

        let mut i = input(t0());
        i.bars_available = 10;
        assert_eq!(
            rm.check(&i),
            Err(GateRejection::InsufficientWarmup {
                bars: 10,
                required: 50
            })
        );
    }

    #[test]
    fn three_losses_start_thirty_minute_cooldown() {
        let mut rm = RiskManager::new(RiskConfig::default());
        let close = t0();
        assert!(rm.record_close(-10.0, close - Duration::minutes(20)).is_none());
        assert!(rm.record_close(-10.0, close - Duration::minutes(10)).is_none());
        let until = rm.record_close(-10.0, close).unwrap();
        assert_eq!(until, close + Duration::minutes(30));
        assert_eq!(rm.state().consecutive_losses, 0);

        let rejected = rm.check(&input(close + Duration::minutes(29)));
        assert_eq!(rejected, Err(GateRejection::Cooldown { until }));

        assert!(rm.check(&input(close + Duration::minutes(30))).is_ok());
        assert!(rm.state().cooldown_until.is_none());
    }

    #[test]
    fn win_resets_streak() {
        let mut rm = RiskManager::new(RiskConfig::default());
        rm.record_close(-1.0, t0());
        rm.record_close(-1.0, t0());
        rm.record_close(2.0, t0());
        assert_eq!(rm.state().consecutive_losses, 0);
        assert!(rm.record_close(-1.0, t0()).is_none());
    }

    #[test]
    fn cooldown_never_moves_backward() {
        let config = RiskConfig {
            max_consecutive_losses: 1,
            ..RiskConfig::default()
        };
        let mut rm = RiskManager::new(config);
        let later = rm.record_close(-1.0, t0() + Duration::minutes(10)).unwrap();
        // An out-of-order close report with an earlier timestamp.
        let again = rm.record_close(-1.0, t0()).unwrap();
        assert_eq!(again, later);
    }

    #[test]
    fn daily_loss_limit_blocks_rest_of_day() {
        let mut rm = RiskManager::new(RiskConfig::default());
        rm.record_close(-120.0, t0());
        rm.record_close(150.0, t0());
        rm.record_close(-230.0, t0());
        assert!((rm.state().realized_pnl_today + 200.0).abs() < 1e-9);

        let later = t0() + Duration::hours(3);
        let err = rm.check(&input(later)).unwrap_err();
        assert_eq!(err.gate(), Gate::DailyLoss);

        // Next trading day the limit clears.
        let tomorrow = t0() + Duration::days(1);
        assert!(rm.check(&input(tomorrow)).is_ok());
        assert_eq!(rm.state().trades_today, 0);
        assert_eq!(rm.state().realized_pnl_today, 0.0);
    }

    #[test]
    fn daily_loss_reported_before_trade_count() {
        let config = RiskConfig {
            max_trades_per_day: 2,
            max_consecutive_losses: 10,
            ..RiskConfig::default()
        };
        let mut rm = RiskManager::new(config);
        rm.record_close(-150.0, t0());
        rm.record_close(-100.0, t0());
        let err = rm.check(&input(t0())).unwrap_err();
        assert_eq!(err.gate(), Gate::DailyLoss);
    }

    #[test]
    fn trade_count_gate() {
        let config = RiskConfig {
            max_trades_per_day: 2,
            ..RiskConfig::default()
        };
        let mut rm = RiskManager::new(config);
        rm.record_close(5.0, t0());
        rm.record_close(5.0, t0());
        assert_eq!(
            rm.check(&input(t0())),
            Err(GateRejection::TradeLimit {
                trades: 2,
                limit: 2
            })
        );
    }

    #[test]
    fn position_scaling_gate() {
        let mut rm = RiskManager::new(RiskConfig::default());
        let mut i = input(t0());
        i.open_positions = 1;
        assert_eq!(rm.check(&i), Err(GateRejection::PositionOpen { open: 1 }));

        let mut rm = RiskManager::new(RiskConfig {
            allow_position_scaling: true,
            max_open_positions: 2,
            ..RiskConfig::default()
        });
        assert!(rm.check(&i).is_ok());
        i.open_positions = 2;
        assert_eq!(rm.check(&i).unwrap_err().gate(), Gate::PositionScaling);
    }

    #[test]
    fn session_gate_is_last() {
        let mut config = RiskConfig::default();
        config.session.enabled = true;
        let mut rm = RiskManager::new(config);
        // 03:00 New York time.
        let night = Utc.with_ymd_and_hms(2024, 4, 2, 7, 0, 0).unwrap();
        assert_eq!(rm.check(&input(night)).unwrap_err().gate(), Gate::Session);
    }

    #[test]
    fn day_boundary_hour_shifts_rollover() {
        let config = RiskConfig {
            day_boundary_utc_hour: 22,
            ..RiskConfig::default()
        };
        let mut rm = RiskManager::new(config);
        let evening = Utc.with_ymd_and_hms(2024, 4, 2, 21, 0, 0).unwrap();
        rm.record_close(1.0, evening);
        rm.roll_day(evening + Duration::minutes(30));
        assert_eq!(rm.state().trades_today, 1);
        rm.roll_day(evening + Duration::minutes(90));
        assert_eq!(rm.state().trades_today, 0);
    }

    #[test]
    fn late_close_is_booked_against_current_day() {
        let config = RiskConfig {
            max_consecutive_losses: 10,
            ..RiskConfig::default()
        };
        let mut rm = RiskManager::new(config);
        let today = Utc.with_ymd_and_hms(2024, 4, 3, 15, 0, 0).unwrap();
        rm.roll_day(today);
        rm.record_close(-150.0, today);
        // Exit settled on a bar from the previous evening.
        rm.record_close(-10.0, today - Duration::hours(16));

        let state = rm.state();
        assert_eq!(state.day, Some(today.date_naive()));
        assert_eq!(state.trades_today, 2);
        assert_eq!(state.realized_pnl_today, -160.0);

        assert!(rm.check(&input(today)).is_ok());
        assert_eq!(rm.state().trades_today, 2);
        assert_eq!(rm.state().realized_pnl_today, -160.0);

        rm.record_close(-50.0, today);
        assert_eq!(
            rm.check(&input(today)).unwrap_err().gate(),
            Gate::DailyLoss
        );
    }

    #[test]
    fn suggested_notional_caps_by_equity() {
        let rm = RiskManager::new(RiskConfig::default());
        assert_eq!(rm.suggested_notional(None), 250.0);
        assert_eq!(rm.suggested_notional(Some(10_000.0)), 100.0);
        assert_eq!(rm.suggested_notional(Some(100_000.0)), 250.0);
        assert_eq!(rm.suggested_notional(Some(-5.0)), 250.0);
    }

    #[test]
    fn rejection_display_names_gate() {
        let r = GateRejection::TradeLimit {
            trades: 6,
            limit: 6,
        };
        assert_eq!(r.to_string(), "[trade_count] 6 trades today (limit 6)");
    }

    #[test]
    fn validate_ranges() {
        assert!(RiskConfig::default().validate().is_ok());
        let bad = RiskConfig {
            max_daily_loss_pct: 25.0,
            ..RiskConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
