//! Regime classifier — labels the market state with hysteresis.
//!
//! Each bar gets a raw label from three indicator checks (ADX, EMA gap,
//! Bollinger bandwidth). The committed regime only changes after the same
//! raw label has been seen on `confirm_bars` consecutive bars. A gap in the
//! bar sequence, or a non-increasing timestamp, resets to NEUTRAL.
//!
//! `classify` always replays its window from a fresh state, so the live loop
//! and the backtest produce the same regime for the same window.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::domain::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    Trending,
    Choppy,
    #[default]
    Neutral,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::Trending => f.write_str("TRENDING"),
            Regime::Choppy => f.write_str("CHOPPY"),
            Regime::Neutral => f.write_str("NEUTRAL"),
        }
    }
}

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Number of most recent bars replayed per classification.
    pub lookback: usize,
    /// Consecutive agreeing raw labels needed to commit a change.
    pub confirm_bars: usize,
    pub trend_adx_min: f64,
    pub trend_ema_gap_min_pct: f64,
    pub trend_bandwidth_min_pct: f64,
    pub choppy_adx_max: f64,
    pub choppy_ema_gap_max_pct: f64,
    pub choppy_bandwidth_max_pct: f64,
    /// Spacing between consecutive bars above which the state resets.
    /// `None` disables gap detection.
    pub max_gap_minutes: Option<i64>,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            lookback: 24,
            confirm_bars: 3,
            trend_adx_min: 25.0,
            trend_ema_gap_min_pct: 0.25,
            trend_bandwidth_min_pct: 1.0,
            choppy_adx_max: 18.0,
            choppy_ema_gap_max_pct: 0.10,
            choppy_bandwidth_max_pct: 0.60,
            max_gap_minutes: None,
        }
    }
}

impl RegimeConfig {
    /// Thresholds must leave a NEUTRAL band between choppy and trending.
    pub fn validate(&self) -> Result<(), String> {
        if self.lookback == 0 {
            return Err("lookback must be >= 1".into());
        }
        if self.confirm_bars == 0 {
            return Err("confirm_bars must be >= 1".into());
        }
        if self.confirm_bars > self.lookback {
            return Err(format!(
                "confirm_bars ({}) cannot exceed lookback ({})",
                self.confirm_bars, self.lookback
            ));
        }
        let pairs = [
            ("adx", self.choppy_adx_max, self.trend_adx_min),
            (
                "ema_gap_pct",
                self.choppy_ema_gap_max_pct,
                self.trend_ema_gap_min_pct,
            ),
            (
                "bandwidth_pct",
                self.choppy_bandwidth_max_pct,
                self.trend_bandwidth_min_pct,
            ),
        ];
        for (name, choppy, trend) in pairs {
            if choppy >= trend {
                return Err(format!(
                    "choppy {name} threshold ({choppy}) must be below trend threshold ({trend})"
                ));
            }
        }
        if matches!(self.max_gap_minutes, Some(m) if m <= 0) {
            return Err("max_gap_minutes must be positive".into());
        }
        Ok(())
    }
}

// ─── State ───────────────────────────────────────────────────────────

/// Committed regime plus the hysteresis counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub regime: Regime,
    /// Share of the classified window whose raw label equals `regime`.
    pub confidence: f64,
    /// Candidate label waiting for confirmation.
    pub pending: Option<Regime>,
    /// Consecutive bars `pending` has been the raw label.
    pub confirmations: usize,
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl Default for RegimeState {
    fn default() -> Self {
        Self {
            regime: Regime::Neutral,
            confidence: 0.0,
            pending: None,
            confirmations: 0,
            last_timestamp: None,
        }
    }
}

// ─── Classifier ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Per-bar label before hysteresis. NaN indicators fail every comparison
    /// and fall through to NEUTRAL.
    pub fn raw_label(&self, bar: &Bar) -> Regime {
        let ind = &bar.indicators;
        let c = &self.config;
        let adx = ind.adx;
        let gap = ind.ema_gap_pct();
        let bandwidth = ind.bandwidth_pct();

        let trending = adx >= c.trend_adx_min
            && gap >= c.trend_ema_gap_min_pct
            && bandwidth >= c.trend_bandwidth_min_pct;
        let choppy = adx <= c.choppy_adx_max
            && gap <= c.choppy_ema_gap_max_pct
            && bandwidth <= c.choppy_bandwidth_max_pct;

        match (trending, choppy) {
            (true, false) => Regime::Trending,
            (false, true) => Regime::Choppy,
            _ => Regime::Neutral,
        }
    }

    /// Apply one bar to `state`. Returns true when the committed regime changed.
    pub fn step(&self, state: &mut RegimeState, bar: &Bar) -> bool {
        if let Some(prev) = state.last_timestamp {
            let out_of_order = bar.timestamp <= prev;
            let gapped = self
                .config
                .max_gap_minutes
                .is_some_and(|m| bar.timestamp - prev > Duration::minutes(m));
            if out_of_order || gapped {
                debug!(
                    prev = %prev,
                    next = %bar.timestamp,
                    "regime state reset on discontinuous bars"
                );
                *state = RegimeState::default();
            }
        }
        state.last_timestamp = Some(bar.timestamp);

        let label = self.raw_label(bar);
        if label == state.regime {
            state.pending = None;
            state.confirmations = 0;
            return false;
        }

        if state.pending == Some(label) {
            state.confirmations += 1;
        } else {
            state.pending = Some(label);
            state.confirmations = 1;
        }

        if state.confirmations >= self.config.confirm_bars {
            state.regime = label;
            state.pending = None;
            state.confirmations = 0;
            return true;
        }
        false
    }

    /// Classify the last `lookback` bars of `window` from a fresh state.
    pub fn classify(&self, window: &[Bar]) -> RegimeState {
        let start = window.len().saturating_sub(self.config.lookback);
        let recent = &window[start..];

        let mut state = RegimeState::default();
        let mut labels = Vec::with_capacity(recent.len());
        for bar in recent {
            if self.step(&mut state, bar) {
                debug!(regime = %state.regime, at = %bar.timestamp, "regime committed");
            }
            labels.push(self.raw_label(bar));
        }

        // Only bars after the last reset belong to the committed state.
        let since_reset = match state.last_timestamp {
            Some(_) => trailing_continuous(recent, self.config.max_gap_minutes),
            None => 0,
        };
        let tail = &labels[labels.len() - since_reset..];
        state.confidence = if tail.is_empty() {
            0.0
        } else {
            tail.iter().filter(|l| **l == state.regime).count() as f64 / tail.len() as f64
        };
        state
    }
}

/// Length of the trailing run of bars with increasing, gap-free timestamps.
fn trailing_continuous(bars: &[Bar], max_gap_minutes: Option<i64>) -> usize {
    if bars.is_empty() {
        return 0;
    }
    let mut count = 1;
    for pair in bars.windows(2).rev() {
        let delta = pair[1].timestamp - pair[0].timestamp;
        let broken = delta <= Duration::zero()
            || max_gap_minutes.is_some_and(|m| delta > Duration::minutes(m));
        if broken {
            break;
        }
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Indicators;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 30, 0).unwrap()
    }

    fn bar_with(ts: DateTime<Utc>, adx: f64, gap_pct: f64, bw_pct: f64) -> Bar {
        let mut bar = Bar::new(ts, 100.0, 101.0, 99.0, 100.0, 1_000.0);
        bar.indicators = Indicators {
            adx,
            ema_slow: 100.0,
            ema_fast: 100.0 + gap_pct,
            bb_middle: 100.0,
            bb_upper: 100.0 + bw_pct / 2.0,
            bb_lower: 100.0 - bw_pct / 2.0,
            ..Indicators::default()
        };
        bar
    }

    fn trending(i: i64) -> Bar {
        bar_with(base() + Duration::minutes(15 * i), 35.0, 0.5, 2.0)
    }

    fn choppy(i: i64) -> Bar {
        bar_with(base() + Duration::minutes(15 * i), 12.0, 0.05, 0.3)
    }

    #[test]
    fn raw_labels() {
        let c = RegimeClassifier::new(RegimeConfig::default());
        assert_eq!(c.raw_label(&trending(0)), Regime::Trending);
        assert_eq!(c.raw_label(&choppy(0)), Regime::Choppy);
        // Strong ADX but tiny bandwidth: partial match → NEUTRAL.
        let mixed = bar_with(base(), 35.0, 0.5, 0.3);
        assert_eq!(c.raw_label(&mixed), Regime::Neutral);
        // No indicators yet.
        let empty = Bar::new(base(), 1.0, 1.0, 1.0, 1.0, 1.0);
        assert_eq!(c.raw_label(&empty), Regime::Neutral);
    }

    #[test]
    fn commit_requires_confirm_bars() {
        let c = RegimeClassifier::new(RegimeConfig::default());
        let mut state = RegimeState::default();
        assert!(!c.step(&mut state, &trending(0)));
        assert!(!c.step(&mut state, &trending(1)));
        assert_eq!(state.regime, Regime::Neutral);
        assert_eq!(state.confirmations, 2);
        assert!(c.step(&mut state, &trending(2)));
        assert_eq!(state.regime, Regime::Trending);
    }

    #[test]
    fn single_bar_flip_is_suppressed() {
        let c = RegimeClassifier::new(RegimeConfig::default());
        let bars = vec![
            trending(0),
            trending(1),
            trending(2),
            choppy(3),
            trending(4),
            choppy(5),
            choppy(6),
        ];
        let state = c.classify(&bars);
        assert_eq!(state.regime, Regime::Trending);
        assert_eq!(state.pending, Some(Regime::Choppy));
        assert_eq!(state.confirmations, 2);
    }

    #[test]
    fn interrupted_pending_restarts_count() {
        let c = RegimeClassifier::new(RegimeConfig::default());
        let mut state = RegimeState::default();
        c.step(&mut state, &trending(0));
        c.step(&mut state, &trending(1));
        c.step(&mut state, &choppy(2));
        assert_eq!(state.pending, Some(Regime::Choppy));
        assert_eq!(state.confirmations, 1);
    }

    #[test]
    fn out_of_order_timestamp_resets() {
        let c = RegimeClassifier::new(RegimeConfig::default());
        let mut state = RegimeState::default();
        for i in 0..3 {
            c.step(&mut state, &trending(i));
        }
        assert_eq!(state.regime, Regime::Trending);
        c.step(&mut state, &trending(1));
        assert_eq!(state.regime, Regime::Neutral);
        assert_eq!(state.confirmations, 1);
    }

    #[test]
    fn gap_resets_when_configured() {
        let c = RegimeClassifier::new(RegimeConfig {
            max_gap_minutes: Some(60),
            ..RegimeConfig::default()
        });
        let mut bars: Vec<Bar> = (0..4).map(trending).collect();
        bars.push(trending(40));
        let state = c.classify(&bars);
        assert_eq!(state.regime, Regime::Neutral);
        assert_eq!(state.pending, Some(Regime::Trending));
        // Confidence covers only the bar after the gap.
        assert_eq!(state.confidence, 0.0);
    }

    #[test]
    fn confidence_is_share_of_agreeing_labels() {
        let c = RegimeClassifier::new(RegimeConfig::default());
        let mut bars: Vec<Bar> = (0..6).map(trending).collect();
        bars.push(choppy(6));
        bars.push(choppy(7));
        let state = c.classify(&bars);
        assert_eq!(state.regime, Regime::Trending);
        assert!((state.confidence - 6.0 / 8.0).abs() < 1e-12);
    }

    #[test]
    fn classify_uses_only_lookback() {
        let c = RegimeClassifier::new(RegimeConfig {
            lookback: 4,
            ..RegimeConfig::default()
        });
        let mut bars: Vec<Bar> = (0..10).map(trending).collect();
        bars.extend((10..14).map(choppy));
        let state = c.classify(&bars);
        assert_eq!(state.regime, Regime::Choppy);
        assert_eq!(state.confidence, 1.0);
    }

    #[test]
    fn validate_rejects_overlapping_thresholds() {
        let config = RegimeConfig {
            choppy_adx_max: 30.0,
            ..RegimeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("adx"));
        assert!(RegimeConfig::default().validate().is_ok());
    }
}
