//! Indicator computation.
//!
//! All indicators are look-ahead free: the value at bar t depends only on
//! bars ≤ t. `enrich` computes every series once over the full history and
//! writes the per-bar snapshot into `Bar::indicators`.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;

pub use adx::adx;
pub use atr::{atr, true_range, wilder_smooth};
pub use bollinger::{bollinger, rolling_std, zscore, Bands};
pub use ema::{ema, sma};
pub use macd::macd;
pub use rsi::rsi;

use serde::{Deserialize, Serialize};

use crate::domain::Bar;

/// Periods and multipliers for the indicator set the pipeline reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub ema_trend: usize,
    pub adx_period: usize,
    pub bb_period: usize,
    pub bb_multiplier: f64,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr_period: usize,
    pub volume_period: usize,
    pub zscore_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ema_fast: 20,
            ema_slow: 50,
            ema_trend: 200,
            adx_period: 14,
            bb_period: 20,
            bb_multiplier: 2.0,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            atr_period: 14,
            volume_period: 20,
            zscore_period: 20,
        }
    }
}

impl IndicatorConfig {
    /// Number of leading bars before every indicator has a value.
    pub fn lookback(&self) -> usize {
        [
            self.ema_fast.saturating_sub(1),
            self.ema_slow.saturating_sub(1),
            self.ema_trend.saturating_sub(1),
            2 * self.adx_period,
            self.bb_period.saturating_sub(1),
            self.rsi_period,
            self.macd_slow + self.macd_signal - 2,
            self.atr_period.saturating_sub(1),
            self.volume_period.saturating_sub(1),
            self.zscore_period.saturating_sub(1),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    /// Every period must be at least 1 and the MACD pair ordered.
    pub fn validate(&self) -> Result<(), String> {
        let periods = [
            ("ema_fast", self.ema_fast),
            ("ema_slow", self.ema_slow),
            ("ema_trend", self.ema_trend),
            ("adx_period", self.adx_period),
            ("bb_period", self.bb_period),
            ("rsi_period", self.rsi_period),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("atr_period", self.atr_period),
            ("volume_period", self.volume_period),
            ("zscore_period", self.zscore_period),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(format!("{name} must be >= 1"));
            }
        }
        if self.ema_fast >= self.ema_slow {
            return Err("ema_fast must be shorter than ema_slow".into());
        }
        if self.macd_fast >= self.macd_slow {
            return Err("macd_fast must be shorter than macd_slow".into());
        }
        if !(self.bb_multiplier > 0.0) {
            return Err("bb_multiplier must be positive".into());
        }
        Ok(())
    }
}

/// Compute all indicators over `bars` and store them on each bar.
pub fn enrich(bars: &mut [Bar], config: &IndicatorConfig) {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    let ema_fast = ema(&closes, config.ema_fast);
    let ema_slow = ema(&closes, config.ema_slow);
    let ema_trend = ema(&closes, config.ema_trend);
    let adx_values = adx(bars, config.adx_period);
    let bands = bollinger(&closes, config.bb_period, config.bb_multiplier);
    let rsi_values = rsi(&closes, config.rsi_period);
    let (macd_line, macd_signal) = macd(
        &closes,
        config.macd_fast,
        config.macd_slow,
        config.macd_signal,
    );
    let atr_values = atr(bars, config.atr_period);
    let volume_sma = sma(&volumes, config.volume_period);
    let z = zscore(&closes, config.zscore_period);

    for (i, bar) in bars.iter_mut().enumerate() {
        let ind = &mut bar.indicators;
        ind.ema_fast = ema_fast[i];
        ind.ema_slow = ema_slow[i];
        ind.ema_trend = ema_trend[i];
        ind.adx = adx_values[i];
        ind.bb_middle = bands.middle[i];
        ind.bb_upper = bands.upper[i];
        ind.bb_lower = bands.lower[i];
        ind.rsi = rsi_values[i];
        ind.macd = macd_line[i];
        ind.macd_signal = macd_signal[i];
        ind.atr = atr_values[i];
        ind.volume_sma = volume_sma[i];
        ind.zscore = z[i];
    }
}

/// Build bars from close prices for testing (15-minute spacing).
#[cfg(test)]
pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    let data: Vec<(f64, f64, f64, f64)> = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            (open, open.max(close) + 1.0, open.min(close) - 1.0, close)
        })
        .collect();
    make_ohlc_bars(&data)
}

/// Build bars from (open, high, low, close) tuples for testing.
#[cfg(test)]
pub fn make_ohlc_bars(data: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
    use chrono::TimeZone;
    let base = chrono::Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
    data.iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| {
            Bar::new(
                base + chrono::Duration::minutes(15 * i as i64),
                open,
                high,
                low,
                close,
                1_000.0,
            )
        })
        .collect()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
