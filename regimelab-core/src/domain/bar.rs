//! Bar — the fundamental market data unit, with its derived indicator snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar for a single symbol at a single timestamp.
///
/// Raw bars arrive from a data source without indicators; `indicators::enrich`
/// fills the snapshot once and the bar is treated as immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(skip)]
    pub indicators: Indicators,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            indicators: Indicators::default(),
        }
    }

    /// Returns true if any OHLC field is NaN.
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic OHLCV sanity check: high >= low, high >= open, high >= close, etc.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
            && self.volume >= 0.0
    }
}

/// Indicator values attached to a bar. NaN means "not enough history yet".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Indicators {
    pub adx: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    /// Long EMA used as the higher-timeframe proxy.
    pub ema_trend: f64,
    pub bb_middle: f64,
    pub bb_upper: f64,
    pub bb_lower: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub atr: f64,
    pub volume_sma: f64,
    /// Distance of close from its rolling mean, in standard deviations.
    pub zscore: f64,
}

impl Default for Indicators {
    fn default() -> Self {
        Self {
            adx: f64::NAN,
            ema_fast: f64::NAN,
            ema_slow: f64::NAN,
            ema_trend: f64::NAN,
            bb_middle: f64::NAN,
            bb_upper: f64::NAN,
            bb_lower: f64::NAN,
            rsi: f64::NAN,
            macd: f64::NAN,
            macd_signal: f64::NAN,
            atr: f64::NAN,
            volume_sma: f64::NAN,
            zscore: f64::NAN,
        }
    }
}

impl Indicators {
    /// Absolute gap between the fast and slow EMA as a percentage of the slow EMA.
    pub fn ema_gap_pct(&self) -> f64 {
        if !(self.ema_slow > 0.0) {
            return f64::NAN;
        }
        (self.ema_fast - self.ema_slow).abs() / self.ema_slow * 100.0
    }

    /// Bollinger bandwidth as a percentage of the middle band.
    pub fn bandwidth_pct(&self) -> f64 {
        if !(self.bb_middle > 0.0) {
            return f64::NAN;
        }
        (self.bb_upper - self.bb_lower) / self.bb_middle * 100.0
    }

    pub fn macd_hist(&self) -> f64 {
        self.macd - self.macd_signal
    }

    /// Current volume relative to its rolling average.
    pub fn volume_multiplier(&self, volume: f64) -> f64 {
        if !(self.volume_sma > 0.0) {
            return f64::NAN;
        }
        volume / self.volume_sma
    }

    /// True once every indicator the signal models read has a finite value.
    pub fn is_ready(&self) -> bool {
        [
            self.adx,
            self.ema_fast,
            self.ema_slow,
            self.ema_trend,
            self.bb_middle,
            self.bb_upper,
            self.bb_lower,
            self.rsi,
            self.macd,
            self.macd_signal,
            self.atr,
            self.volume_sma,
            self.zscore,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}
