//! Trend-following model: trade pullbacks in the direction of the EMA trend.
//!
//! Direction comes from the fast EMA relative to the slow EMA. Features
//! (long shown, short mirrored):
//! - `trend`: close above the slow EMA
//! - `strength`: ADX at or above `min_adx`
//! - `pullback`: close at or below the fast EMA or the Bollinger middle
//! - `momentum`: MACD above its signal line with RSI inside the long band
//! - `rsi_slope`: RSI not falling versus the previous bar
//! - `higher_timeframe`: slow EMA and close both above the trend EMA
//! - `volume`: volume at least `min_volume_multiplier` × its average
//! - `band_bias`: close not stretched into the top of the Bollinger range

use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Feature, Side};

use super::{ModelKind, Scored, SignalModel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub min_score: u32,
    pub min_adx: f64,
    pub long_rsi_min: f64,
    pub long_rsi_max: f64,
    pub short_rsi_min: f64,
    pub short_rsi_max: f64,
    pub min_volume_multiplier: f64,
    /// Fraction of the band width kept clear at the far side for `band_bias`.
    pub band_bias_fraction: f64,
    /// RSI slope must agree for the candidate to be actionable.
    pub require_rsi_slope: bool,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            min_score: 4,
            min_adx: 18.0,
            long_rsi_min: 30.0,
            long_rsi_max: 55.0,
            short_rsi_min: 45.0,
            short_rsi_max: 70.0,
            min_volume_multiplier: 1.0,
            band_bias_fraction: 0.35,
            require_rsi_slope: true,
        }
    }
}

impl TrendConfig {
    pub const FEATURE_COUNT: u32 = 8;

    pub fn validate(&self) -> Result<(), String> {
        if self.min_score == 0 || self.min_score > Self::FEATURE_COUNT {
            return Err(format!(
                "trend min_score must be in 1..={}",
                Self::FEATURE_COUNT
            ));
        }
        if self.long_rsi_min >= self.long_rsi_max || self.short_rsi_min >= self.short_rsi_max {
            return Err("trend RSI bands must have min < max".into());
        }
        if !(0.0..1.0).contains(&self.band_bias_fraction) {
            return Err("band_bias_fraction must be in [0, 1)".into());
        }
        if self.min_volume_multiplier < 0.0 {
            return Err("trend min_volume_multiplier must be non-negative".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TrendFollowing {
    config: TrendConfig,
}

impl TrendFollowing {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }
}

impl SignalModel for TrendFollowing {
    fn name(&self) -> &str {
        "trend_following"
    }

    fn kind(&self) -> ModelKind {
        ModelKind::TrendFollowing
    }

    fn min_score(&self) -> u32 {
        self.config.min_score
    }

    fn score(&self, window: &[Bar]) -> Option<Scored> {
        let c = &self.config;
        let curr = window.last()?;
        let prev = window.get(window.len().checked_sub(2)?)?;
        let ind = &curr.indicators;
        let close = curr.close;

        let direction = if ind.ema_fast > ind.ema_slow {
            Side::Long
        } else if ind.ema_fast < ind.ema_slow {
            Side::Short
        } else {
            return None;
        };

        let width = ind.bb_upper - ind.bb_lower;
        let volume_ok = ind.volume_multiplier(curr.volume) >= c.min_volume_multiplier;
        let macd_hist = ind.macd_hist();

        let (trend, pullback, momentum, rsi_slope, htf, band_bias) = match direction {
            Side::Long => (
                close > ind.ema_slow,
                close <= ind.ema_fast || close <= ind.bb_middle,
                macd_hist > 0.0 && (c.long_rsi_min..=c.long_rsi_max).contains(&ind.rsi),
                ind.rsi >= prev.indicators.rsi,
                ind.ema_slow > ind.ema_trend && close > ind.ema_trend,
                close <= ind.bb_upper - width * c.band_bias_fraction,
            ),
            Side::Short => (
                close < ind.ema_slow,
                close >= ind.ema_fast || close >= ind.bb_middle,
                macd_hist < 0.0 && (c.short_rsi_min..=c.short_rsi_max).contains(&ind.rsi),
                ind.rsi <= prev.indicators.rsi,
                ind.ema_slow < ind.ema_trend && close < ind.ema_trend,
                close >= ind.bb_lower + width * c.band_bias_fraction,
            ),
        };

        let checks = [
            (Feature::Trend, trend),
            (Feature::Strength, ind.adx >= c.min_adx),
            (Feature::Pullback, pullback),
            (Feature::Momentum, momentum),
            (Feature::RsiSlope, rsi_slope),
            (Feature::HigherTimeframe, htf),
            (Feature::Volume, volume_ok),
            (Feature::BandBias, band_bias),
        ];
        let features = checks
            .iter()
            .filter(|(_, on)| *on)
            .map(|(f, _)| *f)
            .collect();

        Some(Scored {
            direction,
            features,
            confirmed: rsi_slope || !c.require_rsi_slope,
        })
    }
}
