//! Mean-reversion model: fade stretched moves back toward the rolling mean.
//!
//! A setup exists only when |z-score| ≥ `entry_zscore`; the direction is
//! toward the mean. Features (long shown, short mirrored):
//! - `zscore_extreme`: the stretch itself
//! - `rsi_exhaustion`: RSI at or below `rsi_oversold`
//! - `macd_reversal`: MACD histogram rising versus the previous bar
//! - `volume`: volume at least `min_volume_multiplier` × its average
//! - `band_breach`: close at or below the lower Bollinger band

use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Feature, Side};

use super::{ModelKind, Scored, SignalModel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanReversionConfig {
    pub min_score: u32,
    pub entry_zscore: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub min_volume_multiplier: f64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            min_score: 3,
            entry_zscore: 2.0,
            rsi_oversold: 35.0,
            rsi_overbought: 65.0,
            min_volume_multiplier: 1.2,
        }
    }
}

impl MeanReversionConfig {
    pub const FEATURE_COUNT: u32 = 5;

    pub fn validate(&self) -> Result<(), String> {
        if self.min_score == 0 || self.min_score > Self::FEATURE_COUNT {
            return Err(format!(
                "mean_reversion min_score must be in 1..={}",
                Self::FEATURE_COUNT
            ));
        }
        if !(self.entry_zscore > 0.0) {
            return Err("entry_zscore must be positive".into());
        }
        if self.rsi_oversold >= self.rsi_overbought {
            return Err("rsi_oversold must be below rsi_overbought".into());
        }
        if self.min_volume_multiplier < 0.0 {
            return Err("mean_reversion min_volume_multiplier must be non-negative".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MeanReversion {
    config: MeanReversionConfig,
}

impl MeanReversion {
    pub fn new(config: MeanReversionConfig) -> Self {
        Self { config }
    }
}

impl SignalModel for MeanReversion {
    fn name(&self) -> &str {
        "mean_reversion"
    }

    fn kind(&self) -> ModelKind {
        ModelKind::MeanReversion
    }

    fn min_score(&self) -> u32 {
        self.config.min_score
    }

    fn score(&self, window: &[Bar]) -> Option<Scored> {
        let c = &self.config;
        let curr = window.last()?;
        let prev = window.get(window.len().checked_sub(2)?)?;
        let ind = &curr.indicators;

        let direction = if ind.zscore <= -c.entry_zscore {
            Side::Long
        } else if ind.zscore >= c.entry_zscore {
            Side::Short
        } else {
            return None;
        };

        let hist = ind.macd_hist();
        let prev_hist = prev.indicators.macd_hist();
        let (exhausted, turning, breach) = match direction {
            Side::Long => (
                ind.rsi <= c.rsi_oversold,
                hist > prev_hist,
                curr.close <= ind.bb_lower,
            ),
            Side::Short => (
                ind.rsi >= c.rsi_overbought,
                hist < prev_hist,
                curr.close >= ind.bb_upper,
            ),
        };

        let checks = [
            (Feature::ZscoreExtreme, true),
            (Feature::RsiExhaustion, exhausted),
            (Feature::MacdReversal, turning),
            (
                Feature::Volume,
                ind.volume_multiplier(curr.volume) >= c.min_volume_multiplier,
            ),
            (Feature::BandBreach, breach),
        ];
        let features = checks
            .iter()
            .filter(|(_, on)| *on)
            .map(|(f, _)| *f)
            .collect();

        Some(Scored {
            direction,
            features,
            confirmed: true,
        })
    }
}
