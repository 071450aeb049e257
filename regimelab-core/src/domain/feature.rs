//! Confluence features — the boolean checks a signal model sums into its score.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One independently evaluated piece of directional evidence.
///
/// Features are also the keys of the per-symbol weight map in `LearningState`,
/// so the serialized names are part of the persisted state format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    // ── Trend following ──
    Trend,
    Strength,
    Momentum,
    RsiSlope,
    HigherTimeframe,
    Pullback,
    BandBias,

    // ── Mean reversion ──
    ZscoreExtreme,
    RsiExhaustion,
    MacdReversal,
    BandBreach,

    // ── Shared ──
    Volume,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Trend => "trend",
            Feature::Strength => "strength",
            Feature::Momentum => "momentum",
            Feature::RsiSlope => "rsi_slope",
            Feature::HigherTimeframe => "higher_timeframe",
            Feature::Pullback => "pullback",
            Feature::BandBias => "band_bias",
            Feature::ZscoreExtreme => "zscore_extreme",
            Feature::RsiExhaustion => "rsi_exhaustion",
            Feature::MacdReversal => "macd_reversal",
            Feature::BandBreach => "band_breach",
            Feature::Volume => "volume",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a feature set as `a|b|c` for logs and the learning CSV.
pub fn join_features(features: &[Feature]) -> String {
    features
        .iter()
        .map(Feature::as_str)
        .collect::<Vec<_>>()
        .join("|")
}
