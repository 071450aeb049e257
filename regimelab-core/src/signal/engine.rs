//! Signal engine — dispatches to the model matching the committed regime.

use serde::{Deserialize, Serialize};

use crate::domain::Bar;
use crate::learning::LearningState;
use crate::regime::{Regime, RegimeState};

use super::{
    InactiveReason, MeanReversion, MeanReversionConfig, SignalCandidate, SignalModel,
    TrendConfig, TrendFollowing,
};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub trend: TrendConfig,
    pub mean_reversion: MeanReversionConfig,
    /// Score NEUTRAL bars with the trend model instead of standing aside.
    pub allow_neutral_entries: bool,
}

impl SignalConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.trend.validate()?;
        self.mean_reversion.validate()
    }
}

pub struct SignalEngine {
    trend: TrendFollowing,
    mean_reversion: MeanReversion,
    allow_neutral_entries: bool,
}

impl SignalEngine {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            trend: TrendFollowing::new(config.trend.clone()),
            mean_reversion: MeanReversion::new(config.mean_reversion.clone()),
            allow_neutral_entries: config.allow_neutral_entries,
        }
    }

    /// Model for a committed regime, or `None` when the regime stands aside.
    pub fn model_for(&self, regime: Regime) -> Option<&dyn SignalModel> {
        let model: &dyn SignalModel = match regime {
            Regime::Trending => &self.trend,
            Regime::Choppy => &self.mean_reversion,
            Regime::Neutral if self.allow_neutral_entries => &self.trend,
            Regime::Neutral => return None,
        };
        Some(model)
    }

    /// Score the last bar of `window` under the model selected by `regime`.
    pub fn evaluate(
        &self,
        symbol: &str,
        window: &[Bar],
        regime: &RegimeState,
        learning: &LearningState,
    ) -> SignalCandidate {
        let mut candidate = match self.model_for(regime.regime) {
            Some(model) => model.evaluate(symbol, window, learning),
            None => SignalCandidate::inactive(symbol, window.last(), InactiveReason::NeutralRegime),
        };
        candidate.regime = regime.regime;
        candidate.regime_confidence = regime.confidence;
        candidate
    }
}
