//! Adaptive weighting — bounded online adjustment of symbol bias and feature weights.
//!
//! After every closed trade the symbol bias and the weight of each feature
//! that was active at entry move one small step in the direction of the
//! outcome. Every value is clamped to `[-clamp, +clamp]` after each step, so
//! the state stays bounded for any sequence of outcomes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::Feature;

/// PnL magnitudes below this are treated as flat and do not move any weight.
const FLAT_PNL_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub symbol_learning_rate: f64,
    pub feature_learning_rate: f64,
    /// Symmetric bound for the bias and every feature weight.
    pub clamp: f64,
    /// PnL at which a step reaches full size. 0 means every step is full size.
    pub magnitude_reference: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            symbol_learning_rate: 0.10,
            feature_learning_rate: 0.05,
            clamp: 1.5,
            magnitude_reference: 0.0,
        }
    }
}

impl LearningConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.clamp > 0.0) {
            return Err("clamp must be positive".into());
        }
        if self.symbol_learning_rate < 0.0 || self.feature_learning_rate < 0.0 {
            return Err("learning rates must be non-negative".into());
        }
        if self.symbol_learning_rate > self.clamp || self.feature_learning_rate > self.clamp {
            return Err("learning rates cannot exceed the clamp".into());
        }
        if self.magnitude_reference < 0.0 {
            return Err("magnitude_reference must be non-negative".into());
        }
        Ok(())
    }

    fn magnitude_factor(&self, pnl: f64) -> f64 {
        if self.magnitude_reference > 0.0 {
            (pnl.abs() / self.magnitude_reference).min(1.0)
        } else {
            1.0
        }
    }
}

/// Learned adjustments for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolLearning {
    pub bias: f64,
    pub weights: BTreeMap<Feature, f64>,
    pub updates: u64,
}

/// Per-symbol learning state. Each context (live process, backtest run,
/// walk-forward fold) owns its own copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningState {
    pub symbols: BTreeMap<String, SymbolLearning>,
}

/// Before/after values of one update, for the learning log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningUpdate {
    pub symbol: String,
    pub pnl: f64,
    pub bias_before: f64,
    pub bias_after: f64,
    /// Feature-weight sum for the trade's features before the update.
    pub feature_adjustment_before: f64,
    pub feature_adjustment_after: f64,
    pub applied: bool,
}

impl LearningState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bias(&self, symbol: &str) -> f64 {
        self.symbols.get(symbol).map_or(0.0, |s| s.bias)
    }

    pub fn weight(&self, symbol: &str, feature: Feature) -> f64 {
        self.symbols
            .get(symbol)
            .and_then(|s| s.weights.get(&feature))
            .copied()
            .unwrap_or(0.0)
    }

    /// Sum of weights of `features` for `symbol`.
    pub fn feature_adjustment(&self, symbol: &str, features: &[Feature]) -> f64 {
        features.iter().map(|f| self.weight(symbol, *f)).sum()
    }

    /// Bias plus feature adjustment: what gets added to a raw score.
    pub fn adjustment(&self, symbol: &str, features: &[Feature]) -> f64 {
        self.bias(symbol) + self.feature_adjustment(symbol, features)
    }

    /// Apply one closed-trade outcome.
    pub fn record_outcome(
        &mut self,
        config: &LearningConfig,
        symbol: &str,
        features: &[Feature],
        pnl: f64,
    ) -> LearningUpdate {
        let bias_before = self.bias(symbol);
        let feature_before = self.feature_adjustment(symbol, features);

        if !pnl.is_finite() || pnl.abs() < FLAT_PNL_EPSILON {
            return LearningUpdate {
                symbol: symbol.to_string(),
                pnl,
                bias_before,
                bias_after: bias_before,
                feature_adjustment_before: feature_before,
                feature_adjustment_after: feature_before,
                applied: false,
            };
        }

        let direction = pnl.signum();
        let magnitude = config.magnitude_factor(pnl);
        let clamp = config.clamp;

        let entry = self.symbols.entry(symbol.to_string()).or_default();
        entry.bias = (entry.bias + config.symbol_learning_rate * direction * magnitude)
            .clamp(-clamp, clamp);

        // A feature listed twice still moves once.
        let mut seen: Vec<Feature> = features.to_vec();
        seen.sort();
        seen.dedup();
        for feature in seen {
            let w = entry.weights.entry(feature).or_insert(0.0);
            *w = (*w + config.feature_learning_rate * direction * magnitude).clamp(-clamp, clamp);
        }
        // Re-clamp everything in case the clamp was tightened since the last save.
        for w in entry.weights.values_mut() {
            *w = w.clamp(-clamp, clamp);
        }
        entry.updates += 1;

        let bias_after = entry.bias;
        LearningUpdate {
            symbol: symbol.to_string(),
            pnl,
            bias_before,
            bias_after,
            feature_adjustment_before: feature_before,
            feature_adjustment_after: self.feature_adjustment(symbol, features),
            applied: true,
        }
    }

    /// Largest absolute bias or weight across all symbols.
    pub fn max_magnitude(&self) -> f64 {
        self.symbols
            .values()
            .flat_map(|s| std::iter::once(s.bias).chain(s.weights.values().copied()))
            .fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win_moves_bias_and_active_weights_up() {
        let config = LearningConfig::default();
        let mut state = LearningState::new();
        let update = state.record_outcome(
            &config,
            "SPY",
            &[Feature::Trend, Feature::Volume],
            25.0,
        );
        assert!(update.applied);
        assert_eq!(update.bias_before, 0.0);
        assert!((update.bias_after - 0.10).abs() < 1e-12);
        assert!((state.weight("SPY", Feature::Trend) - 0.05).abs() < 1e-12);
        assert!((state.weight("SPY", Feature::Volume) - 0.05).abs() < 1e-12);
        assert_eq!(state.weight("SPY", Feature::Momentum), 0.0);
        assert!((state.adjustment("SPY", &[Feature::Trend]) - 0.15).abs() < 1e-12);
    }

    #[test]
    fn loss_moves_down_and_other_symbols_untouched() {
        let config = LearningConfig::default();
        let mut state = LearningState::new();
        state.record_outcome(&config, "QQQ", &[Feature::Trend], -3.0);
        assert!((state.bias("QQQ") + 0.10).abs() < 1e-12);
        assert_eq!(state.bias("SPY"), 0.0);
    }

    #[test]
    fn flat_trade_is_ignored() {
        let config = LearningConfig::default();
        let mut state = LearningState::new();
        let update = state.record_outcome(&config, "SPY", &[Feature::Trend], 0.0);
        assert!(!update.applied);
        assert!(state.symbols.is_empty());
    }

    #[test]
    fn magnitude_reference_scales_step() {
        let config = LearningConfig {
            magnitude_reference: 100.0,
            ..LearningConfig::default()
        };
        let mut state = LearningState::new();
        state.record_outcome(&config, "SPY", &[], 50.0);
        assert!((state.bias("SPY") - 0.05).abs() < 1e-12);
        state.record_outcome(&config, "SPY", &[], 500.0);
        assert!((state.bias("SPY") - 0.15).abs() < 1e-12);
    }

    #[test]
    fn repeated_wins_saturate_at_clamp() {
        let config = LearningConfig::default();
        let mut state = LearningState::new();
        for _ in 0..100 {
            state.record_outcome(&config, "SPY", &[Feature::Trend], 10.0);
        }
        assert!((state.bias("SPY") - 1.5).abs() < 1e-12);
        assert!((state.weight("SPY", Feature::Trend) - 1.5).abs() < 1e-12);
        assert!(state.max_magnitude() <= config.clamp);
    }

    #[test]
    fn duplicate_features_step_once() {
        let config = LearningConfig::default();
        let mut state = LearningState::new();
        state.record_outcome(&config, "SPY", &[Feature::Trend, Feature::Trend], 1.0);
        assert!((state.weight("SPY", Feature::Trend) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn validate_bounds() {
        assert!(LearningConfig::default().validate().is_ok());
        let bad = LearningConfig {
            clamp: 0.0,
            ..LearningConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
