//! Decision pipeline shared by the replay engine and the live scheduler.
//!
//! `Pipeline` is stateless apart from configuration: it classifies, scores
//! and settles. All mutable trading state lives in a `TradingContext` owned
//! by the caller, so a live process, a backtest run and every walk-forward
//! fold each get their own.

use crate::config::CoreConfig;
use crate::domain::{Bar, Position, TradeRecord};
use crate::exits::ExitManager;
use crate::indicators::{enrich, IndicatorConfig};
use crate::learning::{LearningConfig, LearningState, LearningUpdate};
use crate::regime::{RegimeClassifier, RegimeState};
use crate::risk::{RiskManager, RiskState};
use crate::signal::{SignalCandidate, SignalEngine};

/// Regime and candidate for the last bar of a window.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub regime: RegimeState,
    pub candidate: SignalCandidate,
}

/// Mutable state for one trading context.
#[derive(Debug, Clone)]
pub struct TradingContext {
    pub risk: RiskManager,
    pub exits: ExitManager,
    pub learning: LearningState,
}

impl TradingContext {
    /// Fresh state: no positions, empty learning, zeroed counters.
    pub fn new(config: &CoreConfig) -> Self {
        Self::resume(config, RiskState::default(), LearningState::new(), Vec::new())
    }

    pub fn resume(
        config: &CoreConfig,
        risk: RiskState,
        learning: LearningState,
        positions: Vec<Position>,
    ) -> Self {
        Self {
            risk: RiskManager::with_state(config.risk.clone(), risk),
            exits: ExitManager::with_positions(config.exits.clone(), positions),
            learning,
        }
    }
}

pub struct Pipeline {
    indicators: IndicatorConfig,
    classifier: RegimeClassifier,
    engine: SignalEngine,
    learning: LearningConfig,
}

impl Pipeline {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            indicators: config.indicators.clone(),
            classifier: RegimeClassifier::new(config.regime.clone()),
            engine: SignalEngine::new(&config.signal),
            learning: config.learning.clone(),
        }
    }

    pub fn classifier(&self) -> &RegimeClassifier {
        &self.classifier
    }

    pub fn engine(&self) -> &SignalEngine {
        &self.engine
    }

    /// Compute indicator columns in place.
    pub fn prepare(&self, bars: &mut [Bar]) {
        enrich(bars, &self.indicators);
    }

    /// Classify and score the last bar of `window`.
    pub fn evaluate(&self, symbol: &str, window: &[Bar], learning: &LearningState) -> Evaluation {
        let regime = self.classifier.classify(window);
        let candidate = self.engine.evaluate(symbol, window, &regime, learning);
        Evaluation { regime, candidate }
    }

    /// Feed a closed trade back into risk and learning state.
    pub fn settle(&self, ctx: &mut TradingContext, trade: &TradeRecord) -> LearningUpdate {
        ctx.risk.record_close(trade.net_pnl, trade.exit_time);
        ctx.learning
            .record_outcome(&self.learning, &trade.symbol, &trade.features, trade.net_pnl)
    }
}
