//! RegimeLab Core — the regime-aware decision pipeline and its replay engine.
//!
//! This crate contains everything that decides:
//! - Domain types (bars with indicator columns, positions, trades, features)
//! - Indicator computation
//! - Regime classifier with confirmation hysteresis
//! - Trend-following and mean-reversion signal models behind one trait
//! - Bounded adaptive weighting of symbol bias and feature weights
//! - Risk manager with six ordered entry gates
//! - Exit manager with ATR-scaled levels and ratcheting trailing stops
//! - Bar-by-bar replay with spread, slippage, commission, latency and partial fills

pub mod config;
pub mod domain;
pub mod engine;
pub mod exits;
pub mod indicators;
pub mod learning;
pub mod pipeline;
pub mod regime;
pub mod risk;
pub mod signal;
pub mod state;

pub use config::{ConfigError, CoreConfig};
pub use pipeline::{Evaluation, Pipeline, TradingContext};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types shared with the scheduler and the rayon
    /// walk-forward pool are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Position>();
        require_sync::<domain::Position>();
        require_send::<domain::TradeRecord>();
        require_sync::<domain::TradeRecord>();

        require_send::<CoreConfig>();
        require_sync::<CoreConfig>();
        require_send::<engine::FrictionModel>();
        require_sync::<engine::FrictionModel>();
        require_send::<engine::ReplayOutcome>();
        require_sync::<engine::ReplayOutcome>();

        require_send::<Pipeline>();
        require_sync::<Pipeline>();
        require_send::<TradingContext>();
        require_sync::<TradingContext>();
        require_send::<state::PersistedState>();
        require_sync::<state::PersistedState>();

        require_send::<signal::TrendFollowing>();
        require_sync::<signal::TrendFollowing>();
        require_send::<signal::MeanReversion>();
        require_sync::<signal::MeanReversion>();
    }

    /// Architecture contract: signal models cannot see risk state or positions.
    ///
    /// `SignalModel::evaluate` takes bars and learning state only. Adding a
    /// risk or position parameter changes the trait and breaks this check.
    #[test]
    fn signal_model_has_no_risk_or_position_parameter() {
        fn _check_trait_object_builds(
            model: &dyn signal::SignalModel,
            bars: &[domain::Bar],
            learning: &learning::LearningState,
        ) -> signal::SignalCandidate {
            model.evaluate("SPY", bars, learning)
        }
    }

    /// Architecture contract: the replay engine builds its own context.
    #[test]
    fn replay_takes_no_external_state() {
        fn _check(
            bars: &[domain::Bar],
            config: &CoreConfig,
            friction: &engine::FrictionModel,
        ) -> Result<engine::ReplayOutcome, engine::ReplayError> {
            engine::replay("SPY", bars, config, friction, 10_000.0)
        }
    }
}
