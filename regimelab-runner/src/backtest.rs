//! Backtest runner — replays one symbol and assembles a `BacktestResult`.
//!
//! `run_backtest` is the I/O-facing entry point (fetch, sanitize, lookback);
//! `backtest_bars` runs on pre-loaded bars and is what walk-forward folds use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

use regimelab_core::domain::{Bar, TradeRecord};
use regimelab_core::engine::{replay, EquityPoint, ReplayError};
use regimelab_core::risk::Gate;

use crate::config::AppConfig;
use crate::data::{sanitize, DataError, MarketData};
use crate::metrics::PerformanceMetrics;

/// Current schema version for persisted results.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error("replay error: {0}")]
    Replay(#[from] ReplayError),
}

/// Complete result of a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub symbol: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub initial_capital: f64,
    pub metrics: PerformanceMetrics,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    /// Entry rejections per risk gate.
    pub rejections: BTreeMap<Gate, usize>,
    pub signal_count: usize,
    pub bar_count: usize,
    /// BLAKE3 hash of the replay-relevant configuration.
    pub config_hash: String,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Fetch, sanitize and replay `symbol` over the configured lookback.
pub fn run_backtest(
    symbol: &str,
    source: &dyn MarketData,
    config: &AppConfig,
) -> Result<BacktestResult, RunError> {
    let raw = source.fetch(symbol, config.backtest.lookback_bars)?;
    let bars = sanitize(symbol, raw, config.backtest.timeframe, &config.data)?;
    Ok(backtest_bars(symbol, &bars, config)?)
}

/// Replay pre-loaded bars with fresh risk and learning state. No I/O.
pub fn backtest_bars(
    symbol: &str,
    bars: &[Bar],
    config: &AppConfig,
) -> Result<BacktestResult, ReplayError> {
    let initial_capital = config.backtest.initial_capital;
    let outcome = replay(symbol, bars, &config.core, &config.friction, initial_capital)?;

    let equity: Vec<f64> = outcome.equity_curve.iter().map(|p| p.equity).collect();
    let metrics = PerformanceMetrics::compute(
        &equity,
        &outcome.trades,
        initial_capital,
        config.backtest.timeframe.bars_per_year(),
    );

    info!(
        symbol,
        trades = metrics.trades,
        win_rate_pct = metrics.win_rate_pct,
        profit_factor = metrics.profit_factor,
        return_pct = metrics.total_return_pct,
        "backtest complete"
    );

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        symbol: symbol.to_string(),
        start: bars.first().map(|b| b.timestamp),
        end: bars.last().map(|b| b.timestamp),
        initial_capital,
        metrics,
        trades: outcome.trades,
        equity_curve: outcome.equity_curve,
        rejections: outcome.rejections,
        signal_count: outcome.signal_count,
        bar_count: outcome.bar_count,
        config_hash: config.replay_hash(),
    })
}
