//! Walk-forward validation — contiguous folds, each an independent backtest.
//!
//! The bar history is cut into `splits` non-overlapping folds of equal size
//! (the remainder goes to the last fold). Every fold replays with fresh risk
//! and learning state, so nothing one fold learns leaks into the next. Folds
//! run on the rayon pool; results keep fold order.
//!
//! A fold passes when its trade count, win rate and profit factor meet the
//! fold minimums. The validation passes when the share of passing folds is at
//! least `min_pass_rate_pct`.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use regimelab_core::domain::{Bar, TradeRecord};
use regimelab_core::engine::ReplayError;

use crate::backtest::{backtest_bars, SCHEMA_VERSION};
use crate::config::AppConfig;
use crate::data::{sanitize, DataError, MarketData};
use crate::metrics::PerformanceMetrics;

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardConfig {
    pub splits: usize,
    pub min_bars_per_split: usize,
    pub min_trades: usize,
    pub min_win_rate_pct: f64,
    pub min_profit_factor: f64,
    /// Share of folds that must pass, in percent.
    pub min_pass_rate_pct: f64,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            splits: 4,
            min_bars_per_split: 300,
            min_trades: 3,
            min_win_rate_pct: 40.0,
            min_profit_factor: 1.0,
            min_pass_rate_pct: 60.0,
        }
    }
}

impl WalkForwardConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.splits < 2 {
            return Err("splits must be >= 2".into());
        }
        if self.min_bars_per_split == 0 {
            return Err("min_bars_per_split must be >= 1".into());
        }
        for (name, v) in [
            ("min_win_rate_pct", self.min_win_rate_pct),
            ("min_pass_rate_pct", self.min_pass_rate_pct),
        ] {
            if !(0.0..=100.0).contains(&v) {
                return Err(format!("{name} must be in [0, 100]"));
            }
        }
        if self.min_profit_factor < 0.0 {
            return Err("min_profit_factor must be non-negative".into());
        }
        Ok(())
    }

    /// Bars needed for a walk-forward run to be possible at all.
    pub fn min_total_bars(&self) -> usize {
        self.splits * self.min_bars_per_split
    }
}

// ─── Result types ────────────────────────────────────────────────────

/// Bar index range of one fold, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldSpec {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl FoldSpec {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldResult {
    pub fold: FoldSpec,
    pub metrics: PerformanceMetrics,
    pub passed: bool,
    /// Why the fold failed; `None` when it passed.
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardResult {
    pub schema_version: u32,
    pub symbol: String,
    pub folds: Vec<FoldResult>,
    pub passed_folds: usize,
    pub pass_rate_pct: f64,
    pub passed: bool,
    /// Metrics over the trades of all folds together.
    pub aggregate: PerformanceMetrics,
    pub config_hash: String,
}

#[derive(Debug, Error)]
pub enum WalkForwardError {
    #[error("insufficient data: {total_bars} bars < {min_bars} required for {splits} splits")]
    InsufficientData {
        total_bars: usize,
        min_bars: usize,
        splits: usize,
    },
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error("backtest error on fold {fold}: {source}")]
    BacktestFailed {
        fold: usize,
        #[source]
        source: ReplayError,
    },
}

// ─── Fold creation ───────────────────────────────────────────────────

/// Split `total_bars` into contiguous, non-overlapping folds.
pub fn create_folds(
    total_bars: usize,
    config: &WalkForwardConfig,
) -> Result<Vec<FoldSpec>, WalkForwardError> {
    let insufficient = || WalkForwardError::InsufficientData {
        total_bars,
        min_bars: config.min_total_bars(),
        splits: config.splits,
    };
    if config.splits == 0 {
        return Err(insufficient());
    }
    let size = total_bars / config.splits;
    if size < config.min_bars_per_split {
        return Err(insufficient());
    }

    Ok((0..config.splits)
        .map(|index| {
            let start = index * size;
            let end = if index + 1 == config.splits {
                total_bars
            } else {
                start + size
            };
            FoldSpec { index, start, end }
        })
        .collect())
}

// ─── Orchestration ───────────────────────────────────────────────────

/// Fetch, sanitize and walk-forward `symbol` over the configured lookback.
pub fn run_walk_forward(
    symbol: &str,
    source: &dyn MarketData,
    config: &AppConfig,
) -> Result<WalkForwardResult, WalkForwardError> {
    let raw = source.fetch(symbol, config.backtest.lookback_bars)?;
    let bars = sanitize(symbol, raw, config.backtest.timeframe, &config.data)?;
    walk_forward_bars(symbol, &bars, config)
}

/// Walk-forward on pre-loaded bars. No I/O.
pub fn walk_forward_bars(
    symbol: &str,
    bars: &[Bar],
    config: &AppConfig,
) -> Result<WalkForwardResult, WalkForwardError> {
    let wf = &config.walk_forward;
    let folds = create_folds(bars.len(), wf)?;

    let results: Vec<(FoldResult, Vec<TradeRecord>)> = folds
        .par_iter()
        .map(|fold| {
            let result = backtest_bars(symbol, &bars[fold.start..fold.end], config).map_err(
                |source| WalkForwardError::BacktestFailed {
                    fold: fold.index,
                    source,
                },
            )?;
            let reason = result.metrics.shortfall(
                wf.min_trades,
                wf.min_win_rate_pct,
                wf.min_profit_factor,
            );
            let fold_result = FoldResult {
                fold: *fold,
                metrics: result.metrics,
                passed: reason.is_none(),
                reason,
            };
            Ok((fold_result, result.trades))
        })
        .collect::<Result<_, WalkForwardError>>()?;

    let mut fold_results = Vec::with_capacity(results.len());
    let mut all_trades = Vec::new();
    for (fold, trades) in results {
        all_trades.extend(trades);
        fold_results.push(fold);
    }

    let passed_folds = fold_results.iter().filter(|f| f.passed).count();
    let pass_rate_pct = pass_rate_pct(passed_folds, fold_results.len());
    let passed = pass_rate_pct >= wf.min_pass_rate_pct;

    let capital = config.backtest.initial_capital;
    let mut equity = vec![capital];
    for trade in &all_trades {
        let last = equity.last().copied().unwrap_or(capital);
        equity.push(last + trade.net_pnl);
    }
    // Trade-to-trade steps, so the Sharpe ratio here is per trade, unannualized.
    let aggregate = PerformanceMetrics::compute(&equity, &all_trades, capital, 1.0);

    info!(
        symbol,
        folds = fold_results.len(),
        passed_folds,
        pass_rate_pct,
        passed,
        "walk-forward complete"
    );

    Ok(WalkForwardResult {
        schema_version: SCHEMA_VERSION,
        symbol: symbol.to_string(),
        folds: fold_results,
        passed_folds,
        pass_rate_pct,
        passed,
        aggregate,
        config_hash: config.replay_hash(),
    })
}

pub fn pass_rate_pct(passed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    passed as f64 / total as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeframe;
    use crate::data::SyntheticSource;

    fn config(splits: usize, min_bars: usize) -> WalkForwardConfig {
        WalkForwardConfig {
            splits,
            min_bars_per_split: min_bars,
            ..WalkForwardConfig::default()
        }
    }

    #[test]
    fn folds_are_contiguous_with_remainder_last() {
        let folds = create_folds(1_003, &config(4, 200)).unwrap();
        assert_eq!(folds.len(), 4);
        assert_eq!(folds[0].start, 0);
        assert_eq!(folds[0].len(), 250);
        for pair in folds.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(folds[3].end, 1_003);
        assert_eq!(folds[3].len(), 253);
    }

    #[test]
    fn short_history_is_insufficient() {
        let err = create_folds(1_000, &config(4, 300)).unwrap_err();
        assert!(matches!(
            err,
            WalkForwardError::InsufficientData {
                total_bars: 1_000,
                min_bars: 1_200,
                splits: 4
            }
        ));
    }

    #[test]
    fn two_of_four_folds_is_below_sixty_percent() {
        let rate = pass_rate_pct(2, 4);
        assert_eq!(rate, 50.0);
        assert!(rate < WalkForwardConfig::default().min_pass_rate_pct);
        assert_eq!(pass_rate_pct(0, 0), 0.0);
    }

    #[test]
    fn fold_outcomes_are_in_order_and_counted() {
        let mut app = AppConfig::default();
        app.walk_forward = config(3, 300);
        let source = SyntheticSource::fixed(Timeframe::default(), 960);
        let result = run_walk_forward("SPY", &source, &app).unwrap();

        assert_eq!(result.folds.len(), 3);
        assert!(result.folds.iter().enumerate().all(|(i, f)| f.fold.index == i));
        let passed = result.folds.iter().filter(|f| f.passed).count();
        assert_eq!(result.passed_folds, passed);
        assert_eq!(result.pass_rate_pct, pass_rate_pct(passed, 3));
        assert_eq!(result.passed, result.pass_rate_pct >= 60.0);
        for fold in &result.folds {
            assert_eq!(fold.passed, fold.reason.is_none());
        }
        let fold_trades: usize = result.folds.iter().map(|f| f.metrics.trades).sum();
        assert_eq!(result.aggregate.trades, fold_trades);
    }

    #[test]
    fn walk_forward_is_deterministic() {
        let mut app = AppConfig::default();
        app.walk_forward = config(2, 300);
        let source = SyntheticSource::fixed(Timeframe::default(), 700);
        let a = run_walk_forward("QQQ", &source, &app).unwrap();
        let b = run_walk_forward("QQQ", &source, &app).unwrap();
        let metrics = |r: &WalkForwardResult| -> Vec<PerformanceMetrics> {
            r.folds.iter().map(|f| f.metrics.clone()).collect()
        };
        assert_eq!(metrics(&a), metrics(&b));
        assert_eq!(a.passed, b.passed);
    }
}
