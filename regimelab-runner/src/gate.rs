//! Backtest and walk-forward gates, and the startup preflight built on them.
//!
//! A gate failure is a value (`GateReport { passed: false, .. }`), not an
//! error: a symbol whose history cannot be validated is simply blocked.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::backtest::{run_backtest, BacktestResult};
use crate::config::{AppConfig, BacktestSettings};
use crate::data::MarketData;
use crate::metrics::PerformanceMetrics;
use crate::walk_forward::{run_walk_forward, WalkForwardConfig, WalkForwardResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    pub passed: bool,
    pub reason: String,
}

impl GateReport {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// Full-lookback gate: trades, win rate and profit factor against the
/// backtest minimums.
pub fn backtest_gate(result: &BacktestResult, settings: &BacktestSettings) -> GateReport {
    match result.metrics.shortfall(
        settings.min_trades,
        settings.min_win_rate_pct,
        settings.min_profit_factor,
    ) {
        Some(reason) => GateReport::fail(format!("backtest {reason}")),
        None => GateReport::pass("backtest gate passed"),
    }
}

/// Passes iff the fold pass rate reaches `min_pass_rate_pct`.
pub fn walk_forward_gate(result: &WalkForwardResult, config: &WalkForwardConfig) -> GateReport {
    let summary = format!(
        "{}/{} folds passed ({:.2}%)",
        result.passed_folds,
        result.folds.len(),
        result.pass_rate_pct
    );
    if result.pass_rate_pct >= config.min_pass_rate_pct {
        GateReport::pass(format!("walk-forward gate passed: {summary}"))
    } else {
        GateReport::fail(format!(
            "walk-forward pass rate too low: {summary} < {:.2}%",
            config.min_pass_rate_pct
        ))
    }
}

// ─── Preflight ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightConfig {
    /// Block execution for symbols whose validation gate fails.
    pub require_backtest_pass: bool,
    /// Validate with walk-forward instead of a single full-lookback backtest.
    pub use_walk_forward: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    Backtest,
    WalkForward,
}

/// Preflight verdict for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightEntry {
    pub symbol: String,
    pub mode: ValidationMode,
    pub report: GateReport,
    pub checked_at: DateTime<Utc>,
    /// Full-lookback or aggregate fold metrics; `None` when validation could
    /// not run.
    pub metrics: Option<PerformanceMetrics>,
}

/// Validate one symbol. Errors become failed reports.
pub fn preflight_symbol(
    symbol: &str,
    source: &dyn MarketData,
    config: &AppConfig,
    now: DateTime<Utc>,
) -> PreflightEntry {
    let (mode, report, metrics) = if config.preflight.use_walk_forward {
        match run_walk_forward(symbol, source, config) {
            Ok(result) => (
                ValidationMode::WalkForward,
                walk_forward_gate(&result, &config.walk_forward),
                Some(result.aggregate),
            ),
            Err(e) => (
                ValidationMode::WalkForward,
                GateReport::fail(format!("walk-forward unavailable: {e}")),
                None,
            ),
        }
    } else {
        match run_backtest(symbol, source, config) {
            Ok(result) => (
                ValidationMode::Backtest,
                backtest_gate(&result, &config.backtest),
                Some(result.metrics),
            ),
            Err(e) => (
                ValidationMode::Backtest,
                GateReport::fail(format!("backtest unavailable: {e}")),
                None,
            ),
        }
    };

    if report.passed {
        info!(symbol, reason = %report.reason, "preflight pass");
    } else {
        warn!(symbol, reason = %report.reason, "preflight block");
    }

    PreflightEntry {
        symbol: symbol.to_string(),
        mode,
        report,
        checked_at: now,
        metrics,
    }
}

/// Validate every symbol in parallel.
pub fn run_preflight(
    symbols: &[String],
    source: &dyn MarketData,
    config: &AppConfig,
    now: DateTime<Utc>,
) -> BTreeMap<String, PreflightEntry> {
    symbols
        .par_iter()
        .map(|symbol| {
            (
                symbol.clone(),
                preflight_symbol(symbol, source, config, now),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeframe;
    use crate::data::{MemorySource, SyntheticSource};
    use crate::walk_forward::{FoldResult, FoldSpec};
    use chrono::TimeZone;

    fn metrics(trades: usize, wins: usize, pf: f64) -> PerformanceMetrics {
        PerformanceMetrics {
            initial_capital: 100_000.0,
            final_equity: 100_000.0,
            net_profit: 0.0,
            total_return_pct: 0.0,
            max_drawdown_pct: 0.0,
            sharpe: 0.0,
            trades,
            wins,
            losses: trades - wins,
            win_rate_pct: if trades == 0 {
                0.0
            } else {
                wins as f64 / trades as f64 * 100.0
            },
            profit_factor: pf,
            avg_trade_pnl: 0.0,
            max_consecutive_losses: 0,
        }
    }

    fn wf_result(passing: &[bool]) -> WalkForwardResult {
        let folds: Vec<FoldResult> = passing
            .iter()
            .enumerate()
            .map(|(index, passed)| FoldResult {
                fold: FoldSpec {
                    index,
                    start: index * 300,
                    end: (index + 1) * 300,
                },
                metrics: metrics(5, 3, 1.5),
                passed: *passed,
                reason: (!passed).then(|| "trades below threshold".to_string()),
            })
            .collect();
        let passed_folds = passing.iter().filter(|p| **p).count();
        let pass_rate_pct = crate::walk_forward::pass_rate_pct(passed_folds, folds.len());
        WalkForwardResult {
            schema_version: 1,
            symbol: "SPY".into(),
            folds,
            passed_folds,
            pass_rate_pct,
            passed: pass_rate_pct >= 60.0,
            aggregate: metrics(20, 12, 1.5),
            config_hash: String::new(),
        }
    }

    #[test]
    fn walk_forward_gate_blocks_half_passing_folds() {
        let config = WalkForwardConfig::default();
        let report = walk_forward_gate(&wf_result(&[true, false, true, false]), &config);
        assert!(!report.passed);
        assert!(report.reason.contains("2/4"));
        assert!(report.reason.contains("50.00%"));

        let report = walk_forward_gate(&wf_result(&[true, true, true, false]), &config);
        assert!(report.passed);
    }

    #[test]
    fn preflight_reports_missing_data_as_failed_gate() {
        let source = MemorySource::new();
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 13, 0, 0).unwrap();
        let entry = preflight_symbol("SPY", &source, &AppConfig::default(), now);
        assert_eq!(entry.mode, ValidationMode::Backtest);
        assert!(!entry.report.passed);
        assert!(entry.report.reason.contains("unavailable"));
        assert!(entry.metrics.is_none());
    }

    #[test]
    fn preflight_walk_forward_insufficient_history_blocks() {
        let source = SyntheticSource::fixed(Timeframe::default(), 500);
        let mut config = AppConfig::default();
        config.preflight.use_walk_forward = true;
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 13, 0, 0).unwrap();
        let entry = preflight_symbol("SPY", &source, &config, now);
        assert_eq!(entry.mode, ValidationMode::WalkForward);
        assert!(!entry.report.passed);
        assert!(entry.report.reason.contains("insufficient data"));
    }

    #[test]
    fn preflight_covers_every_symbol() {
        let source = SyntheticSource::fixed(Timeframe::default(), 600);
        let symbols = vec!["SPY".to_string(), "QQQ".to_string(), "IWM".to_string()];
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 13, 0, 0).unwrap();
        let entries = run_preflight(&symbols, &source, &AppConfig::default(), now);
        assert_eq!(entries.len(), 3);
        for symbol in &symbols {
            let entry = &entries[symbol];
            assert_eq!(&entry.symbol, symbol);
            assert!(entry.metrics.is_some());
            assert_eq!(entry.checked_at, now);
        }
    }
}
