//! End-to-end validation runs against CSV files on disk.
//!
//! 1. The shipped config file parses and matches the built-in defaults
//! 2. CSV-backed backtests match in-memory backtests and are deterministic
//! 3. Walk-forward folds cover the series and the gate follows the pass rate
//! 4. Data-quality failures surface as data errors

use chrono::Duration;
use std::path::Path;

use regimelab_core::CoreConfig;
use regimelab_runner::data::{write_csv, DataError};
use regimelab_runner::gate::{backtest_gate, walk_forward_gate};
use regimelab_runner::{
    run_backtest, run_walk_forward, AppConfig, CsvDirectory, ExecutionMode, MarketData,
    MemorySource, RunError, SyntheticSource, Timeframe, WalkForwardError,
};

// ── Helpers ──────────────────────────────────────────────────────────

const BARS: usize = 2_000;

fn synthetic(symbol: &str, bars: usize) -> Vec<regimelab_core::domain::Bar> {
    SyntheticSource::fixed(Timeframe::default(), bars).generate(symbol)
}

fn csv_dir_with(dir: &Path, symbol: &str, bars: usize) -> CsvDirectory {
    let source = CsvDirectory::new(dir);
    write_csv(&source.path_for(symbol), &synthetic(symbol, bars)).unwrap();
    source
}

// ── 1. Shipped config ────────────────────────────────────────────────

#[test]
fn shipped_config_matches_defaults() {
    let raw = include_str!("../../config/regimelab.toml");
    let config = AppConfig::from_toml_str(raw).unwrap();
    assert!(config.validate().is_ok());

    let mut core = config.core.clone();
    assert_eq!(core.risk.session.blackouts.len(), 1);
    core.risk.session.blackouts.clear();
    assert_eq!(core, CoreConfig::default());

    let defaults = AppConfig::default();
    assert_eq!(config.friction, defaults.friction);
    assert_eq!(config.backtest, defaults.backtest);
    assert_eq!(config.data, defaults.data);
    assert_eq!(config.walk_forward, defaults.walk_forward);
    assert!(config.preflight.require_backtest_pass);
    assert_eq!(config.live.mode, ExecutionMode::Signals);
    assert_eq!(config.live.initial_symbol(), Some("SPY"));
}

// ── 2. Backtest ──────────────────────────────────────────────────────

#[test]
fn csv_backtest_matches_in_memory_backtest() {
    let dir = tempfile::tempdir().unwrap();
    let csv = csv_dir_with(dir.path(), "SPY", BARS);
    let memory = MemorySource::with_bars("SPY", synthetic("SPY", BARS));
    let config = AppConfig::default();

    let from_csv = run_backtest("SPY", &csv, &config).unwrap();
    let from_memory = run_backtest("SPY", &memory, &config).unwrap();

    assert_eq!(from_csv.bar_count, BARS);
    assert_eq!(from_csv.metrics, from_memory.metrics);
    assert_eq!(from_csv.trades, from_memory.trades);
    assert_eq!(from_csv.config_hash, config.replay_hash());
}

#[test]
fn backtest_is_deterministic_and_gated() {
    let dir = tempfile::tempdir().unwrap();
    let csv = csv_dir_with(dir.path(), "QQQ", BARS);
    let config = AppConfig::default();

    let a = run_backtest("QQQ", &csv, &config).unwrap();
    let b = run_backtest("QQQ", &csv, &config).unwrap();
    assert_eq!(a.metrics, b.metrics);
    assert_eq!(a.trades, b.trades);
    assert_eq!(a.rejections, b.rejections);

    let report = backtest_gate(&a, &config.backtest);
    let expected = a
        .metrics
        .shortfall(
            config.backtest.min_trades,
            config.backtest.min_win_rate_pct,
            config.backtest.min_profit_factor,
        )
        .is_none();
    assert_eq!(report.passed, expected);
}

#[test]
fn lookback_limits_replayed_bars() {
    let dir = tempfile::tempdir().unwrap();
    let csv = csv_dir_with(dir.path(), "SPY", BARS);
    let mut config = AppConfig::default();
    config.backtest.lookback_bars = 500;

    let result = run_backtest("SPY", &csv, &config).unwrap();
    assert_eq!(result.bar_count, 500);
    let all = csv.fetch("SPY", 0).unwrap();
    assert_eq!(result.end, all.last().map(|b| b.timestamp));
}

// ── 3. Walk-forward ──────────────────────────────────────────────────

#[test]
fn walk_forward_folds_cover_series() {
    let dir = tempfile::tempdir().unwrap();
    let csv = csv_dir_with(dir.path(), "SPY", BARS);
    let config = AppConfig::default();

    let result = run_walk_forward("SPY", &csv, &config).unwrap();
    assert_eq!(result.folds.len(), config.walk_forward.splits);
    assert_eq!(result.folds.first().map(|f| f.fold.start), Some(0));
    assert_eq!(result.folds.last().map(|f| f.fold.end), Some(BARS));
    for pair in result.folds.windows(2) {
        assert_eq!(pair[0].fold.end, pair[1].fold.start);
    }

    let passed = result.folds.iter().filter(|f| f.passed).count();
    assert_eq!(result.passed_folds, passed);
    assert!(result
        .folds
        .iter()
        .all(|f| f.passed == f.reason.is_none()));

    let report = walk_forward_gate(&result, &config.walk_forward);
    assert_eq!(
        report.passed,
        result.pass_rate_pct >= config.walk_forward.min_pass_rate_pct
    );
    assert_eq!(report.passed, result.passed);
}

#[test]
fn walk_forward_needs_enough_bars() {
    let dir = tempfile::tempdir().unwrap();
    let csv = csv_dir_with(dir.path(), "IWM", 1_000);
    let config = AppConfig::default();

    let err = run_walk_forward("IWM", &csv, &config).unwrap_err();
    assert!(matches!(
        err,
        WalkForwardError::InsufficientData {
            total_bars: 1_000,
            min_bars: 1_200,
            splits: 4
        }
    ));
}

// ── 4. Data quality ──────────────────────────────────────────────────

#[test]
fn missing_file_is_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let csv = CsvDirectory::new(dir.path());
    let err = run_backtest("DIA", &csv, &AppConfig::default()).unwrap_err();
    assert!(matches!(err, RunError::Data(DataError::NoData { .. })));
}

#[test]
fn gappy_series_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let csv = CsvDirectory::new(dir.path());
    let mut bars = synthetic("SPY", 400);
    // Push the second half a week later: far more missing bars than allowed.
    for bar in bars.iter_mut().skip(200) {
        bar.timestamp += Duration::days(7);
    }
    write_csv(&csv.path_for("SPY"), &bars).unwrap();

    let err = run_backtest("SPY", &csv, &AppConfig::default()).unwrap_err();
    assert!(matches!(err, RunError::Data(DataError::Quality { .. })));
}
