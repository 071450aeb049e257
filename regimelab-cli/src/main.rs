//! RegimeLab CLI — validation runs, the live loop and config checks.
//!
//! Commands:
//! - `backtest` — full-lookback backtest of one or more symbols, with the gate verdict
//! - `walk-forward` — sequential out-of-sample folds and the pass-rate gate
//! - `run` — the live cycle scheduler (forever, or a fixed number of cycles)
//! - `check-config` — parse and validate a config file, printing warnings

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use regimelab_runner::gate::{backtest_gate, walk_forward_gate};
use regimelab_runner::{
    run_backtest, run_walk_forward, AppConfig, BacktestResult, CsvDirectory, JsonStateStore,
    LearningLog, MarketData, Scheduler, SyntheticSource, WalkForwardResult,
};

#[derive(Parser)]
#[command(
    name = "regimelab",
    about = "RegimeLab CLI — regime-aware signal pipeline with validation gates"
)]
struct Cli {
    /// Path to the TOML config file. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Generate deterministic synthetic bars instead of reading CSV files.
    #[arg(long, global = true, default_value_t = false)]
    synthetic: bool,

    /// Bars per symbol when --synthetic is set.
    #[arg(long, global = true, default_value_t = 2_000)]
    synthetic_bars: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest symbols over the configured lookback and apply the backtest gate.
    Backtest {
        /// Symbols to test. Defaults to `live.symbols`.
        symbols: Vec<String>,

        /// Print the full result as JSON instead of a summary.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Directory to write `<SYMBOL>_backtest.json` results into.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Walk-forward validation with the fold pass-rate gate.
    WalkForward {
        /// Symbols to test. Defaults to `live.symbols`.
        symbols: Vec<String>,

        /// Override `walk_forward.splits`.
        #[arg(long)]
        splits: Option<usize>,

        /// Print the full result as JSON instead of a summary.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Directory to write `<SYMBOL>_walk_forward.json` results into.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Run the live scheduler.
    Run {
        /// Run a single cycle and exit.
        #[arg(long, default_value_t = false, conflicts_with = "cycles")]
        once: bool,

        /// Stop after this many cycles.
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Parse and validate a config file.
    CheckConfig,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let source = market_data(&config, cli.synthetic, cli.synthetic_bars);

    match cli.command {
        Commands::Backtest {
            symbols,
            json,
            output_dir,
        } => run_backtest_cmd(&config, source.as_ref(), symbols, json, output_dir),
        Commands::WalkForward {
            symbols,
            splits,
            json,
            output_dir,
        } => {
            let mut config = config;
            if let Some(splits) = splits {
                config.walk_forward.splits = splits;
                config
                    .validate()
                    .context("invalid --splits override")?;
            }
            run_walk_forward_cmd(&config, source.as_ref(), symbols, json, output_dir)
        }
        Commands::Run { once, cycles } => {
            let max_cycles = if once { Some(1) } else { cycles };
            run_live(config, source, max_cycles)
        }
        Commands::CheckConfig => {
            println!("Config OK (replay hash {})", config.replay_hash());
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("regimelab=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let (config, warnings) = match path {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => {
            let config = AppConfig::default();
            let warnings = config.validate()?;
            (config, warnings)
        }
    };
    for warning in &warnings {
        warn!("config: {warning}");
    }
    Ok(config)
}

fn market_data(config: &AppConfig, synthetic: bool, bars: usize) -> Arc<dyn MarketData> {
    if synthetic {
        Arc::new(SyntheticSource::new(
            config.backtest.timeframe,
            bars,
            chrono::Utc::now(),
        ))
    } else {
        Arc::new(CsvDirectory::new(&config.live.data_dir))
    }
}

fn symbols_or_default(symbols: Vec<String>, config: &AppConfig) -> Vec<String> {
    if symbols.is_empty() {
        config.live.symbols.clone()
    } else {
        symbols
    }
}

// ─── Validation commands ─────────────────────────────────────────────

fn run_backtest_cmd(
    config: &AppConfig,
    source: &dyn MarketData,
    symbols: Vec<String>,
    json: bool,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let mut failed = 0;
    for symbol in symbols_or_default(symbols, config) {
        let result = run_backtest(&symbol, source, config)
            .with_context(|| format!("backtest for {symbol}"))?;
        let report = backtest_gate(&result, &config.backtest);
        if !report.passed {
            failed += 1;
        }

        if json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print_backtest_summary(&result);
            println!("Gate:           {}", report.reason);
        }
        if let Some(dir) = &output_dir {
            let path = write_json(dir, &format!("{symbol}_backtest.json"), &result)?;
            info!(path = %path.display(), "backtest result saved");
        }
    }
    if failed > 0 {
        bail!("{failed} symbol(s) failed the backtest gate");
    }
    Ok(())
}

fn run_walk_forward_cmd(
    config: &AppConfig,
    source: &dyn MarketData,
    symbols: Vec<String>,
    json: bool,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let mut failed = 0;
    for symbol in symbols_or_default(symbols, config) {
        let result = run_walk_forward(&symbol, source, config)
            .with_context(|| format!("walk-forward for {symbol}"))?;
        let report = walk_forward_gate(&result, &config.walk_forward);
        if !report.passed {
            failed += 1;
        }

        if json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print_walk_forward_summary(&result);
            println!("Gate:           {}", report.reason);
        }
        if let Some(dir) = &output_dir {
            let path = write_json(dir, &format!("{symbol}_walk_forward.json"), &result)?;
            info!(path = %path.display(), "walk-forward result saved");
        }
    }
    if failed > 0 {
        bail!("{failed} symbol(s) failed the walk-forward gate");
    }
    Ok(())
}

fn write_json<T: serde::Serialize>(dir: &Path, file: &str, value: &T) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(file);
    std::fs::write(&path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

// ─── Live loop ───────────────────────────────────────────────────────

fn run_live(config: AppConfig, source: Arc<dyn MarketData>, max_cycles: Option<u64>) -> Result<()> {
    let state_dir = config.live.state_dir.clone();
    let store = JsonStateStore::in_dir(&state_dir);
    let mut scheduler = Scheduler::new(config, source, Box::new(store))
        .context("starting scheduler")?
        .with_learning_log(LearningLog::in_dir(&state_dir));

    let counters = scheduler.run(max_cycles);
    println!(
        "Stopped after {} cycles: {} signals, {} executions, {} errors",
        counters.cycles, counters.signals_detected, counters.executions, counters.errors
    );
    Ok(())
}

// ─── Output ──────────────────────────────────────────────────────────

fn print_backtest_summary(result: &BacktestResult) {
    let m = &result.metrics;
    println!();
    println!("=== Backtest Result ===");
    println!("Symbol:         {}", result.symbol);
    match (result.start, result.end) {
        (Some(start), Some(end)) => println!("Period:         {start} to {end}"),
        _ => println!("Period:         (no bars)"),
    }
    println!("Bars:           {}", result.bar_count);
    println!("Signals:        {}", result.signal_count);
    println!("Trades:         {} ({} wins, {} losses)", m.trades, m.wins, m.losses);
    println!();
    println!("--- Performance ---");
    println!("Net Profit:     {:.2}", m.net_profit);
    println!("Total Return:   {:.2}%", m.total_return_pct);
    println!("Sharpe:         {:.3}", m.sharpe);
    println!("Max Drawdown:   {:.2}%", m.max_drawdown_pct);
    println!("Win Rate:       {:.1}%", m.win_rate_pct);
    println!("Profit Factor:  {:.2}", m.profit_factor);
    println!("Avg Trade:      {:.2}", m.avg_trade_pnl);
    println!("Max Loss Run:   {}", m.max_consecutive_losses);
    if !result.rejections.is_empty() {
        println!();
        println!("--- Risk Rejections ---");
        for (gate, count) in &result.rejections {
            println!("{:<22} {count}", gate.to_string());
        }
    }
    println!("Config Hash:    {}", &result.config_hash[..12.min(result.config_hash.len())]);
}

fn print_walk_forward_summary(result: &WalkForwardResult) {
    println!();
    println!("=== Walk-Forward Result ===");
    println!("Symbol:         {}", result.symbol);
    println!(
        "Folds Passed:   {}/{} ({:.1}%)",
        result.passed_folds,
        result.folds.len(),
        result.pass_rate_pct
    );
    println!();
    println!(
        "{:<5} {:>8} {:>7} {:>8} {:>7}  {}",
        "Fold", "Bars", "Trades", "WinRate", "PF", "Result"
    );
    println!("{}", "-".repeat(60));
    for f in &result.folds {
        println!(
            "{:<5} {:>8} {:>7} {:>7.1}% {:>7.2}  {}",
            f.fold.index + 1,
            f.fold.len(),
            f.metrics.trades,
            f.metrics.win_rate_pct,
            f.metrics.profit_factor,
            f.reason.as_deref().unwrap_or("pass"),
        );
    }
    let agg = &result.aggregate;
    println!();
    println!(
        "Aggregate:      {} trades, {:.1}% win rate, PF {:.2}, return {:.2}%",
        agg.trades, agg.win_rate_pct, agg.profit_factor, agg.total_return_pct
    );
}
