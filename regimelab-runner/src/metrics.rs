//! Performance metrics — pure functions that compute strategy statistics.
//!
//! Every metric is a pure function: equity curve and/or trade list in, scalar out.
//! Percentages are expressed in percent (12.5 = 12.5%), drawdown as a positive
//! magnitude.

use serde::{Deserialize, Serialize};

use regimelab_core::domain::TradeRecord;

/// Ceiling for the profit factor when there are no losing trades.
pub const PROFIT_FACTOR_CAP: f64 = 100.0;

/// Aggregate performance metrics for one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub net_profit: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe: f64,
    pub trades: usize,
    pub wins: usize,
    /// Trades with net PnL <= 0.
    pub losses: usize,
    pub win_rate_pct: f64,
    pub profit_factor: f64,
    pub avg_trade_pnl: f64,
    pub max_consecutive_losses: usize,
}

impl PerformanceMetrics {
    /// Compute all metrics from an equity curve and trade list.
    pub fn compute(
        equity_curve: &[f64],
        trades: &[TradeRecord],
        initial_capital: f64,
        bars_per_year: f64,
    ) -> Self {
        let final_equity = equity_curve.last().copied().unwrap_or(initial_capital);
        let wins = trades.iter().filter(|t| t.is_winner()).count();
        Self {
            initial_capital,
            final_equity,
            net_profit: final_equity - initial_capital,
            total_return_pct: total_return_pct(initial_capital, final_equity),
            max_drawdown_pct: max_drawdown_pct(equity_curve),
            sharpe: sharpe_ratio(equity_curve, bars_per_year),
            trades: trades.len(),
            wins,
            losses: trades.len() - wins,
            win_rate_pct: win_rate_pct(trades),
            profit_factor: profit_factor(trades),
            avg_trade_pnl: avg_trade_pnl(trades),
            max_consecutive_losses: max_consecutive_losses(trades),
        }
    }

    /// The first threshold these metrics miss, as a human-readable reason.
    pub fn shortfall(
        &self,
        min_trades: usize,
        min_win_rate_pct: f64,
        min_profit_factor: f64,
    ) -> Option<String> {
        if self.trades < min_trades {
            return Some(format!(
                "trades below threshold ({} < {min_trades})",
                self.trades
            ));
        }
        if self.win_rate_pct < min_win_rate_pct {
            return Some(format!(
                "win rate below threshold ({:.2}% < {min_win_rate_pct:.2}%)",
                self.win_rate_pct
            ));
        }
        if self.profit_factor < min_profit_factor {
            return Some(format!(
                "profit factor below threshold ({:.2} < {min_profit_factor:.2})",
                self.profit_factor
            ));
        }
        None
    }
}

// ─── Individual metric functions ────────────────────────────────────

pub fn total_return_pct(initial_capital: f64, final_equity: f64) -> f64 {
    if initial_capital <= 0.0 {
        return 0.0;
    }
    (final_equity / initial_capital - 1.0) * 100.0
}

/// Maximum peak-to-trough decline in percent of the peak.
///
/// Returns 0.0 if equity is constant or monotonically increasing.
pub fn max_drawdown_pct(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    for &eq in equity_curve {
        peak = peak.max(eq);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - eq) / peak);
        }
    }
    max_dd * 100.0
}

/// Annualized Sharpe ratio from per-bar returns.
///
/// Sharpe = mean(bar returns) / std(bar returns) * sqrt(bars_per_year).
/// Returns 0.0 if variance is zero or fewer than 2 returns.
pub fn sharpe_ratio(equity_curve: &[f64], bars_per_year: f64) -> f64 {
    let returns = bar_returns(equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(&returns);
    let std = std_dev(&returns);
    if std < 1e-15 {
        return 0.0;
    }
    (mean / std) * bars_per_year.sqrt()
}

/// Share of trades with positive net PnL, in percent.
pub fn win_rate_pct(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let winners = trades.iter().filter(|t| t.is_winner()).count();
    winners as f64 / trades.len() as f64 * 100.0
}

/// Profit factor: gross profits / gross losses.
///
/// Capped at `PROFIT_FACTOR_CAP` when there are winners and no losses.
pub fn profit_factor(trades: &[TradeRecord]) -> f64 {
    let gross_profit: f64 = trades
        .iter()
        .filter(|t| t.net_pnl > 0.0)
        .map(|t| t.net_pnl)
        .sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.net_pnl < 0.0)
        .map(|t| t.net_pnl.abs())
        .sum();

    if gross_loss < 1e-10 {
        return if gross_profit > 0.0 {
            PROFIT_FACTOR_CAP
        } else {
            0.0
        };
    }
    (gross_profit / gross_loss).min(PROFIT_FACTOR_CAP)
}

pub fn avg_trade_pnl(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().map(|t| t.net_pnl).sum::<f64>() / trades.len() as f64
}

pub fn max_consecutive_losses(trades: &[TradeRecord]) -> usize {
    let mut max_streak = 0;
    let mut current = 0;
    for t in trades {
        if t.is_winner() {
            current = 0;
        } else {
            current += 1;
            max_streak = max_streak.max(current);
        }
    }
    max_streak
}

// ─── Helpers ────────────────────────────────────────────────────────

fn bar_returns(equity_curve: &[f64]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean_f64(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}
