//! Bar-by-bar replay of the full decision pipeline for one symbol.
//!
//! Each bar runs four phases:
//!
//! 1. Fill delayed entries due at this bar's open
//! 2. Apply the bar to open positions and close whatever it triggers
//! 3. Classify, score and gate the bar; fill at the close or queue the entry
//! 4. Mark to market and record an equity point
//!
//! Positions still open after the last bar are closed at its close with
//! `END_OF_DATA`. A replay owns a fresh `TradingContext` and never touches
//! state outside it, so identical inputs always give identical outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, CoreConfig};
use crate::domain::{Bar, ExitReason, Side, TradeRecord};
use crate::exits::EntryFill;
use crate::learning::LearningState;
use crate::pipeline::{Pipeline, TradingContext};
use crate::risk::{Gate, GateInput, RiskState};
use crate::signal::SignalCandidate;

use super::friction::FrictionModel;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("no bars to replay for {symbol}")]
    NoBars { symbol: String },

    #[error("bars for {symbol} are not strictly increasing at index {index}")]
    OutOfOrder { symbol: String, index: usize },

    #[error("initial capital must be positive, got {0}")]
    InvalidCapital(f64),

    #[error("invalid friction model: {0}")]
    InvalidFriction(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub equity: f64,
}

/// Everything a replay produced, before metrics.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub symbol: String,
    pub initial_capital: f64,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    /// Actionable candidates seen, admitted or not.
    pub signal_count: usize,
    pub rejections: BTreeMap<Gate, usize>,
    pub bar_count: usize,
    pub final_risk: RiskState,
    pub final_learning: LearningState,
}

impl ReplayOutcome {
    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map_or(self.initial_capital, |p| p.equity)
    }
}

/// An admitted entry waiting for its fill bar.
#[derive(Debug, Clone)]
struct PendingEntry {
    fill_index: usize,
    side: Side,
    atr: f64,
    candidate: SignalCandidate,
}

pub fn replay(
    symbol: &str,
    bars: &[Bar],
    config: &CoreConfig,
    friction: &FrictionModel,
    initial_capital: f64,
) -> Result<ReplayOutcome, ReplayError> {
    config.validate()?;
    friction.validate().map_err(ReplayError::InvalidFriction)?;
    if !(initial_capital > 0.0) {
        return Err(ReplayError::InvalidCapital(initial_capital));
    }
    if bars.is_empty() {
        return Err(ReplayError::NoBars {
            symbol: symbol.to_string(),
        });
    }
    if let Some(index) = bars
        .windows(2)
        .position(|w| w[1].timestamp <= w[0].timestamp)
    {
        return Err(ReplayError::OutOfOrder {
            symbol: symbol.to_string(),
            index: index + 1,
        });
    }

    let pipeline = Pipeline::new(config);
    let mut bars = bars.to_vec();
    pipeline.prepare(&mut bars);

    let mut ctx = TradingContext::new(config);
    ctx.risk.set_account_equity(initial_capital);

    let mut realized = 0.0;
    let mut trades = Vec::new();
    let mut equity_curve = Vec::with_capacity(bars.len());
    let mut rejections: BTreeMap<Gate, usize> = BTreeMap::new();
    let mut pending: Vec<PendingEntry> = Vec::new();
    let mut signal_count = 0;

    for (i, bar) in bars.iter().enumerate() {
        // 1. Delayed entries fill at the open.
        let (due, waiting): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|p| p.fill_index == i);
        pending = waiting;
        for entry in due {
            let equity = initial_capital + realized;
            open_entry(&mut ctx, friction, symbol, bar, bar.open, equity, entry);
        }

        // 2. Exits.
        for exit in ctx.exits.on_bar(symbol, bar) {
            let Some(side) = ctx
                .exits
                .positions()
                .iter()
                .find(|p| p.id == exit.position_id)
                .map(|p| p.side)
            else {
                continue;
            };
            let price = friction.fill_price(exit.price, side.exit_order());
            if let Some(trade) = close_position(
                &mut ctx,
                &pipeline,
                friction,
                exit.position_id,
                price,
                bar.timestamp,
                exit.reason,
            ) {
                realized += trade.net_pnl;
                trades.push(trade);
            }
        }

        // 3. Signal and gate.
        let eval = pipeline.evaluate(symbol, &bars[..=i], &ctx.learning);
        let candidate = eval.candidate;
        if let (true, Some(side)) = (candidate.actionable, candidate.direction) {
            signal_count += 1;
            let input = GateInput {
                now: bar.timestamp,
                latest_bar: Some(bar.timestamp),
                bars_available: i + 1,
                open_positions: ctx.exits.open_count(symbol) + pending.len(),
            };
            match ctx.risk.check(&input) {
                Err(rejection) => {
                    debug!(symbol, at = %bar.timestamp, %rejection, "entry rejected");
                    *rejections.entry(rejection.gate()).or_insert(0) += 1;
                }
                Ok(()) => {
                    let entry = PendingEntry {
                        fill_index: i + friction.latency_bars,
                        side,
                        atr: candidate.atr,
                        candidate,
                    };
                    if friction.latency_bars == 0 {
                        let equity = initial_capital + realized;
                        open_entry(&mut ctx, friction, symbol, bar, bar.close, equity, entry);
                    } else if entry.fill_index < bars.len() {
                        pending.push(entry);
                    }
                }
            }
        }

        // 4. Mark to market.
        let unrealized: f64 = ctx
            .exits
            .positions()
            .iter()
            .map(|p| p.unrealized_pnl(bar.close) - p.entry_costs)
            .sum();
        equity_curve.push(EquityPoint {
            time: bar.timestamp,
            equity: initial_capital + realized + unrealized,
        });
    }

    // Force-close at the last close.
    if let Some(last) = bars.last() {
        let open: Vec<(u64, Side)> = ctx
            .exits
            .positions()
            .iter()
            .map(|p| (p.id, p.side))
            .collect();
        for (id, side) in open {
            let price = friction.fill_price(last.close, side.exit_order());
            if let Some(trade) = close_position(
                &mut ctx,
                &pipeline,
                friction,
                id,
                price,
                last.timestamp,
                ExitReason::EndOfData,
            ) {
                realized += trade.net_pnl;
                trades.push(trade);
            }
        }
        if let Some(point) = equity_curve.last_mut() {
            point.equity = initial_capital + realized;
        }
    }

    info!(
        symbol,
        bars = bars.len(),
        trades = trades.len(),
        signals = signal_count,
        final_equity = initial_capital + realized,
        "replay complete"
    );

    Ok(ReplayOutcome {
        symbol: symbol.to_string(),
        initial_capital,
        trades,
        equity_curve,
        signal_count,
        rejections,
        bar_count: bars.len(),
        final_risk: ctx.risk.state().clone(),
        final_learning: ctx.learning,
    })
}

/// Size and open an admitted entry at `quote`.
fn open_entry(
    ctx: &mut TradingContext,
    friction: &FrictionModel,
    symbol: &str,
    bar: &Bar,
    quote: f64,
    equity: f64,
    entry: PendingEntry,
) {
    let price = friction.fill_price(quote, entry.side.entry_order());
    let notional = ctx.risk.suggested_notional(Some(equity));
    if !(price > 0.0 && notional > 0.0) {
        return;
    }
    let quantity = friction.filled_quantity(notional / price);
    ctx.exits.open(EntryFill {
        symbol: symbol.to_string(),
        side: entry.side,
        price,
        quantity,
        time: bar.timestamp,
        atr: entry.atr,
        features: entry.candidate.features,
        entry_score: entry.candidate.adjusted_score,
        commission: friction.commission(price, quantity),
    });
}

fn close_position(
    ctx: &mut TradingContext,
    pipeline: &Pipeline,
    friction: &FrictionModel,
    position_id: u64,
    price: f64,
    time: DateTime<Utc>,
    reason: ExitReason,
) -> Option<TradeRecord> {
    let quantity = ctx
        .exits
        .positions()
        .iter()
        .find(|p| p.id == position_id)?
        .quantity;
    let commission = friction.commission(price, quantity);
    let trade = ctx.exits.close(position_id, price, time, reason, commission)?;
    pipeline.settle(ctx, &trade);
    Some(trade)
}
