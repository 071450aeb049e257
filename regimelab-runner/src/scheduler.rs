//! Live cycle scheduler — the single-threaded loop that drives the pipeline.
//!
//! Each cycle:
//!
//! 1. Drain monitor commands
//! 2. Scan every configured symbol (fetch, sanitize, enrich, evaluate)
//! 3. For the selected symbol only: apply new closed bars to open positions,
//!    then take a new actionable candidate through dedupe, alert, risk gate,
//!    preflight gate, sizing and execution
//! 4. Heartbeat, persist state, publish a monitor snapshot
//!
//! All mutable trading state lives in one `TradingContext`. The monitor only
//! ever sees clones (`MonitorSnapshot`) and talks back through an mpsc
//! channel of `Command`s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use regimelab_core::domain::{Bar, ExitReason, Position, Side, TradeRecord};
use regimelab_core::exits::EntryFill;
use regimelab_core::learning::LearningState;
use regimelab_core::regime::Regime;
use regimelab_core::risk::{GateInput, RiskState};
use regimelab_core::state::{CycleCounters, PersistedState, SCHEMA_VERSION, TRADE_LOG_TAIL};
use regimelab_core::{ConfigError, Evaluation, Pipeline, TradingContext};

use crate::broker::{Broker, BrokerError, FillReport, FillRequest, PaperBroker};
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, ExecutionMode};
use crate::data::{sanitize, MarketData};
use crate::gate::{preflight_symbol, run_preflight, PreflightEntry};
use crate::notify::{LogNotifier, Notifier};
use crate::state_store::{LearningLog, LearningLogRow, StateStore, StoreError};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to load state: {0}")]
    Store(#[from] StoreError),
    #[error("no symbols configured")]
    NoSymbols,
}

// ─── Monitor interface ───────────────────────────────────────────────

/// Requests from the monitor to the loop, applied at the start of a cycle.
#[derive(Debug)]
pub enum Command {
    SelectSymbol(String),
    /// Validate a symbol on demand. The verdict is stored as the last
    /// backtest and sent back on `reply` if given.
    RunBacktest {
        symbol: String,
        walk_forward: bool,
        reply: Option<Sender<PreflightEntry>>,
    },
    /// Stop after the current cycle.
    Shutdown,
}

/// One symbol's row in the scanner table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRow {
    pub symbol: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub price: f64,
    pub regime: Regime,
    pub regime_confidence: f64,
    pub direction: Option<Side>,
    pub raw_score: u32,
    pub adjusted_score: f64,
    pub actionable: bool,
    /// Data failure for this symbol this cycle.
    pub error: Option<String>,
}

impl ScanRow {
    fn from_evaluation(eval: &Evaluation) -> Self {
        let c = &eval.candidate;
        Self {
            symbol: c.symbol.clone(),
            timestamp: c.timestamp,
            price: c.price,
            regime: eval.regime.regime,
            regime_confidence: eval.regime.confidence,
            direction: c.direction,
            raw_score: c.raw_score,
            adjusted_score: c.adjusted_score,
            actionable: c.actionable,
            error: None,
        }
    }

    fn failed(symbol: &str, error: String) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp: None,
            price: f64::NAN,
            regime: Regime::Neutral,
            regime_confidence: 0.0,
            direction: None,
            raw_score: 0,
            adjusted_score: 0.0,
            actionable: false,
            error: Some(error),
        }
    }
}

/// Read-only view of the loop for monitors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub at: Option<DateTime<Utc>>,
    pub selected_symbol: String,
    pub mode: ExecutionMode,
    pub risk: RiskState,
    pub learning: LearningState,
    pub positions: Vec<Position>,
    pub scan: Vec<ScanRow>,
    pub preflight: BTreeMap<String, PreflightEntry>,
    pub counters: CycleCounters,
    pub last_backtest: Option<PreflightEntry>,
}

/// Monitor side of the loop: send commands, read snapshots.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    commands: Sender<Command>,
    snapshot: Arc<RwLock<MonitorSnapshot>>,
}

impl MonitorHandle {
    /// Queue a command. Returns false once the loop has gone away.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        match self.snapshot.read() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    /// A new actionable candidate for the selected symbol.
    pub new_signal: bool,
    pub entered: bool,
    pub closed: Vec<TradeRecord>,
    /// Why a new signal did not become a position.
    pub blocked: Option<String>,
}

// ─── Scheduler ───────────────────────────────────────────────────────

pub struct Scheduler {
    config: AppConfig,
    pipeline: Pipeline,
    ctx: TradingContext,
    source: Arc<dyn MarketData>,
    store: Box<dyn StateStore>,
    clock: Arc<dyn Clock>,
    notifier: Box<dyn Notifier>,
    learning_log: Option<LearningLog>,
    paper: PaperBroker,
    exchange: Option<Box<dyn Broker>>,
    commands: Receiver<Command>,
    command_tx: Sender<Command>,
    snapshot: Arc<RwLock<MonitorSnapshot>>,
    selected: String,
    preflight: BTreeMap<String, PreflightEntry>,
    counters: CycleCounters,
    last_signal_key: Option<String>,
    trade_log: Vec<TradeRecord>,
    scan: Vec<ScanRow>,
    last_backtest: Option<PreflightEntry>,
    shutdown: bool,
}

impl Scheduler {
    /// Build a scheduler, resuming from whatever `store` holds.
    pub fn new(
        config: AppConfig,
        source: Arc<dyn MarketData>,
        store: Box<dyn StateStore>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let initial = config
            .live
            .initial_symbol()
            .ok_or(SchedulerError::NoSymbols)?
            .to_string();
        let persisted = store.load()?;

        let selected = match &persisted.selected_symbol {
            Some(s) if config.live.symbols.contains(s) => s.clone(),
            _ => initial,
        };
        let ctx = TradingContext::resume(
            &config.core,
            persisted.risk.clone(),
            persisted.learning.clone(),
            persisted.positions.clone(),
        );
        if !persisted.positions.is_empty() {
            info!(positions = persisted.positions.len(), "resumed open positions");
        }

        let (command_tx, commands) = mpsc::channel();
        let paper = PaperBroker::new(config.friction.clone());
        Ok(Self {
            pipeline: Pipeline::new(&config.core),
            ctx,
            source,
            store,
            clock: Arc::new(SystemClock),
            notifier: Box::new(LogNotifier),
            learning_log: None,
            paper,
            exchange: None,
            commands,
            command_tx,
            snapshot: Arc::new(RwLock::new(MonitorSnapshot::default())),
            selected,
            preflight: BTreeMap::new(),
            counters: persisted.counters,
            last_signal_key: persisted.last_signal_key.clone(),
            trade_log: persisted.trade_log,
            scan: Vec::new(),
            last_backtest: None,
            shutdown: false,
            config,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_learning_log(mut self, log: LearningLog) -> Self {
        self.learning_log = Some(log);
        self
    }

    /// Broker used in exchange mode.
    pub fn with_exchange_broker(mut self, broker: Box<dyn Broker>) -> Self {
        self.exchange = Some(broker);
        self
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            commands: self.command_tx.clone(),
            snapshot: Arc::clone(&self.snapshot),
        }
    }

    pub fn selected_symbol(&self) -> &str {
        &self.selected
    }

    pub fn context(&self) -> &TradingContext {
        &self.ctx
    }

    pub fn counters(&self) -> CycleCounters {
        self.counters
    }

    pub fn preflight(&self) -> &BTreeMap<String, PreflightEntry> {
        &self.preflight
    }

    /// Validate every symbol now. Runs automatically at the start of `run`
    /// when `require_backtest_pass` is set.
    pub fn run_preflight(&mut self) {
        let now = self.clock.now();
        self.preflight = run_preflight(
            &self.config.live.symbols,
            self.source.as_ref(),
            &self.config,
            now,
        );
    }

    /// Run until `max_cycles` cycles have completed (forever when `None`) or
    /// a shutdown command arrives.
    pub fn run(&mut self, max_cycles: Option<u64>) -> CycleCounters {
        self.alert(&format!(
            "RegimeLab started | mode={}, symbols={}, selected={}",
            self.config.live.mode,
            self.config.live.symbols.join(","),
            self.selected
        ));
        if self.config.preflight.require_backtest_pass {
            self.run_preflight();
            self.publish(self.clock.now());
        }

        let interval = std::time::Duration::from_secs(self.config.live.check_interval_seconds);
        let mut completed = 0;
        loop {
            self.run_cycle();
            completed += 1;
            if self.shutdown || max_cycles.is_some_and(|max| completed >= max) {
                break;
            }
            self.clock.sleep(interval);
        }
        info!(cycles = completed, "scheduler stopped");
        self.counters
    }

    /// One full cycle. Never fails: every problem is logged and counted.
    pub fn run_cycle(&mut self) -> CycleReport {
        let now = self.clock.now();
        self.counters.cycles += 1;
        let mut report = CycleReport {
            cycle: self.counters.cycles,
            ..CycleReport::default()
        };

        self.drain_commands(now);
        self.ctx.risk.roll_day(now);

        let selected = self.scan_symbols();
        match selected {
            Some((bars, eval)) => {
                report.closed = self.process_exits(&bars, &eval);
                self.process_entry(now, &bars, &eval, &mut report);
            }
            None => debug!(symbol = %self.selected, "no usable data; entries refused this cycle"),
        }

        let heartbeat = self.config.live.heartbeat_cycles;
        if heartbeat > 0 && self.counters.cycles % heartbeat == 0 {
            self.alert(&format!(
                "Heartbeat | cycle={} selected={} open_positions={} signals={} executions={} errors={}",
                self.counters.cycles,
                self.selected,
                self.ctx.exits.positions().len(),
                self.counters.signals_detected,
                self.counters.executions,
                self.counters.errors,
            ));
        }

        self.persist();
        self.publish(now);
        report
    }

    // ─── Cycle phases ────────────────────────────────────────────────

    fn drain_commands(&mut self, now: DateTime<Utc>) {
        loop {
            let command = match self.commands.try_recv() {
                Ok(command) => command,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            match command {
                Command::SelectSymbol(symbol) => {
                    if self.config.live.symbols.contains(&symbol) {
                        info!(symbol = %symbol, "selected symbol changed");
                        self.selected = symbol;
                    } else {
                        warn!(symbol = %symbol, "ignoring selection of unconfigured symbol");
                    }
                }
                Command::RunBacktest {
                    symbol,
                    walk_forward,
                    reply,
                } => {
                    let mut config = self.config.clone();
                    config.preflight.use_walk_forward = walk_forward;
                    let entry = preflight_symbol(&symbol, self.source.as_ref(), &config, now);
                    if let Some(reply) = reply {
                        // The requester may have stopped waiting.
                        let _ = reply.send(entry.clone());
                    }
                    self.last_backtest = Some(entry);
                }
                Command::Shutdown => self.shutdown = true,
            }
        }
    }

    /// Evaluate every symbol; return the selected symbol's closed bars and
    /// evaluation when its data is usable.
    fn scan_symbols(&mut self) -> Option<(Vec<Bar>, Evaluation)> {
        let mut rows = Vec::with_capacity(self.config.live.symbols.len());
        let mut selected = None;
        for symbol in self.config.live.symbols.clone() {
            match self.load_window(&symbol) {
                Ok(bars) => {
                    let eval = self.pipeline.evaluate(&symbol, &bars, &self.ctx.learning);
                    rows.push(ScanRow::from_evaluation(&eval));
                    if symbol == self.selected {
                        selected = Some((bars, eval));
                    }
                }
                Err(reason) => {
                    warn!(symbol = %symbol, %reason, "scan failed");
                    self.counters.errors += 1;
                    rows.push(ScanRow::failed(&symbol, reason));
                }
            }
        }
        self.scan = rows;
        selected
    }

    /// Fetch, sanitize and enrich; drop the still-forming bar if configured.
    fn load_window(&self, symbol: &str) -> Result<Vec<Bar>, String> {
        let raw = self
            .source
            .fetch(symbol, self.config.live.history_bars)
            .map_err(|e| e.to_string())?;
        let mut bars = sanitize(
            symbol,
            raw,
            self.config.backtest.timeframe,
            &self.config.data,
        )
        .map_err(|e| e.to_string())?;
        self.pipeline.prepare(&mut bars);
        if self.config.live.use_last_closed_bar {
            if bars.len() < 2 {
                return Err(format!("{symbol}: no closed bar yet"));
            }
            bars.pop();
        }
        Ok(bars)
    }

    fn process_exits(&mut self, bars: &[Bar], eval: &Evaluation) -> Vec<TradeRecord> {
        let symbol = self.selected.clone();
        let mut closed = Vec::new();
        if self.ctx.exits.open_count(&symbol) == 0 {
            return closed;
        }
        for bar in bars {
            for exit in self.ctx.exits.on_bar(&symbol, bar) {
                let Some(position) = self
                    .ctx
                    .exits
                    .positions()
                    .iter()
                    .find(|p| p.id == exit.position_id)
                    .cloned()
                else {
                    continue;
                };
                let request = FillRequest {
                    symbol: symbol.clone(),
                    side: position.side.exit_order(),
                    quantity: position.quantity,
                    reference_price: exit.price,
                };
                let fill = match self.submit(&request) {
                    Some(Ok(fill)) => fill,
                    // Signal-only positions are never opened; nothing to route.
                    None => continue,
                    Some(Err(e)) => {
                        error!(symbol = %symbol, id = position.id, error = %e, "exit order failed; position stays open");
                        self.counters.errors += 1;
                        continue;
                    }
                };
                if let Some(trade) = self.ctx.exits.close(
                    position.id,
                    fill.price,
                    bar.timestamp,
                    exit.reason,
                    fill.commission,
                ) {
                    self.settle(&trade, bar, eval);
                    closed.push(trade);
                }
            }
        }
        closed
    }

    /// Apply a closed trade to risk and learning, log it and alert.
    fn settle(&mut self, trade: &TradeRecord, bar: &Bar, eval: &Evaluation) {
        let update = self.pipeline.settle(&mut self.ctx, trade);
        if let Some(log) = &self.learning_log {
            let strategy = eval
                .candidate
                .model
                .map_or_else(|| "-".to_string(), |m| m.to_string());
            let row = LearningLogRow::from_trade(
                trade,
                &strategy,
                eval.regime.regime,
                eval.regime.confidence,
                bar.indicators.rsi,
                bar.indicators.adx,
                &update,
            );
            log.append_or_warn(&row);
        }
        self.alert(&format!(
            "{} {} closed ({}) at {:.2} | pnl {:.2} | bias {:.3} -> {:.3}",
            trade.symbol,
            trade.side,
            exit_label(trade.exit_reason),
            trade.exit_price,
            trade.net_pnl,
            update.bias_before,
            update.bias_after,
        ));
        self.trade_log.push(trade.clone());
        if self.trade_log.len() > TRADE_LOG_TAIL {
            let excess = self.trade_log.len() - TRADE_LOG_TAIL;
            self.trade_log.drain(..excess);
        }
    }

    fn process_entry(
        &mut self,
        now: DateTime<Utc>,
        bars: &[Bar],
        eval: &Evaluation,
        report: &mut CycleReport,
    ) {
        let candidate = &eval.candidate;
        let (true, Some(side)) = (candidate.actionable, candidate.direction) else {
            return;
        };
        let Some(key) = candidate.signal_key() else {
            return;
        };
        if self.last_signal_key.as_deref() == Some(key.as_str()) {
            return;
        }
        self.last_signal_key = Some(key);
        self.counters.signals_detected += 1;
        report.new_signal = true;
        self.alert(&candidate.alert_text());

        let input = GateInput {
            now,
            latest_bar: bars.last().map(|b| b.timestamp),
            bars_available: bars.len(),
            open_positions: self.ctx.exits.open_count(&candidate.symbol),
        };
        if let Err(rejection) = self.ctx.risk.check(&input) {
            info!(symbol = %candidate.symbol, gate = %rejection.gate(), %rejection, "entry blocked");
            report.blocked = Some(format!("risk gate {}: {rejection}", rejection.gate()));
            return;
        }

        if self.config.preflight.require_backtest_pass {
            match self.preflight.get(&candidate.symbol) {
                Some(entry) if entry.report.passed => {}
                Some(entry) => {
                    report.blocked = Some(format!("preflight: {}", entry.report.reason));
                    info!(symbol = %candidate.symbol, reason = %entry.report.reason, "entry blocked by preflight");
                    return;
                }
                None => {
                    report.blocked = Some("preflight: not validated".into());
                    return;
                }
            }
        }

        let notional = self.ctx.risk.suggested_notional(None);
        if !(candidate.price > 0.0 && notional > 0.0) {
            report.blocked = Some("order size is zero".into());
            return;
        }
        let request = FillRequest {
            symbol: candidate.symbol.clone(),
            side: side.entry_order(),
            quantity: notional / candidate.price,
            reference_price: candidate.price,
        };
        let fill = match self.submit(&request) {
            None => {
                report.blocked = Some("signal-only mode".into());
                return;
            }
            Some(Err(e)) => {
                error!(symbol = %candidate.symbol, error = %e, "entry order failed");
                self.counters.errors += 1;
                report.blocked = Some(format!("execution failed: {e}"));
                return;
            }
            Some(Ok(fill)) => fill,
        };

        let position = self.ctx.exits.open(EntryFill {
            symbol: candidate.symbol.clone(),
            side,
            price: fill.price,
            quantity: fill.quantity,
            time: bars.last().map_or(now, |b| b.timestamp),
            atr: candidate.atr,
            features: candidate.features.clone(),
            entry_score: candidate.adjusted_score,
            commission: fill.commission,
        });
        let message = format!(
            "{} {} opened at {:.2} qty {:.4} | stop {:.2} target {}",
            position.symbol,
            position.side,
            position.entry_price,
            position.quantity,
            position.stop_price,
            position
                .target_price
                .map_or_else(|| "-".to_string(), |t| format!("{t:.2}")),
        );
        self.counters.executions += 1;
        report.entered = true;
        self.alert(&message);
    }

    /// Route an order per execution mode. `None` in signal-only mode.
    fn submit(&self, request: &FillRequest) -> Option<Result<FillReport, BrokerError>> {
        match self.config.live.mode {
            ExecutionMode::Signals => None,
            ExecutionMode::Paper => Some(self.paper.submit(request)),
            ExecutionMode::Exchange => {
                let exchange = self.exchange.as_deref().filter(|b| b.is_available());
                let result = match exchange {
                    Some(broker) => broker.submit(request),
                    None => Err(BrokerError::Unavailable("no exchange broker".into())),
                };
                match result {
                    Err(BrokerError::Unavailable(reason)) if self.config.live.fallback_to_paper => {
                        warn!(%reason, "exchange unavailable; executing on paper");
                        Some(self.paper.submit(request))
                    }
                    other => Some(other),
                }
            }
        }
    }

    fn alert(&self, message: &str) {
        if let Err(e) = self.notifier.notify(message) {
            warn!(error = %e, "notification failed");
        }
    }

    // ─── State ───────────────────────────────────────────────────────

    pub fn persisted_state(&self) -> PersistedState {
        PersistedState {
            schema_version: SCHEMA_VERSION,
            selected_symbol: Some(self.selected.clone()),
            risk: self.ctx.risk.state().clone(),
            learning: self.ctx.learning.clone(),
            positions: self.ctx.exits.positions().to_vec(),
            trade_log: self.trade_log.clone(),
            counters: self.counters,
            last_signal_key: self.last_signal_key.clone(),
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.save(&self.persisted_state()) {
            warn!(error = %e, "state save failed");
            self.counters.errors += 1;
        }
    }

    fn publish(&self, now: DateTime<Utc>) {
        let snapshot = MonitorSnapshot {
            at: Some(now),
            selected_symbol: self.selected.clone(),
            mode: self.config.live.mode,
            risk: self.ctx.risk.state().clone(),
            learning: self.ctx.learning.clone(),
            positions: self.ctx.exits.positions().to_vec(),
            scan: self.scan.clone(),
            preflight: self.preflight.clone(),
            counters: self.counters,
            last_backtest: self.last_backtest.clone(),
        };
        match self.snapshot.write() {
            Ok(mut slot) => *slot = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}

fn exit_label(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::StopLoss => "stop loss",
        ExitReason::TakeProfit => "take profit",
        ExitReason::TrailingStop => "trailing stop",
        ExitReason::MaxHold => "max hold",
        ExitReason::EndOfData => "end of data",
        ExitReason::Manual => "manual",
    }
}
