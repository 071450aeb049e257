//! RegimeLab Runner — validation, data, persistence and the live loop.
//!
//! This crate builds on `regimelab-core` to provide:
//! - Application configuration loaded from TOML
//! - Market data sources (CSV directory, in-memory, synthetic) with sanitization
//! - Backtest runner and performance metrics
//! - Walk-forward validation on a rayon pool
//! - Backtest / walk-forward gates and the startup preflight
//! - Broker, notifier and clock seams with paper, log and manual implementations
//! - JSON state store and learning-log CSV
//! - The live cycle scheduler and its monitor interface

pub mod backtest;
pub mod broker;
pub mod clock;
pub mod config;
pub mod data;
pub mod gate;
pub mod metrics;
pub mod notify;
pub mod scheduler;
pub mod state_store;
pub mod walk_forward;

pub use backtest::{backtest_bars, run_backtest, BacktestResult, RunError};
pub use broker::{Broker, BrokerError, FillReport, FillRequest, PaperBroker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ExecutionMode, LoadError, Timeframe};
pub use data::{CsvDirectory, DataError, MarketData, MemorySource, SyntheticSource};
pub use gate::{GateReport, PreflightConfig, PreflightEntry};
pub use metrics::PerformanceMetrics;
pub use notify::{LogNotifier, Notifier, RecordingNotifier};
pub use scheduler::{Command, CycleReport, MonitorHandle, MonitorSnapshot, Scheduler, SchedulerError};
pub use state_store::{JsonStateStore, LearningLog, StateStore, StoreError};
pub use walk_forward::{run_walk_forward, WalkForwardConfig, WalkForwardError, WalkForwardResult};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn results_are_send_sync() {
        assert_send::<PerformanceMetrics>();
        assert_sync::<PerformanceMetrics>();
        assert_send::<BacktestResult>();
        assert_sync::<BacktestResult>();
        assert_send::<WalkForwardResult>();
        assert_sync::<WalkForwardResult>();
        assert_send::<MonitorSnapshot>();
        assert_sync::<MonitorSnapshot>();
    }

    #[test]
    fn seams_are_send_sync() {
        assert_send::<PaperBroker>();
        assert_sync::<PaperBroker>();
        assert_send::<ManualClock>();
        assert_sync::<ManualClock>();
        assert_send::<MemorySource>();
        assert_sync::<MemorySource>();
        assert_send::<JsonStateStore>();
        assert_sync::<JsonStateStore>();
        assert_send::<MonitorHandle>();
    }
}
