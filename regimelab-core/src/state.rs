//! Persisted state — the flat record a live process saves after each cycle.

use serde::{Deserialize, Serialize};

use crate::domain::{Position, TradeRecord};
use crate::learning::LearningState;
use crate::risk::RiskState;

pub const SCHEMA_VERSION: u32 = 1;

/// Closed trades kept in the persisted tail.
pub const TRADE_LOG_TAIL: usize = 200;

/// Live-loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCounters {
    pub cycles: u64,
    pub signals_detected: u64,
    pub executions: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub schema_version: u32,
    pub selected_symbol: Option<String>,
    pub risk: RiskState,
    pub learning: LearningState,
    pub positions: Vec<Position>,
    pub trade_log: Vec<TradeRecord>,
    pub counters: CycleCounters,
    pub last_signal_key: Option<String>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            selected_symbol: None,
            risk: RiskState::default(),
            learning: LearningState::default(),
            positions: Vec::new(),
            trade_log: Vec::new(),
            counters: CycleCounters::default(),
            last_signal_key: None,
        }
    }
}

impl PersistedState {
    /// Append a closed trade, keeping only the most recent tail.
    pub fn push_trade(&mut self, trade: TradeRecord) {
        self.trade_log.push(trade);
        if self.trade_log.len() > TRADE_LOG_TAIL {
            let excess = self.trade_log.len() - TRADE_LOG_TAIL;
            self.trade_log.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExitReason, Side};
    use chrono::{TimeZone, Utc};

    fn trade(id: u64) -> TradeRecord {
        let t = Utc.with_ymd_and_hms(2024, 4, 1, 15, 0, 0).unwrap();
        TradeRecord {
            position_id: id,
            symbol: "DIA".into(),
            side: Side::Short,
            entry_time: t,
            entry_price: 390.0,
            exit_time: t,
            exit_price: 389.0,
            exit_reason: ExitReason::TakeProfit,
            quantity: 1.0,
            gross_pnl: 1.0,
            costs: 0.0,
            net_pnl: 1.0,
            bars_held: 3,
            features: Vec::new(),
            entry_score: 3.0,
        }
    }

    #[test]
    fn trade_log_keeps_tail() {
        let mut state = PersistedState::default();
        for id in 0..(TRADE_LOG_TAIL as u64 + 5) {
            state.push_trade(trade(id));
        }
        assert_eq!(state.trade_log.len(), TRADE_LOG_TAIL);
        assert_eq!(state.trade_log[0].position_id, 5);
    }

    #[test]
    fn missing_fields_load_as_defaults() {
        let state: PersistedState =
            serde_json::from_str(r#"{"selected_symbol":"SPY","counters":{"cycles":3,"signals_detected":1,"executions":0,"errors":0}}"#)
                .unwrap();
        assert_eq!(state.schema_version, SCHEMA_VERSION);
        assert_eq!(state.selected_symbol.as_deref(), Some("SPY"));
        assert_eq!(state.counters.cycles, 3);
        assert!(state.positions.is_empty());
    }
}
