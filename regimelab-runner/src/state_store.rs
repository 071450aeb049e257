//! JSON persistence for `PersistedState` and the learning-log CSV.
//!
//! State is written to a temporary sibling and renamed into place, so a crash
//! mid-write leaves the previous file intact.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use regimelab_core::domain::{join_features, TradeRecord};
use regimelab_core::learning::LearningUpdate;
use regimelab_core::regime::Regime;
use regimelab_core::state::{PersistedState, SCHEMA_VERSION};

pub const STATE_FILE: &str = "state.json";
pub const LEARNING_LOG_FILE: &str = "learning_log.csv";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("learning log {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("unsupported state schema version {found} (expected <= {SCHEMA_VERSION})")]
    UnsupportedSchema { found: u32 },
}

/// Where live state is kept.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<PersistedState, StoreError>;
    fn save(&self, state: &PersistedState) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<dir>/state.json`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
        let path = path.to_path_buf();
        move |source| StoreError::Io { path, source }
    }
}

impl StateStore for JsonStateStore {
    /// A missing file is a fresh start.
    fn load(&self) -> Result<PersistedState, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PersistedState::default())
            }
            Err(e) => return Err(self.io_err(&self.path)(e)),
        };
        let state: PersistedState =
            serde_json::from_str(&raw).map_err(|source| StoreError::Json {
                path: self.path.clone(),
                source,
            })?;
        if state.schema_version > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchema {
                found: state.schema_version,
            });
        }
        Ok(state)
    }

    fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(self.io_err(parent))?;
            }
        }
        let json = serde_json::to_string_pretty(state).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(self.io_err(&tmp))?;
        fs::rename(&tmp, &self.path).map_err(self.io_err(&self.path))?;
        Ok(())
    }
}

// ─── Learning log ────────────────────────────────────────────────────

/// One row per closed trade: the outcome and how it moved the symbol bias.
#[derive(Debug, Clone, Serialize)]
pub struct LearningLogRow {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub strategy: String,
    pub regime: String,
    pub regime_conf: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub score: f64,
    pub adj_score: f64,
    pub feature_adj: f64,
    pub features: String,
    pub price: f64,
    pub rsi: f64,
    pub adx: f64,
    pub pnl: f64,
    pub bias_before: f64,
    pub bias_after: f64,
}

impl LearningLogRow {
    /// Row for a closed trade. `kind` is the trade side; `adj_score` is the
    /// entry score re-weighted with the post-update bias and feature weights.
    #[allow(clippy::too_many_arguments)]
    pub fn from_trade(
        trade: &TradeRecord,
        strategy: &str,
        regime: Regime,
        regime_conf: f64,
        rsi: f64,
        adx: f64,
        update: &LearningUpdate,
    ) -> Self {
        Self {
            timestamp: trade.exit_time,
            symbol: trade.symbol.clone(),
            strategy: strategy.to_string(),
            regime: regime.to_string(),
            regime_conf,
            kind: trade.side.to_string(),
            score: trade.entry_score,
            adj_score: trade.entry_score + (update.bias_after - update.bias_before)
                + (update.feature_adjustment_after - update.feature_adjustment_before),
            feature_adj: update.feature_adjustment_after,
            features: join_features(&trade.features),
            price: trade.exit_price,
            rsi,
            adx,
            pnl: trade.net_pnl,
            bias_before: update.bias_before,
            bias_after: update.bias_after,
        }
    }
}

/// Append-only CSV; the header is written when the file is created.
#[derive(Debug, Clone)]
pub struct LearningLog {
    path: PathBuf,
}

impl LearningLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(LEARNING_LOG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, row: &LearningLogRow) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let needs_header = fs::metadata(&self.path).map_or(true, |m| m.len() == 0);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(row).map_err(|source| StoreError::Csv {
            path: self.path.clone(),
            source,
        })?;
        writer.flush().map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Append, logging instead of failing.
    pub fn append_or_warn(&self, row: &LearningLogRow) {
        if let Err(e) = self.append(row) {
            warn!(error = %e, "learning log append failed");
        }
    }
}
