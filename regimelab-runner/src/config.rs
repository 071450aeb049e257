//! Application configuration — the TOML file the CLI and scheduler read.
//!
//! Core pipeline sections (`[indicators]`, `[regime]`, `[signal]`,
//! `[learning]`, `[risk]`, `[exits]`) sit at the top level next to the
//! runner's own sections. Every field has a default, so an empty file is a
//! valid configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use regimelab_core::engine::FrictionModel;
use regimelab_core::{ConfigError, CoreConfig};

use crate::data::DataQualityConfig;
use crate::gate::PreflightConfig;
use crate::walk_forward::WalkForwardConfig;

/// Errors from loading a configuration file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

// ─── Timeframe ───────────────────────────────────────────────────────

/// Bar spacing, written as `"15m"`, `"1h"` or `"1d"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    minutes: u32,
}

impl Timeframe {
    pub const DAILY: Timeframe = Timeframe { minutes: 24 * 60 };

    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    /// Bars per year for annualizing per-bar statistics. Intraday bars
    /// assume round-the-clock trading; daily bars assume 252 sessions.
    pub fn bars_per_year(&self) -> f64 {
        if self.minutes >= 24 * 60 {
            252.0 * (24.0 * 60.0) / self.minutes as f64
        } else {
            (365.0 * 24.0 * 60.0) / self.minutes as f64
        }
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Self { minutes: 15 }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("timeframe '{s}' has no unit (m, h, d)"))?;
        let (count, unit) = s.split_at(split);
        let count: u32 = count
            .parse()
            .map_err(|_| format!("timeframe '{s}' has no count"))?;
        if count == 0 {
            return Err(format!("timeframe '{s}' must be positive"));
        }
        let per_unit = match unit {
            "m" => 1,
            "h" => 60,
            "d" => 24 * 60,
            other => return Err(format!("unknown timeframe unit '{other}'")),
        };
        Ok(Self {
            minutes: count * per_unit,
        })
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.minutes;
        if m % (24 * 60) == 0 {
            write!(f, "{}d", m / (24 * 60))
        } else if m % 60 == 0 {
            write!(f, "{}h", m / 60)
        } else {
            write!(f, "{m}m")
        }
    }
}

// ─── Sections ────────────────────────────────────────────────────────

/// Full-lookback backtest settings and the ordinary backtest gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    pub initial_capital: f64,
    pub timeframe: Timeframe,
    /// Most recent bars replayed; 0 replays everything available.
    pub lookback_bars: usize,
    pub min_trades: usize,
    pub min_win_rate_pct: f64,
    pub min_profit_factor: f64,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            initial_capital: 100_000.0,
            timeframe: Timeframe::default(),
            lookback_bars: 0,
            min_trades: 5,
            min_win_rate_pct: 40.0,
            min_profit_factor: 1.0,
        }
    }
}

impl BacktestSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.initial_capital > 0.0) {
            return Err("initial_capital must be positive".into());
        }
        if !(0.0..=100.0).contains(&self.min_win_rate_pct) {
            return Err("min_win_rate_pct must be in [0, 100]".into());
        }
        if self.min_profit_factor < 0.0 {
            return Err("min_profit_factor must be non-negative".into());
        }
        Ok(())
    }
}

/// How admitted entries are executed in the live loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Alerts only; no broker is ever called.
    #[default]
    Signals,
    Paper,
    /// An external broker adapter.
    Exchange,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Signals => f.write_str("signals"),
            ExecutionMode::Paper => f.write_str("paper"),
            ExecutionMode::Exchange => f.write_str("exchange"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub symbols: Vec<String>,
    /// Symbol allowed to reach execution. Defaults to the first symbol.
    pub active_symbol: Option<String>,
    pub mode: ExecutionMode,
    pub check_interval_seconds: u64,
    /// Heartbeat every N cycles; 0 disables.
    pub heartbeat_cycles: u64,
    /// Evaluate the last fully closed bar instead of the still-forming one.
    pub use_last_closed_bar: bool,
    /// Execute on the paper broker when the exchange adapter is unavailable.
    pub fallback_to_paper: bool,
    /// Bars requested per symbol each cycle.
    pub history_bars: usize,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["SPY".to_string()],
            active_symbol: None,
            mode: ExecutionMode::Signals,
            check_interval_seconds: 300,
            heartbeat_cycles: 12,
            use_last_closed_bar: true,
            fallback_to_paper: true,
            history_bars: 600,
            state_dir: PathBuf::from("data"),
            data_dir: PathBuf::from("data/bars"),
        }
    }
}

impl LiveConfig {
    pub fn validate(&self) -> Result<Vec<String>, String> {
        if self.symbols.is_empty() {
            return Err("symbols must include at least one symbol".into());
        }
        if self.check_interval_seconds == 0 {
            return Err("check_interval_seconds must be >= 1".into());
        }
        let mut warnings = Vec::new();
        if let Some(active) = &self.active_symbol {
            if !self.symbols.contains(active) {
                warnings.push(format!(
                    "active_symbol '{active}' is not in symbols; the first symbol is used"
                ));
            }
        }
        Ok(warnings)
    }

    /// The symbol allowed to reach execution.
    pub fn initial_symbol(&self) -> Option<&str> {
        match &self.active_symbol {
            Some(active) if self.symbols.contains(active) => Some(active),
            _ => self.symbols.first().map(String::as_str),
        }
    }
}

// ─── Top level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(flatten)]
    pub core: CoreConfig,
    pub friction: FrictionModel,
    pub backtest: BacktestSettings,
    pub data: DataQualityConfig,
    pub walk_forward: WalkForwardConfig,
    pub preflight: PreflightConfig,
    pub live: LiveConfig,
}

impl AppConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Read, parse and validate a config file.
    pub fn from_file(path: &Path) -> Result<(Self, Vec<String>), LoadError> {
        let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let warnings = config.validate()?;
        Ok((config, warnings))
    }

    /// Validate every section. Fatal problems are errors; the rest are warnings.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let mut warnings = self.core.validate()?;
        self.friction
            .validate()
            .map_err(|m| ConfigError::invalid("friction", m))?;
        self.backtest
            .validate()
            .map_err(|m| ConfigError::invalid("backtest", m))?;
        self.data
            .validate()
            .map_err(|m| ConfigError::invalid("data", m))?;
        self.walk_forward
            .validate()
            .map_err(|m| ConfigError::invalid("walk_forward", m))?;
        warnings.extend(
            self.live
                .validate()
                .map_err(|m| ConfigError::invalid("live", m))?,
        );
        if self.preflight.use_walk_forward && !self.preflight.require_backtest_pass {
            warnings.push(
                "preflight.use_walk_forward has no effect without require_backtest_pass".into(),
            );
        }
        Ok(warnings)
    }

    /// Stable content hash of everything that affects a replay.
    pub fn replay_hash(&self) -> String {
        let payload = serde_json::json!({
            "core": self.core,
            "friction": self.friction,
            "initial_capital": self.backtest.initial_capital,
        });
        blake3::hash(payload.to_string().as_bytes())
            .to_hex()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_parsing_and_annualization() {
        let tf: Timeframe = "15m".parse().unwrap();
        assert_eq!(tf.minutes(), 15);
        assert_eq!(tf.bars_per_year(), 35_040.0);
        let tf: Timeframe = "1h".parse().unwrap();
        assert_eq!(tf.to_string(), "1h");
        assert_eq!(tf.bars_per_year(), 8_760.0);
        assert_eq!(Timeframe::DAILY.bars_per_year(), 252.0);
        assert!("0m".parse::<Timeframe>().is_err());
        assert!("15".parse::<Timeframe>().is_err());
        assert!("5w".parse::<Timeframe>().is_err());
    }

    #[test]
    fn empty_file_is_default() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sections_parse_from_toml() {
        let raw = r#"
            [risk]
            max_trades_per_day = 3
            account_equity = 25000

            [risk.session]
            enabled = true
            timezone = "America/Chicago"
            session = "08:30-15:00"

            [regime]
            confirm_bars = 2

            [friction]
            spread_bps = 4.0
            latency_bars = 1

            [backtest]
            timeframe = "1h"

            [walk_forward]
            splits = 5

            [live]
            symbols = ["SPY", "QQQ"]
            active_symbol = "QQQ"
            mode = "paper"
        "#;
        let config = AppConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.core.risk.max_trades_per_day, 3);
        assert_eq!(config.core.risk.account_equity, 25_000.0);
        assert!(config.core.risk.session.enabled);
        assert_eq!(config.core.regime.confirm_bars, 2);
        assert_eq!(config.friction.latency_bars, 1);
        assert_eq!(config.backtest.timeframe.minutes(), 60);
        assert_eq!(config.walk_forward.splits, 5);
        assert_eq!(config.live.mode, ExecutionMode::Paper);
        assert_eq!(config.live.initial_symbol(), Some("QQQ"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_active_symbol_is_a_warning() {
        let mut config = AppConfig::default();
        config.live.active_symbol = Some("IWM".into());
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.contains("IWM")));
        assert_eq!(config.live.initial_symbol(), Some("SPY"));
    }

    #[test]
    fn invalid_section_is_fatal() {
        let mut config = AppConfig::default();
        config.friction.partial_fill_pct = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("[friction]"));
    }

    #[test]
    fn replay_hash_tracks_replay_inputs_only() {
        let a = AppConfig::default();
        let mut b = a.clone();
        b.live.heartbeat_cycles = 99;
        assert_eq!(a.replay_hash(), b.replay_hash());
        b.friction.slippage_bps = 9.0;
        assert_ne!(a.replay_hash(), b.replay_hash());
    }

    #[test]
    fn from_file_reports_path() {
        let err = AppConfig::from_file(Path::new("/nonexistent/regimelab.toml")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/regimelab.toml"));
    }
}
