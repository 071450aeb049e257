//! Core configuration — every tunable the decision pipeline reads.
//!
//! Each section validates itself; `CoreConfig::validate` names the failing
//! section and collects non-fatal warnings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exits::ExitConfig;
use crate::indicators::IndicatorConfig;
use crate::learning::LearningConfig;
use crate::regime::RegimeConfig;
use crate::risk::RiskConfig;
use crate::signal::{SignalConfig, TrendConfig};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid [{section}] config: {message}")]
    Invalid {
        section: &'static str,
        message: String,
    },
}

impl ConfigError {
    pub fn invalid(section: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            section,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub indicators: IndicatorConfig,
    pub regime: RegimeConfig,
    pub signal: SignalConfig,
    pub learning: LearningConfig,
    pub risk: RiskConfig,
    pub exits: ExitConfig,
}

impl CoreConfig {
    /// Validate every section. Returns warnings for settings that are legal
    /// but likely unintended.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let sections: [(&'static str, Result<(), String>); 6] = [
            ("indicators", self.indicators.validate()),
            ("regime", self.regime.validate()),
            ("signal", self.signal.validate()),
            ("learning", self.learning.validate()),
            ("risk", self.risk.validate()),
            ("exits", self.exits.validate()),
        ];
        for (section, result) in sections {
            result.map_err(|message| ConfigError::invalid(section, message))?;
        }

        let mut warnings = Vec::new();
        let lookback = self.indicators.lookback();
        if self.risk.warmup_bars < lookback {
            warnings.push(format!(
                "risk.warmup_bars ({}) is below the indicator lookback ({lookback}); \
                 early candidates will be inactive until indicators are ready",
                self.risk.warmup_bars
            ));
        }
        if self.signal.trend.min_score == TrendConfig::FEATURE_COUNT {
            warnings.push("signal.trend.min_score requires every feature to agree".into());
        }
        if self.signal.allow_neutral_entries {
            warnings.push("signal.allow_neutral_entries trades the trend model in NEUTRAL".into());
        }
        if self.exits.take_profit_pct == 0.0
            && self.exits.trailing_stop_pct == 0.0
            && self.exits.max_hold_bars == 0
            && !self.exits.use_atr_exits
        {
            warnings.push("exits: positions can only close at the stop".into());
        }
        Ok(warnings)
    }
}
