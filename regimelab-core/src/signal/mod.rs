//! Signal models — regime-specific confluence scoring.
//!
//! A model looks at the last bar of a window (plus the bar before it for
//! slope checks) and returns a direction together with the set of features
//! that agree with it. The raw score is the number of active features; the
//! adjusted score adds the learned symbol bias and feature weights.
//!
//! Architecture contract: models read bars and `LearningState` only. They
//! never see risk state or open positions.

pub mod engine;
pub mod mean_reversion;
pub mod trend;

pub use engine::{SignalConfig, SignalEngine};
pub use mean_reversion::{MeanReversion, MeanReversionConfig};
pub use trend::{TrendConfig, TrendFollowing};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{Bar, Feature, Side};
use crate::learning::LearningState;
use crate::regime::Regime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    TrendFollowing,
    MeanReversion,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::TrendFollowing => f.write_str("trend_following"),
            ModelKind::MeanReversion => f.write_str("mean_reversion"),
        }
    }
}

/// Why a candidate is not actionable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InactiveReason {
    InsufficientBars,
    IndicatorsNotReady,
    NeutralRegime,
    NoDirection,
    MissingConfirmation,
    BelowMinScore,
    BelowAdjustedScore,
}

impl fmt::Display for InactiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InactiveReason::InsufficientBars => "insufficient bars",
            InactiveReason::IndicatorsNotReady => "indicators not ready",
            InactiveReason::NeutralRegime => "neutral regime",
            InactiveReason::NoDirection => "no direction",
            InactiveReason::MissingConfirmation => "missing confirmation",
            InactiveReason::BelowMinScore => "raw score below minimum",
            InactiveReason::BelowAdjustedScore => "adjusted score below minimum",
        };
        f.write_str(s)
    }
}

/// A model's verdict on the latest bar before learning is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub direction: Side,
    pub features: Vec<Feature>,
    /// False when a mandatory confirmation (e.g. RSI slope) is missing.
    pub confirmed: bool,
}

/// Scored candidate for one symbol at one bar. Created fresh every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalCandidate {
    pub symbol: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub price: f64,
    pub atr: f64,
    pub rsi: f64,
    pub adx: f64,
    pub direction: Option<Side>,
    pub model: Option<ModelKind>,
    pub regime: Regime,
    pub regime_confidence: f64,
    pub raw_score: u32,
    pub adjusted_score: f64,
    pub min_score: u32,
    pub features: Vec<Feature>,
    pub actionable: bool,
    pub inactive_reason: Option<InactiveReason>,
}

impl SignalCandidate {
    /// A non-actionable candidate stamped with the latest bar, if any.
    pub fn inactive(symbol: &str, latest: Option<&Bar>, reason: InactiveReason) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp: latest.map(|b| b.timestamp),
            price: latest.map_or(f64::NAN, |b| b.close),
            atr: latest.map_or(f64::NAN, |b| b.indicators.atr),
            rsi: latest.map_or(f64::NAN, |b| b.indicators.rsi),
            adx: latest.map_or(f64::NAN, |b| b.indicators.adx),
            direction: None,
            model: None,
            regime: Regime::Neutral,
            regime_confidence: 0.0,
            raw_score: 0,
            adjusted_score: 0.0,
            min_score: 0,
            features: Vec::new(),
            actionable: false,
            inactive_reason: Some(reason),
        }
    }

    /// Dedupe key: one alert per symbol, bar and direction.
    pub fn signal_key(&self) -> Option<String> {
        let ts = self.timestamp?;
        let dir = self.direction?;
        Some(format!("{}::{}::{}", self.symbol, ts.to_rfc3339(), dir))
    }

    /// One-line alert text for notification sinks.
    pub fn alert_text(&self) -> String {
        let dir = self
            .direction
            .map_or_else(|| "NONE".to_string(), |d| d.to_string());
        let model = self
            .model
            .map_or_else(|| "-".to_string(), |m| m.to_string());
        format!(
            "{} {} signal [{} / {} {:.0}%] score {} (adj {:.2}) price {:.2} rsi {:.1} adx {:.1}",
            self.symbol,
            dir,
            model,
            self.regime,
            self.regime_confidence * 100.0,
            self.raw_score,
            self.adjusted_score,
            self.price,
            self.rsi,
            self.adx,
        )
    }
}

/// Common contract for the regime-specific models.
pub trait SignalModel: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ModelKind;

    fn min_score(&self) -> u32;

    /// Bars the model reads from the end of the window.
    fn required_bars(&self) -> usize {
        2
    }

    /// Direction and agreeing features at the last bar, or `None` when the
    /// model sees no setup in either direction.
    fn score(&self, window: &[Bar]) -> Option<Scored>;

    /// Score the last bar of `window` and apply learned adjustments.
    fn evaluate(&self, symbol: &str, window: &[Bar], learning: &LearningState) -> SignalCandidate {
        let latest = window.last();
        if window.len() < self.required_bars() {
            return SignalCandidate::inactive(symbol, latest, InactiveReason::InsufficientBars);
        }
        let needed = &window[window.len() - self.required_bars()..];
        if !needed.iter().all(|b| b.indicators.is_ready()) {
            return SignalCandidate::inactive(symbol, latest, InactiveReason::IndicatorsNotReady);
        }

        let mut candidate = SignalCandidate::inactive(symbol, latest, InactiveReason::NoDirection);
        candidate.model = Some(self.kind());
        candidate.min_score = self.min_score();

        let Some(scored) = self.score(window) else {
            return candidate;
        };

        let raw = scored.features.len() as u32;
        let adjusted = raw as f64 + learning.adjustment(symbol, &scored.features);
        let min = self.min_score();

        candidate.direction = Some(scored.direction);
        candidate.raw_score = raw;
        candidate.adjusted_score = adjusted;
        candidate.features = scored.features;
        candidate.inactive_reason = if !scored.confirmed {
            Some(InactiveReason::MissingConfirmation)
        } else if raw < min {
            Some(InactiveReason::BelowMinScore)
        } else if adjusted < min as f64 {
            Some(InactiveReason::BelowAdjustedScore)
        } else {
            None
        };
        candidate.actionable = candidate.inactive_reason.is_none();
        candidate
    }
}
