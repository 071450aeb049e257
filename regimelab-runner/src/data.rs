//! Market data sources and bar sanitization.
//!
//! The `MarketData` trait abstracts over where bars come from (a CSV
//! directory, an in-memory store, a seeded synthetic generator) so the
//! scheduler and the backtest commands can swap sources and tests can inject
//! exact sequences.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use regimelab_core::domain::Bar;

use crate::config::Timeframe;

/// Structured errors for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("no data for symbol '{symbol}'")]
    NoData { symbol: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed bar file {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("data quality check failed for {symbol}: {reason}")]
    Quality { symbol: String, reason: String },

    #[error("data source unavailable: {0}")]
    Unavailable(String),
}

/// Trait for bar sources.
pub trait MarketData: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Ordered bars for `symbol`, at most `limit` of the most recent (0 = all).
    fn fetch(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>, DataError>;
}

fn tail(mut bars: Vec<Bar>, limit: usize) -> Vec<Bar> {
    if limit > 0 && bars.len() > limit {
        bars.drain(..bars.len() - limit);
    }
    bars
}

// ─── Sanitization ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataQualityConfig {
    /// A spacing above `timeframe × max_gap_multiplier` counts as a gap.
    pub max_gap_multiplier: f64,
    /// Reject the series when estimated missing bars exceed this share.
    pub max_missing_bars_pct: f64,
    pub max_zero_volume_pct: f64,
}

impl Default for DataQualityConfig {
    fn default() -> Self {
        Self {
            max_gap_multiplier: 3.0,
            max_missing_bars_pct: 5.0,
            max_zero_volume_pct: 20.0,
        }
    }
}

impl DataQualityConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_gap_multiplier < 1.0 {
            return Err("max_gap_multiplier must be >= 1".into());
        }
        for (name, v) in [
            ("max_missing_bars_pct", self.max_missing_bars_pct),
            ("max_zero_volume_pct", self.max_zero_volume_pct),
        ] {
            if !(0.0..=100.0).contains(&v) {
                return Err(format!("{name} must be in [0, 100]"));
            }
        }
        Ok(())
    }
}

/// Sort, de-duplicate (last wins) and drop insane bars, then reject the
/// series if too many bars are missing or carry no volume.
pub fn sanitize(
    symbol: &str,
    bars: Vec<Bar>,
    timeframe: Timeframe,
    quality: &DataQualityConfig,
) -> Result<Vec<Bar>, DataError> {
    let raw_len = bars.len();
    let mut by_time: BTreeMap<DateTime<Utc>, Bar> = BTreeMap::new();
    for bar in bars {
        by_time.insert(bar.timestamp, bar);
    }
    let clean: Vec<Bar> = by_time.into_values().filter(Bar::is_sane).collect();
    if clean.is_empty() {
        return Err(DataError::NoData {
            symbol: symbol.to_string(),
        });
    }
    if clean.len() < raw_len {
        debug!(symbol, dropped = raw_len - clean.len(), "dropped duplicate or insane bars");
    }

    let expected = timeframe.minutes() as f64 * 60.0;
    let missing: f64 = clean
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_seconds() as f64)
        .filter(|gap| *gap > expected * quality.max_gap_multiplier)
        .map(|gap| (gap / expected - 1.0).max(0.0).floor())
        .sum();
    if missing > 0.0 {
        let missing_pct = missing / (clean.len() as f64 + missing) * 100.0;
        if missing_pct > quality.max_missing_bars_pct {
            return Err(DataError::Quality {
                symbol: symbol.to_string(),
                reason: format!(
                    "missing bars estimate {missing_pct:.2}% exceeds {:.2}%",
                    quality.max_missing_bars_pct
                ),
            });
        }
    }

    let zero_volume = clean.iter().filter(|b| b.volume <= 0.0).count();
    let zero_pct = zero_volume as f64 / clean.len() as f64 * 100.0;
    if zero_pct > quality.max_zero_volume_pct {
        return Err(DataError::Quality {
            symbol: symbol.to_string(),
            reason: format!(
                "zero-volume bars {zero_pct:.2}% exceeds {:.2}%",
                quality.max_zero_volume_pct
            ),
        });
    }
    Ok(clean)
}

// ─── CSV directory ───────────────────────────────────────────────────

/// Reads `<dir>/<SYMBOL>.csv` with columns
/// `timestamp,open,high,low,close,volume` (RFC 3339 timestamps).
#[derive(Debug, Clone)]
pub struct CsvDirectory {
    dir: PathBuf,
}

impl CsvDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.csv"))
    }
}

impl MarketData for CsvDirectory {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>, DataError> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return Err(DataError::NoData {
                symbol: symbol.to_string(),
            });
        }
        let bars = read_csv(&path)?;
        if bars.is_empty() {
            return Err(DataError::NoData {
                symbol: symbol.to_string(),
            });
        }
        Ok(tail(bars, limit))
    }
}

pub fn read_csv(path: &Path) -> Result<Vec<Bar>, DataError> {
    let csv_err = |source| DataError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    let mut bars = Vec::new();
    for row in reader.deserialize() {
        bars.push(row.map_err(csv_err)?);
    }
    Ok(bars)
}

pub fn write_csv(path: &Path, bars: &[Bar]) -> Result<(), DataError> {
    let csv_err = |source| DataError::Csv {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| DataError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    for bar in bars {
        writer.serialize(bar).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ─── In-memory ───────────────────────────────────────────────────────

/// Bars held in memory; new bars can be appended while the scheduler runs.
#[derive(Debug, Default)]
pub struct MemorySource {
    bars: RwLock<BTreeMap<String, Vec<Bar>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(symbol: &str, bars: Vec<Bar>) -> Self {
        let source = Self::new();
        source.insert(symbol, bars);
        source
    }

    /// Replace the series for `symbol`.
    pub fn insert(&self, symbol: &str, bars: Vec<Bar>) {
        match self.bars.write() {
            Ok(mut map) => {
                map.insert(symbol.to_string(), bars);
            }
            Err(_) => warn!(symbol, "memory source lock poisoned; insert dropped"),
        }
    }

    pub fn push(&self, symbol: &str, bar: Bar) {
        match self.bars.write() {
            Ok(mut map) => map.entry(symbol.to_string()).or_default().push(bar),
            Err(_) => warn!(symbol, "memory source lock poisoned; push dropped"),
        }
    }
}

impl MarketData for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>, DataError> {
        let map = self
            .bars
            .read()
            .map_err(|_| DataError::Unavailable("memory source lock poisoned".into()))?;
        match map.get(symbol) {
            Some(bars) if !bars.is_empty() => Ok(tail(bars.clone(), limit)),
            _ => Err(DataError::NoData {
                symbol: symbol.to_string(),
            }),
        }
    }
}

// ─── Synthetic ───────────────────────────────────────────────────────

/// Deterministic synthetic bars for development and tests.
///
/// A random walk whose drift and volatility switch every few dozen bars, so
/// the series passes through trending and range-bound stretches. The RNG is
/// seeded from a BLAKE3 hash of the symbol: the same symbol always yields the
/// same bars.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    timeframe: Timeframe,
    bars: usize,
    end: DateTime<Utc>,
}

impl SyntheticSource {
    pub fn new(timeframe: Timeframe, bars: usize, end: DateTime<Utc>) -> Self {
        Self {
            timeframe,
            bars,
            end,
        }
    }

    /// Source ending at a fixed reference time.
    pub fn fixed(timeframe: Timeframe, bars: usize) -> Self {
        let end = Utc
            .with_ymd_and_hms(2024, 12, 31, 21, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(timeframe, bars, end)
    }

    pub fn generate(&self, symbol: &str) -> Vec<Bar> {
        let seed: [u8; 32] = *blake3::hash(symbol.as_bytes()).as_bytes();
        let mut rng = StdRng::from_seed(seed);
        let step = Duration::minutes(self.timeframe.minutes() as i64);
        let start = self.end - step * (self.bars.saturating_sub(1) as i32);

        let mut bars = Vec::with_capacity(self.bars);
        let mut price = rng.gen_range(50.0..400.0_f64);
        let mut drift = 0.0;
        let mut vol = 0.002;
        for i in 0..self.bars {
            if i % 60 == 0 {
                drift = rng.gen_range(-0.0012..0.0012);
                vol = rng.gen_range(0.0008..0.004);
            }
            let ret = drift + vol * rng.gen_range(-1.0..1.0);
            let open = price;
            let close = price * (1.0 + ret);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..vol));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..vol));
            let volume = rng.gen_range(500.0..5_000.0_f64).round();
            bars.push(Bar::new(
                start + step * (i as i32),
                open,
                high,
                low,
                close,
                volume,
            ));
            price = close;
        }
        bars
    }
}

impl MarketData for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>, DataError> {
        if self.bars == 0 {
            return Err(DataError::NoData {
                symbol: symbol.to_string(),
            });
        }
        Ok(tail(self.generate(symbol), limit))
    }
}
