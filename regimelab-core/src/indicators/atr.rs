//! Average True Range (ATR).
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|)
//! ATR uses Wilder smoothing (alpha = 1/period).

use crate::domain::Bar;

use super::ema::smooth;

/// Compute the True Range series from bars.
/// TR[0] = high[0] - low[0] (no previous close).
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        let range = bar.high - bar.low;
        if i == 0 {
            tr.push(range);
            continue;
        }
        let pc = bars[i - 1].close;
        tr.push(range.max((bar.high - pc).abs()).max((bar.low - pc).abs()));
    }
    tr
}

/// Apply Wilder smoothing to a series. Alpha = 1/period.
pub fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 {
        return vec![f64::NAN; values.len()];
    }
    smooth(values, period, 1.0 / period as f64)
}

pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    wilder_smooth(&true_range(bars), period)
}
