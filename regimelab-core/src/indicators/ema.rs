//! Exponential and simple moving averages over f64 series.
//!
//! EMA recursion: EMA[t] = alpha * x[t] + (1 - alpha) * EMA[t-1], alpha = 2 / (period + 1).
//! Seed: SMA of the first `period` consecutive valid values.
//! Leading NaNs are skipped, so an EMA of a derived series (e.g. the MACD line)
//! seeds as soon as enough of that series exists. A NaN after the seed taints
//! everything that follows.

/// Index of the first window of `period` consecutive non-NaN values.
pub(crate) fn first_valid_window(values: &[f64], period: usize) -> Option<usize> {
    if period == 0 {
        return None;
    }
    let mut run = 0;
    for (i, v) in values.iter().enumerate() {
        if v.is_nan() {
            run = 0;
            continue;
        }
        run += 1;
        if run == period {
            return Some(i + 1 - period);
        }
    }
    None
}

/// Exponential moving average of a series.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period as f64 + 1.0);
    smooth(values, period, alpha)
}

/// Recursive smoothing with an SMA seed; shared by EMA and Wilder smoothing.
pub(crate) fn smooth(values: &[f64], period: usize, alpha: f64) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];

    let start = match first_valid_window(values, period) {
        Some(s) => s,
        None => return result,
    };
    let seed_end = start + period;
    let seed = values[start..seed_end].iter().sum::<f64>() / period as f64;
    result[seed_end - 1] = seed;

    let mut prev = seed;
    for i in seed_end..n {
        if values[i].is_nan() {
            return result;
        }
        let next = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = next;
        prev = next;
    }

    result
}

/// Simple moving average. NaN until `period` values are available.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    for i in (period - 1)..n {
        let window = &values[i + 1 - period..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        result[i] = window.iter().sum::<f64>() / period as f64;
    }
    result
}
