//! Bollinger Bands and z-score of close from its rolling mean.
//!
//! - Middle: SMA(close, period)
//! - Upper / lower: middle ± mult * stddev(close, period)
//!
//! Uses population stddev (divide by N).

use super::ema::sma;

#[derive(Debug, Clone)]
pub struct Bands {
    pub middle: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Rolling population standard deviation.
pub fn rolling_std(values: &[f64], period: usize) -> Vec<f64> {
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
        let mean = window.iter().sum::<f64>() / period as f64;
        let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        result[i] = var.sqrt();
    }
    result
}

pub fn bollinger(closes: &[f64], period: usize, multiplier: f64) -> Bands {
    let middle = sma(closes, period);
    let std = rolling_std(closes, period);
    let upper = middle
        .iter()
        .zip(std.iter())
        .map(|(m, s)| m + multiplier * s)
        .collect();
    let lower = middle
        .iter()
        .zip(std.iter())
        .map(|(m, s)| m - multiplier * s)
        .collect();
    Bands {
        middle,
        upper,
        lower,
    }
}

/// (close - SMA) / stddev. A flat window yields 0.
pub fn zscore(closes: &[f64], period: usize) -> Vec<f64> {
    let mean = sma(closes, period);
    let std = rolling_std(closes, period);
    closes
        .iter()
        .zip(mean.iter().zip(std.iter()))
        .map(|(c, (m, s))| {
            if m.is_nan() || s.is_nan() {
                f64::NAN
            } else if *s < 1e-12 {
                0.0
            } else {
                (c - m) / s
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, DEFAULT_EPSILON};

    #[test]
    fn bands_collapse_on_flat_prices() {
        let bands = bollinger(&[100.0; 25], 20, 2.0);
        assert_approx(bands.middle[24], 100.0, DEFAULT_EPSILON);
        assert_approx(bands.upper[24], 100.0, DEFAULT_EPSILON);
        assert_approx(bands.lower[24], 100.0, DEFAULT_EPSILON);
    }

    #[test]
    fn population_std() {
        // values 2,4,4,4,5,5,7,9 → population std = 2
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let result = rolling_std(&v, 8);
        assert_approx(result[7], 2.0, DEFAULT_EPSILON);
    }

    #[test]
    fn zscore_sign_follows_deviation() {
        let mut closes = vec![100.0; 19];
        closes.push(110.0);
        let z = zscore(&closes, 20);
        assert!(z[19] > 2.0, "spike should be an extreme z-score, got {}", z[19]);
        assert!(z[18].is_nan());
    }

    #[test]
    fn zscore_flat_is_zero() {
        let z = zscore(&[50.0; 20], 20);
        assert_approx(z[19], 0.0, DEFAULT_EPSILON);
    }
}
