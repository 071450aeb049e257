//! MACD — difference of two EMAs plus an EMA of that difference.

use super::ema::ema;

/// Returns `(macd_line, signal_line)`.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> (Vec<f64>, Vec<f64>) {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema(&line, signal);
    (line, signal_line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_positive_in_uptrend() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let (line, signal) = macd(&closes, 12, 26, 9);
        assert!(line[24].is_nan());
        assert!(line[25] > 0.0);
        // Signal seeds after 9 MACD values.
        assert!(signal[32].is_nan());
        assert!(signal[33].is_finite());
        assert!(line[79] > 0.0);
    }

    #[test]
    fn macd_flat_is_zero() {
        let (line, signal) = macd(&[50.0; 60], 12, 26, 9);
        assert!(line[59].abs() < 1e-12);
        assert!(signal[59].abs() < 1e-12);
    }
}
