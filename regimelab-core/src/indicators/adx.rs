//! ADX — Average Directional Index (Wilder).
//!
//! Steps:
//! 1. Compute +DM and -DM from consecutive bars
//! 2. Smooth +DM, -DM, and TR using Wilder smoothing
//! 3. DI± = 100 * smoothed(±DM) / smoothed(TR)
//! 4. DX = 100 * |+DI - -DI| / (+DI + -DI)
//! 5. ADX = Wilder-smoothed DX
//!
//! Lookback: 2 * period.

use crate::domain::Bar;

use super::atr::{true_range, wilder_smooth};

pub fn adx(bars: &[Bar], period: usize) -> Vec<f64> {
    let n = bars.len();
    if n < 2 {
        return vec![f64::NAN; n];
    }

    let mut plus_dm = vec![f64::NAN; n];
    let mut minus_dm = vec![f64::NAN; n];
    for i in 1..n {
        let up = bars[i].high - bars[i - 1].high;
        let down = bars[i - 1].low - bars[i].low;
        plus_dm[i] = if up > down && up > 0.0 { up } else { 0.0 };
        minus_dm[i] = if down > up && down > 0.0 { down } else { 0.0 };
    }

    // TR[0] has no previous close; align it with the DM series.
    let mut tr = true_range(bars);
    tr[0] = f64::NAN;

    let smooth_tr = wilder_smooth(&tr, period);
    let smooth_plus = wilder_smooth(&plus_dm, period);
    let smooth_minus = wilder_smooth(&minus_dm, period);

    let mut dx = vec![f64::NAN; n];
    for i in 0..n {
        if smooth_tr[i].is_nan() || smooth_tr[i] == 0.0 {
            continue;
        }
        let plus_di = 100.0 * smooth_plus[i] / smooth_tr[i];
        let minus_di = 100.0 * smooth_minus[i] / smooth_tr[i];
        let sum = plus_di + minus_di;
        dx[i] = if sum == 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / sum
        };
    }

    wilder_smooth(&dx, period)
}
