//! Technical indicators over float columns.
//!
//! Outputs have the input's length. Positions without enough history are
//! NaN, so a derived column lines up row for row with its source.

use chrono::Datelike;

use super::frame::Timestamp;
use super::stats;

/// Simple moving average over `window` values. A window containing NaN gives NaN.
pub fn sma(values: &[f64], window: usize) -> Vec<f64> {
    rolling_apply(values, window, stats::mean)
}

/// Rolling sample standard deviation.
pub fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    rolling_apply(values, window, stats::std)
}

/// Apply `f` to every full window of `window` values; windows with NaN give NaN.
pub fn rolling_apply(values: &[f64], window: usize, f: fn(&[f64]) -> f64) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 {
        return out;
    }
    for i in window.saturating_sub(1)..n {
        let slice = &values[i + 1 - window..=i];
        if slice.iter().all(|x| !x.is_nan()) {
            out[i] = f(slice);
        }
    }
    out
}

/// Exponential moving average with `alpha = 2 / (span + 1)`, seeded with the
/// first non-missing value. Missing inputs carry the previous average.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    smooth(values, alpha)
}

fn smooth(values: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    let mut prev = f64::NAN;
    for (i, &x) in values.iter().enumerate() {
        if x.is_nan() {
            out[i] = prev;
            continue;
        }
        prev = if prev.is_nan() {
            x
        } else {
            alpha * x + (1.0 - alpha) * prev
        };
        out[i] = prev;
    }
    out
}

/// Relative Strength Index with Wilder smoothing. The first `period` rows are NaN.
pub fn rsi(close: &[f64], period: usize) -> Vec<f64> {
    let n = close.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n <= period {
        return out;
    }

    let mut gains = vec![0.0; n];
    let mut losses = vec![0.0; n];
    for i in 1..n {
        let change = close[i] - close[i - 1];
        if change > 0.0 {
            gains[i] = change;
        } else if change < 0.0 {
            losses[i] = -change;
        }
    }

    let p = period as f64;
    let mut avg_gain = gains[1..=period].iter().sum::<f64>() / p;
    let mut avg_loss = losses[1..=period].iter().sum::<f64>() / p;
    out[period] = rsi_value(avg_gain, avg_loss);

    for i in period + 1..n {
        avg_gain = (avg_gain * (p - 1.0) + gains[i]) / p;
        avg_loss = (avg_loss * (p - 1.0) + losses[i]) / p;
        out[i] = rsi_value(avg_gain, avg_loss);
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 { 50.0 } else { 100.0 }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// MACD line, signal line and histogram.
pub struct Macd {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub hist: Vec<f64>,
}

pub fn macd(close: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let fast_ema = ema(close, fast);
    let slow_ema = ema(close, slow);
    let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal = ema(&line, signal);
    let hist = line.iter().zip(&signal).map(|(l, s)| l - s).collect();
    Macd { line, signal, hist }
}

pub struct Bands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Bollinger bands: SMA plus/minus `k` rolling standard deviations.
pub fn bollinger(close: &[f64], window: usize, k: f64) -> Bands {
    let middle = sma(close, window);
    let std = rolling_std(close, window);
    let upper = middle.iter().zip(&std).map(|(m, s)| m + k * s).collect();
    let lower = middle.iter().zip(&std).map(|(m, s)| m - k * s).collect();
    Bands {
        upper,
        middle,
        lower,
    }
}

/// Volume-weighted average price of the typical price, anchored to the UTC
/// calendar day: the running sums restart on the first row of each day.
pub fn vwap(index: &[Timestamp], high: &[f64], low: &[f64], close: &[f64], volume: &[f64]) -> Vec<f64> {
    let n = close.len();
    let mut out = vec![f64::NAN; n];
    let mut pv = 0.0;
    let mut vol = 0.0;
    let mut day = None;

    for i in 0..n {
        let today = index.get(i).map(|ts| ts.date_naive().num_days_from_ce());
        if today != day {
            day = today;
            pv = 0.0;
            vol = 0.0;
        }
        let typical = (high[i] + low[i] + close[i]) / 3.0;
        if typical.is_nan() || volume[i].is_nan() {
            continue;
        }
        pv += typical * volume[i];
        vol += volume[i];
        if vol > 0.0 {
            out[i] = pv / vol;
        }
    }
    out
}

/// Average True Range with Wilder smoothing.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let n = close.len();
    let mut tr = vec![f64::NAN; n];
    if n == 0 {
        return tr;
    }
    tr[0] = high[0] - low[0];
    for i in 1..n {
        let hl = high[i] - low[i];
        let hc = (high[i] - close[i - 1]).abs();
        let lc = (low[i] - close[i - 1]).abs();
        tr[i] = hl.max(hc).max(lc);
    }

    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period {
        return out;
    }
    let p = period as f64;
    let mut avg = tr[..period].iter().sum::<f64>() / p;
    out[period - 1] = avg;
    for i in period..n {
        avg = (avg * (p - 1.0) + tr[i]) / p;
        out[i] = avg;
    }
    out
}

pub fn shift(values: &[f64], periods: i64) -> Vec<f64> {
    let n = values.len() as i64;
    (0..n)
        .map(|i| {
            match i.checked_sub(periods) {
                Some(src) if (0..n).contains(&src) => values[src as usize],
                _ => f64::NAN,
            }
        })
        .collect()
}

pub fn diff(values: &[f64], periods: i64) -> Vec<f64> {
    let prev = shift(values, periods);
    values.iter().zip(&prev).map(|(x, p)| x - p).collect()
}

/// Fractional change from `periods` rows earlier.
pub fn pct_change(values: &[f64], periods: i64) -> Vec<f64> {
    let prev = shift(values, periods);
    values.iter().zip(&prev).map(|(x, p)| x / p - 1.0).collect()
}

pub fn log_return(values: &[f64]) -> Vec<f64> {
    let prev = shift(values, 1);
    values.iter().zip(&prev).map(|(x, p)| (x / p).ln()).collect()
}

/// Running sum; missing inputs stay missing and do not reset the total.
pub fn cumsum(values: &[f64]) -> Vec<f64> {
    let mut acc = 0.0;
    values
        .iter()
        .map(|&x| {
            if x.is_nan() {
                f64::NAN
            } else {
                acc += x;
                acc
            }
        })
        .collect()
}

pub fn cumprod(values: &[f64]) -> Vec<f64> {
    let mut acc = 1.0;
    values
        .iter()
        .map(|&x| {
            if x.is_nan() {
                f64::NAN
            } else {
                acc *= x;
                acc
            }
        })
        .collect()
}

/// Compounded return since the first row: `prod(1 + r) - 1` over simple returns.
pub fn cumulative_return(values: &[f64]) -> Vec<f64> {
    let growth: Vec<f64> = pct_change(values, 1)
        .into_iter()
        .map(|r| if r.is_nan() { 1.0 } else { 1.0 + r })
        .collect();
    cumprod(&growth).into_iter().map(|g| g - 1.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn close_enough(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn sma_has_warmup_nans() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0], 2);
        assert!(out[0].is_nan());
        assert_eq!(&out[1..], &[1.5, 2.5, 3.5]);
    }

    #[test]
    fn sma_window_with_nan_is_nan() {
        let out = sma(&[1.0, f64::NAN, 3.0, 4.0], 2);
        assert!(out[1].is_nan() && out[2].is_nan());
        assert_eq!(out[3], 3.5);
    }

    #[test]
    fn ema_seeds_with_first_value() {
        let out = ema(&[10.0, 20.0], 3);
        assert_eq!(out[0], 10.0);
        assert!(close_enough(out[1], 15.0));
    }

    #[test]
    fn rsi_all_gains_is_hundred() {
        let close: Vec<f64> = (1..=20).map(f64::from).collect();
        let out = rsi(&close, 14);
        assert!(out[13].is_nan());
        assert_eq!(out[14], 100.0);
        assert_eq!(out[19], 100.0);
    }

    #[test]
    fn rsi_flat_is_neutral() {
        let out = rsi(&[5.0; 16], 14);
        assert_eq!(out[15], 50.0);
    }

    #[test]
    fn rsi_mixed_moves_in_range() {
        let close = [44.0, 44.3, 44.1, 43.6, 44.3, 44.8, 45.1, 45.4, 45.8, 46.1, 45.9, 46.0, 45.6, 46.3, 46.3, 46.0];
        let out = rsi(&close, 14);
        assert!(out[14] > 50.0 && out[14] < 100.0);
    }

    #[test]
    fn macd_hist_is_line_minus_signal() {
        let close: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64).sin()).collect();
        let m = macd(&close, 12, 26, 9);
        for i in 0..close.len() {
            assert!(close_enough(m.hist[i], m.line[i] - m.signal[i]));
        }
    }

    #[test]
    fn bollinger_bands_bracket_the_mean() {
        let close = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = bollinger(&close, 3, 2.0);
        assert!(b.middle[1].is_nan());
        assert_eq!(b.middle[2], 2.0);
        assert!(close_enough(b.upper[2], 4.0));
        assert!(close_enough(b.lower[2], 0.0));
    }

    #[test]
    fn vwap_restarts_each_day() {
        let index = vec![
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap(),
        ];
        let px = [10.0, 20.0, 30.0];
        let vol = [1.0, 1.0, 5.0];
        let out = vwap(&index, &px, &px, &px, &vol);
        assert_eq!(out, vec![10.0, 15.0, 30.0]);
    }

    #[test]
    fn atr_warmup_then_values() {
        let high = [10.0, 11.0, 12.0];
        let low = [9.0, 10.0, 11.0];
        let close = [9.5, 10.5, 11.5];
        let out = atr(&high, &low, &close, 2);
        assert!(out[0].is_nan());
        assert!(close_enough(out[1], 1.25));
    }

    #[test]
    fn returns_and_shift() {
        let v = [100.0, 110.0, 99.0];
        assert_eq!(shift(&v, 1)[1], 100.0);
        assert!(shift(&v, -1)[2].is_nan());
        assert!(close_enough(pct_change(&v, 1)[1], 0.1));
        assert!(close_enough(log_return(&v)[1], (1.1f64).ln()));
        assert_eq!(diff(&v, 1)[2], -11.0);
    }

    #[test]
    fn extreme_shifts_are_all_missing() {
        let v = [1.0, 2.0, 3.0];
        assert!(shift(&v, i64::MIN).iter().all(|x| x.is_nan()));
        assert!(shift(&v, i64::MAX).iter().all(|x| x.is_nan()));
        assert!(shift(&v, 3).iter().all(|x| x.is_nan()));
    }

    #[test]
    fn cumulative_ops_skip_missing() {
        assert_eq!(cumsum(&[1.0, 2.0, 3.0]), vec![1.0, 3.0, 6.0]);
        let c = cumsum(&[1.0, f64::NAN, 3.0]);
        assert!(c[1].is_nan());
        assert_eq!(c[2], 4.0);
        assert_eq!(cumprod(&[2.0, 3.0]), vec![2.0, 6.0]);
    }

    #[test]
    fn cumulative_return_compounds() {
        let out = cumulative_return(&[100.0, 110.0, 121.0]);
        assert_eq!(out[0], 0.0);
        assert!(close_enough(out[2], 0.21));
    }
}
