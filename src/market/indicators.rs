//! Technical indicators
//!
//! Pure functions over bar or close sequences. Every output has the same
//! length as its input and is aligned bar-for-bar; `None` marks the warmup
//! region where a value is not yet defined.

use super::bars::Bar;

/// Exponential moving average seeded with the first value
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let Some(&first) = values.first() else {
        return out;
    };
    let k = 2.0 / (period.max(1) as f64 + 1.0);
    let mut e = first;
    out.push(e);
    for &v in &values[1..] {
        e += k * (v - e);
        out.push(e);
    }
    out
}

/// Wilder smoothing (alpha = 1/period), seeded with the simple mean of
/// `values[1..=period]`. Index 0 is skipped because difference-based inputs
/// are undefined on the first bar.
pub fn rma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let mut out = vec![None; n];
    if period == 0 || n <= period {
        return out;
    }
    let mut avg = values[1..=period].iter().sum::<f64>() / period as f64;
    out[period] = Some(avg);
    let a = 1.0 / period as f64;
    for i in period + 1..n {
        avg += a * (values[i] - avg);
        out[i] = Some(avg);
    }
    out
}

/// True range per bar
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, b)| b.true_range(i.checked_sub(1).map(|p| bars[p].close)))
        .collect()
}

/// Average true range (Wilder)
pub fn atr(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    rma(&true_range(bars), period)
}

/// Relative strength index (Wilder)
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = closes.len();
    let mut gains = vec![0.0; n];
    let mut losses = vec![0.0; n];
    for i in 1..n {
        let diff = closes[i] - closes[i - 1];
        gains[i] = diff.max(0.0);
        losses[i] = (-diff).max(0.0);
    }
    let avg_gain = rma(&gains, period);
    let avg_loss = rma(&losses, period);
    avg_gain
        .into_iter()
        .zip(avg_loss)
        .map(|(g, l)| match (g, l) {
            (Some(_), Some(l)) if l == 0.0 => Some(100.0),
            (Some(g), Some(l)) => Some(100.0 - 100.0 / (1.0 + g / l)),
            _ => None,
        })
        .collect()
}

/// MACD line, signal line and histogram
#[derive(Debug, Clone, Default)]
pub struct Macd {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub hist: Vec<f64>,
}

impl Macd {
    /// Line crossed above signal on bar `i`
    pub fn crossed_up(&self, i: usize) -> bool {
        i >= 1
            && i < self.hist.len()
            && self.hist[i - 1] <= 0.0
            && self.hist[i] > 0.0
    }

    /// Line crossed below signal on bar `i`
    pub fn crossed_down(&self, i: usize) -> bool {
        i >= 1
            && i < self.hist.len()
            && self.hist[i - 1] >= 0.0
            && self.hist[i] < 0.0
    }
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal_line = ema(&line, signal);
    let hist = line.iter().zip(&signal_line).map(|(l, s)| l - s).collect();
    Macd {
        line,
        signal: signal_line,
        hist,
    }
}

/// Average directional index (Wilder)
pub fn adx(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let n = bars.len();
    if period == 0 || n < 2 * period + 1 {
        return vec![None; n];
    }

    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    for i in 1..n {
        let up = bars[i].high - bars[i - 1].high;
        let down = bars[i - 1].low - bars[i].low;
        if up > down && up > 0.0 {
            plus_dm[i] = up;
        }
        if down > up && down > 0.0 {
            minus_dm[i] = down;
        }
    }

    let tr_s = rma(&true_range(bars), period);
    let pdm_s = rma(&plus_dm, period);
    let mdm_s = rma(&minus_dm, period);

    // DX is defined from `period` onward
    let mut dx = vec![0.0; n];
    for i in period..n {
        let (Some(tr), Some(p), Some(m)) = (tr_s[i], pdm_s[i], mdm_s[i]) else {
            continue;
        };
        if tr <= 0.0 {
            continue;
        }
        let plus_di = 100.0 * p / tr;
        let minus_di = 100.0 * m / tr;
        let sum = plus_di + minus_di;
        if sum > 0.0 {
            dx[i] = 100.0 * (plus_di - minus_di).abs() / sum;
        }
    }

    // Smooth DX over its own defined region
    let smoothed = rma(&dx[period - 1..], period);
    let mut out = vec![None; n];
    for (j, v) in smoothed.into_iter().enumerate() {
        out[period - 1 + j] = v;
    }
    out
}

/// Donchian channel (highest high, lowest low) including the current bar
pub fn donchian(bars: &[Bar], period: usize) -> (Vec<f64>, Vec<f64>) {
    let period = period.max(1);
    let mut highs = Vec::with_capacity(bars.len());
    let mut lows = Vec::with_capacity(bars.len());
    for i in 0..bars.len() {
        let window = &bars[(i + 1).saturating_sub(period)..=i];
        highs.push(window.iter().map(|b| b.high).fold(f64::MIN, f64::max));
        lows.push(window.iter().map(|b| b.low).fold(f64::MAX, f64::min));
    }
    (highs, lows)
}

/// Median of a slice, ignoring non-finite values
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

#[cfg(test)]
pub(crate) fn make_bars(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                time: i as i64 * 60,
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                volume: 1_000.0,
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, epsilon={epsilon}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_seeded_with_first_value() {
        let out = ema(&[10.0, 20.0, 30.0], 3);
        assert_eq!(out.len(), 3);
        assert_approx(out[0], 10.0, 1e-12);
        assert_approx(out[1], 15.0, 1e-12);
        assert_approx(out[2], 22.5, 1e-12);
    }

    #[test]
    fn test_rma_warmup_and_smoothing() {
        let out = rma(&[0.0, 2.0, 4.0, 6.0], 2);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert_approx(out[2].unwrap(), 3.0, 1e-12);
        assert_approx(out[3].unwrap(), 4.5, 1e-12);
    }

    #[test]
    fn test_atr_constant_range() {
        let bars: Vec<Bar> = (0..30)
            .map(|i| Bar { time: i * 60, open: 100.0, high: 101.0, low: 99.0, close: 100.0, volume: 1.0 })
            .collect();
        let out = atr(&bars, 14);
        assert_eq!(out[13], None);
        assert_approx(out[29].unwrap(), 2.0, 1e-12);
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let out = rsi(&closes, 14);
        assert_eq!(out[29], Some(100.0));
    }

    #[test]
    fn test_rsi_alternating_is_neutral() {
        let closes: Vec<f64> = (0..60).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        let v = rsi(&closes, 14)[59].unwrap();
        assert!((v - 50.0).abs() < 5.0, "rsi {v}");
    }

    #[test]
    fn test_adx_strong_trend_is_high() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + 2.0 * i as f64).collect();
        let out = adx(&make_bars(&closes), 14);
        assert!(out[20].is_none());
        assert!(out[79].unwrap() > 40.0);
    }

    #[test]
    fn test_adx_short_input_is_undefined() {
        let out = adx(&make_bars(&[1.0, 2.0, 3.0]), 14);
        assert!(out.iter().all(Option::is_none));
    }

    #[test]
    fn test_donchian_includes_current_bar() {
        let bars = make_bars(&[10.0, 12.0, 11.0, 15.0]);
        let (hi, lo) = donchian(&bars, 2);
        assert_approx(hi[3], 16.0, 1e-12);
        assert_approx(lo[3], 10.0, 1e-12);
        assert_approx(hi[0], 11.0, 1e-12);
    }

    #[test]
    fn test_macd_cross_detection() {
        let mut closes = vec![100.0; 40];
        closes.extend((0..10).map(|i| 100.0 + 3.0 * (i + 1) as f64));
        let m = macd(&closes, 12, 26, 9);
        assert_eq!(m.hist.len(), closes.len());
        assert!((40..50).any(|i| m.crossed_up(i)));
        assert!(!(40..50).any(|i| m.crossed_down(i)));
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }
}
