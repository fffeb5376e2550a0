//! Average True Range.
//!
//! TR[0] = high - low; TR[i] = max(high - low, |high - prev_close|,
//! |low - prev_close|). Seeded with the mean of the first n true ranges,
//! then Wilder smoothing: ATR[i] = (ATR[i-1]*(n-1) + TR[i]) / n.
//! Warmup: first (n-1) values are `NaN`.

pub fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    let hl = high - low;
    let hc = (high - prev_close).abs();
    let lc = (low - prev_close).abs();
    hl.max(hc).max(lc)
}

pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let n = high.len().min(low.len()).min(close.len());
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period {
        return out;
    }

    let tr: Vec<f64> = (0..n)
        .map(|i| {
            if i == 0 {
                high[0] - low[0]
            } else {
                true_range(high[i], low[i], close[i - 1])
            }
        })
        .collect();

    let mut prev = tr[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = prev;
    for i in period..n {
        prev = (prev * (period - 1) as f64 + tr[i]) / period as f64;
        out[i] = prev;
    }
    out
}
