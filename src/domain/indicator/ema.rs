//! Exponential Moving Average.
//!
//! k = 2/(n+1), seed with the SMA of the first n values, then
//! EMA[i] = P[i]*k + EMA[i-1]*(1-k). Warmup: first (n-1) values are `NaN`.
//! A `NaN` input leaves the running average untouched and yields `NaN` at
//! that index.

pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 {
        return out;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut seeded = 0usize;
    let mut sum = 0.0;
    let mut ema = f64::NAN;

    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if seeded < period {
            sum += v;
            seeded += 1;
            if seeded == period {
                ema = sum / period as f64;
                out[i] = ema;
            }
        } else {
            ema = v * k + ema * (1.0 - k);
            out[i] = ema;
        }
    }

    out
}
