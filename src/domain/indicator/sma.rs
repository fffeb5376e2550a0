//! Simple Moving Average.
//!
//! SMA(n)[i] = mean(P[i-n+1..=i]). Warmup: first (n-1) values are `NaN`.
//! Windows containing a `NaN` produce `NaN`.

use super::rolling;

pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, |w| w.iter().sum::<f64>() / w.len() as f64)
}
