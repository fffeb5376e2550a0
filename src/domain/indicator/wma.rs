//! Weighted Moving Average.
//!
//! WMA(n) = (1*P[i-n+1] + 2*P[i-n+2] + ... + n*P[i]) / (n*(n+1)/2)
//! Warmup: first (n-1) values are `NaN`.

use super::rolling;

pub fn wma(values: &[f64], period: usize) -> Vec<f64> {
    let divisor = period as f64 * (period as f64 + 1.0) / 2.0;
    rolling(values, period, |w| {
        w.iter()
            .enumerate()
            .map(|(j, v)| (j + 1) as f64 * v)
            .sum::<f64>()
            / divisor
    })
}
