//! Standard Deviation.
//!
//! Population standard deviation over the last n values.
//! Warmup: first (n-1) values are `NaN`.

use super::rolling;

pub fn stddev(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, |w| {
        let n = w.len() as f64;
        let mean = w.iter().sum::<f64>() / n;
        let variance = w
            .iter()
            .map(|v| {
                let diff = v - mean;
                diff * diff
            })
            .sum::<f64>()
            / n;
        variance.sqrt()
    })
}
