//! Rolling highest / lowest value over the last n values.

use super::rolling;

pub fn highest(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, |w| w.iter().copied().fold(f64::NAN, f64::max))
}

pub fn lowest(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, |w| w.iter().copied().fold(f64::NAN, f64::min))
}
