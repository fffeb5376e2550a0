//! Technical indicator kernels exposed to strategies through the `ta`
//! namespace.
//!
//! Every kernel takes plain `f64` slices and returns a series of the same
//! length. Warm-up positions are `NaN`, which the strategy evaluator treats
//! as "no value" (comparisons against `NaN` are false).

pub mod atr;
pub mod ema;
pub mod extrema;
pub mod obv;
pub mod roc;
pub mod rsi;
pub mod sma;
pub mod stddev;
pub mod wma;

pub use atr::atr;
pub use ema::ema;
pub use extrema::{highest, lowest};
pub use obv::obv;
pub use roc::roc;
pub use rsi::rsi;
pub use sma::sma;
pub use stddev::stddev;
pub use wma::wma;

/// Apply `f` to every full window of `period` values ending at each index;
/// indices before the first full window are `NaN`.
pub(crate) fn rolling<F>(values: &[f64], period: usize, f: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 {
        return out;
    }
    for i in (period - 1)..values.len() {
        out[i] = f(&values[i + 1 - period..=i]);
    }
    out
}
