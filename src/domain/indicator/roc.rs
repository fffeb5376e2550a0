//! Rate of Change.
//!
//! ROC(n)[i] = ((P[i] - P[i-n]) / P[i-n]) * 100
//! If P[i-n] == 0: ROC = 0. Warmup: first n values are `NaN`.

pub fn roc(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    for i in period..values.len() {
        let prev = values[i - period];
        out[i] = if prev == 0.0 {
            0.0
        } else {
            ((values[i] - prev) / prev) * 100.0
        };
    }
    out
}
