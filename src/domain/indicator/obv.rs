//! OBV (On-Balance Volume).

/// OBV[0] = volume[0]
/// If close[i] > close[i-1]: OBV[i] = OBV[i-1] + volume[i]
/// If close[i] < close[i-1]: OBV[i] = OBV[i-1] - volume[i]
/// Otherwise OBV[i] = OBV[i-1]
///
/// No warmup period. `NaN` closes or volumes leave OBV unchanged.
pub fn obv(close: &[f64], volume: &[f64]) -> Vec<f64> {
    let n = close.len().min(volume.len());
    let mut out = Vec::with_capacity(n);
    let mut running = 0.0;

    for i in 0..n {
        let vol = if volume[i].is_nan() { 0.0 } else { volume[i] };
        if i == 0 {
            running = vol;
        } else if close[i] > close[i - 1] {
            running += vol;
        } else if close[i] < close[i - 1] {
            running -= vol;
        }
        out.push(running);
    }
    out
}
