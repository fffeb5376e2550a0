//! Aligned OHLCV bar series.

use crate::domain::error::StratlabError;

pub const NANOS_PER_DAY: i64 = 86_400_000_000_000;

/// Price columns a strategy can refer to by name.
pub const FIELD_NAMES: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// Column-oriented OHLCV series. Timestamps are nanoseconds since the Unix
/// epoch, strictly increasing. Columns all have the same length; outside the
/// crate a series can only be built through [`BarSeries::new`].
///
/// ```compile_fail
/// use stratlab::domain::bars::BarSeries;
/// let bars = BarSeries { timestamp: vec![0], ..BarSeries::default() };
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BarSeries {
    pub(crate) timestamp: Vec<i64>,
    pub(crate) open: Vec<f64>,
    pub(crate) high: Vec<f64>,
    pub(crate) low: Vec<f64>,
    pub(crate) close: Vec<f64>,
    pub(crate) volume: Vec<f64>,
}

impl BarSeries {
    pub fn new(
        timestamp: Vec<i64>,
        open: Vec<f64>,
        high: Vec<f64>,
        low: Vec<f64>,
        close: Vec<f64>,
        volume: Vec<f64>,
    ) -> Result<Self, StratlabError> {
        let n = timestamp.len();
        for (name, len) in [
            ("open", open.len()),
            ("high", high.len()),
            ("low", low.len()),
            ("close", close.len()),
            ("volume", volume.len()),
        ] {
            if len != n {
                return Err(StratlabError::InvalidBars {
                    reason: format!("{name} has {len} values, timestamp has {n}"),
                });
            }
        }
        if let Some(i) = timestamp.windows(2).position(|w| w[1] <= w[0]) {
            return Err(StratlabError::InvalidBars {
                reason: format!("timestamps not strictly increasing at index {}", i + 1),
            });
        }
        Ok(Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        })
    }

    pub fn timestamp(&self) -> &[i64] {
        &self.timestamp
    }

    pub fn open(&self) -> &[f64] {
        &self.open
    }

    pub fn high(&self) -> &[f64] {
        &self.high
    }

    pub fn low(&self) -> &[f64] {
        &self.low
    }

    pub fn close(&self) -> &[f64] {
        &self.close
    }

    pub fn volume(&self) -> &[f64] {
        &self.volume
    }

    pub fn len(&self) -> usize {
        self.timestamp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_empty()
    }

    /// Look up a price column by name.
    pub fn field(&self, name: &str) -> Option<&[f64]> {
        match name {
            "open" => Some(&self.open),
            "high" => Some(&self.high),
            "low" => Some(&self.low),
            "close" => Some(&self.close),
            "volume" => Some(&self.volume),
            _ => None,
        }
    }
}
