//! Data access port trait.

use crate::domain::bars::BarSeries;
use crate::domain::error::StratlabError;

pub trait DataPort {
    /// Load the full bar series for `symbol`, sorted by time.
    fn fetch_bars(&self, symbol: &str) -> Result<BarSeries, StratlabError>;
}
