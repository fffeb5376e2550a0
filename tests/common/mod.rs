#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use stratlab::domain::backtest::{Backend, BacktestConfig};
use stratlab::domain::bars::{BarSeries, NANOS_PER_DAY};
use stratlab::domain::error::StratlabError;
use stratlab::domain::execution::{CommissionModel, EngineConfig};
use stratlab::ports::data_port::DataPort;

/// Moving-average crossover whose per-bar hook mirrors its exit signals, so
/// both backends see the same exits.
pub const SMA_CROSS: &str = r#"
import ta

strategy SmaCross extends Strategy {
    param fast = 3
    param slow = 8

    fn define_variables {
        let fast_ma = ta.sma(close, fast)
        let slow_ma = ta.sma(close, slow)
        return { fast_ma: fast_ma, slow_ma: slow_ma }
    }
    fn entry_long { return cross_above(fast_ma, slow_ma) }
    fn entry_short { return cross_below(fast_ma, slow_ma) }
    fn risk_model { return { sl: nan, tp: nan } }
    fn exit { return (is_long and fast_ma < slow_ma) or (is_short and fast_ma > slow_ma) }
    fn exit_long_signal { return fast_ma < slow_ma }
    fn exit_short_signal { return fast_ma > slow_ma }
}
"#;

/// Channel breakout with stops and targets from the entry bar.
pub const BREAKOUT: &str = r#"
import ta
import math as m

strategy Breakout extends Strategy {
    param lookback = 10
    param stop_pct = 0.03
    param target_pct = 0.06

    fn define_variables {
        return { upper: ta.highest(high, lookback), lower: ta.lowest(low, lookback) }
    }
    fn entry_long { return close > upper[1] }
    fn entry_short { return close < lower[1] }
    fn risk_model {
        let band = close * stop_pct
        return { sl: where(close > upper[1], close - band, close + band),
                 tp: where(close > upper[1], close * (1 + target_pct), close * (1 - target_pct)) }
    }
    fn exit { return (is_long and close < lower[1]) or (is_short and close > upper[1]) }
    fn exit_long_signal { return close < lower[1] }
    fn exit_short_signal { return close > upper[1] }
    fn position_size { return m.max(1, 2) }
}
"#;

pub struct MockDataPort {
    pub data: HashMap<String, BarSeries>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: BarSeries) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(&self, symbol: &str) -> Result<BarSeries, StratlabError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(StratlabError::Data {
                reason: reason.clone(),
            });
        }
        self.data
            .get(symbol)
            .cloned()
            .ok_or_else(|| StratlabError::Data {
                reason: format!("no data for {}", symbol),
            })
    }
}

/// Daily bars around the given closes: each bar opens at the previous close
/// and its range extends `spread` beyond the body.
pub fn bars_from_closes(closes: &[f64], spread: f64) -> BarSeries {
    let n = closes.len();
    let open: Vec<f64> = (0..n)
        .map(|i| if i == 0 { closes[0] } else { closes[i - 1] })
        .collect();
    let high = open
        .iter()
        .zip(closes)
        .map(|(o, c)| o.max(*c) + spread)
        .collect();
    let low = open
        .iter()
        .zip(closes)
        .map(|(o, c)| o.min(*c) - spread)
        .collect();
    BarSeries::new(
        (0..n as i64).map(|i| i * NANOS_PER_DAY).collect(),
        open,
        high,
        low,
        closes.to_vec(),
        vec![1_000.0; n],
    )
    .unwrap()
}

/// Price path from a start price and per-bar percentage moves.
pub fn random_walk(start: f64, moves: &[f64]) -> Vec<f64> {
    let mut price = start;
    moves
        .iter()
        .map(|m| {
            price *= 1.0 + m;
            price
        })
        .collect()
}

/// Oscillating path long enough to produce several crossovers.
pub fn wave_closes(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            100.0 + 8.0 * (t / 5.0).sin() + 3.0 * (t / 2.3).cos() + 0.02 * t
        })
        .collect()
}

pub fn sample_config() -> BacktestConfig {
    BacktestConfig {
        initial_capital: 10_000.0,
        risk_free_rate: 0.0,
        engine: EngineConfig {
            commission: CommissionModel {
                fixed: 1.0,
                percent: 0.05,
                per_unit: 0.0,
            },
            allow_same_bar_reentry: false,
            close_at_end: true,
        },
        backend: Backend::Vectorized,
    }
}

pub fn params(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect()
}

pub fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Copy of `bars` with every price on the flagged bars set to NaN.
pub fn with_gaps(bars: &BarSeries, gaps: &[bool]) -> BarSeries {
    let blank = |column: &[f64]| -> Vec<f64> {
        column
            .iter()
            .zip(gaps.iter().chain(std::iter::repeat(&false)))
            .map(|(v, gap)| if *gap { f64::NAN } else { *v })
            .collect()
    };
    BarSeries::new(
        bars.timestamp().to_vec(),
        blank(bars.open()),
        blank(bars.high()),
        blank(bars.low()),
        blank(bars.close()),
        bars.volume().to_vec(),
    )
    .unwrap()
}

/// CSV text in the layout the CSV adapter reads.
pub fn bars_to_csv(bars: &BarSeries) -> String {
    let mut out = String::from("timestamp,open,high,low,close,volume\n");
    for i in 0..bars.len() {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            bars.timestamp()[i],
            bars.open()[i],
            bars.high()[i],
            bars.low()[i],
            bars.close()[i],
            bars.volume()[i]
        ));
    }
    out
}
