//! Vectorized execution backend and shared engine configuration.
//!
//! Every signal is precomputed before the loop starts; the loop itself only
//! walks the arrays. Per bar, in order:
//!
//! 1. While in a position: update excursions, then stop, then target, then
//!    the exit signal (fills at `close`). At most one exit per bar.
//! 2. If flat at the start of the bar (or re-entry is enabled and the bar
//!    just closed a trade): long entry, else short entry, at `close`.

use crate::domain::bars::BarSeries;
use crate::domain::error::StratlabError;
use crate::domain::position::{Direction, ExitReason, OpenPosition, Trade};

/// Progress is reported every this many bars and once at the end.
pub const PROGRESS_STRIDE: usize = 1_000;

pub type ProgressFn<'a> = &'a mut dyn FnMut(usize, usize);

/// Commission charged on each side of a trade:
/// `fixed + notional * percent / 100 + size * per_unit`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CommissionModel {
    pub fixed: f64,
    pub percent: f64,
    pub per_unit: f64,
}

impl CommissionModel {
    pub fn charge(&self, price: f64, size: f64) -> f64 {
        let notional = (price * size).abs();
        self.fixed + notional * self.percent / 100.0 + size.abs() * self.per_unit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EngineConfig {
    pub commission: CommissionModel,
    pub allow_same_bar_reentry: bool,
    pub close_at_end: bool,
}

/// Precomputed per-bar strategy output, aligned 1:1 with the bars.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSet {
    pub entry_long: Vec<bool>,
    pub entry_short: Vec<bool>,
    pub exit_long: Vec<bool>,
    pub exit_short: Vec<bool>,
    pub stop_loss: Vec<f64>,
    pub take_profit: Vec<f64>,
    pub size: Vec<f64>,
}

impl SignalSet {
    /// No entries, no exits, no stops, unit size.
    pub fn flat(n: usize) -> Self {
        SignalSet {
            entry_long: vec![false; n],
            entry_short: vec![false; n],
            exit_long: vec![false; n],
            exit_short: vec![false; n],
            stop_loss: vec![f64::NAN; n],
            take_profit: vec![f64::NAN; n],
            size: vec![1.0; n],
        }
    }

    pub fn check_len(&self, n: usize) -> Result<(), StratlabError> {
        let lengths = [
            ("entry_long", self.entry_long.len()),
            ("entry_short", self.entry_short.len()),
            ("exit_long", self.exit_long.len()),
            ("exit_short", self.exit_short.len()),
            ("stop_loss", self.stop_loss.len()),
            ("take_profit", self.take_profit.len()),
            ("size", self.size.len()),
        ];
        match lengths.iter().find(|(_, len)| *len != n) {
            Some((name, len)) => Err(StratlabError::InvalidBars {
                reason: format!("signal '{}' has {} values for {} bars", name, len, n),
            }),
            None => Ok(()),
        }
    }

    /// Open a position at bar `i` if an entry fires and the fill is valid.
    /// Long wins when both entry flags are set.
    pub(crate) fn try_enter(&self, i: usize, bars: &BarSeries) -> Option<OpenPosition> {
        let direction = if self.entry_long[i] {
            Direction::Long
        } else if self.entry_short[i] {
            Direction::Short
        } else {
            return None;
        };
        let size = self.size[i];
        if !bars.close[i].is_finite() || !size.is_finite() || size <= 0.0 {
            return None;
        }
        Some(OpenPosition::open(
            direction,
            i,
            bars,
            self.stop_loss[i],
            self.take_profit[i],
            size,
        ))
    }
}

/// Report progress every `PROGRESS_STRIDE` bars and on the final bar.
pub(crate) fn report_progress(progress: &mut Option<ProgressFn<'_>>, done: usize, total: usize) {
    if let Some(callback) = progress {
        if done % PROGRESS_STRIDE == 0 || done == total {
            callback(done, total);
        }
    }
}

/// Close whatever is still open after the last bar, at the last finite close.
pub(crate) fn close_remaining(
    position: Option<OpenPosition>,
    bars: &BarSeries,
    config: &EngineConfig,
) -> Option<Trade> {
    let position = position.filter(|_| config.close_at_end)?;
    let exit_index = (position.entry_index..bars.len())
        .rev()
        .find(|&i| bars.close[i].is_finite())?;
    Some(position.close(
        exit_index,
        bars.timestamp[exit_index],
        bars.close[exit_index],
        ExitReason::EndOfData,
        &config.commission,
    ))
}

/// Run the state machine over precomputed signals.
pub fn run_vectorized(
    bars: &BarSeries,
    signals: &SignalSet,
    config: &EngineConfig,
    mut progress: Option<ProgressFn<'_>>,
) -> Result<Vec<Trade>, StratlabError> {
    let n = bars.len();
    signals.check_len(n)?;

    let mut trades = Vec::new();
    let mut position: Option<OpenPosition> = None;

    for i in 0..n {
        let flat_at_start = position.is_none();

        if let Some(mut pos) = position.take() {
            pos.track_excursion(bars.high[i], bars.low[i]);
            let signal_exit = match pos.direction {
                Direction::Long => signals.exit_long[i],
                Direction::Short => signals.exit_short[i],
            };
            let exit = pos.check_stops(bars.high[i], bars.low[i]).or_else(|| {
                (signal_exit && bars.close[i].is_finite())
                    .then_some((bars.close[i], ExitReason::Signal))
            });
            match exit {
                Some((price, reason)) => {
                    trades.push(pos.close(i, bars.timestamp[i], price, reason, &config.commission))
                }
                None => position = Some(pos),
            }
        }

        if position.is_none() && (flat_at_start || config.allow_same_bar_reentry) {
            position = signals.try_enter(i, bars);
        }

        report_progress(&mut progress, i + 1, n);
    }

    trades.extend(close_remaining(position, bars, config));
    Ok(trades)
}
