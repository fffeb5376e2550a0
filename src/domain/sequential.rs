//! Reference (sequential) execution backend.
//!
//! Walks the bars one at a time and asks the strategy's per-bar exit hook
//! whether to leave an open position. Entries, stops and targets come from
//! the same precomputed `SignalSet` the vectorized backend uses; the
//! `exit_long`/`exit_short` arrays are ignored here.

use serde::{Deserialize, Serialize};

use crate::domain::bars::BarSeries;
use crate::domain::error::StratlabError;
use crate::domain::execution::{
    EngineConfig, ProgressFn, SignalSet, close_remaining, report_progress,
};
use crate::domain::position::{ExitReason, OpenPosition, Trade, TradeState};

/// Per-bar exit decision for an open position.
pub trait ExitHook {
    fn exit(&mut self, bar_index: usize, state: &TradeState) -> Result<bool, String>;
}

impl<F> ExitHook for F
where
    F: FnMut(usize, &TradeState) -> Result<bool, String>,
{
    fn exit(&mut self, bar_index: usize, state: &TradeState) -> Result<bool, String> {
        self(bar_index, state)
    }
}

/// A hook call that errored. The bar is treated as "no exit".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookFailure {
    pub bar_index: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SequentialOutcome {
    pub trades: Vec<Trade>,
    pub hook_failures: Vec<HookFailure>,
}

pub fn run_sequential(
    bars: &BarSeries,
    signals: &SignalSet,
    hook: &mut dyn ExitHook,
    config: &EngineConfig,
    mut progress: Option<ProgressFn<'_>>,
) -> Result<SequentialOutcome, StratlabError> {
    let n = bars.len();
    signals.check_len(n)?;

    let mut outcome = SequentialOutcome::default();
    let mut position: Option<OpenPosition> = None;

    for i in 0..n {
        let flat_at_start = position.is_none();

        if let Some(mut pos) = position.take() {
            pos.track_excursion(bars.high[i], bars.low[i]);

            let mut exit = pos.check_stops(bars.high[i], bars.low[i]);
            if exit.is_none() {
                let state = pos.trade_state(i, bars.close[i], outcome.trades.len());
                let wants_exit = match hook.exit(i, &state) {
                    Ok(flag) => flag,
                    Err(message) => {
                        tracing::warn!(bar_index = i, error = %message, "exit hook failed");
                        outcome.hook_failures.push(HookFailure {
                            bar_index: i,
                            message,
                        });
                        false
                    }
                };
                if wants_exit && bars.close[i].is_finite() {
                    exit = Some((bars.close[i], ExitReason::Signal));
                }
            }

            match exit {
                Some((price, reason)) => outcome.trades.push(pos.close(
                    i,
                    bars.timestamp[i],
                    price,
                    reason,
                    &config.commission,
                )),
                None => position = Some(pos),
            }
        }

        if position.is_none() && (flat_at_start || config.allow_same_bar_reentry) {
            position = signals.try_enter(i, bars);
        }

        report_progress(&mut progress, i + 1, n);
    }

    outcome.trades.extend(close_remaining(position, bars, config));
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::run_vectorized;
    use crate::domain::position::Direction;

    fn bars(close: Vec<f64>) -> BarSeries {
        let n = close.len();
        BarSeries::new(
            (0..n as i64).collect(),
            close.clone(),
            close.iter().map(|c| c + 1.0).collect(),
            close.iter().map(|c| c - 1.0).collect(),
            close,
            vec![1.0; n],
        )
        .unwrap()
    }

    #[test]
    fn hook_exit_fills_at_close() {
        let bars = bars(vec![100.0, 101.0, 105.0, 103.0]);
        let mut signals = SignalSet::flat(4);
        signals.entry_long[0] = true;
        let mut hook =
            |_: usize, state: &TradeState| -> Result<bool, String> { Ok(state.bars_held >= 2) };
        let outcome =
            run_sequential(&bars, &signals, &mut hook, &EngineConfig::default(), None).unwrap();
        assert_eq!(outcome.trades.len(), 1);
        let trade = &outcome.trades[0];
        assert_eq!(trade.exit_index, 2);
        assert_eq!(trade.exit_price, 105.0);
        assert_eq!(trade.exit_reason, ExitReason::Signal);
        assert!(outcome.hook_failures.is_empty());
    }

    #[test]
    fn hook_sees_trade_state() {
        let bars = bars(vec![100.0, 104.0, 90.0]);
        let mut signals = SignalSet::flat(3);
        signals.entry_short[0] = true;
        let mut seen = Vec::new();
        let mut hook = |i: usize, state: &TradeState| -> Result<bool, String> {
            seen.push((i, state.direction, state.unrealized_pnl, state.mae));
            Ok(false)
        };
        run_sequential(&bars, &signals, &mut hook, &EngineConfig::default(), None).unwrap();
        assert_eq!(
            seen,
            vec![
                (1, Direction::Short, -4.0, 5.0),
                (2, Direction::Short, 10.0, 5.0)
            ]
        );
    }

    #[test]
    fn hook_not_called_when_stop_fires() {
        let bars = bars(vec![100.0, 90.0]);
        let mut signals = SignalSet::flat(2);
        signals.entry_long[0] = true;
        signals.stop_loss[0] = 95.0;
        let mut calls = 0;
        let mut hook = |_: usize, _: &TradeState| -> Result<bool, String> {
            calls += 1;
            Ok(true)
        };
        let outcome =
            run_sequential(&bars, &signals, &mut hook, &EngineConfig::default(), None).unwrap();
        assert_eq!(calls, 0);
        assert_eq!(outcome.trades[0].exit_reason, ExitReason::StopLoss);
    }

    #[test]
    fn hook_errors_are_recorded_and_skipped() {
        let bars = bars(vec![100.0, 101.0, 102.0, 103.0]);
        let mut signals = SignalSet::flat(4);
        signals.entry_long[0] = true;
        let mut hook = |i: usize, _: &TradeState| -> Result<bool, String> {
            if i == 1 {
                Err("boom".to_string())
            } else {
                Ok(true)
            }
        };
        let outcome =
            run_sequential(&bars, &signals, &mut hook, &EngineConfig::default(), None).unwrap();
        assert_eq!(
            outcome.hook_failures,
            vec![HookFailure {
                bar_index: 1,
                message: "boom".into()
            }]
        );
        assert_eq!(outcome.trades.len(), 1);
        assert_eq!(outcome.trades[0].exit_index, 2);
    }

    #[test]
    fn matches_vectorized_for_equivalent_exit() {
        let closes = vec![100.0, 102.0, 99.0, 97.0, 103.0, 108.0, 101.0, 100.0];
        let bars = bars(closes.clone());
        let mut signals = SignalSet::flat(8);
        signals.entry_long = vec![true, false, false, false, true, false, false, false];
        signals.entry_short = vec![false, false, true, false, false, false, true, false];
        signals.exit_long = closes.iter().map(|c| *c < 100.0).collect();
        signals.exit_short = closes.iter().map(|c| *c > 102.0).collect();
        signals.stop_loss = closes.iter().map(|c| c * 0.97).collect();

        let config = EngineConfig {
            close_at_end: true,
            ..EngineConfig::default()
        };
        let expected = run_vectorized(&bars, &signals, &config, None).unwrap();

        let closes_for_hook = closes.clone();
        let mut hook = |i: usize, state: &TradeState| -> Result<bool, String> {
            let c = closes_for_hook[i];
            Ok(if state.direction == Direction::Long {
                c < 100.0
            } else {
                c > 102.0
            })
        };
        let outcome = run_sequential(&bars, &signals, &mut hook, &config, None).unwrap();
        assert_eq!(outcome.trades, expected);
    }
}
