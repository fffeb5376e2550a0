//! Strategy validator.
//!
//! Source text passes four gates in order, each one guarding the next:
//!
//! 1. **Parse**: the text must parse. Nothing is evaluated.
//! 2. **Static scan**: imports and calls checked against the allow- and
//!    deny-lists (see [`security`](crate::domain::security)).
//! 3. **Structure**: exactly one strategy extends `Strategy` and it defines
//!    every required method.
//! 4. **Scenario check**: a throwaway instance with default parameters runs
//!    against two synthetic fixtures and every method's output is shape
//!    checked, including the exit hook on every bar for a long and a short
//!    trade.
//!
//! Rejection is reported as a [`Verdict`] value, never as an error.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::bars::{BarSeries, NANOS_PER_DAY};
use crate::domain::contract::ContractViolation;
use crate::domain::position::{Direction, TradeState};
use crate::domain::script_ast::Program;
use crate::domain::script_parser;
use crate::domain::security;
use crate::domain::strategy::CompiledStrategy;

/// Bars in each scenario fixture.
pub const FIXTURE_BARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictKind {
    SyntaxError,
    SecurityViolation,
    MissingMethod,
    ContractViolation,
    None,
}

impl fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VerdictKind::SyntaxError => "SyntaxError",
            VerdictKind::SecurityViolation => "SecurityViolation",
            VerdictKind::MissingMethod => "MissingMethod",
            VerdictKind::ContractViolation => "ContractViolation",
            VerdictKind::None => "None",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub accepted: bool,
    pub kind: VerdictKind,
    pub message: String,
}

impl Verdict {
    pub fn accepted() -> Self {
        Verdict {
            accepted: true,
            kind: VerdictKind::None,
            message: "ok".into(),
        }
    }

    pub fn rejected(kind: VerdictKind, message: impl Into<String>) -> Self {
        Verdict {
            accepted: false,
            kind,
            message: message.into(),
        }
    }
}

/// Run every gate and return the parsed program if all of them pass.
pub fn admit(source: &str) -> Result<Program, Verdict> {
    let program = script_parser::parse(source).map_err(|e| {
        Verdict::rejected(VerdictKind::SyntaxError, e.display_with_context(source))
    })?;

    security::scan(&program).map_err(|v| {
        tracing::warn!(symbol = %v.symbol, position = v.position, "security violation");
        Verdict::rejected(VerdictKind::SecurityViolation, v.to_string())
    })?;

    let strategy = CompiledStrategy::compile(&program)
        .map_err(|e| Verdict::rejected(VerdictKind::MissingMethod, e.to_string()))?;

    scenario_check(&strategy)
        .map_err(|e| Verdict::rejected(VerdictKind::ContractViolation, e.to_string()))?;

    tracing::debug!(strategy = strategy.name(), "strategy accepted");
    Ok(program)
}

pub fn validate(source: &str) -> Verdict {
    match admit(source) {
        Ok(_) => Verdict::accepted(),
        Err(verdict) => verdict,
    }
}

/// Exercise a throwaway copy of the strategy against both fixtures.
fn scenario_check(strategy: &CompiledStrategy) -> Result<(), ContractViolation> {
    let instance = strategy.clone();
    for bars in [clean_fixture(), gapped_fixture()] {
        let pre = instance.precompute(&bars)?;
        for direction in [Direction::Long, Direction::Short] {
            for i in 0..bars.len() {
                let state = synthetic_trade(direction, i, &bars);
                instance.evaluate_exit(&bars, &pre.variables, i, &state)?;
            }
        }
    }
    Ok(())
}

fn synthetic_trade(direction: Direction, bar_index: usize, bars: &BarSeries) -> TradeState {
    let entry_price = bars.close[0];
    let price = bars.close[bar_index];
    TradeState {
        bar_index,
        bars_held: bar_index,
        direction,
        entry_index: 0,
        entry_price,
        stop_loss: entry_price * (1.0 - 0.05 * direction.sign()),
        take_profit: entry_price * (1.0 + 0.10 * direction.sign()),
        size: 1.0,
        unrealized_pnl: direction.sign() * (price - entry_price),
        mae: 0.0,
        mfe: 0.0,
        trade_count: 0,
    }
}

/// Deterministic oscillating walk with a slow drift.
pub fn clean_fixture() -> BarSeries {
    let n = FIXTURE_BARS;
    let close: Vec<f64> = (0..n)
        .map(|i| {
            let t = i as f64;
            100.0 + 10.0 * (t / 8.0).sin() + 0.05 * t
        })
        .collect();
    let open: Vec<f64> = (0..n)
        .map(|i| if i == 0 { close[0] } else { close[i - 1] })
        .collect();
    let high = open.iter().zip(&close).map(|(o, c)| o.max(*c) + 1.0).collect();
    let low = open.iter().zip(&close).map(|(o, c)| o.min(*c) - 1.0).collect();
    let volume = (0..n).map(|i| 1_000.0 + (i % 7) as f64 * 100.0).collect();
    let timestamp = (0..n as i64).map(|i| i * NANOS_PER_DAY).collect();

    BarSeries {
        timestamp,
        open,
        high,
        low,
        close,
        volume,
    }
}

/// Clean fixture with NaN prices over bars 40..50 and no volume over
/// 70..80.
pub fn gapped_fixture() -> BarSeries {
    let mut bars = clean_fixture();
    for i in 40..50 {
        bars.open[i] = f64::NAN;
        bars.high[i] = f64::NAN;
        bars.low[i] = f64::NAN;
        bars.close[i] = f64::NAN;
    }
    for v in &mut bars.volume[70..80] {
        *v = 0.0;
    }
    bars
}
