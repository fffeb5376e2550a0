//! Backtest pipeline: compile a strategy, precompute its signals, run one of
//! the execution backends and score the ledger.
//!
//! Nothing in here returns `Err` or panics on strategy failure; every outcome
//! is a [`RunResult`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::domain::bars::BarSeries;
use crate::domain::execution::{EngineConfig, ProgressFn, run_vectorized};
use crate::domain::metrics::Metrics;
use crate::domain::position::Trade;
use crate::domain::sandbox;
use crate::domain::script_ast::Program;
use crate::domain::sequential::{HookFailure, run_sequential};
use crate::domain::strategy::CompiledStrategy;

/// Absolute tolerance on per-trade pnl when comparing backends.
pub const PARITY_PNL_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Vectorized,
    Sequential,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vectorized" => Ok(Backend::Vectorized),
            "sequential" | "reference" => Ok(Backend::Sequential),
            other => Err(format!(
                "unknown backend '{}', expected vectorized or sequential",
                other
            )),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Vectorized => f.write_str("vectorized"),
            Backend::Sequential => f.write_str("sequential"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub risk_free_rate: f64,
    pub engine: EngineConfig,
    pub backend: Backend,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 100_000.0,
            risk_free_rate: 0.0,
            engine: EngineConfig::default(),
            backend: Backend::Vectorized,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub strategy: Option<String>,
    pub backend: Backend,
    pub parameters: BTreeMap<String, f64>,
    pub metrics: Metrics,
    pub trades: Vec<Trade>,
    pub hook_failures: Vec<HookFailure>,
    pub error: Option<String>,
}

impl RunResult {
    fn failed(
        error: String,
        strategy: Option<String>,
        parameters: BTreeMap<String, f64>,
        config: &BacktestConfig,
    ) -> Self {
        tracing::warn!(error = %error, "backtest failed");
        RunResult {
            status: RunStatus::Failed,
            strategy,
            backend: config.backend,
            parameters,
            metrics: Metrics::empty(config.initial_capital),
            trades: Vec::new(),
            hook_failures: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

pub fn run_backtest(
    program: &Program,
    params: &BTreeMap<String, f64>,
    bars: &BarSeries,
    config: &BacktestConfig,
) -> RunResult {
    run_backtest_with_progress(program, params, bars, config, None)
}

/// As [`run_backtest`], reporting `(bars_done, bars_total)` while the engine
/// loop runs.
pub fn run_backtest_with_progress(
    program: &Program,
    params: &BTreeMap<String, f64>,
    bars: &BarSeries,
    config: &BacktestConfig,
    progress: Option<ProgressFn<'_>>,
) -> RunResult {
    let compiled = match CompiledStrategy::compile(program) {
        Ok(c) => c,
        Err(e) => return RunResult::failed(e.to_string(), None, params.clone(), config),
    };
    let name = Some(compiled.name().to_string());
    let strategy = match compiled.with_params(params) {
        Ok(s) => s,
        Err(e) => return RunResult::failed(e.to_string(), name, params.clone(), config),
    };
    let parameters = strategy.parameters().clone();

    tracing::info!(
        strategy = strategy.name(),
        backend = %config.backend,
        bars = bars.len(),
        "starting backtest"
    );

    let pre = match strategy.precompute(bars) {
        Ok(p) => p,
        Err(e) => return RunResult::failed(e.to_string(), name, parameters, config),
    };
    tracing::debug!(variables = pre.variables.len(), "signals precomputed");

    let outcome = match config.backend {
        Backend::Vectorized => run_vectorized(bars, &pre.signals, &config.engine, progress)
            .map(|trades| (trades, Vec::new())),
        Backend::Sequential => {
            let mut hook = strategy.exit_hook(bars, &pre.variables);
            run_sequential(bars, &pre.signals, &mut hook, &config.engine, progress)
                .map(|o| (o.trades, o.hook_failures))
        }
    };
    let (trades, hook_failures) = match outcome {
        Ok(v) => v,
        Err(e) => return RunResult::failed(e.to_string(), name, parameters, config),
    };

    let metrics = Metrics::compute(&trades, config.initial_capital, config.risk_free_rate);
    tracing::info!(
        trades = trades.len(),
        hook_failures = hook_failures.len(),
        net_profit = metrics.net_profit,
        "backtest complete"
    );

    RunResult {
        status: RunStatus::Success,
        strategy: name,
        backend: config.backend,
        parameters,
        metrics,
        trades,
        hook_failures,
        error: None,
    }
}

/// Validate the source first; a rejected verdict becomes a failed run.
pub fn run_source(
    source: &str,
    params: &BTreeMap<String, f64>,
    bars: &BarSeries,
    config: &BacktestConfig,
) -> RunResult {
    match sandbox::admit(source) {
        Ok(program) => run_backtest(&program, params, bars, config),
        Err(verdict) => RunResult::failed(
            format!("{}: {}", verdict.kind, verdict.message),
            None,
            params.clone(),
            config,
        ),
    }
}

/// Both backends on the same inputs, and where their ledgers disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParityReport {
    pub vectorized: RunResult,
    pub sequential: RunResult,
    pub mismatches: Vec<String>,
}

impl ParityReport {
    pub fn is_match(&self) -> bool {
        self.mismatches.is_empty()
    }
}

pub fn check_parity(
    program: &Program,
    params: &BTreeMap<String, f64>,
    bars: &BarSeries,
    config: &BacktestConfig,
) -> ParityReport {
    let run = |backend| {
        let config = BacktestConfig {
            backend,
            ..config.clone()
        };
        run_backtest(program, params, bars, &config)
    };
    let vectorized = run(Backend::Vectorized);
    let sequential = run(Backend::Sequential);
    let mismatches = compare_ledgers(&vectorized.trades, &sequential.trades);
    ParityReport {
        vectorized,
        sequential,
        mismatches,
    }
}

/// Differences between two ledgers: times, prices and direction must be
/// identical, pnl within [`PARITY_PNL_TOLERANCE`].
pub fn compare_ledgers(a: &[Trade], b: &[Trade]) -> Vec<String> {
    let mut mismatches = Vec::new();
    if a.len() != b.len() {
        mismatches.push(format!("trade count {} vs {}", a.len(), b.len()));
    }
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        if x.entry_time != y.entry_time || x.exit_time != y.exit_time {
            mismatches.push(format!(
                "trade {}: times ({}, {}) vs ({}, {})",
                i, x.entry_time, x.exit_time, y.entry_time, y.exit_time
            ));
        }
        if x.entry_price != y.entry_price || x.exit_price != y.exit_price {
            mismatches.push(format!(
                "trade {}: prices ({}, {}) vs ({}, {})",
                i, x.entry_price, x.exit_price, y.entry_price, y.exit_price
            ));
        }
        if x.direction != y.direction {
            mismatches.push(format!("trade {}: direction differs", i));
        }
        if (x.pnl - y.pnl).abs() > PARITY_PNL_TOLERANCE {
            mismatches.push(format!("trade {}: pnl {} vs {}", i, x.pnl, y.pnl));
        }
    }
    mismatches
}
