//! Parameter sweep over a grid of strategy parameters.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::domain::backtest::{BacktestConfig, RunResult, run_backtest};
use crate::domain::bars::BarSeries;
use crate::domain::script_ast::Program;

pub type ParamGrid = BTreeMap<String, Vec<f64>>;

/// Expand a grid into every combination, last key varying fastest.
/// An empty grid yields one empty set; a key with no values yields none.
pub fn cartesian(grid: &ParamGrid) -> Vec<BTreeMap<String, f64>> {
    let mut sets = vec![BTreeMap::new()];
    for (name, values) in grid {
        sets = sets
            .into_iter()
            .flat_map(|set| {
                values.iter().map(move |v| {
                    let mut next = set.clone();
                    next.insert(name.clone(), *v);
                    next
                })
            })
            .collect();
    }
    sets
}

/// Run every grid point in parallel. `base` supplies overrides shared by all
/// runs; grid values win on conflict. Results come back in grid order.
pub fn run_sweep(
    program: &Program,
    base: &BTreeMap<String, f64>,
    grid: &ParamGrid,
    bars: &BarSeries,
    config: &BacktestConfig,
) -> Vec<RunResult> {
    let sets = cartesian(grid);
    tracing::info!(
        runs = sets.len(),
        threads = rayon::current_num_threads(),
        "starting sweep"
    );

    sets.into_par_iter()
        .map(|set| {
            let mut params = base.clone();
            params.extend(set);
            run_backtest(program, &params, bars, config)
        })
        .collect()
}
