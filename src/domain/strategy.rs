//! Compiled strategy: the contract strategy of a parsed program, bound to a
//! parameter set and ready to run against bars.

use std::collections::BTreeMap;

use crate::domain::bars::BarSeries;
use crate::domain::contract::{self, ContractViolation, StructureError};
use crate::domain::error::StratlabError;
use crate::domain::execution::SignalSet;
use crate::domain::position::TradeState;
use crate::domain::script_ast::{Program, StrategyDecl};
use crate::domain::script_eval::{Frame, Scope};
use crate::domain::sequential::ExitHook;
use crate::domain::value::Value;

#[derive(Debug, Clone)]
pub struct CompiledStrategy {
    decl: StrategyDecl,
    /// Import binding -> namespace root.
    namespaces: BTreeMap<String, String>,
    params: BTreeMap<String, f64>,
}

/// Everything computed up front for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Precomputed {
    pub variables: BTreeMap<String, Value>,
    pub signals: SignalSet,
}

impl CompiledStrategy {
    /// Bind the program's contract strategy with its declared defaults.
    pub fn compile(program: &Program) -> Result<Self, StructureError> {
        let decl = contract::contract_strategy(program)?.clone();
        let namespaces = program
            .imports
            .iter()
            .map(|i| (i.binding().to_string(), i.root().to_string()))
            .collect();
        let params = decl
            .params
            .iter()
            .map(|p| (p.name.clone(), p.default))
            .collect();
        Ok(CompiledStrategy {
            decl,
            namespaces,
            params,
        })
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn parameters(&self) -> &BTreeMap<String, f64> {
        &self.params
    }

    /// Copy with some parameters overridden. Only declared parameters may be
    /// set.
    pub fn with_params(&self, overrides: &BTreeMap<String, f64>) -> Result<Self, StratlabError> {
        let mut compiled = self.clone();
        for (name, value) in overrides {
            match compiled.params.get_mut(name) {
                Some(slot) => *slot = *value,
                None => return Err(StratlabError::UnknownParameter { name: name.clone() }),
            }
        }
        Ok(compiled)
    }

    fn scope<'a>(
        &'a self,
        bars: &'a BarSeries,
        variables: &'a BTreeMap<String, Value>,
        frame: Frame<'a>,
    ) -> Scope<'a> {
        Scope {
            bars,
            params: &self.params,
            variables,
            namespaces: &self.namespaces,
            frame,
        }
    }

    fn eval_series(
        &self,
        method: &str,
        bars: &BarSeries,
        variables: &BTreeMap<String, Value>,
    ) -> Result<Option<Value>, ContractViolation> {
        let Some(body) = self.decl.method(method) else {
            return Ok(None);
        };
        self.scope(bars, variables, Frame::Series)
            .eval_method(body)
            .map(Some)
            .map_err(|e| ContractViolation::new(method, e.to_string()))
    }

    /// Evaluate every series method and shape the results for the engine.
    pub fn precompute(&self, bars: &BarSeries) -> Result<Precomputed, ContractViolation> {
        let n = bars.len();
        let empty = BTreeMap::new();
        let required = |method: &str, value: Option<Value>| {
            value.ok_or_else(|| ContractViolation::new(method, "method is not defined"))
        };

        let raw = self.eval_series(contract::DEFINE_VARIABLES, bars, &empty)?;
        let variables = contract::variables(required(contract::DEFINE_VARIABLES, raw)?, n)?;

        let signal = |method: &str, default: bool| -> Result<Vec<bool>, ContractViolation> {
            match self.eval_series(method, bars, &variables)? {
                Some(value) => contract::signal(method, value, n),
                None => Ok(vec![default; n]),
            }
        };
        let entry_long = signal(contract::ENTRY_LONG, false)?;
        let entry_short = signal(contract::ENTRY_SHORT, false)?;
        let exit_long = signal(contract::EXIT_LONG_SIGNAL, false)?;
        let exit_short = signal(contract::EXIT_SHORT_SIGNAL, false)?;

        let raw = self.eval_series(contract::RISK_MODEL, bars, &variables)?;
        let (stop_loss, take_profit) = contract::risk(required(contract::RISK_MODEL, raw)?, n)?;

        let size = match self.eval_series(contract::POSITION_SIZE, bars, &variables)? {
            Some(value) => contract::size(value, n)?,
            None => vec![1.0; n],
        };

        Ok(Precomputed {
            signals: SignalSet {
                entry_long,
                entry_short,
                exit_long,
                exit_short,
                stop_loss,
                take_profit,
                size,
            },
            variables,
        })
    }

    /// Evaluate the per-bar `exit` hook for one bar.
    pub fn evaluate_exit(
        &self,
        bars: &BarSeries,
        variables: &BTreeMap<String, Value>,
        bar_index: usize,
        state: &TradeState,
    ) -> Result<bool, ContractViolation> {
        let body = self
            .decl
            .method(contract::EXIT)
            .ok_or_else(|| ContractViolation::new(contract::EXIT, "method is not defined"))?;
        let frame = Frame::Bar {
            index: bar_index,
            trade: state,
        };
        let value = self
            .scope(bars, variables, frame)
            .eval_method(body)
            .map_err(|e| ContractViolation::new(contract::EXIT, e.to_string()))?;
        contract::exit_flag(value)
    }

    /// Per-bar hook for the sequential backend.
    pub fn exit_hook<'a>(
        &'a self,
        bars: &'a BarSeries,
        variables: &'a BTreeMap<String, Value>,
    ) -> StrategyExitHook<'a> {
        StrategyExitHook {
            strategy: self,
            bars,
            variables,
        }
    }
}

pub struct StrategyExitHook<'a> {
    strategy: &'a CompiledStrategy,
    bars: &'a BarSeries,
    variables: &'a BTreeMap<String, Value>,
}

impl ExitHook for StrategyExitHook<'_> {
    fn exit(&mut self, bar_index: usize, state: &TradeState) -> Result<bool, String> {
        self.strategy
            .evaluate_exit(self.bars, self.variables, bar_index, state)
            .map_err(|e| e.to_string())
    }
}
