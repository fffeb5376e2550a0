//! Strategy contract: the method set a strategy must define and the shape
//! each method's output must have.

use std::collections::BTreeMap;

use crate::domain::script_ast::{Program, StrategyDecl};
use crate::domain::value::Value;

/// Name of the base a strategy extends to opt into the contract.
pub const CONTRACT_BASE: &str = "Strategy";

pub const DEFINE_VARIABLES: &str = "define_variables";
pub const ENTRY_LONG: &str = "entry_long";
pub const ENTRY_SHORT: &str = "entry_short";
pub const RISK_MODEL: &str = "risk_model";
pub const EXIT: &str = "exit";
pub const EXIT_LONG_SIGNAL: &str = "exit_long_signal";
pub const EXIT_SHORT_SIGNAL: &str = "exit_short_signal";
pub const POSITION_SIZE: &str = "position_size";

pub const REQUIRED_METHODS: [&str; 5] =
    [DEFINE_VARIABLES, ENTRY_LONG, ENTRY_SHORT, RISK_MODEL, EXIT];
pub const OPTIONAL_METHODS: [&str; 3] = [EXIT_LONG_SIGNAL, EXIT_SHORT_SIGNAL, POSITION_SIZE];

/// A method whose output does not have the shape the engine needs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{method}: {reason}")]
pub struct ContractViolation {
    pub method: String,
    pub reason: String,
}

impl ContractViolation {
    pub fn new(method: &str, reason: impl Into<String>) -> Self {
        ContractViolation {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructureError {
    #[error("expected exactly one strategy extending Strategy, found {0}")]
    BaseCount(usize),

    #[error("strategy '{strategy}' is missing required methods: {}", .missing.join(", "))]
    MissingMethods {
        strategy: String,
        missing: Vec<String>,
    },
}

fn extends_contract(decl: &StrategyDecl) -> bool {
    match decl.base.as_deref() {
        Some([base]) => base == CONTRACT_BASE,
        Some([ns, base]) => ns == "strategy" && base == CONTRACT_BASE,
        _ => false,
    }
}

/// The single declared strategy extending the contract base, with every
/// required method present.
pub fn contract_strategy(program: &Program) -> Result<&StrategyDecl, StructureError> {
    let candidates: Vec<&StrategyDecl> = program
        .strategies
        .iter()
        .filter(|d| extends_contract(d))
        .collect();
    let decl = match candidates.as_slice() {
        [decl] => *decl,
        other => return Err(StructureError::BaseCount(other.len())),
    };

    let missing: Vec<String> = REQUIRED_METHODS
        .iter()
        .filter(|m| decl.method(m).is_none())
        .map(|m| m.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(StructureError::MissingMethods {
            strategy: decl.name.clone(),
            missing,
        });
    }
    tracing::debug!(
        strategy = %decl.name,
        base = decl.base_name().as_deref().unwrap_or(CONTRACT_BASE),
        "contract strategy found"
    );
    for method in &decl.methods {
        let name = method.name.as_str();
        if !REQUIRED_METHODS.contains(&name) && !OPTIONAL_METHODS.contains(&name) {
            tracing::debug!(method = name, strategy = %decl.name, "method is never called");
        }
    }
    Ok(decl)
}

/// `define_variables` output: a map of numeric series of length `n`.
pub fn variables(value: Value, n: usize) -> Result<BTreeMap<String, Value>, ContractViolation> {
    let map = match value {
        Value::Map(map) => map,
        other => {
            return Err(ContractViolation::new(
                DEFINE_VARIABLES,
                format!("expected a map of series, found {}", other.type_name()),
            ));
        }
    };
    map.into_iter()
        .map(|(name, v)| -> Result<(String, Value), ContractViolation> {
            let series = v.into_num_series(n).map_err(|e| {
                ContractViolation::new(DEFINE_VARIABLES, format!("variable '{}': {}", name, e))
            })?;
            Ok((name, Value::NumSeries(series)))
        })
        .collect()
}

/// Signal methods: a boolean series of length `n`.
pub fn signal(method: &str, value: Value, n: usize) -> Result<Vec<bool>, ContractViolation> {
    value
        .into_bool_series(n)
        .map_err(|e| ContractViolation::new(method, e.to_string()))
}

/// `risk_model` output: `{sl, tp}`, each a numeric series of length `n`.
pub fn risk(value: Value, n: usize) -> Result<(Vec<f64>, Vec<f64>), ContractViolation> {
    let mut map = match value {
        Value::Map(map) => map,
        other => {
            return Err(ContractViolation::new(
                RISK_MODEL,
                format!("expected a map with sl and tp, found {}", other.type_name()),
            ));
        }
    };
    let mut take = |key: &str| -> Result<Vec<f64>, ContractViolation> {
        let v = map
            .remove(key)
            .ok_or_else(|| ContractViolation::new(RISK_MODEL, format!("missing key '{}'", key)))?;
        v.into_num_series(n)
            .map_err(|e| ContractViolation::new(RISK_MODEL, format!("{}: {}", key, e)))
    };
    let sl = take("sl")?;
    let tp = take("tp")?;
    if let Some(extra) = map.keys().next() {
        return Err(ContractViolation::new(
            RISK_MODEL,
            format!("unexpected key '{}'", extra),
        ));
    }
    Ok((sl, tp))
}

/// `position_size` output: a numeric series of length `n`.
pub fn size(value: Value, n: usize) -> Result<Vec<f64>, ContractViolation> {
    value
        .into_num_series(n)
        .map_err(|e| ContractViolation::new(POSITION_SIZE, e.to_string()))
}

/// `exit` hook output: a single boolean.
pub fn exit_flag(value: Value) -> Result<bool, ContractViolation> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(ContractViolation::new(
            EXIT,
            format!("expected a bool, found {}", other.type_name()),
        )),
    }
}
