//! Runtime values produced by the strategy evaluator.

use crate::domain::error::EvalError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(f64),
    Bool(bool),
    NumSeries(Vec<f64>),
    BoolSeries(Vec<bool>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Num(_) => "number",
            Value::Bool(_) => "bool",
            Value::NumSeries(_) => "number series",
            Value::BoolSeries(_) => "bool series",
            Value::Map(_) => "map",
        }
    }

    pub fn series_len(&self) -> Option<usize> {
        match self {
            Value::NumSeries(v) => Some(v.len()),
            Value::BoolSeries(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Numeric series of length `n`; numeric scalars are broadcast.
    pub fn into_num_series(self, n: usize) -> Result<Vec<f64>, EvalError> {
        match self {
            Value::Num(v) => Ok(vec![v; n]),
            Value::NumSeries(v) if v.len() == n => Ok(v),
            Value::NumSeries(v) => Err(EvalError::LengthMismatch {
                left: v.len(),
                right: n,
            }),
            other => Err(EvalError::Type(format!(
                "expected number series, found {}",
                other.type_name()
            ))),
        }
    }

    /// Boolean series of length `n`; boolean scalars are broadcast.
    pub fn into_bool_series(self, n: usize) -> Result<Vec<bool>, EvalError> {
        match self {
            Value::Bool(b) => Ok(vec![b; n]),
            Value::BoolSeries(v) if v.len() == n => Ok(v),
            Value::BoolSeries(v) => Err(EvalError::LengthMismatch {
                left: v.len(),
                right: n,
            }),
            other => Err(EvalError::Type(format!(
                "expected bool series, found {}",
                other.type_name()
            ))),
        }
    }

    /// Shift a series `periods` bars into the future so index `i` holds the
    /// value from `i - periods`. Leading slots are `NaN` / `false`; scalars
    /// are unchanged.
    pub fn lagged(self, periods: usize) -> Result<Value, EvalError> {
        match self {
            Value::NumSeries(v) => Ok(Value::NumSeries(shift(&v, periods, f64::NAN))),
            Value::BoolSeries(v) => Ok(Value::BoolSeries(shift(&v, periods, false))),
            Value::Map(_) => Err(EvalError::Type("cannot lag a map".into())),
            scalar => Ok(scalar),
        }
    }

    /// Value at bar `index` for a series; scalars are returned unchanged.
    pub fn at(&self, index: usize) -> Option<Value> {
        match self {
            Value::NumSeries(v) => v.get(index).map(|x| Value::Num(*x)),
            Value::BoolSeries(v) => v.get(index).map(|b| Value::Bool(*b)),
            Value::Map(_) => None,
            scalar => Some(scalar.clone()),
        }
    }

    /// Value `periods` bars before `index`, with the same fill rules as
    /// [`Value::lagged`].
    pub fn at_lag(&self, index: usize, periods: usize) -> Option<Value> {
        match (self, index.checked_sub(periods)) {
            (Value::NumSeries(_), None) => Some(Value::Num(f64::NAN)),
            (Value::BoolSeries(_), None) => Some(Value::Bool(false)),
            (Value::Map(_), _) => None,
            (_, Some(i)) => self.at(i),
            (scalar, None) => Some(scalar.clone()),
        }
    }
}

fn shift<T: Copy>(values: &[T], periods: usize, fill: T) -> Vec<T> {
    let n = values.len();
    let mut out = vec![fill; n];
    if periods < n {
        out[periods..].copy_from_slice(&values[..n - periods]);
    }
    out
}
