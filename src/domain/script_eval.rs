//! Strategy expression evaluator.
//!
//! Evaluates method bodies against a bar series in one of two frames:
//!
//! - `Frame::Series`: every identifier is a whole series and operators work
//!   element-wise. Used for `define_variables`, signals, risk model and size.
//! - `Frame::Bar`: identifiers resolve to their value at one bar and the open
//!   trade's state is in scope. Used for the per-bar `exit` hook. Series
//!   functions (`ta.*`, `cross_*`) are rejected here.
//!
//! # Evaluation Semantics
//!
//! - Scalars broadcast against series
//! - Comparisons against `NaN` are false; `==`/`!=` use an epsilon
//! - `and`/`or` short-circuit when the left operand is a scalar
//! - `x[n]` is the value n bars back; `NaN`/`false` before the first bar
//! - `ta.*`/`math.*` require their namespace to be imported

use std::collections::{BTreeMap, HashMap};

use crate::domain::bars::BarSeries;
use crate::domain::error::EvalError;
use crate::domain::indicator;
use crate::domain::position::TradeState;
use crate::domain::script_ast::{BinaryOp, Expr, Method, UnaryOp};
use crate::domain::value::Value;

const EPSILON: f64 = 1e-9;

/// Namespaces that provide callable functions.
pub const FUNCTION_NAMESPACES: [&str; 2] = ["ta", "math"];

#[derive(Debug, Clone, Copy)]
pub enum Frame<'a> {
    Series,
    Bar {
        index: usize,
        trade: &'a TradeState,
    },
}

/// Everything an expression can see.
pub struct Scope<'a> {
    pub bars: &'a BarSeries,
    pub params: &'a BTreeMap<String, f64>,
    pub variables: &'a BTreeMap<String, Value>,
    /// Import binding (alias or root) -> namespace root.
    pub namespaces: &'a BTreeMap<String, String>,
    pub frame: Frame<'a>,
}

pub type Locals = HashMap<String, Value>;

impl Scope<'_> {
    /// Evaluate a method body: `let` bindings in order, then the result.
    pub fn eval_method(&self, method: &Method) -> Result<Value, EvalError> {
        let mut locals = Locals::new();
        for binding in &method.lets {
            let value = self.eval(&binding.value, &locals)?;
            locals.insert(binding.name.clone(), value);
        }
        self.eval(&method.result, &locals)
    }

    pub fn eval(&self, expr: &Expr, locals: &Locals) -> Result<Value, EvalError> {
        match expr {
            Expr::Number(v) => Ok(Value::Num(*v)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Ident(name) => self.resolve(name, locals),
            Expr::Call { callee, args, .. } => self.call(callee, args, locals),
            Expr::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval(value, locals)?);
                }
                Ok(Value::Map(map))
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, locals)?;
                unary(*op, value)
            }
            Expr::Binary { op, left, right } => {
                let lhs = self.eval(left, locals)?;
                match (op, &lhs) {
                    (BinaryOp::And, Value::Bool(false)) => return Ok(Value::Bool(false)),
                    (BinaryOp::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
                    _ => {}
                }
                let rhs = self.eval(right, locals)?;
                binary(*op, lhs, rhs)
            }
            Expr::Lag { target, periods } => match self.frame {
                Frame::Series => self.eval(target, locals)?.lagged(*periods),
                Frame::Bar { index, .. } => match target.as_ref() {
                    Expr::Ident(name) if !locals.contains_key(name) => {
                        self.series_at(name, index, *periods)
                    }
                    _ => Err(EvalError::UnavailableInHook(
                        "lag of anything but a named series".into(),
                    )),
                },
            },
        }
    }

    fn resolve(&self, name: &str, locals: &Locals) -> Result<Value, EvalError> {
        if let Some(value) = locals.get(name) {
            return Ok(value.clone());
        }
        match self.frame {
            Frame::Series => self.resolve_series(name),
            Frame::Bar { index, trade } => match self.series_at(name, index, 0) {
                Err(EvalError::UnknownIdentifier(_)) => trade
                    .field(name)
                    .ok_or_else(|| EvalError::UnknownIdentifier(name.to_string())),
                other => other,
            },
        }
    }

    /// One element of a named series, `periods` bars before `index`, without
    /// materializing the series.
    fn series_at(&self, name: &str, index: usize, periods: usize) -> Result<Value, EvalError> {
        if let Some(value) = self.variables.get(name) {
            return value
                .at_lag(index, periods)
                .ok_or_else(|| EvalError::Type(format!("'{}' has no value at bar {}", name, index)));
        }
        if let Some(value) = self.params.get(name) {
            return Ok(Value::Num(*value));
        }
        if let Some(field) = self.bars.field(name) {
            let value = index
                .checked_sub(periods)
                .and_then(|i| field.get(i).copied())
                .unwrap_or(f64::NAN);
            return Ok(Value::Num(value));
        }
        Err(EvalError::UnknownIdentifier(name.to_string()))
    }

    /// Variables, then parameters, then bar fields, as whole series.
    fn resolve_series(&self, name: &str) -> Result<Value, EvalError> {
        if let Some(value) = self.variables.get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.params.get(name) {
            return Ok(Value::Num(*value));
        }
        if let Some(field) = self.bars.field(name) {
            return Ok(Value::NumSeries(field.to_vec()));
        }
        Err(EvalError::UnknownIdentifier(name.to_string()))
    }

    fn call(&self, callee: &[String], args: &[Expr], locals: &Locals) -> Result<Value, EvalError> {
        let values = args
            .iter()
            .map(|a| self.eval(a, locals))
            .collect::<Result<Vec<_>, _>>()?;

        match callee {
            [function] => self.call_builtin(function, values),
            [binding, function] => {
                let namespace = match self.namespaces.get(binding) {
                    Some(root) => root.as_str(),
                    None if FUNCTION_NAMESPACES.contains(&binding.as_str()) => {
                        return Err(EvalError::NotImported {
                            namespace: binding.clone(),
                            function: function.clone(),
                        });
                    }
                    None => return Err(EvalError::UnknownFunction(callee.join("."))),
                };
                match namespace {
                    "ta" => self.call_ta(function, values),
                    "math" => call_math(function, values),
                    _ => Err(EvalError::UnknownFunction(format!("{}.{}", namespace, function))),
                }
            }
            _ => Err(EvalError::UnknownFunction(callee.join("."))),
        }
    }

    fn require_series_frame(&self, function: &str) -> Result<usize, EvalError> {
        match self.frame {
            Frame::Series => Ok(self.bars.len()),
            Frame::Bar { .. } => Err(EvalError::UnavailableInHook(function.to_string())),
        }
    }

    fn call_builtin(&self, function: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        match function {
            "cross_above" | "cross_below" => {
                let n = self.require_series_frame(function)?;
                let [a, b] = take::<2>(function, args)?;
                let a = a.into_num_series(n)?;
                let b = b.into_num_series(n)?;
                let above = function == "cross_above";
                let out = (0..n)
                    .map(|i| {
                        i > 0
                            && if above {
                                a[i] > b[i] && a[i - 1] <= b[i - 1]
                            } else {
                                a[i] < b[i] && a[i - 1] >= b[i - 1]
                            }
                    })
                    .collect();
                Ok(Value::BoolSeries(out))
            }
            "where" => {
                let [cond, then, otherwise] = take::<3>(function, args)?;
                select(cond, then, otherwise)
            }
            "is_nan" => {
                let [x] = take::<1>(function, args)?;
                match x {
                    Value::Num(v) => Ok(Value::Bool(v.is_nan())),
                    Value::NumSeries(v) => Ok(Value::BoolSeries(v.iter().map(|x| x.is_nan()).collect())),
                    other => Err(type_error(function, &other)),
                }
            }
            "fill_nan" => {
                let [x, fill] = take::<2>(function, args)?;
                let fill = scalar_arg(function, &fill)?;
                map_num(x, |v| if v.is_nan() { fill } else { v }).map_err(|_| {
                    EvalError::Type(format!("{} expects a number or number series", function))
                })
            }
            _ => Err(EvalError::UnknownFunction(function.to_string())),
        }
    }

    fn call_ta(&self, function: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        let qualified = format!("ta.{}", function);
        let n = self.require_series_frame(&qualified)?;
        let bars = self.bars;

        let out = match function {
            "sma" | "ema" | "wma" | "rsi" | "roc" | "stddev" | "highest" | "lowest" => {
                let [x, period] = take::<2>(&qualified, args)?;
                let x = x.into_num_series(n)?;
                let period = period_arg(&qualified, &period)?;
                match function {
                    "sma" => indicator::sma(&x, period),
                    "ema" => indicator::ema(&x, period),
                    "wma" => indicator::wma(&x, period),
                    "rsi" => indicator::rsi(&x, period),
                    "roc" => indicator::roc(&x, period),
                    "stddev" => indicator::stddev(&x, period),
                    "highest" => indicator::highest(&x, period),
                    _ => indicator::lowest(&x, period),
                }
            }
            "atr" => {
                let [period] = take::<1>(&qualified, args)?;
                let period = period_arg(&qualified, &period)?;
                indicator::atr(&bars.high, &bars.low, &bars.close, period)
            }
            "obv" => {
                take::<0>(&qualified, args)?;
                indicator::obv(&bars.close, &bars.volume)
            }
            _ => return Err(EvalError::UnknownFunction(qualified)),
        };
        Ok(Value::NumSeries(out))
    }
}

fn call_math(function: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    let qualified = format!("math.{}", function);
    let unary_fn: Option<fn(f64) -> f64> = match function {
        "abs" => Some(f64::abs as fn(f64) -> f64),
        "sqrt" => Some(f64::sqrt as fn(f64) -> f64),
        "log" => Some(f64::ln as fn(f64) -> f64),
        "exp" => Some(f64::exp as fn(f64) -> f64),
        _ => None,
    };
    if let Some(f) = unary_fn {
        let [x] = take::<1>(&qualified, args)?;
        return map_num(x, f);
    }
    let binary_fn: fn(f64, f64) -> f64 = match function {
        "min" => f64::min,
        "max" => f64::max,
        "pow" => f64::powf,
        _ => return Err(EvalError::UnknownFunction(qualified)),
    };
    let [a, b] = take::<2>(&qualified, args)?;
    zip_num(a, b, binary_fn)
}

fn take<const N: usize>(function: &str, args: Vec<Value>) -> Result<[Value; N], EvalError> {
    let found = args.len();
    args.try_into().map_err(|_| EvalError::Arity {
        function: function.to_string(),
        expected: N,
        found,
    })
}

fn type_error(function: &str, value: &Value) -> EvalError {
    EvalError::Type(format!("{} does not accept a {}", function, value.type_name()))
}

fn scalar_arg(function: &str, value: &Value) -> Result<f64, EvalError> {
    match value {
        Value::Num(v) => Ok(*v),
        other => Err(type_error(function, other)),
    }
}

/// Any positive whole number. A period longer than the series is legal and
/// leaves the whole output in warm-up.
fn period_arg(function: &str, value: &Value) -> Result<usize, EvalError> {
    let v = scalar_arg(function, value)?;
    if !v.is_finite() || v < 1.0 || v.fract() != 0.0 {
        return Err(EvalError::InvalidArgument {
            function: function.to_string(),
            reason: format!("period must be a positive integer, got {}", v),
        });
    }
    Ok(v as usize)
}

fn map_num(value: Value, f: impl Fn(f64) -> f64) -> Result<Value, EvalError> {
    match value {
        Value::Num(v) => Ok(Value::Num(f(v))),
        Value::NumSeries(v) => Ok(Value::NumSeries(v.into_iter().map(f).collect())),
        other => Err(EvalError::Type(format!(
            "expected a number, found {}",
            other.type_name()
        ))),
    }
}

/// Broadcast two operands to a common shape and combine element-wise.
fn zip_with<T, U, R>(
    a: Shape<T>,
    b: Shape<U>,
    f: impl Fn(T, U) -> R,
) -> Result<Shape<R>, EvalError>
where
    T: Copy,
    U: Copy,
{
    match (a, b) {
        (Shape::Scalar(x), Shape::Scalar(y)) => Ok(Shape::Scalar(f(x, y))),
        (Shape::Scalar(x), Shape::Series(ys)) => {
            Ok(Shape::Series(ys.into_iter().map(|y| f(x, y)).collect()))
        }
        (Shape::Series(xs), Shape::Scalar(y)) => {
            Ok(Shape::Series(xs.into_iter().map(|x| f(x, y)).collect()))
        }
        (Shape::Series(xs), Shape::Series(ys)) => {
            if xs.len() != ys.len() {
                return Err(EvalError::LengthMismatch {
                    left: xs.len(),
                    right: ys.len(),
                });
            }
            Ok(Shape::Series(
                xs.into_iter().zip(ys).map(|(x, y)| f(x, y)).collect(),
            ))
        }
    }
}

enum Shape<T> {
    Scalar(T),
    Series(Vec<T>),
}

fn num_shape(value: Value) -> Result<Shape<f64>, Value> {
    match value {
        Value::Num(v) => Ok(Shape::Scalar(v)),
        Value::NumSeries(v) => Ok(Shape::Series(v)),
        other => Err(other),
    }
}

fn bool_shape(value: Value) -> Result<Shape<bool>, Value> {
    match value {
        Value::Bool(v) => Ok(Shape::Scalar(v)),
        Value::BoolSeries(v) => Ok(Shape::Series(v)),
        other => Err(other),
    }
}

fn num_value(shape: Shape<f64>) -> Value {
    match shape {
        Shape::Scalar(v) => Value::Num(v),
        Shape::Series(v) => Value::NumSeries(v),
    }
}

fn bool_value(shape: Shape<bool>) -> Value {
    match shape {
        Shape::Scalar(v) => Value::Bool(v),
        Shape::Series(v) => Value::BoolSeries(v),
    }
}

fn zip_num(a: Value, b: Value, f: fn(f64, f64) -> f64) -> Result<Value, EvalError> {
    let a = num_shape(a).map_err(|v| EvalError::Type(format!("expected a number, found {}", v.type_name())))?;
    let b = num_shape(b).map_err(|v| EvalError::Type(format!("expected a number, found {}", v.type_name())))?;
    zip_with(a, b, f).map(num_value)
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match op {
        UnaryOp::Neg => map_num(value, |v| -v),
        UnaryOp::Not => match bool_shape(value) {
            Ok(Shape::Scalar(b)) => Ok(Value::Bool(!b)),
            Ok(Shape::Series(v)) => Ok(Value::BoolSeries(v.into_iter().map(|b| !b).collect())),
            Err(other) => Err(EvalError::Type(format!(
                "'not' expects a bool, found {}",
                other.type_name()
            ))),
        },
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    let mismatch = |l: &Value, r: &Value| {
        EvalError::Type(format!(
            "operator '{}' cannot combine {} and {}",
            op.symbol(),
            l.type_name(),
            r.type_name()
        ))
    };

    match op {
        BinaryOp::And | BinaryOp::Or => {
            let (a, b) = match (bool_shape(lhs), bool_shape(rhs)) {
                (Ok(a), Ok(b)) => (a, b),
                (a, b) => {
                    let l = a.err().unwrap_or(Value::Bool(false));
                    let r = b.err().unwrap_or(Value::Bool(false));
                    return Err(mismatch(&l, &r));
                }
            };
            let f: fn(bool, bool) -> bool = if op == BinaryOp::And {
                |x, y| x && y
            } else {
                |x, y| x || y
            };
            zip_with(a, b, f).map(bool_value)
        }
        _ => {
            let (a, b) = match (num_shape(lhs), num_shape(rhs)) {
                (Ok(a), Ok(b)) => (a, b),
                (a, b) => {
                    let l = a.err().unwrap_or(Value::Num(0.0));
                    let r = b.err().unwrap_or(Value::Num(0.0));
                    return Err(mismatch(&l, &r));
                }
            };
            match op {
                BinaryOp::Add => zip_with(a, b, |x, y| x + y).map(num_value),
                BinaryOp::Sub => zip_with(a, b, |x, y| x - y).map(num_value),
                BinaryOp::Mul => zip_with(a, b, |x, y| x * y).map(num_value),
                BinaryOp::Div => zip_with(a, b, |x, y| x / y).map(num_value),
                BinaryOp::Lt => zip_with(a, b, |x, y| x < y).map(bool_value),
                BinaryOp::Le => zip_with(a, b, |x, y| x <= y).map(bool_value),
                BinaryOp::Gt => zip_with(a, b, |x, y| x > y).map(bool_value),
                BinaryOp::Ge => zip_with(a, b, |x, y| x >= y).map(bool_value),
                BinaryOp::Eq => zip_with(a, b, |x, y| (x - y).abs() < EPSILON).map(bool_value),
                BinaryOp::Ne => zip_with(a, b, |x, y| !((x - y).abs() < EPSILON)).map(bool_value),
                BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
            }
        }
    }
}

/// `where(cond, a, b)`: element-wise choice between two numbers or two
/// bools.
fn select(cond: Value, then: Value, otherwise: Value) -> Result<Value, EvalError> {
    let cond = bool_shape(cond).map_err(|v| {
        EvalError::Type(format!("where expects a bool condition, found {}", v.type_name()))
    })?;
    let is_num = |v: &Value| matches!(v, Value::Num(_) | Value::NumSeries(_));
    let is_bool = |v: &Value| matches!(v, Value::Bool(_) | Value::BoolSeries(_));
    let numeric = is_num(&then) && is_num(&otherwise);
    if !numeric && !(is_bool(&then) && is_bool(&otherwise)) {
        return Err(EvalError::Type(format!(
            "where branches must both be numbers or both be bools, found {} and {}",
            then.type_name(),
            otherwise.type_name()
        )));
    }

    let n = match &cond {
        Shape::Series(c) => c.len(),
        Shape::Scalar(b) => match then.series_len().or(otherwise.series_len()) {
            Some(n) => n,
            None => return Ok(if *b { then } else { otherwise }),
        },
    };
    let pick = |i: usize| match &cond {
        Shape::Scalar(b) => *b,
        Shape::Series(v) => v[i],
    };

    if numeric {
        let a = then.into_num_series(n)?;
        let b = otherwise.into_num_series(n)?;
        Ok(Value::NumSeries(
            (0..n).map(|i| if pick(i) { a[i] } else { b[i] }).collect(),
        ))
    } else {
        let a = then.into_bool_series(n)?;
        let b = otherwise.into_bool_series(n)?;
        Ok(Value::BoolSeries(
            (0..n).map(|i| if pick(i) { a[i] } else { b[i] }).collect(),
        ))
    }
}
