//! Coercion matrix for operators.
//!
//! Operands are resolved to a scalar class (integer, float, string,
//! boolean) before anything is combined. Containers, records and nil never
//! take part in arithmetic or comparison; mixing classes is an error rather
//! than a silent `false`.

use std::cmp::Ordering;

use crate::ast::BinOp;
use crate::value::{Value, ValueError};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Int(i) => Some(Num::Int(*i)),
            Value::Float(x) => Some(Num::Float(*x)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(x) => x,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Num::Int(i) => i == 0,
            Num::Float(x) => x == 0.0,
        }
    }
}

fn verb(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "subtract",
        BinOp::Mul => "multiply",
        BinOp::Div => "divide",
        BinOp::Mod => "modulo",
        _ => "combine",
    }
}

fn arithmetic_error(op: BinOp, lhs: &Value, rhs: &Value) -> ValueError {
    ValueError::Arithmetic {
        verb: verb(op),
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    }
}

fn cannot_compare(lhs: &Value, rhs: &Value) -> ValueError {
    ValueError::CannotCompare {
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    }
}

/// Shared int/float promotion: `int_op` runs on two integers (checked),
/// `float_op` whenever either side is a float.
fn numeric(
    op: BinOp,
    lhs: &Value,
    rhs: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, ValueError> {
    match (Num::of(lhs), Num::of(rhs)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => int_op(a, b)
            .map(Value::Int)
            .ok_or(ValueError::Overflow { op: op.symbol() }),
        (Some(a), Some(b)) => Ok(Value::Float(float_op(a.as_f64(), b.as_f64()))),
        _ => Err(arithmetic_error(op, lhs, rhs)),
    }
}

pub fn add(lhs: &Value, rhs: &Value) -> Result<Value, ValueError> {
    if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
        let mut joined = String::with_capacity(a.len() + b.len());
        joined.push_str(a);
        joined.push_str(b);
        return Ok(Value::String(joined));
    }
    numeric(BinOp::Add, lhs, rhs, i64::checked_add, |a, b| a + b)
}

pub fn sub(lhs: &Value, rhs: &Value) -> Result<Value, ValueError> {
    numeric(BinOp::Sub, lhs, rhs, i64::checked_sub, |a, b| a - b)
}

pub fn mul(lhs: &Value, rhs: &Value) -> Result<Value, ValueError> {
    numeric(BinOp::Mul, lhs, rhs, i64::checked_mul, |a, b| a * b)
}

/// Division always yields a float. A zero divisor is rejected before the
/// operand types are looked at.
pub fn div(lhs: &Value, rhs: &Value) -> Result<Value, ValueError> {
    if Num::of(rhs).is_some_and(Num::is_zero) {
        return Err(ValueError::DivisionByZero);
    }
    match (Num::of(lhs), Num::of(rhs)) {
        (Some(a), Some(b)) => Ok(Value::Float(a.as_f64() / b.as_f64())),
        _ => Err(arithmetic_error(BinOp::Div, lhs, rhs)),
    }
}

pub fn rem(lhs: &Value, rhs: &Value) -> Result<Value, ValueError> {
    if Num::of(rhs).is_some_and(Num::is_zero) {
        return Err(ValueError::ModuloByZero);
    }
    numeric(BinOp::Mod, lhs, rhs, i64::checked_rem, |a, b| a % b)
}

/// Order two values of the same class. Booleans only support equality,
/// so they are handled by [`equals`].
fn order(lhs: &Value, rhs: &Value) -> Result<Ordering, ValueError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => match (Num::of(lhs), Num::of(rhs)) {
            (Some(a), Some(b)) => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .ok_or_else(|| cannot_compare(lhs, rhs)),
            _ => Err(cannot_compare(lhs, rhs)),
        },
    }
}

pub fn equals(lhs: &Value, rhs: &Value) -> Result<bool, ValueError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a == b),
        (Value::String(a), Value::String(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        _ => match (Num::of(lhs), Num::of(rhs)) {
            (Some(a), Some(b)) => Ok(a.as_f64() == b.as_f64()),
            _ => Err(cannot_compare(lhs, rhs)),
        },
    }
}

/// Evaluate a comparison operator. Non-comparison operators are a caller bug
/// and report as a comparison failure.
pub fn compare(op: BinOp, lhs: &Value, rhs: &Value) -> Result<bool, ValueError> {
    match op {
        BinOp::Eq => equals(lhs, rhs),
        BinOp::Ne => equals(lhs, rhs).map(|eq| !eq),
        BinOp::Lt => order(lhs, rhs).map(Ordering::is_lt),
        BinOp::Le => order(lhs, rhs).map(Ordering::is_le),
        BinOp::Gt => order(lhs, rhs).map(Ordering::is_gt),
        BinOp::Ge => order(lhs, rhs).map(Ordering::is_ge),
        _ => Err(cannot_compare(lhs, rhs)),
    }
}

/// Apply an arithmetic or comparison operator. `and`/`or` short-circuit and
/// are evaluated by the executor, not here.
pub fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, ValueError> {
    match op {
        BinOp::Add => add(lhs, rhs),
        BinOp::Sub => sub(lhs, rhs),
        BinOp::Mul => mul(lhs, rhs),
        BinOp::Div => div(lhs, rhs),
        BinOp::Mod => rem(lhs, rhs),
        BinOp::Or => Ok(Value::Bool(lhs.is_truthy() || rhs.is_truthy())),
        BinOp::And => Ok(Value::Bool(lhs.is_truthy() && rhs.is_truthy())),
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            compare(op, lhs, rhs).map(Value::Bool)
        }
    }
}

pub fn negate(value: &Value) -> Result<Value, ValueError> {
    match value {
        Value::Int(i) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or(ValueError::Overflow { op: "-" }),
        Value::Float(x) => Ok(Value::Float(-x)),
        other => Err(ValueError::BadUnaryOperand {
            op: "-",
            ty: other.type_name(),
        }),
    }
}

pub fn plus(value: &Value) -> Result<Value, ValueError> {
    match value {
        Value::Int(_) | Value::Float(_) => Ok(value.clone()),
        other => Err(ValueError::BadUnaryOperand {
            op: "+",
            ty: other.type_name(),
        }),
    }
}
