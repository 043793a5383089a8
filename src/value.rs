use std::fmt;

use serde::Serialize;

use crate::bytecode::OpCode;

/// A memory cell. `Nil` marks a cell that was never written.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    #[default]
    Nil,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("read of an uninitialized value")]
    Nil,
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow in {0}")]
    Overflow(OpCode),
    #[error("unsupported operands for {op}: {left} and {right}")]
    UnsupportedOperands {
        op: OpCode,
        left: &'static str,
        right: &'static str,
    },
    #[error("cannot convert {0:?} to an int")]
    InvalidInt(String),
}

type Result<T> = std::result::Result<T, ValueError>;

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => {
                if x.is_finite() && x.fract() == 0.0 {
                    write!(f, "{x}.0")
                } else {
                    write!(f, "{x}")
                }
            }
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => f.write_str(s),
            Value::Nil => f.write_str("nil"),
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Nil => "nil",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn truthy(&self) -> Result<bool> {
        match self {
            Value::Int(n) => Ok(*n > 0),
            Value::Float(x) => Ok(*x > 0.0),
            Value::Bool(b) => Ok(*b),
            Value::Str(s) => Ok(!(s.is_empty() || s == "false")),
            Value::Nil => Err(ValueError::Nil),
        }
    }

    pub fn to_int(&self) -> Result<i64> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Float(x) => {
                let t = x.trunc();
                // NaN fails the range check too.
                if (I64_LOWER..I64_UPPER).contains(&t) {
                    Ok(t as i64)
                } else {
                    Err(ValueError::InvalidInt(self.to_string()))
                }
            }
            Value::Bool(b) => Ok(*b as i64),
            Value::Str(s) => parse_int(s).ok_or_else(|| ValueError::InvalidInt(s.clone())),
            Value::Nil => Err(ValueError::Nil),
        }
    }

    /// Numeric view used by `binary`. Strings holding an integer count.
    fn number(&self) -> Option<Number> {
        match self {
            Value::Int(n) => Some(Number::Int(*n)),
            Value::Float(x) => Some(Number::Float(*x)),
            Value::Bool(b) => Some(Number::Int(*b as i64)),
            Value::Str(s) => parse_int(s).map(Number::Int),
            Value::Nil => None,
        }
    }
}

const I64_LOWER: f64 = i64::MIN as f64;
const I64_UPPER: f64 = -(i64::MIN as f64);

fn parse_int(s: &str) -> Option<i64> {
    s.trim().parse().ok()
}

#[derive(Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(x) => x,
        }
    }
}

/// Apply a binary operator to two already-evaluated operands.
pub fn binary(op: OpCode, left: &Value, right: &Value) -> Result<Value> {
    if left.is_nil() || right.is_nil() {
        return Err(ValueError::Nil);
    }
    match op {
        OpCode::And => return Ok(Value::Bool(left.truthy()? && right.truthy()?)),
        OpCode::Or => return Ok(Value::Bool(left.truthy()? || right.truthy()?)),
        _ => {}
    }
    match (left.number(), right.number()) {
        (Some(Number::Int(a)), Some(Number::Int(b))) => int_op(op, a, b),
        (Some(a), Some(b)) => Ok(float_op(op, a.as_f64(), b.as_f64())),
        _ => text_op(op, left, right),
    }
}

fn int_op(op: OpCode, a: i64, b: i64) -> Result<Value> {
    let overflow = || ValueError::Overflow(op);
    let n = match op {
        OpCode::Add => a.checked_add(b).ok_or_else(overflow)?,
        OpCode::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        OpCode::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        OpCode::Div | OpCode::Mod if b == 0 => return Err(ValueError::DivisionByZero),
        OpCode::Div => a.checked_div(b).ok_or_else(overflow)?,
        OpCode::Mod => a.checked_rem(b).ok_or_else(overflow)?,
        OpCode::Pow if b < 0 => return Ok(Value::Float((a as f64).powf(b as f64))),
        OpCode::Pow => {
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
        OpCode::Lt => return Ok(Value::Bool(a < b)),
        OpCode::Le => return Ok(Value::Bool(a <= b)),
        OpCode::Gt => return Ok(Value::Bool(a > b)),
        OpCode::Ge => return Ok(Value::Bool(a >= b)),
        OpCode::Eq => return Ok(Value::Bool(a == b)),
        OpCode::Neq => return Ok(Value::Bool(a != b)),
        OpCode::And | OpCode::Or => unreachable!("logical ops handled before numeric dispatch"),
    };
    Ok(Value::Int(n))
}

fn float_op(op: OpCode, a: f64, b: f64) -> Value {
    match op {
        OpCode::Add => Value::Float(a + b),
        OpCode::Sub => Value::Float(a - b),
        OpCode::Mul => Value::Float(a * b),
        OpCode::Div => Value::Float(a / b),
        OpCode::Mod => Value::Float(a % b),
        OpCode::Pow => Value::Float(a.powf(b)),
        OpCode::Lt => Value::Bool(a < b),
        OpCode::Le => Value::Bool(a <= b),
        OpCode::Gt => Value::Bool(a > b),
        OpCode::Ge => Value::Bool(a >= b),
        OpCode::Eq => Value::Bool(a == b),
        OpCode::Neq => Value::Bool(a != b),
        OpCode::And | OpCode::Or => unreachable!("logical ops handled before numeric dispatch"),
    }
}

// At least one side is a non-numeric string: both are rendered to text.
fn text_op(op: OpCode, left: &Value, right: &Value) -> Result<Value> {
    match op {
        OpCode::Add => Ok(Value::Str(format!("{left}{right}"))),
        OpCode::Eq => Ok(Value::Bool(left.to_string() == right.to_string())),
        OpCode::Neq => Ok(Value::Bool(left.to_string() != right.to_string())),
        _ => Err(ValueError::UnsupportedOperands {
            op,
            left: left.type_name(),
            right: right.type_name(),
        }),
    }
}
