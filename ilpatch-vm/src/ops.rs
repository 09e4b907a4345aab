//! Arithmetic, comparison and conversion over [`Value`]s.
//!
//! Integer operands use the narrower of the two widths present, with 8-bit
//! operands promoted to 32 bits first. Mixed 32/64-bit float operands are
//! computed in 32 bits. Integer/float mixes widen the integer.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrUn,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::ShrUn => ">>>",
        }
    }
}

fn mismatch(op: &'static str, left: &Value, right: &Value) -> Error {
    Error::TypeMismatch {
        op,
        left: left.type_name(),
        right: right.type_name(),
    }
}

/// Normalized numeric operand.
#[derive(Clone, Copy, Debug)]
enum Num {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

fn num(value: &Value) -> Option<Num> {
    Some(match *value {
        Value::I8(v) => Num::I32(v.into()),
        Value::I32(v) => Num::I32(v),
        Value::I64(v) => Num::I64(v),
        Value::F32(v) => Num::F32(v),
        Value::F64(v) => Num::F64(v),
        _ => return None,
    })
}

/// Both operands coerced to a common representation.
enum Pair {
    I32(i32, i32),
    I64(i64, i64),
    F32(f32, f32),
    F64(f64, f64),
}

fn pair(a: Num, b: Num) -> Pair {
    match (a, b) {
        (Num::I32(x), Num::I32(y)) => Pair::I32(x, y),
        (Num::I64(x), Num::I64(y)) => Pair::I64(x, y),
        // narrowest integer width wins
        (Num::I32(x), Num::I64(y)) => Pair::I32(x, y as i32),
        (Num::I64(x), Num::I32(y)) => Pair::I32(x as i32, y),
        (Num::F32(x), Num::F32(y)) => Pair::F32(x, y),
        (Num::F64(x), Num::F64(y)) => Pair::F64(x, y),
        (Num::F32(x), Num::F64(y)) => Pair::F32(x, y as f32),
        (Num::F64(x), Num::F32(y)) => Pair::F32(x as f32, y),
        (Num::I32(x), Num::F32(y)) => Pair::F32(x as f32, y),
        (Num::I64(x), Num::F32(y)) => Pair::F32(x as f32, y),
        (Num::F32(x), Num::I32(y)) => Pair::F32(x, y as f32),
        (Num::F32(x), Num::I64(y)) => Pair::F32(x, y as f32),
        (Num::I32(x), Num::F64(y)) => Pair::F64(x.into(), y),
        (Num::I64(x), Num::F64(y)) => Pair::F64(x as f64, y),
        (Num::F64(x), Num::I32(y)) => Pair::F64(x, y.into()),
        (Num::F64(x), Num::I64(y)) => Pair::F64(x, y as f64),
    }
}

pub fn add(a: &Value, b: &Value) -> Result<Value> {
    if matches!(a, Value::Str(_)) || matches!(b, Value::Str(_)) {
        return Ok(Value::from(format!("{a}{b}")));
    }
    arith(BinaryOp::Add, a, b)
}

pub fn sub(a: &Value, b: &Value) -> Result<Value> {
    arith(BinaryOp::Sub, a, b)
}

pub fn mul(a: &Value, b: &Value) -> Result<Value> {
    arith(BinaryOp::Mul, a, b)
}

pub fn div(a: &Value, b: &Value) -> Result<Value> {
    arith(BinaryOp::Div, a, b)
}

pub fn rem(a: &Value, b: &Value) -> Result<Value> {
    arith(BinaryOp::Rem, a, b)
}

/// `+ - * / %` in the wrapping semantics of unchecked CIL arithmetic.
pub fn arith(op: BinaryOp, a: &Value, b: &Value) -> Result<Value> {
    let (Some(x), Some(y)) = (num(a), num(b)) else {
        return Err(mismatch(op.symbol(), a, b));
    };
    Ok(match pair(x, y) {
        Pair::I32(x, y) => Value::I32(int_op32(op, x, y)?),
        Pair::I64(x, y) => Value::I64(int_op64(op, x, y)?),
        Pair::F32(x, y) => {
            let r = float_op(op, x.into(), y.into()).ok_or_else(|| mismatch(op.symbol(), a, b))?;
            Value::F32(r as f32)
        }
        Pair::F64(x, y) => {
            Value::F64(float_op(op, x, y).ok_or_else(|| mismatch(op.symbol(), a, b))?)
        }
    })
}

fn int_op32(op: BinaryOp, x: i32, y: i32) -> Result<i32> {
    Ok(match op {
        BinaryOp::Add => x.wrapping_add(y),
        BinaryOp::Sub => x.wrapping_sub(y),
        BinaryOp::Mul => x.wrapping_mul(y),
        BinaryOp::Div | BinaryOp::Rem if y == 0 => return Err(Error::DivideByZero),
        BinaryOp::Div => x.checked_div(y).ok_or(Error::Overflow("/"))?,
        BinaryOp::Rem => x.checked_rem(y).ok_or(Error::Overflow("%"))?,
        BinaryOp::And => x & y,
        BinaryOp::Or => x | y,
        BinaryOp::Xor => x ^ y,
        BinaryOp::Shl => x.wrapping_shl(y as u32),
        BinaryOp::Shr => x.wrapping_shr(y as u32),
        BinaryOp::ShrUn => ((x as u32).wrapping_shr(y as u32)) as i32,
    })
}

fn int_op64(op: BinaryOp, x: i64, y: i64) -> Result<i64> {
    Ok(match op {
        BinaryOp::Add => x.wrapping_add(y),
        BinaryOp::Sub => x.wrapping_sub(y),
        BinaryOp::Mul => x.wrapping_mul(y),
        BinaryOp::Div | BinaryOp::Rem if y == 0 => return Err(Error::DivideByZero),
        BinaryOp::Div => x.checked_div(y).ok_or(Error::Overflow("/"))?,
        BinaryOp::Rem => x.checked_rem(y).ok_or(Error::Overflow("%"))?,
        BinaryOp::And => x & y,
        BinaryOp::Or => x | y,
        BinaryOp::Xor => x ^ y,
        BinaryOp::Shl => x.wrapping_shl(y as u32),
        BinaryOp::Shr => x.wrapping_shr(y as u32),
        BinaryOp::ShrUn => ((x as u64).wrapping_shr(y as u32)) as i64,
    })
}

fn float_op(op: BinaryOp, x: f64, y: f64) -> Option<f64> {
    Some(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Rem => x % y,
        _ => return None,
    })
}

/// Bitwise and shift operators. Booleans take part as 0 and 1; two
/// booleans combined by `& | ^` stay boolean.
pub fn bitwise(op: BinaryOp, a: &Value, b: &Value) -> Result<Value> {
    if let (Value::Bool(x), Value::Bool(y)) = (a, b) {
        return match op {
            BinaryOp::And => Ok(Value::Bool(x & y)),
            BinaryOp::Or => Ok(Value::Bool(x | y)),
            BinaryOp::Xor => Ok(Value::Bool(x ^ y)),
            _ => Err(mismatch(op.symbol(), a, b)),
        };
    }
    let int = |v: &Value| match v {
        Value::Bool(b) => Some(Num::I32((*b).into())),
        other => num(other).filter(|n| matches!(n, Num::I32(_) | Num::I64(_))),
    };
    let (Some(x), Some(y)) = (int(a), int(b)) else {
        return Err(mismatch(op.symbol(), a, b));
    };
    // the shift amount never decides the result width
    let shift = matches!(op, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::ShrUn);
    Ok(match (x, y) {
        (Num::I32(x), Num::I32(y)) => Value::I32(int_op32(op, x, y)?),
        (Num::I64(x), Num::I64(y)) => Value::I64(int_op64(op, x, y)?),
        (Num::I64(x), Num::I32(y)) if shift => Value::I64(int_op64(op, x, y.into())?),
        (Num::I32(x), Num::I64(y)) => Value::I32(int_op32(op, x, y as i32)?),
        (Num::I64(x), Num::I32(y)) => Value::I32(int_op32(op, x as i32, y)?),
        _ => return Err(mismatch(op.symbol(), a, b)),
    })
}

/// Checked `add.ovf`, `sub.ovf` and `mul.ovf`. `unsigned` reinterprets both
/// operands as unsigned integers of their width.
pub fn checked(op: BinaryOp, unsigned: bool, a: &Value, b: &Value) -> Result<Value> {
    let name = op.symbol();
    let (Some(x), Some(y)) = (num(a), num(b)) else {
        return Err(mismatch(name, a, b));
    };
    let overflow = || Error::Overflow(name);
    Ok(match pair(x, y) {
        Pair::I32(x, y) if unsigned => {
            let (x, y) = (x as u32, y as u32);
            let r = match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Sub => x.checked_sub(y),
                BinaryOp::Mul => x.checked_mul(y),
                _ => return Err(mismatch(name, a, b)),
            };
            Value::I32(r.ok_or_else(overflow)? as i32)
        }
        Pair::I32(x, y) => Value::I32(
            match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Sub => x.checked_sub(y),
                BinaryOp::Mul => x.checked_mul(y),
                _ => return Err(mismatch(name, a, b)),
            }
            .ok_or_else(overflow)?,
        ),
        Pair::I64(x, y) if unsigned => {
            let (x, y) = (x as u64, y as u64);
            let r = match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Sub => x.checked_sub(y),
                BinaryOp::Mul => x.checked_mul(y),
                _ => return Err(mismatch(name, a, b)),
            };
            Value::I64(r.ok_or_else(overflow)? as i64)
        }
        Pair::I64(x, y) => Value::I64(
            match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Sub => x.checked_sub(y),
                BinaryOp::Mul => x.checked_mul(y),
                _ => return Err(mismatch(name, a, b)),
            }
            .ok_or_else(overflow)?,
        ),
        // floats never trap
        _ => arith(op, a, b)?,
    })
}

/// Unsigned `div.un` and `rem.un`.
pub fn div_un(op: BinaryOp, a: &Value, b: &Value) -> Result<Value> {
    let (Some(x), Some(y)) = (num(a), num(b)) else {
        return Err(mismatch(op.symbol(), a, b));
    };
    let rem = op == BinaryOp::Rem;
    Ok(match pair(x, y) {
        Pair::I32(_, 0) | Pair::I64(_, 0) => return Err(Error::DivideByZero),
        Pair::I32(x, y) => {
            let (x, y) = (x as u32, y as u32);
            let r = if rem { x % y } else { x / y };
            Value::I32(r as i32)
        }
        Pair::I64(x, y) => {
            let (x, y) = (x as u64, y as u64);
            let r = if rem { x % y } else { x / y };
            Value::I64(r as i64)
        }
        _ => arith(op, a, b)?,
    })
}

pub fn neg(value: &Value) -> Result<Value> {
    Ok(match num(value) {
        Some(Num::I32(v)) => Value::I32(v.wrapping_neg()),
        Some(Num::I64(v)) => Value::I64(v.wrapping_neg()),
        Some(Num::F32(v)) => Value::F32(-v),
        Some(Num::F64(v)) => Value::F64(-v),
        None => return Err(mismatch("-", value, &Value::Null)),
    })
}

pub fn not(value: &Value) -> Result<Value> {
    Ok(match value {
        Value::Bool(b) => Value::Bool(!b),
        other => match num(other) {
            Some(Num::I32(v)) => Value::I32(!v),
            Some(Num::I64(v)) => Value::I64(!v),
            _ => return Err(mismatch("~", value, &Value::Null)),
        },
    })
}

/// Order two values. Integers (booleans included) compare exactly; any
/// float operand moves the comparison to 64-bit floating point, where NaN
/// is unordered.
pub fn compare(op: &'static str, a: &Value, b: &Value) -> Result<Option<Ordering>> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Ok(Some(x.cmp(&y)));
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
        _ => Err(mismatch(op, a, b)),
    }
}

pub fn less(a: &Value, b: &Value) -> Result<bool> {
    Ok(compare("<", a, b)? == Some(Ordering::Less))
}

pub fn greater(a: &Value, b: &Value) -> Result<bool> {
    Ok(compare(">", a, b)? == Some(Ordering::Greater))
}

/// Value equality. Strings compare with strings and booleans with
/// booleans or integers; references are rejected.
pub fn equal(a: &Value, b: &Value) -> Result<bool> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x == y),
        (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
        _ => Ok(compare("==", a, b)? == Some(Ordering::Equal)),
    }
}

/// Falsy values: null, `false` and integer zero.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        other if other.is_integer() => other.as_i64() == Some(0),
        _ => false,
    }
}

/// Target representation of a `conv.*` instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conv {
    I1,
    I2,
    I4,
    I8,
    U1,
    U2,
    U4,
    U8,
    /// Native-sized integers are 64 bits.
    I,
    U,
    R4,
    R8,
    RUn,
}

impl Conv {
    fn name(self) -> &'static str {
        match self {
            Conv::I1 => "conv.i1",
            Conv::I2 => "conv.i2",
            Conv::I4 => "conv.i4",
            Conv::I8 => "conv.i8",
            Conv::U1 => "conv.u1",
            Conv::U2 => "conv.u2",
            Conv::U4 => "conv.u4",
            Conv::U8 => "conv.u8",
            Conv::I => "conv.i",
            Conv::U => "conv.u",
            Conv::R4 => "conv.r4",
            Conv::R8 => "conv.r8",
            Conv::RUn => "conv.r.un",
        }
    }
}

/// Unchecked numeric conversion. Floats truncate toward zero and saturate;
/// integers truncate.
pub fn convert(conv: Conv, value: &Value) -> Result<Value> {
    let bad = || mismatch(conv.name(), value, &Value::Null);
    let float = match value {
        Value::F32(v) => Some(f64::from(*v)),
        Value::F64(v) => Some(*v),
        _ => None,
    };
    let int = match float {
        Some(f) => f as i64,
        None => value.as_i64().ok_or_else(bad)?,
    };
    Ok(match conv {
        Conv::I1 => Value::I8(int as i8),
        Conv::I2 => Value::I32((int as i16).into()),
        Conv::I4 => Value::I32(int as i32),
        Conv::U1 => Value::I32((int as u8).into()),
        Conv::U2 => Value::I32((int as u16).into()),
        Conv::U4 => Value::I32(int as u32 as i32),
        Conv::I8 | Conv::U8 | Conv::I | Conv::U => Value::I64(int),
        Conv::R4 => Value::F32(float.unwrap_or(int as f64) as f32),
        Conv::R8 => Value::F64(float.unwrap_or(int as f64)),
        Conv::RUn => Value::F64(float.unwrap_or(int as u64 as f64)),
    })
}

/// Checked `conv.ovf.*`: fails when the source does not fit the target.
pub fn convert_checked(conv: Conv, unsigned_source: bool, value: &Value) -> Result<Value> {
    let overflow = || Error::Overflow(conv.name());
    let int: i128 = match value {
        Value::F32(v) if v.is_finite() => v.trunc() as i128,
        Value::F64(v) if v.is_finite() => v.trunc() as i128,
        Value::F32(_) | Value::F64(_) => return Err(overflow()),
        Value::I32(v) if unsigned_source => (*v as u32).into(),
        Value::I64(v) if unsigned_source => (*v as u64).into(),
        other => other
            .as_i64()
            .ok_or_else(|| mismatch(conv.name(), value, &Value::Null))?
            .into(),
    };
    let fits = |lo: i128, hi: i128| (lo..=hi).contains(&int);
    let ok = match conv {
        Conv::I1 => fits(i8::MIN.into(), i8::MAX.into()),
        Conv::I2 => fits(i16::MIN.into(), i16::MAX.into()),
        Conv::I4 => fits(i32::MIN.into(), i32::MAX.into()),
        Conv::I8 | Conv::I => fits(i64::MIN.into(), i64::MAX.into()),
        Conv::U1 => fits(0, u8::MAX.into()),
        Conv::U2 => fits(0, u16::MAX.into()),
        Conv::U4 => fits(0, u32::MAX.into()),
        Conv::U8 | Conv::U => fits(0, u64::MAX.into()),
        Conv::R4 | Conv::R8 | Conv::RUn => true,
    };
    if !ok {
        return Err(overflow());
    }
    convert(conv, &Value::I64(int as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_add_and_sub() {
        assert_eq!(add(&Value::I32(3), &Value::I32(4)).unwrap(), Value::I32(7));
        assert_eq!(sub(&Value::I32(10), &Value::I32(5)).unwrap(), Value::I32(5));
    }

    #[test]
    fn narrowest_integer_width_wins() {
        assert_eq!(add(&Value::I64(1), &Value::I32(2)).unwrap(), Value::I32(3));
        assert_eq!(add(&Value::I8(1), &Value::I8(2)).unwrap(), Value::I32(3));
        assert_eq!(mul(&Value::I64(3), &Value::I64(4)).unwrap(), Value::I64(12));
    }

    #[test]
    fn wide_float_narrows_to_single() {
        assert_eq!(add(&Value::F32(1.5), &Value::F64(2.25)).unwrap(), Value::F32(3.75));
        assert_eq!(add(&Value::I32(1), &Value::F64(0.5)).unwrap(), Value::F64(1.5));
    }

    #[test]
    fn string_concatenation_keeps_order() {
        assert_eq!(add(&Value::str("a"), &Value::I32(1)).unwrap(), Value::str("a1"));
        assert_eq!(add(&Value::I32(1), &Value::str("a")).unwrap(), Value::str("1a"));
        assert_eq!(add(&Value::Null, &Value::str("a")).unwrap(), Value::str("a"));
    }

    #[test]
    fn string_subtraction_is_a_mismatch() {
        let err = sub(&Value::str("a"), &Value::I32(1)).unwrap_err();
        match err {
            Error::TypeMismatch { op, left, right } => {
                assert_eq!(op, "-");
                assert_eq!(left, "System.String");
                assert_eq!(right, "System.Int32");
            }
            other => panic!("expected TypeMismatch, got {other}"),
        }
    }

    #[test]
    fn integer_division() {
        assert_eq!(div(&Value::I32(7), &Value::I32(2)).unwrap(), Value::I32(3));
        assert!(matches!(
            div(&Value::I32(1), &Value::I32(0)),
            Err(Error::DivideByZero)
        ));
        assert!(matches!(
            div(&Value::I32(i32::MIN), &Value::I32(-1)),
            Err(Error::Overflow(_))
        ));
        assert_eq!(div(&Value::F64(1.0), &Value::F64(0.0)).unwrap(), Value::F64(f64::INFINITY));
    }

    #[test]
    fn comparisons() {
        assert!(less(&Value::I32(1), &Value::I64(2)).unwrap());
        assert!(greater(&Value::F64(2.5), &Value::I32(2)).unwrap());
        assert!(equal(&Value::I32(2), &Value::F32(2.0)).unwrap());
        assert!(equal(&Value::str("x"), &Value::str("x")).unwrap());
        assert!(!less(&Value::F64(f64::NAN), &Value::F64(1.0)).unwrap());
    }

    #[test]
    fn object_comparison_is_rejected() {
        let err = equal(&Value::Null, &Value::I32(0)).unwrap_err();
        assert!(
            matches!(err, Error::TypeMismatch { op: "==", .. }),
            "expected TypeMismatch, got {err}"
        );
        assert!(less(&Value::str("a"), &Value::str("b")).is_err());
    }

    #[test]
    fn falsy_values() {
        assert!(is_falsy(&Value::Null));
        assert!(is_falsy(&Value::Bool(false)));
        assert!(is_falsy(&Value::I64(0)));
        assert!(!is_falsy(&Value::I32(-1)));
        assert!(!is_falsy(&Value::str("")));
    }

    #[test]
    fn bitwise_and_shifts() {
        assert_eq!(bitwise(BinaryOp::And, &Value::I32(6), &Value::I32(3)).unwrap(), Value::I32(2));
        assert_eq!(bitwise(BinaryOp::Shl, &Value::I64(1), &Value::I32(40)).unwrap(), Value::I64(1 << 40));
        assert_eq!(bitwise(BinaryOp::ShrUn, &Value::I32(-1), &Value::I32(28)).unwrap(), Value::I32(15));
        assert_eq!(
            bitwise(BinaryOp::Xor, &Value::Bool(true), &Value::Bool(true)).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn conversions_truncate() {
        assert_eq!(convert(Conv::I4, &Value::F64(2.9)).unwrap(), Value::I32(2));
        assert_eq!(convert(Conv::I1, &Value::I32(300)).unwrap(), Value::I8(44));
        assert_eq!(convert(Conv::R8, &Value::I32(3)).unwrap(), Value::F64(3.0));
        assert_eq!(convert(Conv::U1, &Value::I32(-1)).unwrap(), Value::I32(255));
    }

    #[test]
    fn checked_operations_trap() {
        assert!(matches!(
            checked(BinaryOp::Add, false, &Value::I32(i32::MAX), &Value::I32(1)),
            Err(Error::Overflow(_))
        ));
        assert!(matches!(
            convert_checked(Conv::U1, false, &Value::I32(-1)),
            Err(Error::Overflow(_))
        ));
        assert_eq!(convert_checked(Conv::I2, false, &Value::I64(-5)).unwrap(), Value::I32(-5));
    }
}
