//! The bound domain: recursive abstract values over integer intervals.
//!
//! Trees are rebuilt by every pass and never mutated in place. Arithmetic on
//! `Fail` yields `Fail`, and an interval whose ends are the same literal is
//! represented as that literal.

use std::fmt;

use crate::ast::{ArrayId, BinOpKind, BuiltinKind, MathFn};
use crate::types::DataType;

#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Literal {
        value: i64,
        ty: DataType,
    },
    /// Closed interval `[min, max]`; ends may themselves be unresolved.
    Limit {
        min: Box<Bound>,
        max: Box<Bound>,
        ty: DataType,
    },
    /// Value of one of two control-flow branches.
    Either {
        then: Box<Bound>,
        orelse: Box<Bound>,
        ty: DataType,
    },
    /// Loop iteration space, `stop` exclusive.
    Range {
        start: Box<Bound>,
        stop: Box<Bound>,
        step: Box<Bound>,
    },
    Variable {
        name: String,
        ty: DataType,
    },
    BinOp {
        op: BinOpKind,
        left: Box<Bound>,
        right: Box<Bound>,
        ty: DataType,
    },
    Builtin {
        kind: BuiltinKind,
        left: Box<Bound>,
        right: Box<Bound>,
        ty: DataType,
    },
    Math {
        func: MathFn,
        args: Vec<Bound>,
        ty: DataType,
    },
    /// Inlined callee: parameters bound to the merged call-site arguments.
    Call {
        name: String,
        params: Vec<(String, Bound)>,
        ret: Box<Bound>,
        ty: DataType,
    },
    /// A value read from an array, bounded by scanning its contents.
    Array {
        array: ArrayId,
        name: String,
        ty: DataType,
    },
    Fail,
}

impl Bound {
    pub fn literal(value: i64, ty: DataType) -> Bound {
        Bound::Literal { value, ty }
    }

    pub fn limit(min: Bound, max: Bound, ty: DataType) -> Bound {
        Bound::Limit {
            min: Box::new(min),
            max: Box::new(max),
            ty,
        }
    }

    /// Interval over literals, collapsed to a literal when degenerate.
    pub fn interval(lo: i64, hi: i64, ty: DataType) -> Bound {
        if lo == hi {
            Bound::literal(lo, ty)
        } else {
            Bound::limit(Bound::literal(lo, ty), Bound::literal(hi, ty), ty)
        }
    }

    pub fn either(then: Bound, orelse: Bound, ty: DataType) -> Bound {
        Bound::Either {
            then: Box::new(then),
            orelse: Box::new(orelse),
            ty,
        }
    }

    pub fn range(start: Bound, stop: Bound, step: Bound) -> Bound {
        Bound::Range {
            start: Box::new(start),
            stop: Box::new(stop),
            step: Box::new(step),
        }
    }

    pub fn binop(op: BinOpKind, left: Bound, right: Bound, ty: DataType) -> Bound {
        Bound::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
            ty,
        }
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Bound::Fail)
    }

    pub fn as_literal(&self) -> Option<i64> {
        match self {
            Bound::Literal { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// `(lo, hi)` when the bound is a literal or an interval over literals.
    pub fn as_interval(&self) -> Option<(i64, i64)> {
        match self {
            Bound::Literal { value, .. } => Some((*value, *value)),
            Bound::Limit { min, max, .. } => match (min.as_literal(), max.as_literal()) {
                (Some(lo), Some(hi)) => Some((lo, hi)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn ty(&self) -> DataType {
        match self {
            Bound::Literal { ty, .. }
            | Bound::Limit { ty, .. }
            | Bound::Either { ty, .. }
            | Bound::Variable { ty, .. }
            | Bound::BinOp { ty, .. }
            | Bound::Builtin { ty, .. }
            | Bound::Math { ty, .. }
            | Bound::Call { ty, .. }
            | Bound::Array { ty, .. } => *ty,
            Bound::Range { start, .. } => start.ty(),
            Bound::Fail => DataType::None,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Literal { value, .. } => write!(f, "{}", value),
            Bound::Limit { min, max, .. } => write!(f, "[{}, {}]", min, max),
            Bound::Either { then, orelse, .. } => write!(f, "either({}, {})", then, orelse),
            Bound::Range { start, stop, step } => write!(f, "range({}, {}, {})", start, stop, step),
            Bound::Variable { name, .. } => write!(f, "{}", name),
            Bound::BinOp {
                op, left, right, ..
            } => write!(f, "({} {} {})", left, op.symbol(), right),
            Bound::Builtin {
                kind, left, right, ..
            } => write!(f, "{}({}, {})", kind.name(), left, right),
            Bound::Math { func, args, .. } => {
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", func.name(), rendered.join(", "))
            }
            Bound::Call { name, ret, .. } => write!(f, "{}() -> {}", name, ret),
            Bound::Array { name, .. } => write!(f, "{}[*]", name),
            Bound::Fail => write!(f, "FAIL"),
        }
    }
}

/// Signed literal arithmetic with saturation at the `i64` extremes.
///
/// Returns `None` for division or modulo by zero; callers decide whether
/// that is a coverage failure or an unsafe verdict.
pub fn apply_binop(v1: i64, op: BinOpKind, v2: i64) -> Option<i64> {
    let result = match op {
        BinOpKind::Add => v1.saturating_add(v2),
        BinOpKind::Sub => v1.saturating_sub(v2),
        BinOpKind::Mul => v1.saturating_mul(v2),
        BinOpKind::Div => {
            if v2 == 0 {
                return None;
            }
            v1.saturating_div(v2)
        }
        BinOpKind::Mod => {
            if v2 == 0 {
                return None;
            }
            v1.checked_rem(v2).unwrap_or(0)
        }
        BinOpKind::Pow => {
            if v2 >= 0 {
                v1.saturating_pow(v2.min(u32::MAX as i64) as u32)
            } else {
                (v1 as f64).powf(v2 as f64) as i64
            }
        }
        BinOpKind::LeftShift => v1.saturating_mul(2i64.saturating_pow(v2.clamp(0, 63) as u32)),
        BinOpKind::RightShift => v1 >> v2.clamp(0, 63),
        BinOpKind::BitAnd => v1 & v2,
        BinOpKind::BitOr => v1 | v2,
        BinOpKind::BitXor => v1 ^ v2,
        BinOpKind::LogicalOr => ((v1 != 0) || (v2 != 0)) as i64,
        BinOpKind::LogicalAnd => ((v1 != 0) && (v2 != 0)) as i64,
        BinOpKind::Equal => (v1 == v2) as i64,
        BinOpKind::NotEqual => (v1 != v2) as i64,
        BinOpKind::LessThan => (v1 < v2) as i64,
        BinOpKind::LessEqual => (v1 <= v2) as i64,
        BinOpKind::GreaterThan => (v1 > v2) as i64,
        BinOpKind::GreaterEqual => (v1 >= v2) as i64,
    };
    Some(result)
}

/// Clamp `value` into the representable range of `ty`.
pub fn saturate(value: i64, ty: DataType) -> i64 {
    match ty.integer_limits() {
        Some((lo, hi)) => value.clamp(lo, hi),
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_interval_is_literal() {
        assert_eq!(Bound::interval(4, 4, DataType::Int), Bound::literal(4, DataType::Int));
        assert_eq!(Bound::interval(0, 9, DataType::Int).as_interval(), Some((0, 9)));
    }

    #[test]
    fn test_apply_binop() {
        assert_eq!(apply_binop(7, BinOpKind::Div, 2), Some(3));
        assert_eq!(apply_binop(-7, BinOpKind::Mod, 3), Some(-1));
        assert_eq!(apply_binop(5, BinOpKind::Mod, 0), None);
        assert_eq!(apply_binop(i64::MAX, BinOpKind::Add, 1), Some(i64::MAX));
        assert_eq!(apply_binop(i64::MIN, BinOpKind::Div, -1), Some(i64::MAX));
        assert_eq!(apply_binop(3, BinOpKind::LessThan, 4), Some(1));
        assert_eq!(apply_binop(2, BinOpKind::Pow, 10), Some(1024));
        assert_eq!(apply_binop(1, BinOpKind::LeftShift, 4), Some(16));
    }

    #[test]
    fn test_saturate_int() {
        assert_eq!(saturate(i64::MAX, DataType::Int), i32::MAX as i64);
        assert_eq!(saturate(-5, DataType::Int), -5);
        assert_eq!(saturate(i64::MAX, DataType::Long), i64::MAX);
    }

    #[test]
    fn test_display() {
        let b = Bound::either(
            Bound::literal(3, DataType::Int),
            Bound::interval(0, 9, DataType::Int),
            DataType::Int,
        );
        assert_eq!(b.to_string(), "either(3, [0, 9])");
        assert_eq!(Bound::Fail.to_string(), "FAIL");
    }
}
