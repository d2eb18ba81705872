//! Scalar and array type tags plus literal values carried by the AST.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AnalysisError, Result};

/// Type tag attached to every typed AST node and bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int,
    Long,
    Double,
    Bool,
    IntArray,
    LongArray,
    DoubleArray,
    BoolArray,
    None,
}

impl DataType {
    /// Size in bytes of one value (array tags report their element size).
    pub fn size_bytes(&self) -> usize {
        match self.element_type() {
            DataType::Int => 4,
            DataType::Long => 8,
            DataType::Double => 8,
            DataType::Bool => 1,
            _ => 0,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self,
            DataType::IntArray | DataType::LongArray | DataType::DoubleArray | DataType::BoolArray
        )
    }

    pub fn element_type(&self) -> DataType {
        match self {
            DataType::IntArray => DataType::Int,
            DataType::LongArray => DataType::Long,
            DataType::DoubleArray => DataType::Double,
            DataType::BoolArray => DataType::Bool,
            other => *other,
        }
    }

    /// Representable range for integer types, used by overflow verification.
    pub fn integer_limits(&self) -> Option<(i64, i64)> {
        match self {
            DataType::Int => Some((i32::MIN as i64, i32::MAX as i64)),
            DataType::Long => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    /// Whether array contents of this type may be scanned for min/max.
    pub fn is_scannable(&self) -> bool {
        matches!(self, DataType::IntArray | DataType::LongArray)
    }

    /// Wider of two integer types; non-integer operands fall back to `Long`.
    pub fn widen(self, other: DataType) -> DataType {
        match (self, other) {
            (DataType::Int, DataType::Int) => DataType::Int,
            (DataType::Bool, DataType::Bool) => DataType::Bool,
            (DataType::Int, DataType::Bool) | (DataType::Bool, DataType::Int) => DataType::Int,
            _ => DataType::Long,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int => "int",
            DataType::Long => "long",
            DataType::Double => "double",
            DataType::Bool => "bool",
            DataType::IntArray => "int[]",
            DataType::LongArray => "long[]",
            DataType::DoubleArray => "double[]",
            DataType::BoolArray => "bool[]",
            DataType::None => "none",
        };
        write!(f, "{}", name)
    }
}

/// Literal value stored in the AST.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i32),
    Long(i64),
    Double(f64),
    Bool(bool),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int(_) => DataType::Int,
            Value::Long(_) => DataType::Long,
            Value::Double(_) => DataType::Double,
            Value::Bool(_) => DataType::Bool,
        }
    }

    /// Integer view used by the bound domain. Booleans map to 0/1 and
    /// doubles truncate toward zero.
    pub fn as_i64(&self) -> i64 {
        match self {
            Value::Int(v) => *v as i64,
            Value::Long(v) => *v,
            Value::Double(v) => *v as i64,
            Value::Bool(b) => *b as i64,
        }
    }

    /// Coerce to `expected`. Int to Long widening is the only implicit
    /// conversion; anything else that differs is a type mismatch.
    pub fn specialize(self, expected: DataType) -> Result<Value> {
        match (self, expected) {
            (v, t) if v.data_type() == t => Ok(v),
            (Value::Int(v), DataType::Long) => Ok(Value::Long(v as i64)),
            (v, t) => Err(AnalysisError::TypeMismatch {
                expected: t,
                found: v.data_type(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}L", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
        }
    }
}
