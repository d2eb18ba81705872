//! Loop range descriptors.
//!
//! A loop either carries a simple `(start, stop, step)` range known when the
//! AST is built, or a symbolic range whose parts are expression nodes. Symbolic
//! ranges are resolved per session by the bound finalizer; the resolved value
//! lives in the session, never in the AST.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ast::NodeId;
use crate::types::DataType;

/// Concrete `(start, stop, step)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedRange {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl ResolvedRange {
    pub fn new(start: i64, stop: i64, step: i64) -> Self {
        ResolvedRange { start, stop, step }
    }

    /// `(stop - start) / step` rounded toward negative infinity.
    /// A zero step, or a span the step cannot divide without overflow, has no
    /// meaningful count.
    pub fn iteration_count(&self) -> Option<i64> {
        let span = self.stop.checked_sub(self.start)?;
        let quotient = span.checked_div(self.step)?;
        let rem = span.checked_rem(self.step)?;
        if rem != 0 && ((span < 0) != (self.step < 0)) {
            Some(quotient - 1)
        } else {
            Some(quotient)
        }
    }
}

impl fmt::Display for ResolvedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "range({}, {}, {})", self.start, self.stop, self.step)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum LoopRange {
    Simple {
        start: i64,
        stop: i64,
        step: i64,
    },
    /// Absent parts fall back to the matching entry of `defaults`.
    Symbolic {
        start: Option<NodeId>,
        stop: Option<NodeId>,
        step: Option<NodeId>,
        #[serde(default = "default_symbolic_parts")]
        defaults: [i64; 3],
    },
}

fn default_symbolic_parts() -> [i64; 3] {
    [0, 0, 1]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopInfo {
    /// Name of the induction variable.
    pub induction: String,
    #[serde(default = "default_induction_type")]
    pub ty: DataType,
    pub range: LoopRange,
}

fn default_induction_type() -> DataType {
    DataType::Int
}

impl LoopInfo {
    pub fn simple(induction: impl Into<String>, start: i64, stop: i64, step: i64) -> Self {
        LoopInfo {
            induction: induction.into(),
            ty: DataType::Int,
            range: LoopRange::Simple { start, stop, step },
        }
    }

    pub fn symbolic(
        induction: impl Into<String>,
        start: Option<NodeId>,
        stop: Option<NodeId>,
        step: Option<NodeId>,
    ) -> Self {
        LoopInfo {
            induction: induction.into(),
            ty: DataType::Int,
            range: LoopRange::Symbolic {
                start,
                stop,
                step,
                defaults: default_symbolic_parts(),
            },
        }
    }

    pub fn is_simple_range(&self) -> bool {
        matches!(self.range, LoopRange::Simple { .. })
    }

    pub fn simple_range(&self) -> Option<ResolvedRange> {
        match self.range {
            LoopRange::Simple { start, stop, step } => Some(ResolvedRange::new(start, stop, step)),
            LoopRange::Symbolic { .. } => None,
        }
    }
}
