//! Per-session analysis state.
//!
//! An `AnalysisContext` owns everything one loop-nest analysis accumulates:
//! constants, registered targets, symbolic and resolved bounds, verdicts and
//! the array-value scan cache. Nothing here is shared between sessions.

use log::debug;
use serde::Serialize;
use std::collections::HashMap;

use crate::array::ArrayBinding;
use crate::ast::{Ast, LoopId, Node, NodeId};
use crate::bounds::Bound;
use crate::config::AnalysisConfig;
use crate::loop_info::ResolvedRange;
use crate::types::DataType;

/// A node to verify together with its enclosing loops, outermost first.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckTarget {
    pub node: NodeId,
    pub loops: Vec<LoopId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Uniqueness {
    Unknown,
    Unique,
    Repeated,
}

/// Result of scanning an array's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValueBound {
    pub min: i64,
    pub max: i64,
    pub uniqueness: Uniqueness,
}

/// Scan results keyed by storage identity. An identity is scanned once, plus
/// at most once more when a later caller asks for uniqueness the first scan
/// skipped.
#[derive(Debug, Default)]
pub struct ArrayValueCache {
    entries: HashMap<usize, ValueBound>,
    scans: usize,
}

impl ArrayValueCache {
    pub fn get_or_scan(&mut self, binding: &ArrayBinding, check_unique: bool) -> Option<ValueBound> {
        let identity = binding.identity()?;
        if let Some(found) = self.entries.get(&identity) {
            if !check_unique || found.uniqueness != Uniqueness::Unknown {
                return Some(*found);
            }
        }
        let values = binding.storage.as_ref()?.values();
        let min = *values.iter().min()?;
        let max = *values.iter().max()?;
        let uniqueness = if check_unique {
            let mut sorted = values.to_vec();
            sorted.sort_unstable();
            if sorted.windows(2).any(|w| w[0] == w[1]) {
                Uniqueness::Repeated
            } else {
                Uniqueness::Unique
            }
        } else {
            Uniqueness::Unknown
        };
        self.scans += 1;
        debug!(
            "scanned array '{}': [{}, {}] {:?}",
            binding.name, min, max, uniqueness
        );
        let bound = ValueBound {
            min,
            max,
            uniqueness,
        };
        self.entries.insert(identity, bound);
        Some(bound)
    }

    pub fn get(&self, binding: &ArrayBinding) -> Option<ValueBound> {
        binding.identity().and_then(|id| self.entries.get(&id).copied())
    }

    /// Number of scans performed so far.
    pub fn scan_count(&self) -> usize {
        self.scans
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.scans = 0;
    }
}

#[derive(Debug, Default)]
pub struct AnalysisContext {
    pub config: AnalysisConfig,
    pub constants: HashMap<String, i64>,
    /// Loops of the session in definition order.
    pub loops: Vec<LoopId>,
    pub accesses: Vec<CheckTarget>,
    pub overflow_checks: Vec<CheckTarget>,
    pub loop_bounds: HashMap<LoopId, Bound>,
    pub runtime_ranges: HashMap<LoopId, ResolvedRange>,
    pub access_bounds: HashMap<NodeId, Vec<Bound>>,
    pub overflow_bounds: HashMap<NodeId, Bound>,
    /// Per access, one "requires runtime check" flag per dimension.
    pub access_verdicts: HashMap<NodeId, Vec<bool>>,
    pub overflow_verdicts: HashMap<NodeId, bool>,
    pub array_values: ArrayValueCache,
    /// Most negative index literal observed by the finalizer.
    pub minimum_value: i64,
}

impl AnalysisContext {
    pub fn new(config: AnalysisConfig) -> Self {
        AnalysisContext {
            config,
            ..Default::default()
        }
    }

    pub fn set_constant(&mut self, name: impl Into<String>, value: i64) {
        self.constants.insert(name.into(), value);
    }

    pub fn add_access(&mut self, node: NodeId, loops: Vec<LoopId>) {
        self.accesses.push(CheckTarget { node, loops });
    }

    pub fn add_overflow_check(&mut self, node: NodeId, loops: Vec<LoopId>) {
        self.overflow_checks.push(CheckTarget { node, loops });
    }

    /// Register every loop, array access and integer arithmetic node under `root`.
    pub fn register_region(&mut self, ast: &Ast, root: NodeId) {
        let mut stack = Vec::new();
        self.register_node(ast, root, &mut stack);
        debug!(
            "registered region {}: {} loops, {} accesses, {} overflow checks",
            root,
            self.loops.len(),
            self.accesses.len(),
            self.overflow_checks.len()
        );
    }

    fn register_node(&mut self, ast: &Ast, id: NodeId, stack: &mut Vec<LoopId>) {
        let node = ast.node(id);
        match node {
            Node::For { info, body } => {
                self.loops.push(*info);
                stack.push(*info);
                self.register_node(ast, *body, stack);
                stack.pop();
                return;
            }
            Node::ArrayAccess { .. } => self.add_access(id, stack.clone()),
            Node::BinOp { op, ty, .. }
                if op.is_arithmetic() && matches!(ty, DataType::Int | DataType::Long) =>
            {
                self.add_overflow_check(id, stack.clone())
            }
            _ => {}
        }
        for child in node.children() {
            self.register_node(ast, child, stack);
        }
    }

    /// Resolved `(start, stop, step)` of a loop: its simple range, or the
    /// runtime range cached by the finalizer.
    pub fn resolved_range(&self, ast: &Ast, loop_id: LoopId) -> Option<ResolvedRange> {
        ast.loop_info(loop_id)
            .simple_range()
            .or_else(|| self.runtime_ranges.get(&loop_id).copied())
    }

    /// Whether the access or overflow-checked node must keep its runtime check.
    /// `None` if the node was never verified.
    pub fn requires_runtime_check(&self, node: NodeId) -> Option<bool> {
        if let Some(dims) = self.access_verdicts.get(&node) {
            return Some(dims.iter().any(|&r| r));
        }
        self.overflow_verdicts.get(&node).copied()
    }

    pub fn access_verdict(&self, node: NodeId) -> Option<&[bool]> {
        self.access_verdicts.get(&node).map(|v| v.as_slice())
    }

    /// Drop every derived result, keeping constants and registered targets.
    pub fn reset(&mut self) {
        self.loop_bounds.clear();
        self.runtime_ranges.clear();
        self.access_bounds.clear();
        self.overflow_bounds.clear();
        self.access_verdicts.clear();
        self.overflow_verdicts.clear();
        self.array_values.reset();
        self.minimum_value = 0;
    }
}
