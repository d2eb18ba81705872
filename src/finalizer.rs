//! Bound finalizer and safety verifier.
//!
//! Re-evaluates the symbolic bounds of a session against constants, loop
//! ranges and scanned array contents, narrowing each to a literal, an interval
//! over literals, or `Fail`. Every registered access dimension and overflow
//! node then receives a "requires runtime check" verdict.
//!
//! In narrow mode verdicts are stored. In strict mode they are compared with
//! the stored ones, and a previously proven-safe node that now fails raises
//! [`AnalysisError::BoundInvalidated`].

use log::{debug, info};
use std::collections::HashMap;

use crate::ast::{ArrayId, Ast, BinOpKind, LoopId, Node};
use crate::bounds::{apply_binop, saturate, Bound};
use crate::context::AnalysisContext;
use crate::error::{AnalysisError, Result};
use crate::loop_info::ResolvedRange;
use crate::types::DataType;

/// Is every index reachable through `bound` inside `[0, size)`?
pub fn verify_single_bound(bound: &Bound, size: i64) -> bool {
    match bound {
        Bound::Literal { value, .. } => *value >= 0 && *value < size,
        Bound::Limit { min, max, .. } => {
            verify_single_bound(min, size) && verify_single_bound(max, size)
        }
        Bound::Either { then, orelse, .. } => {
            verify_single_bound(then, size) && verify_single_bound(orelse, size)
        }
        _ => false,
    }
}

/// Does no reachable literal touch the `lo`/`hi` extremes of the result type?
pub fn verify_overflow_bound(bound: &Bound, lo: i64, hi: i64) -> bool {
    match bound {
        Bound::Literal { value, .. } => *value != lo && *value != hi,
        Bound::Limit { min, max, .. } => {
            verify_overflow_bound(min, lo, hi) && verify_overflow_bound(max, lo, hi)
        }
        Bound::Either { then, orelse, .. } => {
            verify_overflow_bound(then, lo, hi) && verify_overflow_bound(orelse, lo, hi)
        }
        _ => false,
    }
}

fn lowest_literal(bound: &Bound) -> Option<i64> {
    match bound {
        Bound::Literal { value, .. } => Some(*value),
        Bound::Limit { min, max, .. } => min_of(lowest_literal(min), lowest_literal(max)),
        Bound::Either { then, orelse, .. } => min_of(lowest_literal(then), lowest_literal(orelse)),
        _ => None,
    }
}

fn min_of(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

pub struct BoundFinalizer<'a> {
    ast: &'a Ast,
    ctx: &'a mut AnalysisContext,
    /// Cleared by evaluation when the current check cannot be proven.
    is_safe: bool,
    current_loops: Vec<LoopId>,
    param_scopes: Vec<HashMap<String, Bound>>,
    resolving: Vec<LoopId>,
}

impl<'a> BoundFinalizer<'a> {
    pub fn new(ast: &'a Ast, ctx: &'a mut AnalysisContext) -> Self {
        BoundFinalizer {
            ast,
            ctx,
            is_safe: true,
            current_loops: Vec::new(),
            param_scopes: Vec::new(),
            resolving: Vec::new(),
        }
    }

    pub fn is_safe(&self) -> bool {
        self.is_safe
    }

    /// Verify every registered access and overflow node.
    ///
    /// With `just_verify` set, verdicts are compared against the stored ones
    /// instead of replacing them.
    pub fn bound_check(&mut self, just_verify: bool) -> Result<()> {
        self.reload_loop_infos();

        let accesses = self.ctx.accesses.clone();
        for target in &accesses {
            let (array, dims) = match self.ast.node(target.node) {
                Node::ArrayAccess { array, indices } => (*array, indices.len()),
                _ => continue,
            };
            let info = self.ast.array(array).info.clone();
            if dims != info.num_dimensions() {
                return Err(AnalysisError::coverage(
                    self.ast.describe(target.node),
                    format!(
                        "{} indices for a {}-dimensional array",
                        dims,
                        info.num_dimensions()
                    ),
                ));
            }

            let bounds = self.ctx.access_bounds.get(&target.node).cloned().unwrap_or_default();
            let mut verdict = Vec::with_capacity(dims);
            for dim in 0..dims {
                let requires_check = match (self.ctx.config.bound_check, bounds.get(dim)) {
                    (true, Some(bound)) => {
                        self.begin_check(&target.loops);
                        let resolved = self.evaluate(bound);
                        if let Some(low) = lowest_literal(&resolved) {
                            if low < self.ctx.minimum_value {
                                self.ctx.minimum_value = low;
                            }
                        }
                        let size = info.size(dim).unwrap_or(0);
                        let safe = self.is_safe && verify_single_bound(&resolved, size);
                        debug!(
                            "{} dim {}: {} within [0, {}) -> {}",
                            self.ast.describe(target.node),
                            dim,
                            resolved,
                            size,
                            if safe { "safe" } else { "check" }
                        );
                        !safe
                    }
                    _ => true,
                };
                verdict.push(requires_check);
            }

            if just_verify {
                if let Some(stored) = self.ctx.access_verdicts.get(&target.node) {
                    let regressed = stored.iter().zip(&verdict).any(|(&was, &now)| !was && now);
                    if regressed {
                        info!(
                            "access {} lost its proven bound",
                            self.ast.describe(target.node)
                        );
                        return Err(AnalysisError::BoundInvalidated);
                    }
                }
            } else {
                self.ctx.access_verdicts.insert(target.node, verdict);
            }
        }

        let overflow_checks = self.ctx.overflow_checks.clone();
        for target in &overflow_checks {
            let ty = self.ast.node_type(target.node);
            let requires_check = match (
                self.ctx.config.bound_check,
                ty.integer_limits(),
                self.ctx.overflow_bounds.get(&target.node).cloned(),
            ) {
                (_, None, _) => false,
                (true, Some((lo, hi)), Some(bound)) => {
                    self.begin_check(&target.loops);
                    let resolved = self.evaluate(&bound);
                    !(self.is_safe && verify_overflow_bound(&resolved, lo, hi))
                }
                _ => true,
            };

            if just_verify {
                if self.ctx.overflow_verdicts.get(&target.node) == Some(&false) && requires_check {
                    info!(
                        "expression {} may now overflow",
                        self.ast.describe(target.node)
                    );
                    return Err(AnalysisError::BoundInvalidated);
                }
            } else {
                self.ctx.overflow_verdicts.insert(target.node, requires_check);
            }
        }
        Ok(())
    }

    fn begin_check(&mut self, loops: &[LoopId]) {
        self.is_safe = true;
        self.current_loops = loops.to_vec();
        self.param_scopes.clear();
        self.resolving.clear();
    }

    /// Refresh the resolved range of every loop in the session.
    pub fn reload_loop_infos(&mut self) {
        let loops = self.ctx.loops.clone();
        for loop_id in loops {
            self.finalize_loop_info(loop_id);
        }
    }

    /// Resolved range of a loop, caching it when a symbolic range becomes concrete.
    pub fn finalize_loop_info(&mut self, loop_id: LoopId) -> Option<ResolvedRange> {
        let info = self.ast.loop_info(loop_id);
        if let Some(range) = info.simple_range() {
            return Some(range);
        }
        let parts = match self.ctx.loop_bounds.get(&loop_id).cloned() {
            Some(Bound::Range { start, stop, step }) => [*start, *stop, *step],
            _ => return None,
        };
        self.is_safe = true;
        let mut resolved = [0i64; 3];
        for (slot, part) in resolved.iter_mut().zip(parts.iter()) {
            *slot = self.evaluate(part).as_literal()?;
        }
        let range = ResolvedRange::new(resolved[0], resolved[1], resolved[2]);
        debug!("loop {} ({}) resolved to {}", loop_id, info.induction, range);
        self.ctx.runtime_ranges.insert(loop_id, range);
        Some(range)
    }

    /// Narrow `bound` to a literal, an interval over literals, or `Fail`.
    pub fn evaluate(&mut self, bound: &Bound) -> Bound {
        match bound {
            Bound::Literal { .. } => bound.clone(),
            Bound::Limit { min, max, ty } => {
                let lo = self.evaluate(min);
                let hi = self.evaluate(max);
                self.hull(&lo, &hi, *ty)
            }
            Bound::Either { then, orelse, ty } => {
                let t = self.evaluate(then);
                let e = self.evaluate(orelse);
                self.hull(&t, &e, *ty)
            }
            Bound::Range { start, stop, step } => {
                let start = self.evaluate(start);
                let stop = self.evaluate(stop);
                let step = self.evaluate(step);
                Bound::range(start, stop, step)
            }
            Bound::Variable { name, ty } => self.resolve_variable(name, *ty),
            Bound::BinOp {
                op,
                left,
                right,
                ty,
            } => {
                let l = self.evaluate(left);
                let r = self.evaluate(right);
                match (l.as_interval(), r.as_interval()) {
                    (Some(a), Some(b)) => self.interval_binop(a, *op, b, *ty),
                    _ => self.fail(),
                }
            }
            Bound::Builtin {
                kind,
                left,
                right,
                ty,
            } => {
                let l = self.evaluate(left);
                let r = self.evaluate(right);
                match (l.as_interval(), r.as_interval()) {
                    (Some((a_lo, a_hi)), Some((b_lo, b_hi))) => Bound::interval(
                        kind.apply(a_lo, b_lo),
                        kind.apply(a_hi, b_hi),
                        *ty,
                    ),
                    _ => self.fail(),
                }
            }
            Bound::Math { func, args, ty } => {
                let mut intervals = Vec::with_capacity(args.len());
                for arg in args {
                    match self.evaluate(arg).as_interval() {
                        Some((lo, hi)) => intervals.push((lo as f64, hi as f64)),
                        None => return self.fail(),
                    }
                }
                match func.apply_interval(&intervals) {
                    Some((lo, hi)) => Bound::interval(lo.floor() as i64, hi.ceil() as i64, *ty),
                    None => self.fail(),
                }
            }
            Bound::Call {
                params, ret, ..
            } => {
                let mut scope = HashMap::with_capacity(params.len());
                for (name, arg) in params {
                    let value = self.evaluate(arg);
                    scope.insert(name.clone(), value);
                }
                self.param_scopes.push(scope);
                let result = self.evaluate(ret);
                self.param_scopes.pop();
                result
            }
            Bound::Array { array, ty, .. } => self.array_value_bound(*array, *ty),
            Bound::Fail => self.fail(),
        }
    }

    fn fail(&mut self) -> Bound {
        self.is_safe = false;
        Bound::Fail
    }

    fn hull(&mut self, a: &Bound, b: &Bound, ty: DataType) -> Bound {
        match (a.as_interval(), b.as_interval()) {
            (Some((a_lo, a_hi)), Some((b_lo, b_hi))) => {
                // endpoints of a pointwise result may come out reversed
                let lo = a_lo.min(a_hi).min(b_lo).min(b_hi);
                let hi = a_lo.max(a_hi).max(b_lo).max(b_hi);
                Bound::interval(lo, hi, ty)
            }
            _ => self.fail(),
        }
    }

    /// Constants first, then induction variables of the enclosing loops
    /// (innermost first), then every other loop of the session.
    fn resolve_variable(&mut self, name: &str, ty: DataType) -> Bound {
        for scope in self.param_scopes.iter().rev() {
            if let Some(bound) = scope.get(name) {
                return bound.clone();
            }
        }
        if let Some(&value) = self.ctx.constants.get(name) {
            return Bound::literal(value, ty);
        }
        let ast = self.ast;
        let found = self
            .current_loops
            .iter()
            .rev()
            .chain(self.ctx.loops.iter().rev())
            .copied()
            .find(|&l| ast.loop_info(l).induction == name);
        match found {
            Some(loop_id) => self.induction_bound(loop_id),
            None => {
                debug!("unresolved variable '{}'", name);
                self.fail()
            }
        }
    }

    /// Values taken by the induction variable of `loop_id` across its iterations.
    fn induction_bound(&mut self, loop_id: LoopId) -> Bound {
        if self.resolving.contains(&loop_id) {
            return self.fail();
        }
        let ty = self.ast.loop_info(loop_id).ty;
        let (start, stop, step) = match self.ctx.loop_bounds.get(&loop_id).cloned() {
            Some(Bound::Range { start, stop, step }) => (*start, *stop, *step),
            _ => match self.ast.loop_info(loop_id).simple_range() {
                Some(r) => (
                    Bound::literal(r.start, ty),
                    Bound::literal(r.stop, ty),
                    Bound::literal(r.step, ty),
                ),
                None => return self.fail(),
            },
        };
        self.resolving.push(loop_id);
        let start = self.evaluate(&start).as_interval();
        let stop = self.evaluate(&stop).as_interval();
        let step = self.evaluate(&step).as_interval();
        self.resolving.pop();

        match (start, stop, step) {
            (Some((s_lo, _)), Some((_, t_hi)), Some((step_lo, _))) if step_lo > 0 => {
                Bound::interval(s_lo, t_hi.saturating_sub(1), ty)
            }
            (Some((_, s_hi)), Some((t_lo, _)), Some((_, step_hi))) if step_hi < 0 => {
                Bound::interval(t_lo.saturating_add(1), s_hi, ty)
            }
            _ => self.fail(),
        }
    }

    fn array_value_bound(&mut self, array: ArrayId, ty: DataType) -> Bound {
        let binding = self.ast.array(array);
        if !self.ctx.config.scan_array_min_max || !binding.is_scan_eligible() {
            return self.fail();
        }
        let check_unique = self.ctx.config.scan_array_uniqueness;
        match self.ctx.array_values.get_or_scan(binding, check_unique) {
            Some(found) => Bound::interval(found.min, found.max, ty),
            None => self.fail(),
        }
    }

    /// Literal arithmetic. Division or modulo by zero yields `v1` and marks
    /// the current check unsafe.
    pub fn calculate_bin_op(&mut self, v1: i64, op: BinOpKind, v2: i64) -> i64 {
        match apply_binop(v1, op, v2) {
            Some(v) => v,
            None => {
                self.is_safe = false;
                v1
            }
        }
    }

    /// Pairs endpoints by position: `[f(a.lo, b.lo), f(a.hi, b.hi)]`.
    ///
    /// This only encloses every value for operators monotonic in the same
    /// direction on both operands. A product of two sign-changing intervals
    /// or a remainder over a wide dividend can escape the result. A divisor
    /// interval that reaches zero marks the check unsafe.
    fn interval_binop(&mut self, a: (i64, i64), op: BinOpKind, b: (i64, i64), ty: DataType) -> Bound {
        let (a_lo, a_hi) = a;
        let (b_lo, b_hi) = b;
        if matches!(op, BinOpKind::Div | BinOpKind::Mod) && b_lo.min(b_hi) <= 0 && b_lo.max(b_hi) >= 0 {
            self.is_safe = false;
        }
        let lo = self.calculate_bin_op(a_lo, op, b_lo);
        let hi = self.calculate_bin_op(a_hi, op, b_hi);
        Bound::interval(saturate(lo, ty), saturate(hi, ty), ty)
    }
}
