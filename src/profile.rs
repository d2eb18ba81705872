//! Static cost profiling of loop bodies.
//!
//! A top-down walk counts operations weighted by how often they are expected
//! to run: loop bodies multiply the weight by the trip count, conditional
//! branches divide it by the branch fan-out. The resulting profile feeds a
//! simple weighted cost model that decides whether offloading pays off.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::ast::{Ast, BinOpKind, MathFn, Node, NodeId};
use crate::context::AnalysisContext;

/// Expected operation counts of one loop nest.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeProfile {
    pub binary_op_count: BTreeMap<BinOpKind, f64>,
    pub math_func_count: BTreeMap<MathFn, f64>,
    pub binary_ops: f64,
    pub math_funcs: f64,
    pub assign_count: f64,
    pub if_count: f64,
    pub break_count: f64,
    pub for_count: f64,
    pub array_access_count: f64,
    /// Trip count of the outermost loop, when known.
    pub iterations: Option<i64>,
    pub for_per_iter: f64,
    pub if_per_iter: f64,
    pub binary_op_per_iter: f64,
    pub array_access_per_iter: f64,
}

impl NodeProfile {
    /// Accumulate `other` into `self`. Per-iteration figures add up as well.
    pub fn merge(&mut self, other: &NodeProfile) {
        for (op, n) in &other.binary_op_count {
            *self.binary_op_count.entry(*op).or_insert(0.0) += n;
        }
        for (f, n) in &other.math_func_count {
            *self.math_func_count.entry(*f).or_insert(0.0) += n;
        }
        self.binary_ops += other.binary_ops;
        self.math_funcs += other.math_funcs;
        self.assign_count += other.assign_count;
        self.if_count += other.if_count;
        self.break_count += other.break_count;
        self.for_count += other.for_count;
        self.array_access_count += other.array_access_count;
        self.for_per_iter += other.for_per_iter;
        self.if_per_iter += other.if_per_iter;
        self.binary_op_per_iter += other.binary_op_per_iter;
        self.array_access_per_iter += other.array_access_per_iter;
        self.iterations = match (self.iterations, other.iterations) {
            (Some(a), Some(b)) => Some(a.saturating_add(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Sum the profiles of several loop nests.
pub fn summarize(profiles: &[NodeProfile]) -> NodeProfile {
    let mut total = NodeProfile::default();
    for p in profiles {
        total.merge(p);
    }
    total
}

pub struct CostProfiler<'a> {
    ast: &'a Ast,
    ctx: &'a AnalysisContext,
    fanout: f64,
    multiplier: f64,
    profile: NodeProfile,
}

impl<'a> CostProfiler<'a> {
    pub fn new(ast: &'a Ast, ctx: &'a AnalysisContext) -> Self {
        CostProfiler {
            ast,
            ctx,
            fanout: ctx.config.branch_fanout.max(1) as f64,
            multiplier: 1.0,
            profile: NodeProfile::default(),
        }
    }

    pub fn profile(mut self, root: NodeId) -> NodeProfile {
        self.visit(root);
        let iterations = match self.ast.node(root) {
            Node::For { info, .. } => self
                .ctx
                .resolved_range(self.ast, *info)
                .and_then(|r| r.iteration_count()),
            _ => None,
        };
        let per = match iterations {
            Some(n) if n > 0 => n as f64,
            _ => 1.0,
        };
        let mut profile = self.profile;
        profile.iterations = iterations;
        profile.for_per_iter = profile.for_count / per;
        profile.if_per_iter = profile.if_count / per;
        profile.binary_op_per_iter = profile.binary_ops / per;
        profile.array_access_per_iter = profile.array_access_count / per;
        profile
    }

    fn visit_all(&mut self, ids: &[NodeId]) {
        for &id in ids {
            self.visit(id);
        }
    }

    fn visit(&mut self, id: NodeId) {
        let m = self.multiplier;
        match self.ast.node(id) {
            Node::Literal { .. } | Node::Var { .. } => {}
            Node::BinOp { op, left, right, .. } => {
                self.profile.binary_ops += m;
                *self.profile.binary_op_count.entry(*op).or_insert(0.0) += m;
                self.visit(*left);
                self.visit(*right);
            }
            Node::UnaryOp { operand, .. } => self.visit(*operand),
            Node::ArrayAccess { indices, .. } => {
                self.profile.array_access_count += m;
                self.visit_all(indices);
            }
            // min/max lower to a compare-and-select
            Node::Builtin { args, .. } => {
                self.profile.if_count += m;
                self.visit_all(args);
            }
            Node::Math { func, args, .. } => {
                self.profile.math_funcs += m;
                *self.profile.math_func_count.entry(*func).or_insert(0.0) += m;
                self.visit_all(args);
            }
            Node::If {
                cond, then, orelse, ..
            } => {
                self.profile.if_count += m;
                self.visit(*cond);
                self.multiplier = m / self.fanout;
                self.visit(*then);
                if let Some(e) = orelse {
                    self.visit(*e);
                }
                self.multiplier = m;
            }
            Node::For { info, body } => {
                self.profile.for_count += m;
                let trips = self
                    .ctx
                    .resolved_range(self.ast, *info)
                    .and_then(|r| r.iteration_count());
                if let Some(n) = trips.filter(|&n| n > 0) {
                    self.multiplier = m * n as f64;
                }
                self.visit(*body);
                self.multiplier = m;
            }
            Node::While { cond, body } => {
                self.visit(*cond);
                self.visit(*body);
            }
            Node::Block { stmts } => self.visit_all(stmts),
            Node::Assign { target, value } => {
                self.profile.assign_count += m;
                self.visit(*target);
                self.visit(*value);
            }
            Node::Call { args, .. } => self.visit_all(args),
            Node::Return { value } => self.visit(*value),
            Node::Break => self.profile.break_count += m,
        }
    }
}

/// Weighted operation-count cost model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostModel {
    pub arith_weight: f64,
    /// Division and modulo.
    pub division_weight: f64,
    pub math_weight: f64,
    pub memory_weight: f64,
    pub branch_weight: f64,
    pub threshold: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        CostModel {
            arith_weight: 1.0,
            division_weight: 4.0,
            math_weight: 8.0,
            memory_weight: 2.0,
            branch_weight: 1.0,
            threshold: 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffloadDecision {
    pub estimate: f64,
    pub threshold: f64,
    pub offload: bool,
}

impl CostModel {
    pub fn with_threshold(threshold: u64) -> Self {
        CostModel {
            threshold: threshold as f64,
            ..CostModel::default()
        }
    }

    pub fn estimate(&self, profile: &NodeProfile) -> f64 {
        let divisions: f64 = profile
            .binary_op_count
            .iter()
            .filter(|(op, _)| op.is_division())
            .map(|(_, n)| n)
            .sum();
        let plain = profile.binary_ops - divisions;
        plain * self.arith_weight
            + divisions * self.division_weight
            + profile.math_funcs * self.math_weight
            + profile.array_access_count * self.memory_weight
            + (profile.if_count + profile.for_count) * self.branch_weight
    }

    pub fn decide(&self, profile: &NodeProfile) -> OffloadDecision {
        let estimate = self.estimate(profile);
        OffloadDecision {
            estimate,
            threshold: self.threshold,
            offload: estimate >= self.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{ArrayBinding, ArrayInfo};
    use crate::config::AnalysisConfig;
    use crate::loop_info::LoopInfo;
    use crate::types::DataType;
    use std::sync::Arc;

    /// for i in 0..100 { if c { A[i] = A[i] + 1 } else { A[i] = A[i] / 2 } }
    fn branchy_loop() -> (Ast, NodeId) {
        let mut ast = Ast::new();
        let info = Arc::new(ArrayInfo::new(DataType::IntArray, &[100]).unwrap());
        let a = ast.add_array(ArrayBinding::new("A", info));
        let i = ast.var("i", DataType::Int);
        let c = ast.var("c", DataType::Bool);
        let one = ast.int(1);
        let two = ast.int(2);

        let r1 = ast.access(a, vec![i]);
        let add = ast.binop(BinOpKind::Add, r1, one);
        let w1 = ast.access(a, vec![i]);
        let then = ast.assign(w1, add);

        let r2 = ast.access(a, vec![i]);
        let div = ast.binop(BinOpKind::Div, r2, two);
        let w2 = ast.access(a, vec![i]);
        let orelse = ast.assign(w2, div);

        let branch = ast.if_else(c, then, Some(orelse));
        let (_, root) = ast.for_loop(LoopInfo::simple("i", 0, 100, 1), branch);
        (ast, root)
    }

    #[test]
    fn test_loop_multiplies_and_branch_halves() {
        let (ast, root) = branchy_loop();
        let ctx = AnalysisContext::new(AnalysisConfig::default());
        let profile = CostProfiler::new(&ast, &ctx).profile(root);

        assert_eq!(profile.for_count, 1.0);
        assert_eq!(profile.if_count, 100.0);
        assert_eq!(profile.assign_count, 100.0);
        assert_eq!(profile.array_access_count, 200.0);
        assert_eq!(profile.binary_ops, 100.0);
        assert_eq!(profile.binary_op_count[&BinOpKind::Div], 50.0);
        assert_eq!(profile.iterations, Some(100));
        assert_eq!(profile.array_access_per_iter, 2.0);
        assert_eq!(profile.if_per_iter, 1.0);
    }

    #[test]
    fn test_unbounded_trip_count_profiles_once() {
        // for i in range(0, i64::MIN, -1) { A[0] = i }
        let mut ast = Ast::new();
        let info = Arc::new(ArrayInfo::new(DataType::LongArray, &[1]).unwrap());
        let a = ast.add_array(ArrayBinding::new("A", info));
        let i = ast.var("i", DataType::Long);
        let zero = ast.int(0);
        let target = ast.access(a, vec![zero]);
        let stmt = ast.assign(target, i);
        let (_, root) = ast.for_loop(LoopInfo::simple("i", 0, i64::MIN, -1), stmt);

        let ctx = AnalysisContext::default();
        let profile = CostProfiler::new(&ast, &ctx).profile(root);
        assert_eq!(profile.iterations, None);
        assert_eq!(profile.assign_count, 1.0);
        assert_eq!(profile.array_access_per_iter, 1.0);
    }

    #[test]
    fn test_offload_decision() {
        let (ast, root) = branchy_loop();
        let ctx = AnalysisContext::default();
        let profile = CostProfiler::new(&ast, &ctx).profile(root);

        let model = CostModel::default();
        // 50 adds + 50 divisions * 4 + 200 accesses * 2 + 101 branches
        assert_eq!(model.estimate(&profile), 50.0 + 200.0 + 400.0 + 101.0);
        assert!(!model.decide(&profile).offload);
        assert!(CostModel::with_threshold(500).decide(&profile).offload);
    }

    #[test]
    fn test_summary_adds_profiles() {
        let (ast, root) = branchy_loop();
        let ctx = AnalysisContext::default();
        let p = CostProfiler::new(&ast, &ctx).profile(root);
        let total = summarize(&[p.clone(), p]);
        assert_eq!(total.assign_count, 200.0);
        assert_eq!(total.binary_op_count[&BinOpKind::Add], 100.0);
        assert_eq!(total.iterations, Some(200));
        assert!(serde_json::to_string(&total).unwrap().contains("\"binary_op_count\""));
    }
}
