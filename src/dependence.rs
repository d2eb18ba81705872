//! Loop-carried dependence analysis.
//!
//! Lowers a loop nest from the AST into an oracle request, submits it, and
//! combines the answer with a flow-dependence cycle check and an array
//! aliasing check into one verdict per loop. Every loop starts out suspect;
//! only loops the oracle proves independent can become safe.

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::ast::{Ast, LoopId, Node, NodeId};
use crate::context::AnalysisContext;
use crate::cycle::DependencyGraph;
use crate::error::{AnalysisError, Result};
use crate::loop_info::LoopRange;
use crate::oracle::{DependenceOracle, DependenceResult, LoopNest, OracleExpr, OracleLoop, OracleStmt};

/// Parallelization verdict for one loop of a nest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParallelVerdict {
    pub label: String,
    #[serde(skip)]
    pub loop_id: LoopId,
    pub independent: bool,
    pub safe_to_parallelize: bool,
    pub reason: String,
}

/// Outcome of testing one loop nest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NestDependences {
    /// Outermost loop first.
    pub loops: Vec<ParallelVerdict>,
    /// `(source, sink)` pairs rendered as source text.
    pub flow_dependences: Vec<(String, String)>,
    pub cyclic: bool,
}

impl NestDependences {
    pub fn verdict(&self, loop_id: LoopId) -> Option<&ParallelVerdict> {
        self.loops.iter().find(|v| v.loop_id == loop_id)
    }

    pub fn is_safe(&self, loop_id: LoopId) -> bool {
        self.verdict(loop_id).map_or(false, |v| v.safe_to_parallelize)
    }
}

pub struct DependenceAnalyzer<'a> {
    ast: &'a Ast,
    ctx: &'a AnalysisContext,
    loop_labels: BTreeMap<String, LoopId>,
    stmt_labels: HashMap<String, NodeId>,
    locals: BTreeSet<String>,
}

impl<'a> DependenceAnalyzer<'a> {
    pub fn new(ast: &'a Ast, ctx: &'a AnalysisContext) -> Self {
        DependenceAnalyzer {
            ast,
            ctx,
            loop_labels: BTreeMap::new(),
            stmt_labels: HashMap::new(),
            locals: BTreeSet::new(),
        }
    }

    /// Translate the `for` node `root` and everything nested in it.
    pub fn lower(&mut self, root: NodeId) -> Result<LoopNest> {
        self.loop_labels.clear();
        self.stmt_labels.clear();
        self.locals.clear();

        let lowered = match self.ast.node(root) {
            Node::For { info, body } => self.lower_loop(*info, *body)?,
            other => {
                return Err(AnalysisError::coverage(
                    self.ast.describe(root),
                    format!("dependence analysis needs a for loop, got a {}", other.kind_name()),
                ))
            }
        };
        Ok(LoopNest {
            root: lowered,
            locals: self.locals.iter().cloned().collect(),
            constants: self
                .ctx
                .constants
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        })
    }

    fn lower_loop(&mut self, loop_id: LoopId, body: NodeId) -> Result<OracleLoop> {
        let label = format!("for_{}", loop_id);
        self.loop_labels.insert(label.clone(), loop_id);
        let info = self.ast.loop_info(loop_id);

        // shift the iteration space so negative subscripts become non-negative
        let shift = (-self.ctx.minimum_value).max(0);
        let (start, stop, step) = match (self.ctx.resolved_range(self.ast, loop_id), &info.range) {
            (Some(r), _) => (
                OracleExpr::literal(r.start.saturating_add(shift)),
                OracleExpr::literal(r.stop.saturating_add(shift)),
                OracleExpr::literal(r.step),
            ),
            (
                None,
                LoopRange::Symbolic {
                    start,
                    stop,
                    step,
                    defaults,
                },
            ) => {
                let mut parts = Vec::with_capacity(3);
                for (part, default) in [start, stop, step].into_iter().zip(defaults.iter()) {
                    parts.push(match part {
                        Some(node) => self.lower_expr(*node)?,
                        None => OracleExpr::literal(*default),
                    });
                }
                let step = parts.pop().unwrap_or(OracleExpr::literal(1));
                let stop = parts.pop().unwrap_or(OracleExpr::literal(0));
                let start = parts.pop().unwrap_or(OracleExpr::literal(0));
                (start, stop, step)
            }
            (None, LoopRange::Simple { start, stop, step }) => (
                OracleExpr::literal(*start),
                OracleExpr::literal(*stop),
                OracleExpr::literal(*step),
            ),
        };

        Ok(OracleLoop {
            label,
            induction: info.induction.clone(),
            start,
            stop,
            step,
            body: self.lower_block(body)?,
        })
    }

    fn lower_block(&mut self, id: NodeId) -> Result<Vec<OracleStmt>> {
        match self.ast.node(id) {
            Node::Block { stmts } => {
                let mut out = Vec::with_capacity(stmts.len());
                for &s in stmts {
                    out.extend(self.lower_block(s)?);
                }
                Ok(out)
            }
            _ => Ok(vec![self.lower_stmt(id)?]),
        }
    }

    fn stmt_label(&mut self, id: NodeId) -> String {
        let label = format!("S_{}", id);
        self.stmt_labels.insert(label.clone(), id);
        label
    }

    fn lower_stmt(&mut self, id: NodeId) -> Result<OracleStmt> {
        match self.ast.node(id) {
            Node::For { info, body } => Ok(OracleStmt::For(self.lower_loop(*info, *body)?)),
            Node::Assign { target, value } => {
                if let Node::Var { name, .. } = self.ast.node(*target) {
                    self.locals.insert(name.clone());
                }
                let label = self.stmt_label(id);
                Ok(OracleStmt::Assign {
                    label,
                    target: self.lower_expr(*target)?,
                    value: self.lower_expr(*value)?,
                })
            }
            Node::If {
                cond, then, orelse, ..
            } => {
                let label = self.stmt_label(id);
                let cond = self.lower_expr(*cond)?;
                let then = self.lower_block(*then)?;
                let orelse = match orelse {
                    Some(e) => self.lower_block(*e)?,
                    None => Vec::new(),
                };
                Ok(OracleStmt::If {
                    label,
                    cond,
                    then,
                    orelse,
                })
            }
            Node::Break => Ok(OracleStmt::Break {
                label: self.stmt_label(id),
            }),
            Node::While { .. } | Node::Return { .. } | Node::Block { .. } => Err(AnalysisError::coverage(
                self.ast.describe(id),
                "statement cannot be expressed to the dependence oracle",
            )),
            _ => {
                let label = self.stmt_label(id);
                Ok(OracleStmt::Expr {
                    label,
                    expr: self.lower_expr(id)?,
                })
            }
        }
    }

    fn lower_expr(&mut self, id: NodeId) -> Result<OracleExpr> {
        let lowered = match self.ast.node(id) {
            Node::Literal { value } => OracleExpr::literal(value.as_i64()),
            Node::Var { name, .. } => OracleExpr::var(name),
            Node::BinOp { op, left, right, .. } => OracleExpr::Binary {
                op: *op,
                lhs: Box::new(self.lower_expr(*left)?),
                rhs: Box::new(self.lower_expr(*right)?),
            },
            Node::UnaryOp { op, operand, .. } => OracleExpr::Unary {
                op: *op,
                operand: Box::new(self.lower_expr(*operand)?),
            },
            Node::ArrayAccess { array, indices } => OracleExpr::Subscript {
                array: self.ast.array(*array).name.clone(),
                indices: self.lower_list(indices)?,
            },
            Node::Builtin { kind, args, .. } => OracleExpr::Intrinsic {
                name: kind.name().to_string(),
                args: self.lower_list(args)?,
            },
            Node::Math { func, args, .. } => OracleExpr::Intrinsic {
                name: func.name().to_string(),
                args: self.lower_list(args)?,
            },
            Node::If {
                cond,
                then,
                orelse: Some(orelse),
                ..
            } => OracleExpr::Ternary {
                cond: Box::new(self.lower_expr(*cond)?),
                then: Box::new(self.lower_expr(*then)?),
                orelse: Box::new(self.lower_expr(*orelse)?),
            },
            Node::Call { function, args } => OracleExpr::Call {
                name: self.ast.function(*function).name.clone(),
                args: self.lower_list(args)?,
            },
            other => {
                return Err(AnalysisError::coverage(
                    self.ast.describe(id),
                    format!("{} is not an expression", other.kind_name()),
                ))
            }
        };
        Ok(lowered)
    }

    fn lower_list(&mut self, ids: &[NodeId]) -> Result<Vec<OracleExpr>> {
        ids.iter().map(|&a| self.lower_expr(a)).collect()
    }

    /// Two names sharing one backing storage, with at least one written in the loop.
    pub fn reference_collision(&self, root: NodeId) -> Option<String> {
        let mut used: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
        let mut written: BTreeSet<String> = BTreeSet::new();
        self.collect_refs(root, false, &mut used, &mut written);

        for names in used.values() {
            if names.len() > 1 && names.iter().any(|n| written.contains(n)) {
                let listed: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
                return Some(format!(
                    "arrays {} share storage and one is written",
                    listed.join(", ")
                ));
            }
        }
        None
    }

    fn collect_refs(
        &self,
        id: NodeId,
        is_target: bool,
        used: &mut BTreeMap<usize, BTreeSet<String>>,
        written: &mut BTreeSet<String>,
    ) {
        let node = self.ast.node(id);
        if let Node::ArrayAccess { array, indices } = node {
            let binding = self.ast.array(*array);
            if let Some(identity) = binding.identity() {
                used.entry(identity).or_default().insert(binding.name.clone());
            }
            if is_target {
                written.insert(binding.name.clone());
            }
            for &idx in indices {
                self.collect_refs(idx, false, used, written);
            }
            return;
        }
        if let Node::Assign { target, value } = node {
            self.collect_refs(*target, true, used, written);
            self.collect_refs(*value, false, used, written);
            return;
        }
        for child in node.children() {
            self.collect_refs(child, false, used, written);
        }
    }

    /// Submit the nest rooted at `root` to `oracle` and derive per-loop verdicts.
    ///
    /// Oracle failures are logged and treated as "nothing proven independent".
    pub fn test_dependence(&mut self, oracle: &dyn DependenceOracle, root: NodeId) -> Result<NestDependences> {
        let nest = self.lower(root)?;
        let labels = nest.loop_labels();
        let mut suspects: BTreeSet<String> = labels.iter().cloned().collect();

        let result = match oracle.test(&nest) {
            Ok(result) => result,
            Err(e) => {
                warn!("{} oracle failed on {}: {}", oracle.name(), nest.root.label, e);
                DependenceResult::default()
            }
        };
        for label in &result.independent_loops {
            suspects.remove(label);
        }

        let mut graph = DependencyGraph::new();
        let mut flows = Vec::with_capacity(result.flow_dependences.len());
        for (source, sink) in &result.flow_dependences {
            graph.add_edge(source, sink);
            let pair = (self.render_label(source), self.render_label(sink));
            warn!("Flow dependence exist: {} -> {}", pair.0, pair.1);
            flows.push(pair);
        }
        let cycle = graph.find_cycle();
        let collision = self.reference_collision(root);

        let mut loops = Vec::with_capacity(labels.len());
        for label in labels {
            let loop_id = match self.loop_labels.get(&label) {
                Some(&id) => id,
                None => continue,
            };
            let independent = !suspects.contains(&label);
            let reason = if !independent {
                "loop carries a dependence".to_string()
            } else if let Some(c) = &collision {
                c.clone()
            } else if let Some(c) = &cycle {
                format!("cyclic flow dependence {}", c.join(" -> "))
            } else {
                String::new()
            };
            let safe = reason.is_empty();
            debug!("{}: {}", label, if safe { "parallel" } else { reason.as_str() });
            loops.push(ParallelVerdict {
                label,
                loop_id,
                independent,
                safe_to_parallelize: safe,
                reason,
            });
        }

        info!(
            "{}: {} of {} loops safe to parallelize",
            nest.root.label,
            loops.iter().filter(|v| v.safe_to_parallelize).count(),
            loops.len()
        );
        Ok(NestDependences {
            loops,
            flow_dependences: flows,
            cyclic: cycle.is_some(),
        })
    }

    fn render_label(&self, label: &str) -> String {
        match self.stmt_labels.get(label) {
            Some(&node) => self.ast.describe(node),
            None => label.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{ArrayBinding, ArrayInfo, ArrayStorage};
    use crate::ast::BinOpKind;
    use crate::config::AnalysisConfig;
    use crate::loop_info::LoopInfo;
    use crate::oracle::{StaticOracle, SubscriptOracle};
    use crate::types::DataType;
    use std::sync::Arc;

    fn int_array(ast: &mut Ast, name: &str, n: i64) -> crate::ast::ArrayId {
        let info = Arc::new(ArrayInfo::new(DataType::IntArray, &[n]).unwrap());
        ast.add_array(ArrayBinding::new(name, info))
    }

    #[test]
    fn test_lowering_labels_and_shift() {
        let mut ast = Ast::new();
        let a = int_array(&mut ast, "A", 10);
        let i = ast.var("i", DataType::Int);
        let read = ast.access(a, vec![i]);
        let write = ast.access(a, vec![i]);
        let stmt = ast.assign(write, read);
        let (loop_id, root) = ast.for_loop(LoopInfo::simple("i", 0, 10, 1), stmt);

        let mut ctx = AnalysisContext::new(AnalysisConfig::default());
        ctx.minimum_value = -2;
        let mut analyzer = DependenceAnalyzer::new(&ast, &ctx);
        let nest = analyzer.lower(root).unwrap();

        assert_eq!(nest.root.label, format!("for_{}", loop_id));
        assert_eq!(nest.root.start, OracleExpr::literal(2));
        assert_eq!(nest.root.stop, OracleExpr::literal(12));
        match &nest.root.body[0] {
            OracleStmt::Assign { label, .. } => assert_eq!(label, &format!("S_{}", stmt)),
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_fail_closed_on_dependent_oracle() {
        let mut ast = Ast::new();
        let c = int_array(&mut ast, "C", 10);
        let i = ast.var("i", DataType::Int);
        let lhs = ast.access(c, vec![i]);
        let rhs = ast.access(c, vec![i]);
        let stmt = ast.assign(lhs, rhs);
        let (loop_id, root) = ast.for_loop(LoopInfo::simple("i", 0, 10, 1), stmt);

        let ctx = AnalysisContext::default();
        let mut analyzer = DependenceAnalyzer::new(&ast, &ctx);
        let deps = analyzer.test_dependence(&StaticOracle::dependent(), root).unwrap();
        assert!(!deps.is_safe(loop_id));

        let deps = analyzer.test_dependence(&SubscriptOracle, root).unwrap();
        assert!(deps.is_safe(loop_id));
    }

    #[test]
    fn test_shared_storage_blocks_parallelization() {
        let mut ast = Ast::new();
        let info = Arc::new(ArrayInfo::new(DataType::IntArray, &[10]).unwrap());
        let storage = Arc::new(ArrayStorage::new(vec![0; 10]));
        let a = ast.add_array(ArrayBinding::new("a", info.clone()).with_storage(storage.clone()));
        let b = ast.add_array(ArrayBinding::new("b", info).with_storage(storage));
        let i = ast.var("i", DataType::Int);
        let one = ast.int(1);
        let lhs = ast.access(a, vec![i]);
        let src = ast.access(b, vec![i]);
        let sum = ast.binop(BinOpKind::Add, src, one);
        let stmt = ast.assign(lhs, sum);
        let (loop_id, root) = ast.for_loop(LoopInfo::simple("i", 0, 10, 1), stmt);

        let ctx = AnalysisContext::default();
        let mut analyzer = DependenceAnalyzer::new(&ast, &ctx);
        assert!(analyzer.reference_collision(root).unwrap().contains("a, b"));
        let deps = analyzer.test_dependence(&StaticOracle::independent(), root).unwrap();
        let verdict = deps.verdict(loop_id).unwrap();
        assert!(verdict.independent);
        assert!(!verdict.safe_to_parallelize);
    }

    #[test]
    fn test_cyclic_flow_is_reported() {
        let mut ast = Ast::new();
        let a = int_array(&mut ast, "A", 10);
        let i = ast.var("i", DataType::Int);
        let lhs = ast.access(a, vec![i]);
        let rhs = ast.int(0);
        let stmt = ast.assign(lhs, rhs);
        let (loop_id, root) = ast.for_loop(LoopInfo::simple("i", 0, 10, 1), stmt);

        let ctx = AnalysisContext::default();
        let mut analyzer = DependenceAnalyzer::new(&ast, &ctx);
        let label = format!("S_{}", stmt);
        let oracle = StaticOracle::independent().with_flow(&label, &label);
        let deps = analyzer.test_dependence(&oracle, root).unwrap();
        assert!(deps.cyclic);
        assert!(!deps.is_safe(loop_id));
        assert_eq!(deps.flow_dependences[0].0, "A[i] = 0");
    }

    #[test]
    fn test_while_cannot_be_lowered() {
        let mut ast = Ast::new();
        let cond = ast.var("c", DataType::Bool);
        let brk = ast.brk();
        let w = ast.while_loop(cond, brk);
        let (_, root) = ast.for_loop(LoopInfo::simple("i", 0, 10, 1), w);

        let ctx = AnalysisContext::default();
        let mut analyzer = DependenceAnalyzer::new(&ast, &ctx);
        assert!(matches!(
            analyzer.test_dependence(&SubscriptOracle, root),
            Err(AnalysisError::Coverage { .. })
        ));
    }
}
