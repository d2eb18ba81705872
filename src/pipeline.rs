//! Loop analysis pipeline.
//!
//! Drives every analysis over the candidate loop nests of a kernel and
//! collects one report per nest.
//!
//! # Pipeline Stages
//!
//! ## Stage 1: Registration
//! - **Input**: AST + candidate loop root
//! - **Output**: session context with loops, array accesses and overflow-checked expressions
//!
//! ## Stage 2: Bound Building
//! - **Input**: registered targets
//! - **Output**: symbolic bound trees (built once per session)
//!
//! ## Stage 3: Bound Finalization
//! - **Input**: symbolic bounds + constants
//! - **Output**: resolved loop ranges and "requires runtime check" verdicts
//!
//! ## Stage 4: Re-instantiation
//! - **Input**: new constant bindings
//! - **Output**: strict re-verification; sessions whose proven bounds no longer hold are
//!   rebuilt, up to `retry_limit` times
//!
//! ## Stage 5: Cost Profiling
//! - **Input**: AST + resolved ranges
//! - **Output**: operation profile and offload recommendation
//!
//! ## Stage 6: Dependence Analysis
//! - **Input**: loop nest + dependence oracle
//! - **Output**: per-loop "safe to parallelize" verdicts
//!
//! A coverage or type failure aborts only the nest that raised it; that nest
//! falls back to sequential execution and the others are still analyzed.
//!
//! # Usage
//! ```no_run
//! use loopguard::pipeline::AnalysisPipeline;
//! use loopguard::kernel::KernelFile;
//! use loopguard::AnalysisConfig;
//! use std::path::Path;
//!
//! let kernel = KernelFile::from_file(Path::new("kernel.json"))?.into_kernel()?;
//! let pipeline = AnalysisPipeline::new(AnalysisConfig::default());
//! for outcome in pipeline.analyze_kernel(&kernel) {
//!     println!("{:?}", outcome.report.map(|r| r.parallel_depth));
//! }
//! # Ok::<(), loopguard::AnalysisError>(())
//! ```

use log::{error, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;

use crate::ast::{Ast, Node, NodeId};
use crate::builder::BoundBuilder;
use crate::config::AnalysisConfig;
use crate::context::{AnalysisContext, ValueBound};
use crate::dependence::{DependenceAnalyzer, NestDependences};
use crate::error::{AnalysisError, Result};
use crate::finalizer::BoundFinalizer;
use crate::kernel::Kernel;
use crate::loop_info::ResolvedRange;
use crate::oracle::{DependenceOracle, SubscriptOracle};
use crate::profile::{CostModel, CostProfiler, NodeProfile, OffloadDecision};

/// Loops nested this deep below a parallel-safe root are still considered.
const MAX_PARALLEL_DEPTH: usize = 2;

// ============================================================================
// Session
// ============================================================================

/// Bound analysis state of one loop nest across range instantiations.
pub struct LoopSession<'a> {
    ast: &'a Ast,
    root: NodeId,
    ctx: AnalysisContext,
    retries: usize,
}

impl<'a> LoopSession<'a> {
    pub fn new(
        ast: &'a Ast,
        root: NodeId,
        config: AnalysisConfig,
        constants: &HashMap<String, i64>,
    ) -> Self {
        let mut ctx = AnalysisContext::new(config);
        ctx.constants = constants.clone();
        ctx.register_region(ast, root);
        LoopSession {
            ast,
            root,
            ctx,
            retries: 0,
        }
    }

    /// Build symbolic bounds from scratch and store narrow-mode verdicts.
    pub fn prepare(&mut self) -> Result<()> {
        self.ctx.reset();
        BoundBuilder::new(self.ast).build_session(&mut self.ctx)?;
        BoundFinalizer::new(self.ast, &mut self.ctx).bound_check(false)
    }

    /// Re-verify stored verdicts under new constant bindings, rebuilding the
    /// session when a proven bound no longer holds.
    pub fn instantiate(&mut self, constants: &HashMap<String, i64>) -> Result<()> {
        for (name, value) in constants {
            self.ctx.set_constant(name.clone(), *value);
        }
        loop {
            let checked = BoundFinalizer::new(self.ast, &mut self.ctx).bound_check(true);
            match checked {
                Err(AnalysisError::BoundInvalidated) if self.retries < self.ctx.config.retry_limit => {
                    self.retries += 1;
                    info!(
                        "rebuilding bounds of {} (retry {}/{})",
                        self.root, self.retries, self.ctx.config.retry_limit
                    );
                    self.prepare()?;
                }
                other => return other,
            }
        }
    }

    pub fn context(&self) -> &AnalysisContext {
        &self.ctx
    }

    pub fn retries(&self) -> usize {
        self.retries
    }
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub node: NodeId,
    pub text: String,
    pub requires_runtime_check: bool,
    /// Per-dimension verdicts for array accesses.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopRangeReport {
    pub induction: String,
    pub range: Option<ResolvedRange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannedArray {
    pub name: String,
    #[serde(flatten)]
    pub bound: ValueBound,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopReport {
    pub root: NodeId,
    pub accesses: Vec<CheckReport>,
    pub overflow_checks: Vec<CheckReport>,
    pub loops: Vec<LoopRangeReport>,
    pub scanned_arrays: Vec<ScannedArray>,
    pub minimum_index: i64,
    pub retries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependences: Option<NestDependences>,
    /// Leading nested loops that may run in parallel.
    pub parallel_depth: usize,
    pub profile: NodeProfile,
    pub offload: OffloadDecision,
}

impl LoopReport {
    pub fn requires_runtime_check(&self, node: NodeId) -> Option<bool> {
        self.accesses
            .iter()
            .chain(&self.overflow_checks)
            .find(|c| c.node == node)
            .map(|c| c.requires_runtime_check)
    }
}

/// Result for one candidate nest. `error` is set when the nest must run sequentially.
#[derive(Debug, Clone, Serialize)]
pub struct RegionOutcome {
    pub root: NodeId,
    pub report: Option<LoopReport>,
    pub error: Option<String>,
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct AnalysisPipeline {
    config: AnalysisConfig,
    oracle: Box<dyn DependenceOracle>,
}

impl AnalysisPipeline {
    pub fn new(config: AnalysisConfig) -> Self {
        AnalysisPipeline {
            config,
            oracle: Box::new(SubscriptOracle),
        }
    }

    pub fn with_oracle(mut self, oracle: Box<dyn DependenceOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze one loop nest: bounds, re-instantiations, profile and dependences.
    pub fn analyze_loop(
        &self,
        ast: &Ast,
        root: NodeId,
        constants: &HashMap<String, i64>,
        instantiations: &[HashMap<String, i64>],
    ) -> Result<LoopReport> {
        let mut session = LoopSession::new(ast, root, self.config.clone(), constants);
        session.prepare()?;
        for bindings in instantiations {
            session.instantiate(bindings)?;
        }
        let ctx = session.context();

        let profile = CostProfiler::new(ast, ctx).profile(root);
        let offload = CostModel::with_threshold(self.config.offload_threshold).decide(&profile);

        let (dependences, parallel_depth) = if self.config.check_dependencies {
            let deps = DependenceAnalyzer::new(ast, ctx).test_dependence(self.oracle.as_ref(), root)?;
            let depth = parallel_depth(ast, root, &deps);
            (Some(deps), depth)
        } else {
            (None, 0)
        };

        Ok(LoopReport {
            root,
            accesses: ctx
                .accesses
                .iter()
                .map(|t| CheckReport {
                    node: t.node,
                    text: ast.describe(t.node),
                    requires_runtime_check: ctx.requires_runtime_check(t.node).unwrap_or(true),
                    dimensions: ctx.access_verdict(t.node).map(|d| d.to_vec()).unwrap_or_default(),
                })
                .collect(),
            overflow_checks: ctx
                .overflow_checks
                .iter()
                .map(|t| CheckReport {
                    node: t.node,
                    text: ast.describe(t.node),
                    requires_runtime_check: ctx.requires_runtime_check(t.node).unwrap_or(true),
                    dimensions: Vec::new(),
                })
                .collect(),
            loops: ctx
                .loops
                .iter()
                .map(|&l| LoopRangeReport {
                    induction: ast.loop_info(l).induction.clone(),
                    range: ctx.resolved_range(ast, l),
                })
                .collect(),
            scanned_arrays: ast
                .arrays()
                .iter()
                .filter_map(|b| {
                    ctx.array_values.get(b).map(|bound| ScannedArray {
                        name: b.name.clone(),
                        bound,
                    })
                })
                .collect(),
            minimum_index: ctx.minimum_value,
            retries: session.retries(),
            dependences,
            parallel_depth,
            profile,
            offload,
        })
    }

    /// Analyze each root independently, concurrently when configured.
    pub fn analyze_regions(
        &self,
        ast: &Ast,
        roots: &[NodeId],
        constants: &HashMap<String, i64>,
        instantiations: &[HashMap<String, i64>],
    ) -> Vec<RegionOutcome> {
        let run = |&root: &NodeId| -> RegionOutcome {
            match self.analyze_loop(ast, root, constants, instantiations) {
                Ok(report) => RegionOutcome {
                    root,
                    report: Some(report),
                    error: None,
                },
                Err(e) => {
                    if e.is_fatal() {
                        warn!("{} falls back to sequential execution: {}", root, e);
                    } else {
                        error!("{} exhausted its bound retries: {}", root, e);
                    }
                    RegionOutcome {
                        root,
                        report: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        };

        if self.config.concurrent {
            roots.par_iter().map(run).collect()
        } else {
            roots.iter().map(run).collect()
        }
    }

    pub fn analyze_kernel(&self, kernel: &Kernel) -> Vec<RegionOutcome> {
        self.analyze_regions(
            &kernel.ast,
            &kernel.regions,
            &kernel.constants,
            &kernel.instantiations,
        )
    }
}

/// Number of leading, directly nested loops that are safe to parallelize.
fn parallel_depth(ast: &Ast, root: NodeId, deps: &NestDependences) -> usize {
    let mut depth = 0;
    let mut current = root;
    while depth < MAX_PARALLEL_DEPTH {
        let (info, body) = match ast.node(current) {
            Node::For { info, body } => (*info, *body),
            _ => break,
        };
        if !deps.is_safe(info) {
            break;
        }
        depth += 1;
        current = match ast.node(body) {
            Node::Block { stmts } if stmts.len() == 1 => stmts[0],
            _ => body,
        };
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{ArrayBinding, ArrayInfo};
    use crate::ast::BinOpKind;
    use crate::loop_info::LoopInfo;
    use crate::oracle::StaticOracle;
    use crate::types::DataType;
    use std::sync::Arc;

    /// for i in 0..n { for j in 0..8 { M[i][j] = M[i][j] * 2 } }
    fn matrix_kernel() -> (Ast, NodeId, NodeId) {
        let mut ast = Ast::new();
        let info = Arc::new(ArrayInfo::new(DataType::IntArray, &[16, 8]).unwrap());
        let m = ast.add_array(ArrayBinding::new("M", info));
        let i = ast.var("i", DataType::Int);
        let j = ast.var("j", DataType::Int);
        let n = ast.var("n", DataType::Int);
        let two = ast.int(2);
        let read = ast.access(m, vec![i, j]);
        let scaled = ast.binop(BinOpKind::Mul, read, two);
        let write = ast.access(m, vec![i, j]);
        let stmt = ast.assign(write, scaled);
        let (_, inner) = ast.for_loop(LoopInfo::simple("j", 0, 8, 1), stmt);
        let (_, outer) = ast.for_loop(LoopInfo::symbolic("i", None, Some(n), None), inner);
        (ast, outer, read)
    }

    fn constants(n: i64) -> HashMap<String, i64> {
        let mut c = HashMap::new();
        c.insert("n".to_string(), n);
        c
    }

    #[test]
    fn test_nested_loop_report() {
        let (ast, root, read) = matrix_kernel();
        let pipeline = AnalysisPipeline::new(AnalysisConfig::default());
        let report = pipeline.analyze_loop(&ast, root, &constants(16), &[]).unwrap();

        assert_eq!(report.requires_runtime_check(read), Some(false));
        assert_eq!(report.loops[0].range, Some(ResolvedRange::new(0, 16, 1)));
        assert_eq!(report.parallel_depth, 2);
        assert_eq!(report.profile.array_access_count, 256.0);
        assert_eq!(report.retries, 0);
    }

    #[test]
    fn test_instantiation_rebuilds_after_invalidation() {
        let (ast, root, read) = matrix_kernel();
        let pipeline = AnalysisPipeline::new(AnalysisConfig::default());
        let report = pipeline
            .analyze_loop(&ast, root, &constants(16), &[constants(32)])
            .unwrap();
        assert_eq!(report.retries, 1);
        assert_eq!(report.requires_runtime_check(read), Some(true));
    }

    #[test]
    fn test_retry_limit_zero_surfaces_invalidation() {
        let (ast, root, _) = matrix_kernel();
        let config = AnalysisConfig {
            retry_limit: 0,
            ..AnalysisConfig::default()
        };
        let mut session = LoopSession::new(&ast, root, config, &constants(16));
        session.prepare().unwrap();
        assert!(matches!(
            session.instantiate(&constants(32)),
            Err(AnalysisError::BoundInvalidated)
        ));
    }

    #[test]
    fn test_dependent_oracle_blocks_parallelism() {
        let (ast, root, _) = matrix_kernel();
        let pipeline = AnalysisPipeline::new(AnalysisConfig::default())
            .with_oracle(Box::new(StaticOracle::dependent()));
        let report = pipeline.analyze_loop(&ast, root, &constants(16), &[]).unwrap();
        assert_eq!(report.parallel_depth, 0);
    }

    #[test]
    fn test_coverage_failure_is_isolated() {
        let (mut ast, good, _) = matrix_kernel();
        let info = Arc::new(ArrayInfo::new(DataType::IntArray, &[4]).unwrap());
        let a = ast.add_array(ArrayBinding::new("A", info));
        let k = ast.var("k", DataType::Int);
        let c = ast.var("c", DataType::Bool);
        let idx = ast.if_else(c, k, None);
        let access = ast.access(a, vec![idx]);
        let (_, bad) = ast.for_loop(LoopInfo::simple("k", 0, 4, 1), access);

        let pipeline = AnalysisPipeline::new(AnalysisConfig::default());
        let outcomes = pipeline.analyze_regions(&ast, &[good, bad], &constants(16), &[]);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].report.is_some());
        assert!(outcomes[1].report.is_none());
        assert!(outcomes[1].error.as_ref().unwrap().contains("without else"));
    }
}
