//! Dependence oracle protocol and implementations.
//!
//! A loop nest is lowered into a small labeled statement language and handed
//! to an oracle, which answers with the loops it proved free of carried
//! dependences plus the flow-dependent statement pairs it found. Labels the
//! oracle does not return are treated as dependence-bearing.
//!
//! Three oracles are provided:
//! - [`ProcessOracle`]: an external analyzer reached over JSON on stdin/stdout
//! - [`SubscriptOracle`]: a conservative in-process subscript test
//! - [`StaticOracle`]: fixed answers, for tests and dry runs

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use crate::ast::{BinOpKind, UnaryOpKind};
use crate::error::{AnalysisError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OracleExpr {
    Var {
        name: String,
    },
    Literal {
        value: i64,
    },
    Binary {
        op: BinOpKind,
        lhs: Box<OracleExpr>,
        rhs: Box<OracleExpr>,
    },
    Unary {
        op: UnaryOpKind,
        operand: Box<OracleExpr>,
    },
    Subscript {
        array: String,
        indices: Vec<OracleExpr>,
    },
    Ternary {
        cond: Box<OracleExpr>,
        then: Box<OracleExpr>,
        orelse: Box<OracleExpr>,
    },
    /// Side-effect free builtin such as `min` or `sqrt`.
    Intrinsic {
        name: String,
        args: Vec<OracleExpr>,
    },
    /// Call to a user function; its effects are opaque to the oracle.
    Call {
        name: String,
        args: Vec<OracleExpr>,
    },
}

impl OracleExpr {
    pub fn var(name: &str) -> OracleExpr {
        OracleExpr::Var {
            name: name.to_string(),
        }
    }

    pub fn literal(value: i64) -> OracleExpr {
        OracleExpr::Literal { value }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleLoop {
    pub label: String,
    pub induction: String,
    pub start: OracleExpr,
    pub stop: OracleExpr,
    pub step: OracleExpr,
    pub body: Vec<OracleStmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OracleStmt {
    Assign {
        label: String,
        target: OracleExpr,
        value: OracleExpr,
    },
    Expr {
        label: String,
        expr: OracleExpr,
    },
    If {
        label: String,
        cond: OracleExpr,
        then: Vec<OracleStmt>,
        orelse: Vec<OracleStmt>,
    },
    For(OracleLoop),
    Break {
        label: String,
    },
}

/// Request sent to an oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopNest {
    pub root: OracleLoop,
    /// Scalars assigned inside the nest.
    pub locals: Vec<String>,
    pub constants: BTreeMap<String, i64>,
}

impl LoopNest {
    /// Labels of every loop in the nest, outermost first.
    pub fn loop_labels(&self) -> Vec<String> {
        fn collect(l: &OracleLoop, out: &mut Vec<String>) {
            out.push(l.label.clone());
            for stmt in &l.body {
                collect_stmt(stmt, out);
            }
        }
        fn collect_stmt(s: &OracleStmt, out: &mut Vec<String>) {
            match s {
                OracleStmt::For(l) => collect(l, out),
                OracleStmt::If { then, orelse, .. } => {
                    for st in then.iter().chain(orelse) {
                        collect_stmt(st, out);
                    }
                }
                _ => {}
            }
        }
        let mut out = Vec::new();
        collect(&self.root, &mut out);
        out
    }
}

/// Answer from an oracle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependenceResult {
    pub independent_loops: BTreeSet<String>,
    /// `(source, sink)` statement labels.
    pub flow_dependences: Vec<(String, String)>,
}

pub trait DependenceOracle: Send + Sync {
    fn name(&self) -> &str;

    fn test(&self, nest: &LoopNest) -> Result<DependenceResult>;
}

// ============================================================================
// Static oracle
// ============================================================================

/// Returns a fixed verdict for every request.
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    all_independent: bool,
    flow_dependences: Vec<(String, String)>,
}

impl StaticOracle {
    /// Proves nothing independent.
    pub fn dependent() -> Self {
        StaticOracle::default()
    }

    /// Proves every submitted loop independent.
    pub fn independent() -> Self {
        StaticOracle {
            all_independent: true,
            flow_dependences: Vec::new(),
        }
    }

    pub fn with_flow(mut self, source: &str, sink: &str) -> Self {
        self.flow_dependences.push((source.to_string(), sink.to_string()));
        self
    }
}

impl DependenceOracle for StaticOracle {
    fn name(&self) -> &str {
        "static"
    }

    fn test(&self, nest: &LoopNest) -> Result<DependenceResult> {
        let independent_loops = if self.all_independent {
            nest.loop_labels().into_iter().collect()
        } else {
            BTreeSet::new()
        };
        Ok(DependenceResult {
            independent_loops,
            flow_dependences: self.flow_dependences.clone(),
        })
    }
}

// ============================================================================
// Process oracle
// ============================================================================

/// Runs an external analyzer, writing the nest as JSON to its stdin and
/// reading a [`DependenceResult`] as JSON from its stdout.
#[derive(Debug, Clone)]
pub struct ProcessOracle {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessOracle {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ProcessOracle {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl DependenceOracle for ProcessOracle {
    fn name(&self) -> &str {
        "process"
    }

    fn test(&self, nest: &LoopNest) -> Result<DependenceResult> {
        let request = serde_json::to_vec(nest)?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                AnalysisError::Oracle(format!("failed to run {}: {}", self.program.display(), e))
            })?;

        // Feed stdin from a second thread so a chatty oracle cannot fill its
        // stdout pipe while we are still blocked writing the request.
        let stdin = child.stdin.take();
        let (written, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(&request),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            (writer.join(), output)
        });
        let output = output?;
        match written {
            Ok(Ok(())) => {}
            // the oracle answered without reading the whole request
            Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(AnalysisError::Oracle(format!(
                    "writing the request to {} panicked",
                    self.program.display()
                )))
            }
        }

        if !output.status.success() {
            return Err(AnalysisError::Oracle(format!(
                "{} failed: {}",
                self.program.display(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let result: DependenceResult = serde_json::from_slice(&output.stdout)?;
        debug!(
            "{} proved {} of {} loops independent",
            self.program.display(),
            result.independent_loops.len(),
            nest.loop_labels().len()
        );
        Ok(result)
    }
}

// ============================================================================
// Subscript oracle
// ============================================================================

/// Conservative in-process test.
///
/// A loop is independent when every array it writes is accessed through one
/// subscript tuple that uses the loop's induction variable as a bare index,
/// no scalar is read before the iteration unconditionally writes it, and the
/// body holds no user calls or breaks.
#[derive(Debug, Clone, Default)]
pub struct SubscriptOracle;

struct ArrayRef<'n> {
    array: &'n str,
    indices: &'n [OracleExpr],
    write: bool,
    label: &'n str,
}

struct ScalarAccess<'n> {
    name: &'n str,
    write: bool,
    /// Inside a branch or an inner loop body, so it may not run every iteration.
    conditional: bool,
}

#[derive(Default)]
struct BodySummary<'n> {
    refs: Vec<ArrayRef<'n>>,
    /// Scalar reads and writes in program order.
    scalars: Vec<ScalarAccess<'n>>,
    opaque: bool,
    nesting: usize,
}

impl<'n> BodySummary<'n> {
    fn scalar(&mut self, name: &'n str, write: bool) {
        self.scalars.push(ScalarAccess {
            name,
            write,
            conditional: self.nesting > 0,
        });
    }

    fn stmt(&mut self, stmt: &'n OracleStmt) {
        match stmt {
            OracleStmt::Assign {
                label,
                target,
                value,
            } => {
                self.expr(value, label);
                match target {
                    OracleExpr::Subscript { array, indices } => {
                        for idx in indices {
                            self.expr(idx, label);
                        }
                        self.refs.push(ArrayRef {
                            array: array.as_str(),
                            indices: indices.as_slice(),
                            write: true,
                            label: label.as_str(),
                        });
                    }
                    OracleExpr::Var { name } => self.scalar(name.as_str(), true),
                    other => self.expr(other, label),
                }
            }
            OracleStmt::Expr { label, expr } => self.expr(expr, label),
            OracleStmt::If {
                label,
                cond,
                then,
                orelse,
            } => {
                self.expr(cond, label);
                self.nesting += 1;
                for s in then.iter().chain(orelse) {
                    self.stmt(s);
                }
                self.nesting -= 1;
            }
            OracleStmt::For(l) => {
                self.expr(&l.start, &l.label);
                self.expr(&l.stop, &l.label);
                self.expr(&l.step, &l.label);
                self.scalar(l.induction.as_str(), true);
                self.nesting += 1;
                for s in &l.body {
                    self.stmt(s);
                }
                self.nesting -= 1;
            }
            OracleStmt::Break { .. } => self.opaque = true,
        }
    }

    fn expr(&mut self, expr: &'n OracleExpr, label: &'n str) {
        match expr {
            OracleExpr::Var { name } => self.scalar(name.as_str(), false),
            OracleExpr::Literal { .. } => {}
            OracleExpr::Binary { lhs, rhs, .. } => {
                self.expr(lhs, label);
                self.expr(rhs, label);
            }
            OracleExpr::Unary { operand, .. } => self.expr(operand, label),
            OracleExpr::Subscript { array, indices } => {
                for idx in indices {
                    self.expr(idx, label);
                }
                self.refs.push(ArrayRef {
                    array: array.as_str(),
                    indices: indices.as_slice(),
                    write: false,
                    label,
                });
            }
            OracleExpr::Ternary { cond, then, orelse } => {
                self.expr(cond, label);
                self.expr(then, label);
                self.expr(orelse, label);
            }
            OracleExpr::Intrinsic { args, .. } => {
                for a in args {
                    self.expr(a, label);
                }
            }
            OracleExpr::Call { args, .. } => {
                self.opaque = true;
                for a in args {
                    self.expr(a, label);
                }
            }
        }
    }
}

impl SubscriptOracle {
    fn test_loop(
        &self,
        l: &OracleLoop,
        result: &mut DependenceResult,
        flows: &mut BTreeSet<(String, String)>,
    ) {
        let mut summary = BodySummary::default();
        for stmt in &l.body {
            summary.stmt(stmt);
        }

        let mut independent = !summary.opaque;

        // carried scalar: read before the iteration is sure to have written it
        let written: BTreeSet<&str> = summary
            .scalars
            .iter()
            .filter(|a| a.write)
            .map(|a| a.name)
            .collect();
        for name in &written {
            let carried = summary
                .scalars
                .iter()
                .filter(|a| a.name == *name)
                .find(|a| !a.write || !a.conditional)
                .map_or(false, |a| !a.write);
            if carried {
                debug!("{}: scalar '{}' is carried across iterations", l.label, name);
                independent = false;
            }
        }

        let induction = OracleExpr::var(&l.induction);
        let mut by_array: BTreeMap<&str, Vec<&ArrayRef>> = BTreeMap::new();
        for r in &summary.refs {
            by_array.entry(r.array).or_default().push(r);
        }
        for (array, refs) in &by_array {
            if !refs.iter().any(|r| r.write) {
                continue;
            }
            let first = refs[0].indices;
            let uniform = refs.iter().all(|r| r.indices == first);
            let separated = first.iter().any(|idx| *idx == induction);
            if uniform && separated {
                continue;
            }
            debug!("{}: writes to '{}' may overlap across iterations", l.label, array);
            independent = false;
            for w in refs.iter().filter(|r| r.write) {
                for r in refs.iter().filter(|r| !r.write) {
                    if !uniform || !separated || r.indices != w.indices {
                        flows.insert((w.label.to_string(), r.label.to_string()));
                    }
                }
            }
        }

        if independent {
            result.independent_loops.insert(l.label.clone());
        }

        for stmt in &l.body {
            self.test_nested(stmt, result, flows);
        }
    }

    fn test_nested(
        &self,
        stmt: &OracleStmt,
        result: &mut DependenceResult,
        flows: &mut BTreeSet<(String, String)>,
    ) {
        match stmt {
            OracleStmt::For(inner) => self.test_loop(inner, result, flows),
            OracleStmt::If { then, orelse, .. } => {
                for s in then.iter().chain(orelse) {
                    self.test_nested(s, result, flows);
                }
            }
            _ => {}
        }
    }
}

impl DependenceOracle for SubscriptOracle {
    fn name(&self) -> &str {
        "subscript"
    }

    fn test(&self, nest: &LoopNest) -> Result<DependenceResult> {
        let mut result = DependenceResult::default();
        let mut flows = BTreeSet::new();
        self.test_loop(&nest.root, &mut result, &mut flows);
        result.flow_dependences = flows.into_iter().collect();
        if !result.flow_dependences.is_empty() {
            warn!(
                "{} flow dependences in {}",
                result.flow_dependences.len(),
                nest.root.label
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(array: &str, idx: OracleExpr) -> OracleExpr {
        OracleExpr::Subscript {
            array: array.to_string(),
            indices: vec![idx],
        }
    }

    fn plus(lhs: OracleExpr, rhs: OracleExpr) -> OracleExpr {
        OracleExpr::Binary {
            op: BinOpKind::Add,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    fn nest(body: Vec<OracleStmt>) -> LoopNest {
        LoopNest {
            root: OracleLoop {
                label: "for_L0".to_string(),
                induction: "i".to_string(),
                start: OracleExpr::literal(0),
                stop: OracleExpr::literal(10),
                step: OracleExpr::literal(1),
                body,
            },
            locals: Vec::new(),
            constants: BTreeMap::new(),
        }
    }

    fn assign(label: &str, target: OracleExpr, value: OracleExpr) -> OracleStmt {
        OracleStmt::Assign {
            label: label.to_string(),
            target,
            value,
        }
    }

    #[test]
    fn test_elementwise_update_is_independent() {
        let i = OracleExpr::var("i");
        let n = nest(vec![assign(
            "S_1",
            sub("C", i.clone()),
            plus(sub("C", i.clone()), OracleExpr::literal(1)),
        )]);
        let result = SubscriptOracle.test(&n).unwrap();
        assert!(result.independent_loops.contains("for_L0"));
        assert!(result.flow_dependences.is_empty());
    }

    #[test]
    fn test_shifted_read_is_dependent() {
        let i = OracleExpr::var("i");
        let n = nest(vec![assign(
            "S_1",
            sub("A", plus(i.clone(), OracleExpr::literal(1))),
            sub("A", i.clone()),
        )]);
        let result = SubscriptOracle.test(&n).unwrap();
        assert!(result.independent_loops.is_empty());
        assert_eq!(
            result.flow_dependences,
            vec![("S_1".to_string(), "S_1".to_string())]
        );
    }

    #[test]
    fn test_scalar_reduction_is_dependent() {
        let i = OracleExpr::var("i");
        let n = nest(vec![assign(
            "S_1",
            OracleExpr::var("s"),
            plus(OracleExpr::var("s"), sub("A", i)),
        )]);
        assert!(SubscriptOracle.test(&n).unwrap().independent_loops.is_empty());
    }

    #[test]
    fn test_private_scalar_is_fine() {
        let i = OracleExpr::var("i");
        let n = nest(vec![
            assign("S_1", OracleExpr::var("t"), sub("A", i.clone())),
            assign("S_2", sub("B", i), OracleExpr::var("t")),
        ]);
        assert!(SubscriptOracle.test(&n).unwrap().independent_loops.contains("for_L0"));
    }

    #[test]
    fn test_conditional_write_does_not_privatize() {
        // for i { if C[i] { t = A[i] }; B[i] = t }
        let i = OracleExpr::var("i");
        let guarded = OracleStmt::If {
            label: "S_1".to_string(),
            cond: sub("C", i.clone()),
            then: vec![assign("S_2", OracleExpr::var("t"), sub("A", i.clone()))],
            orelse: Vec::new(),
        };
        let n = nest(vec![
            guarded.clone(),
            assign("S_3", sub("B", i.clone()), OracleExpr::var("t")),
        ]);
        assert!(SubscriptOracle.test(&n).unwrap().independent_loops.is_empty());

        // an unconditional write ahead of the branch still privatizes `t`
        let n = nest(vec![
            assign("S_0", OracleExpr::var("t"), OracleExpr::literal(0)),
            guarded,
            assign("S_3", sub("B", i), OracleExpr::var("t")),
        ]);
        assert!(SubscriptOracle.test(&n).unwrap().independent_loops.contains("for_L0"));
    }

    #[test]
    fn test_static_oracle() {
        let n = nest(vec![]);
        assert!(StaticOracle::dependent().test(&n).unwrap().independent_loops.is_empty());
        let all = StaticOracle::independent().with_flow("S_1", "S_2").test(&n).unwrap();
        assert!(all.independent_loops.contains("for_L0"));
        assert_eq!(all.flow_dependences.len(), 1);
    }

    #[test]
    fn test_missing_oracle_program_is_an_error() {
        let oracle = ProcessOracle::new("/nonexistent/dependence-oracle");
        let err = oracle.test(&nest(vec![])).unwrap_err();
        assert!(matches!(err, AnalysisError::Oracle(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_oracle_may_answer_before_reading_request() {
        // writes more than a pipe holds before it starts reading stdin
        let script = concat!(
            "yes ' ' | head -c 200000; ",
            r#"echo '{"independent_loops":["for_L0"],"flow_dependences":[]}'; "#,
            "cat > /dev/null",
        );
        let oracle = ProcessOracle::new("sh").arg("-c").arg(script);
        let mut n = nest(vec![]);
        n.locals = (0..10_000).map(|k| format!("local_{:05}", k)).collect();
        assert!(serde_json::to_vec(&n).unwrap().len() > 100_000);

        let result = oracle.test(&n).unwrap();
        assert!(result.independent_loops.contains("for_L0"));
    }

    #[test]
    fn test_request_round_trips_through_json() {
        let n = nest(vec![OracleStmt::Break {
            label: "S_9".to_string(),
        }]);
        let text = serde_json::to_string(&n).unwrap();
        let back: LoopNest = serde_json::from_str(&text).unwrap();
        assert_eq!(back, n);
    }
}
