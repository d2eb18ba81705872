//! Bound builder: the first pass over a loop nest.
//!
//! Walks each registered index expression and overflow-checked expression
//! once and produces the matching bound tree. Literal arithmetic is folded,
//! conditionals become `Either`, and callees are inlined through a per-builder
//! memo so every call site of a function shares one bound.

use log::{debug, warn};
use std::collections::{HashMap, HashSet};

use crate::ast::{Ast, BinOpKind, FunctionId, LoopId, Node, NodeId, UnaryOpKind};
use crate::bounds::{apply_binop, saturate, Bound};
use crate::context::AnalysisContext;
use crate::error::{AnalysisError, Result};
use crate::loop_info::LoopRange;
use crate::types::DataType;

pub struct BoundBuilder<'a> {
    ast: &'a Ast,
    functions: HashMap<FunctionId, Bound>,
    in_progress: HashSet<FunctionId>,
}

impl<'a> BoundBuilder<'a> {
    pub fn new(ast: &'a Ast) -> Self {
        BoundBuilder {
            ast,
            functions: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    /// Build symbolic bounds for every loop and target registered in `ctx`.
    pub fn build_session(&mut self, ctx: &mut AnalysisContext) -> Result<()> {
        for &loop_id in &ctx.loops {
            let range = self.process_loop_info(loop_id)?;
            ctx.loop_bounds.insert(loop_id, range);
        }

        for target in &ctx.accesses {
            let indices = match self.ast.node(target.node) {
                Node::ArrayAccess { indices, .. } => indices,
                other => {
                    return Err(AnalysisError::coverage(
                        self.ast.describe(target.node),
                        format!("registered as an array access but is a {}", other.kind_name()),
                    ))
                }
            };
            let mut bounds = Vec::with_capacity(indices.len());
            for &index in indices {
                bounds.push(self.build(index)?);
            }
            debug!(
                "{}: {}",
                self.ast.describe(target.node),
                bounds.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(" x ")
            );
            ctx.access_bounds.insert(target.node, bounds);
        }

        for target in &ctx.overflow_checks {
            let bound = self.build(target.node)?;
            ctx.overflow_bounds.insert(target.node, bound);
        }
        Ok(())
    }

    /// `Range(start, stop, step)` for a loop; absent symbolic parts use their defaults.
    pub fn process_loop_info(&mut self, loop_id: LoopId) -> Result<Bound> {
        let info = self.ast.loop_info(loop_id);
        let ty = info.ty;
        match &info.range {
            LoopRange::Simple { start, stop, step } => Ok(Bound::range(
                Bound::literal(*start, ty),
                Bound::literal(*stop, ty),
                Bound::literal(*step, ty),
            )),
            LoopRange::Symbolic {
                start,
                stop,
                step,
                defaults,
            } => {
                let mut parts = Vec::with_capacity(3);
                for (part, default) in [start, stop, step].into_iter().zip(defaults.iter()) {
                    parts.push(match part {
                        Some(node) => self.build(*node)?,
                        None => Bound::literal(*default, ty),
                    });
                }
                let step = parts.pop().unwrap_or(Bound::Fail);
                let stop = parts.pop().unwrap_or(Bound::Fail);
                let start = parts.pop().unwrap_or(Bound::Fail);
                Ok(Bound::range(start, stop, step))
            }
        }
    }

    pub fn build(&mut self, id: NodeId) -> Result<Bound> {
        match self.ast.node(id) {
            Node::Literal { value } => Ok(Bound::literal(value.as_i64(), value.data_type())),
            Node::Var { def: Some(def), .. } => self.build(*def),
            Node::Var { name, ty, def: None } => Ok(Bound::Variable {
                name: name.clone(),
                ty: *ty,
            }),
            Node::BinOp {
                op,
                left,
                right,
                ty,
            } => {
                let l = self.build(*left)?;
                let r = self.build(*right)?;
                self.arith(l, *op, r, *ty, id)
            }
            Node::UnaryOp { op, operand, ty } => match op {
                UnaryOpKind::Cast => self.build(*operand),
                UnaryOpKind::Neg => {
                    let inner = self.build(*operand)?;
                    self.arith(Bound::literal(0, *ty), BinOpKind::Sub, inner, *ty, id)
                }
                UnaryOpKind::Not => Err(self.uncovered(id, "logical negation has no integer bound")),
            },
            Node::ArrayAccess { array, .. } => {
                let binding = self.ast.array(*array);
                Ok(Bound::Array {
                    array: *array,
                    name: binding.name.clone(),
                    ty: binding.info.ty().element_type(),
                })
            }
            Node::Builtin { kind, args, ty } => {
                if args.len() != 2 {
                    return Err(self.uncovered(
                        id,
                        &format!("{} expects 2 arguments, got {}", kind.name(), args.len()),
                    ));
                }
                let left = self.build(args[0])?;
                let right = self.build(args[1])?;
                Ok(Bound::Builtin {
                    kind: *kind,
                    left: Box::new(left),
                    right: Box::new(right),
                    ty: *ty,
                })
            }
            Node::Math { func, args, ty } => {
                if args.len() != func.arity() {
                    return Err(self.uncovered(
                        id,
                        &format!("{} expects {} arguments", func.name(), func.arity()),
                    ));
                }
                let mut built = Vec::with_capacity(args.len());
                for &arg in args {
                    built.push(self.build(arg)?);
                }
                Ok(Bound::Math {
                    func: *func,
                    args: built,
                    ty: *ty,
                })
            }
            Node::If {
                then,
                orelse: Some(orelse),
                ty,
                ..
            } => {
                let t = self.build(*then)?;
                let e = self.build(*orelse)?;
                Ok(Bound::either(t, e, *ty))
            }
            Node::If { orelse: None, .. } => Err(self.uncovered(id, "conditional without else branch")),
            Node::Call { function, .. } => self.build_call(*function, id),
            other => Err(self.uncovered(id, &format!("{} cannot appear in a bounded expression", other.kind_name()))),
        }
    }

    fn build_call(&mut self, function: FunctionId, id: NodeId) -> Result<Bound> {
        if let Some(memo) = self.functions.get(&function) {
            return Ok(memo.clone());
        }
        if !self.in_progress.insert(function) {
            return Err(self.uncovered(id, "recursive function call"));
        }
        let result = self.inline_function(function, id);
        self.in_progress.remove(&function);
        let bound = result?;
        self.functions.insert(function, bound.clone());
        Ok(bound)
    }

    fn inline_function(&mut self, function: FunctionId, id: NodeId) -> Result<Bound> {
        let def = self.ast.function(function);
        let mut params: Vec<(String, Option<Bound>)> =
            def.params.iter().map(|p| (p.name.clone(), None)).collect();

        for site in self.ast.call_sites(function) {
            let args = match self.ast.node(site) {
                Node::Call { args, .. } => args,
                _ => continue,
            };
            if args.len() != params.len() {
                return Err(self.uncovered(
                    site,
                    &format!("{} takes {} arguments, got {}", def.name, params.len(), args.len()),
                ));
            }
            for (j, &arg) in args.iter().enumerate() {
                let bound = self.build(arg)?;
                let ty = def.params[j].ty;
                params[j].1 = Some(match params[j].1.take() {
                    None => bound,
                    Some(previous) => Bound::either(previous, bound, ty),
                });
            }
        }

        let ret = self.build(def.ret)?;
        debug!("inlined {} at {}: {}", def.name, id, ret);
        Ok(Bound::Call {
            name: def.name.clone(),
            params: params
                .into_iter()
                .map(|(name, bound)| (name, bound.unwrap_or(Bound::Fail)))
                .collect(),
            ret: Box::new(ret),
            ty: def.ret_ty,
        })
    }

    /// Fold literals; anything else stays symbolic until finalization.
    fn arith(&self, left: Bound, op: BinOpKind, right: Bound, ty: DataType, id: NodeId) -> Result<Bound> {
        if left.is_fail() || right.is_fail() {
            return Ok(Bound::Fail);
        }
        match (left, right) {
            (Bound::Literal { value: a, .. }, Bound::Literal { value: b, .. }) => {
                match apply_binop(a, op, b) {
                    Some(v) => Ok(Bound::literal(saturate(v, ty), ty)),
                    None => Err(self.uncovered(id, "division by literal zero")),
                }
            }
            (l, r) => Ok(Bound::binop(op, l, r, ty)),
        }
    }

    fn uncovered(&self, id: NodeId, message: &str) -> AnalysisError {
        let text = self.ast.describe(id);
        warn!("uncovered construct `{}`: {}", text, message);
        AnalysisError::coverage(text, message)
    }
}
