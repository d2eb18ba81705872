//! Arena-backed loop/expression AST consumed by the analyses.
//!
//! Nodes live in a flat arena and refer to each other through `NodeId`
//! handles, so sharing a subtree is a handle copy. The AST is immutable once
//! handed to an analysis session; loops, arrays and functions are kept in side
//! tables addressed by their own handles.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::array::ArrayBinding;
use crate::error::{AnalysisError, Result};
use crate::loop_info::{LoopInfo, LoopRange};
use crate::types::{DataType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoopId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArrayId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
    LogicalOr,
    LogicalAnd,
    LeftShift,
    RightShift,
    BitAnd,
    BitOr,
    BitXor,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
}

impl BinOpKind {
    pub const ALL: [BinOpKind; 19] = [
        BinOpKind::Add,
        BinOpKind::Sub,
        BinOpKind::Mul,
        BinOpKind::Div,
        BinOpKind::Pow,
        BinOpKind::Mod,
        BinOpKind::LogicalOr,
        BinOpKind::LogicalAnd,
        BinOpKind::LeftShift,
        BinOpKind::RightShift,
        BinOpKind::BitAnd,
        BinOpKind::BitOr,
        BinOpKind::BitXor,
        BinOpKind::Equal,
        BinOpKind::NotEqual,
        BinOpKind::LessThan,
        BinOpKind::LessEqual,
        BinOpKind::GreaterThan,
        BinOpKind::GreaterEqual,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            BinOpKind::Add => "+",
            BinOpKind::Sub => "-",
            BinOpKind::Mul => "*",
            BinOpKind::Div => "/",
            BinOpKind::Pow => "**",
            BinOpKind::Mod => "%",
            BinOpKind::LogicalOr => "||",
            BinOpKind::LogicalAnd => "&&",
            BinOpKind::LeftShift => "<<",
            BinOpKind::RightShift => ">>",
            BinOpKind::BitAnd => "&",
            BinOpKind::BitOr => "|",
            BinOpKind::BitXor => "^",
            BinOpKind::Equal => "==",
            BinOpKind::NotEqual => "!=",
            BinOpKind::LessThan => "<",
            BinOpKind::LessEqual => "<=",
            BinOpKind::GreaterThan => ">",
            BinOpKind::GreaterEqual => ">=",
        }
    }

    /// Operators that can overflow an integer result.
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinOpKind::Add
                | BinOpKind::Sub
                | BinOpKind::Mul
                | BinOpKind::Div
                | BinOpKind::Pow
                | BinOpKind::Mod
                | BinOpKind::LeftShift
        )
    }

    pub fn is_division(&self) -> bool {
        matches!(self, BinOpKind::Div | BinOpKind::Mod)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOpKind {
    Cast,
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BuiltinKind {
    Min,
    Max,
}

impl BuiltinKind {
    pub fn apply(&self, a: i64, b: i64) -> i64 {
        match self {
            BuiltinKind::Min => a.min(b),
            BuiltinKind::Max => a.max(b),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinKind::Min => "min",
            BuiltinKind::Max => "max",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MathFn {
    Abs,
    Hypot,
    Sqrt,
    Exp,
    Ceil,
    Acos,
    Cos,
    Sin,
    Log,
    Round,
}

impl MathFn {
    pub fn name(&self) -> &'static str {
        match self {
            MathFn::Abs => "abs",
            MathFn::Hypot => "hypot",
            MathFn::Sqrt => "sqrt",
            MathFn::Exp => "exp",
            MathFn::Ceil => "ceil",
            MathFn::Acos => "acos",
            MathFn::Cos => "cos",
            MathFn::Sin => "sin",
            MathFn::Log => "log",
            MathFn::Round => "round",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            MathFn::Hypot => 2,
            _ => 1,
        }
    }

    /// Image of the closed intervals `args` under the function.
    ///
    /// Returns `None` when the result leaves the real line (e.g. `sqrt` of a
    /// negative number) or the arity does not match.
    pub fn apply_interval(&self, args: &[(f64, f64)]) -> Option<(f64, f64)> {
        if args.len() != self.arity() {
            return None;
        }
        let (lo, hi) = args[0];
        let image = match self {
            MathFn::Abs => {
                if lo <= 0.0 && hi >= 0.0 {
                    (0.0, lo.abs().max(hi.abs()))
                } else {
                    let (a, b) = (lo.abs(), hi.abs());
                    (a.min(b), a.max(b))
                }
            }
            MathFn::Hypot => {
                let (lo2, hi2) = args[1];
                let near = |l: f64, h: f64| if l <= 0.0 && h >= 0.0 { 0.0 } else { l.abs().min(h.abs()) };
                let far = |l: f64, h: f64| l.abs().max(h.abs());
                (near(lo, hi).hypot(near(lo2, hi2)), far(lo, hi).hypot(far(lo2, hi2)))
            }
            MathFn::Sqrt => (lo.sqrt(), hi.sqrt()),
            MathFn::Exp => (lo.exp(), hi.exp()),
            MathFn::Ceil => (lo.ceil(), hi.ceil()),
            MathFn::Round => (lo.round(), hi.round()),
            MathFn::Log => (lo.ln(), hi.ln()),
            // decreasing on its domain
            MathFn::Acos => (hi.acos(), lo.acos()),
            MathFn::Cos | MathFn::Sin => (-1.0, 1.0),
        };
        if image.0.is_nan() || image.1.is_nan() {
            None
        } else {
            Some(image)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: DataType,
}

/// A callee whose return expression the bound builder may inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    /// Expression returned by the callee, in terms of `params`.
    pub ret: NodeId,
    pub ret_ty: DataType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Literal {
        value: Value,
    },
    /// `def` points at the expression of a single prior definition, if one is queued.
    Var {
        name: String,
        ty: DataType,
        #[serde(default)]
        def: Option<NodeId>,
    },
    BinOp {
        op: BinOpKind,
        left: NodeId,
        right: NodeId,
        ty: DataType,
    },
    UnaryOp {
        op: UnaryOpKind,
        operand: NodeId,
        ty: DataType,
    },
    ArrayAccess {
        array: ArrayId,
        indices: Vec<NodeId>,
    },
    Builtin {
        kind: BuiltinKind,
        args: Vec<NodeId>,
        ty: DataType,
    },
    Math {
        func: MathFn,
        args: Vec<NodeId>,
        ty: DataType,
    },
    If {
        cond: NodeId,
        then: NodeId,
        #[serde(default)]
        orelse: Option<NodeId>,
        ty: DataType,
    },
    For {
        info: LoopId,
        body: NodeId,
    },
    While {
        cond: NodeId,
        body: NodeId,
    },
    Block {
        stmts: Vec<NodeId>,
    },
    Assign {
        target: NodeId,
        value: NodeId,
    },
    Call {
        function: FunctionId,
        args: Vec<NodeId>,
    },
    Return {
        value: NodeId,
    },
    Break,
}

impl Node {
    /// Child handles in evaluation order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Node::Literal { .. } | Node::Var { .. } | Node::Break => Vec::new(),
            Node::BinOp { left, right, .. } => vec![*left, *right],
            Node::UnaryOp { operand, .. } => vec![*operand],
            Node::ArrayAccess { indices, .. } => indices.clone(),
            Node::Builtin { args, .. } | Node::Math { args, .. } | Node::Call { args, .. } => {
                args.clone()
            }
            Node::If {
                cond, then, orelse, ..
            } => {
                let mut out = vec![*cond, *then];
                out.extend(orelse.iter().copied());
                out
            }
            Node::For { body, .. } => vec![*body],
            Node::While { cond, body } => vec![*cond, *body],
            Node::Block { stmts } => stmts.clone(),
            Node::Assign { target, value } => vec![*target, *value],
            Node::Return { value } => vec![*value],
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Literal { .. } => "literal",
            Node::Var { .. } => "variable",
            Node::BinOp { .. } => "binary operation",
            Node::UnaryOp { .. } => "unary operation",
            Node::ArrayAccess { .. } => "array access",
            Node::Builtin { .. } => "builtin call",
            Node::Math { .. } => "math function",
            Node::If { .. } => "conditional",
            Node::For { .. } => "for loop",
            Node::While { .. } => "while loop",
            Node::Block { .. } => "block",
            Node::Assign { .. } => "assignment",
            Node::Call { .. } => "function call",
            Node::Return { .. } => "return",
            Node::Break => "break",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: Vec<Node>,
    loops: Vec<LoopInfo>,
    arrays: Vec<ArrayBinding>,
    functions: Vec<FunctionDef>,
}

impl Ast {
    pub fn new() -> Self {
        Ast::default()
    }

    /// Assemble an AST from imported tables, checking that every handle resolves.
    pub fn from_parts(
        nodes: Vec<Node>,
        loops: Vec<LoopInfo>,
        arrays: Vec<ArrayBinding>,
        functions: Vec<FunctionDef>,
    ) -> Result<Self> {
        let ast = Ast {
            nodes,
            loops,
            arrays,
            functions,
        };
        ast.validate()?;
        Ok(ast)
    }

    fn validate(&self) -> Result<()> {
        let check_node = |id: NodeId, owner: &str| -> Result<()> {
            if id.0 as usize >= self.nodes.len() {
                return Err(AnalysisError::coverage(
                    owner.to_string(),
                    format!("dangling node handle {}", id),
                ));
            }
            Ok(())
        };
        for (i, node) in self.nodes.iter().enumerate() {
            let owner = format!("n{}", i);
            let mut refs = node.children();
            if let Node::Var { def: Some(def), .. } = node {
                refs.push(*def);
            }
            for child in refs {
                check_node(child, &owner)?;
                // children precede their parent, which keeps the arena acyclic
                if child.0 as usize >= i {
                    return Err(AnalysisError::coverage(
                        owner.clone(),
                        format!("forward reference to {}", child),
                    ));
                }
            }
            match node {
                Node::For { info, .. } if info.0 as usize >= self.loops.len() => {
                    return Err(AnalysisError::coverage(owner, format!("dangling loop {}", info)));
                }
                Node::ArrayAccess { array, .. } if array.0 as usize >= self.arrays.len() => {
                    return Err(AnalysisError::coverage(owner, format!("dangling array {}", array.0)));
                }
                Node::Call { function, .. } if function.0 as usize >= self.functions.len() => {
                    return Err(AnalysisError::coverage(
                        owner,
                        format!("dangling function {}", function.0),
                    ));
                }
                _ => {}
            }
        }
        for (i, info) in self.loops.iter().enumerate() {
            if let LoopRange::Symbolic {
                start, stop, step, ..
            } = &info.range
            {
                for part in [start, stop, step].into_iter().flatten() {
                    check_node(*part, &format!("L{}", i))?;
                }
            }
        }
        for f in &self.functions {
            check_node(f.ret, &f.name)?;
        }
        Ok(())
    }

    pub fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() as u32 - 1)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_loop(&mut self, info: LoopInfo) -> LoopId {
        self.loops.push(info);
        LoopId(self.loops.len() as u32 - 1)
    }

    pub fn loop_info(&self, id: LoopId) -> &LoopInfo {
        &self.loops[id.0 as usize]
    }

    pub fn loop_ids(&self) -> impl Iterator<Item = LoopId> + '_ {
        (0..self.loops.len() as u32).map(LoopId)
    }

    pub fn add_array(&mut self, binding: ArrayBinding) -> ArrayId {
        self.arrays.push(binding);
        ArrayId(self.arrays.len() as u32 - 1)
    }

    pub fn array(&self, id: ArrayId) -> &ArrayBinding {
        &self.arrays[id.0 as usize]
    }

    pub fn arrays(&self) -> &[ArrayBinding] {
        &self.arrays
    }

    pub fn add_function(&mut self, def: FunctionDef) -> FunctionId {
        self.functions.push(def);
        FunctionId(self.functions.len() as u32 - 1)
    }

    pub fn function(&self, id: FunctionId) -> &FunctionDef {
        &self.functions[id.0 as usize]
    }

    /// Every call node targeting `function`, in arena order.
    pub fn call_sites(&self, function: FunctionId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n, Node::Call { function: f, .. } if *f == function))
            .map(|(i, _)| NodeId(i as u32))
            .collect()
    }

    /// Result type of an expression node.
    pub fn node_type(&self, id: NodeId) -> DataType {
        match self.node(id) {
            Node::Literal { value } => value.data_type(),
            Node::Var { ty, .. }
            | Node::BinOp { ty, .. }
            | Node::UnaryOp { ty, .. }
            | Node::Builtin { ty, .. }
            | Node::Math { ty, .. }
            | Node::If { ty, .. } => *ty,
            Node::ArrayAccess { array, .. } => self.array(*array).info.ty().element_type(),
            Node::Call { function, .. } => self.function(*function).ret_ty,
            _ => DataType::None,
        }
    }

    // ------------------------------------------------------------------
    // Construction helpers used by front ends and tests
    // ------------------------------------------------------------------

    pub fn literal(&mut self, value: Value) -> NodeId {
        self.push(Node::Literal { value })
    }

    pub fn int(&mut self, value: i32) -> NodeId {
        self.literal(Value::Int(value))
    }

    pub fn var(&mut self, name: &str, ty: DataType) -> NodeId {
        self.push(Node::Var {
            name: name.to_string(),
            ty,
            def: None,
        })
    }

    /// A read of `name` whose single reaching definition is `def`.
    pub fn var_defined(&mut self, name: &str, ty: DataType, def: NodeId) -> NodeId {
        self.push(Node::Var {
            name: name.to_string(),
            ty,
            def: Some(def),
        })
    }

    pub fn binop(&mut self, op: BinOpKind, left: NodeId, right: NodeId) -> NodeId {
        let ty = self.node_type(left).widen(self.node_type(right));
        self.push(Node::BinOp {
            op,
            left,
            right,
            ty,
        })
    }

    pub fn unary(&mut self, op: UnaryOpKind, operand: NodeId, ty: DataType) -> NodeId {
        self.push(Node::UnaryOp { op, operand, ty })
    }

    pub fn access(&mut self, array: ArrayId, indices: Vec<NodeId>) -> NodeId {
        self.push(Node::ArrayAccess { array, indices })
    }

    pub fn builtin(&mut self, kind: BuiltinKind, a: NodeId, b: NodeId) -> NodeId {
        let ty = self.node_type(a).widen(self.node_type(b));
        self.push(Node::Builtin {
            kind,
            args: vec![a, b],
            ty,
        })
    }

    pub fn math(&mut self, func: MathFn, args: Vec<NodeId>, ty: DataType) -> NodeId {
        self.push(Node::Math { func, args, ty })
    }

    pub fn if_else(&mut self, cond: NodeId, then: NodeId, orelse: Option<NodeId>) -> NodeId {
        let ty = match orelse {
            Some(e) => self.node_type(then).widen(self.node_type(e)),
            None => DataType::None,
        };
        self.push(Node::If {
            cond,
            then,
            orelse,
            ty,
        })
    }

    pub fn for_loop(&mut self, info: LoopInfo, body: NodeId) -> (LoopId, NodeId) {
        let id = self.add_loop(info);
        let node = self.push(Node::For { info: id, body });
        (id, node)
    }

    pub fn while_loop(&mut self, cond: NodeId, body: NodeId) -> NodeId {
        self.push(Node::While { cond, body })
    }

    pub fn block(&mut self, stmts: Vec<NodeId>) -> NodeId {
        self.push(Node::Block { stmts })
    }

    pub fn assign(&mut self, target: NodeId, value: NodeId) -> NodeId {
        self.push(Node::Assign { target, value })
    }

    pub fn call(&mut self, function: FunctionId, args: Vec<NodeId>) -> NodeId {
        self.push(Node::Call { function, args })
    }

    pub fn ret(&mut self, value: NodeId) -> NodeId {
        self.push(Node::Return { value })
    }

    pub fn brk(&mut self) -> NodeId {
        self.push(Node::Break)
    }

    /// Source-like rendering of a subtree for diagnostics.
    pub fn describe(&self, id: NodeId) -> String {
        match self.node(id) {
            Node::Literal { value } => value.to_string(),
            Node::Var { name, .. } => name.clone(),
            Node::BinOp { op, left, right, .. } => format!(
                "({} {} {})",
                self.describe(*left),
                op.symbol(),
                self.describe(*right)
            ),
            Node::UnaryOp { op, operand, ty } => match op {
                UnaryOpKind::Cast => format!("({}){}", ty, self.describe(*operand)),
                UnaryOpKind::Neg => format!("-{}", self.describe(*operand)),
                UnaryOpKind::Not => format!("!{}", self.describe(*operand)),
            },
            Node::ArrayAccess { array, indices } => {
                let mut out = self.array(*array).name.clone();
                for idx in indices {
                    out.push_str(&format!("[{}]", self.describe(*idx)));
                }
                out
            }
            Node::Builtin { kind, args, .. } => format!("{}({})", kind.name(), self.describe_list(args)),
            Node::Math { func, args, .. } => format!("{}({})", func.name(), self.describe_list(args)),
            Node::If {
                cond, then, orelse, ..
            } => match orelse {
                Some(e) => format!(
                    "if {} {{ {} }} else {{ {} }}",
                    self.describe(*cond),
                    self.describe(*then),
                    self.describe(*e)
                ),
                None => format!("if {} {{ {} }}", self.describe(*cond), self.describe(*then)),
            },
            Node::For { info, body } => {
                let info_ref = self.loop_info(*info);
                let range = match info_ref.simple_range() {
                    Some(r) => r.to_string(),
                    None => "range(..)".to_string(),
                };
                format!("for {} in {} {{ {} }}", info_ref.induction, range, self.describe(*body))
            }
            Node::While { cond, body } => {
                format!("while {} {{ {} }}", self.describe(*cond), self.describe(*body))
            }
            Node::Block { stmts } => stmts
                .iter()
                .map(|s| self.describe(*s))
                .collect::<Vec<_>>()
                .join("; "),
            Node::Assign { target, value } => {
                format!("{} = {}", self.describe(*target), self.describe(*value))
            }
            Node::Call { function, args } => {
                format!("{}({})", self.function(*function).name, self.describe_list(args))
            }
            Node::Return { value } => format!("return {}", self.describe(*value)),
            Node::Break => "break".to_string(),
        }
    }

    fn describe_list(&self, ids: &[NodeId]) -> String {
        ids.iter()
            .map(|a| self.describe(*a))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ArrayInfo;
    use std::sync::Arc;

    #[test]
    fn test_describe_access() {
        let mut ast = Ast::new();
        let info = Arc::new(ArrayInfo::new(DataType::IntArray, &[10]).unwrap());
        let a = ast.add_array(ArrayBinding::new("A", info));
        let i = ast.var("i", DataType::Int);
        let one = ast.int(1);
        let idx = ast.binop(BinOpKind::Add, i, one);
        let access = ast.access(a, vec![idx]);
        assert_eq!(ast.describe(access), "A[(i + 1)]");
        assert_eq!(ast.node_type(access), DataType::Int);
    }

    #[test]
    fn test_dangling_handles_rejected() {
        let nodes = vec![Node::Return { value: NodeId(5) }];
        let err = Ast::from_parts(nodes, vec![], vec![], vec![]).unwrap_err();
        assert!(err.to_string().contains("dangling node handle"));
    }

    #[test]
    fn test_self_reference_rejected() {
        let nodes = vec![Node::Return { value: NodeId(0) }];
        let err = Ast::from_parts(nodes, vec![], vec![], vec![]).unwrap_err();
        assert!(err.to_string().contains("forward reference"));
    }

    #[test]
    fn test_call_sites() {
        let mut ast = Ast::new();
        let x = ast.var("x", DataType::Int);
        let f = ast.add_function(FunctionDef {
            name: "id".to_string(),
            params: vec![Param {
                name: "x".to_string(),
                ty: DataType::Int,
            }],
            ret: x,
            ret_ty: DataType::Int,
        });
        let a = ast.int(1);
        let b = ast.int(2);
        let c1 = ast.call(f, vec![a]);
        let c2 = ast.call(f, vec![b]);
        assert_eq!(ast.call_sites(f), vec![c1, c2]);
    }

    #[test]
    fn test_math_intervals() {
        assert_eq!(MathFn::Abs.apply_interval(&[(-3.0, 2.0)]), Some((0.0, 3.0)));
        assert_eq!(MathFn::Sqrt.apply_interval(&[(4.0, 9.0)]), Some((2.0, 3.0)));
        assert_eq!(MathFn::Sqrt.apply_interval(&[(-4.0, 9.0)]), None);
        assert_eq!(MathFn::Sin.apply_interval(&[(0.0, 100.0)]), Some((-1.0, 1.0)));
        assert_eq!(MathFn::Hypot.apply_interval(&[(3.0, 3.0)]), None);
    }
}
