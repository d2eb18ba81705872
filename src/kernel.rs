//! Kernel import format.
//!
//! A front end exports a kernel as JSON: the node arena, loop and function
//! tables, array declarations (optionally with live contents), named
//! constants and the candidate loop roots to analyze.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::array::{ArrayBinding, ArrayInfo, ArrayStorage};
use crate::ast::{Ast, FunctionDef, Node, NodeId};
use crate::error::{AnalysisError, Result};
use crate::loop_info::LoopInfo;
use crate::types::{DataType, Value};

/// Array declaration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArrayDecl {
    pub name: String,

    /// Array type tag, e.g. `IntArray`
    pub ty: DataType,

    /// Extent of each dimension
    pub dims: Vec<i64>,

    /// Optional: live contents, flattened row-major
    #[serde(default)]
    pub values: Option<Vec<i64>>,

    /// The loop never writes through this name
    #[serde(default)]
    pub read_only: bool,

    /// Optional: name of an earlier declaration whose storage this one shares
    #[serde(default)]
    pub alias_of: Option<String>,
}

/// Named constant with its declared type
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConstantDecl {
    pub name: String,
    pub value: Value,
    pub ty: DataType,
}

/// Structure of the kernel export format
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KernelFile {
    #[serde(default)]
    pub arrays: Vec<ArrayDecl>,

    pub nodes: Vec<Node>,

    #[serde(default)]
    pub loops: Vec<LoopInfo>,

    #[serde(default)]
    pub functions: Vec<FunctionDef>,

    /// Candidate loop roots (`for` nodes)
    pub regions: Vec<NodeId>,

    #[serde(default)]
    pub constants: Vec<ConstantDecl>,

    /// Optional: further constant bindings to re-verify the bounds against
    #[serde(default)]
    pub instantiations: Vec<HashMap<String, i64>>,
}

/// Validated kernel ready for analysis.
#[derive(Debug, Clone)]
pub struct Kernel {
    pub ast: Ast,
    pub regions: Vec<NodeId>,
    pub constants: HashMap<String, i64>,
    pub instantiations: Vec<HashMap<String, i64>>,
}

impl KernelFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn into_kernel(self) -> Result<Kernel> {
        let mut bindings: Vec<ArrayBinding> = Vec::with_capacity(self.arrays.len());
        for decl in &self.arrays {
            let binding = match &decl.alias_of {
                Some(target) => {
                    let original = bindings.iter().find(|b| &b.name == target).ok_or_else(|| {
                        AnalysisError::coverage(
                            decl.name.clone(),
                            format!("alias of undeclared array '{}'", target),
                        )
                    })?;
                    let mut alias = original.clone();
                    alias.name = decl.name.clone();
                    alias.read_only = decl.read_only;
                    alias
                }
                None => {
                    let info = Arc::new(ArrayInfo::new(decl.ty, &decl.dims)?);
                    let mut binding = ArrayBinding::new(decl.name.clone(), info);
                    if let Some(values) = &decl.values {
                        binding = binding.with_storage(Arc::new(ArrayStorage::new(values.clone())));
                    }
                    binding.read_only = decl.read_only;
                    binding
                }
            };
            bindings.push(binding);
        }

        let mut constants = HashMap::with_capacity(self.constants.len());
        for c in &self.constants {
            let value = c.value.specialize(c.ty)?;
            constants.insert(c.name.clone(), value.as_i64());
        }

        let ast = Ast::from_parts(self.nodes, self.loops, bindings, self.functions)?;
        for &root in &self.regions {
            if root.0 as usize >= ast.len() || !matches!(ast.node(root), Node::For { .. }) {
                return Err(AnalysisError::coverage(
                    format!("region {}", root),
                    "candidate region must be a for loop",
                ));
            }
        }
        debug!(
            "imported kernel: {} nodes, {} arrays, {} regions",
            ast.len(),
            ast.arrays().len(),
            self.regions.len()
        );

        Ok(Kernel {
            ast,
            regions: self.regions,
            constants,
            instantiations: self.instantiations,
        })
    }
}
