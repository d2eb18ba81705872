//! Array metadata and backing storage.
//!
//! `ArrayInfo` is immutable once built and shared through an `Arc` by every
//! binding that views the same array. Storage identity is the address of the
//! shared `ArrayStorage`, so two bindings alias exactly when they share it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AnalysisError, Result};
use crate::types::DataType;

/// Maximum number of dimensions an array may declare.
pub const MAX_DIMENSIONS: usize = 10;

/// Dimension extents and element type tag of an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayInfo {
    ty: DataType,
    dimensions: Vec<i64>,
}

impl ArrayInfo {
    pub fn new(ty: DataType, dimensions: &[i64]) -> Result<Self> {
        if !ty.is_array() {
            return Err(AnalysisError::TypeMismatch {
                expected: DataType::IntArray,
                found: ty,
            });
        }
        if dimensions.is_empty() || dimensions.len() > MAX_DIMENSIONS {
            return Err(AnalysisError::coverage(
                format!("{}{:?}", ty, dimensions),
                format!("arrays must have between 1 and {} dimensions", MAX_DIMENSIONS),
            ));
        }
        if let Some(extent) = dimensions.iter().find(|&&d| d < 0) {
            return Err(AnalysisError::coverage(
                format!("{}{:?}", ty, dimensions),
                format!("negative extent {}", extent),
            ));
        }
        Ok(ArrayInfo {
            ty,
            dimensions: dimensions.to_vec(),
        })
    }

    pub fn ty(&self) -> DataType {
        self.ty
    }

    pub fn dimensions(&self) -> &[i64] {
        &self.dimensions
    }

    pub fn num_dimensions(&self) -> usize {
        self.dimensions.len()
    }

    pub fn size(&self, dim: usize) -> Option<i64> {
        self.dimensions.get(dim).copied()
    }

    /// Total footprint in bytes.
    pub fn size_estimate(&self) -> i64 {
        self.dimensions
            .iter()
            .fold(self.ty.size_bytes() as i64, |acc, &d| acc.saturating_mul(d))
    }
}

/// Live integer contents of an array, flattened in row-major order.
#[derive(Debug, Default)]
pub struct ArrayStorage {
    values: Vec<i64>,
}

impl ArrayStorage {
    pub fn new(values: Vec<i64>) -> Self {
        ArrayStorage { values }
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }
}

/// A named view of an array as seen by the loop body.
#[derive(Debug, Clone)]
pub struct ArrayBinding {
    pub name: String,
    pub info: Arc<ArrayInfo>,
    pub storage: Option<Arc<ArrayStorage>>,
    /// Set by the front end when the loop never writes through this name.
    pub read_only: bool,
}

impl ArrayBinding {
    pub fn new(name: impl Into<String>, info: Arc<ArrayInfo>) -> Self {
        ArrayBinding {
            name: name.into(),
            info,
            storage: None,
            read_only: false,
        }
    }

    pub fn with_storage(mut self, storage: Arc<ArrayStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Stable identity of the backing storage, if contents are attached.
    pub fn identity(&self) -> Option<usize> {
        self.storage.as_ref().map(|s| Arc::as_ptr(s) as usize)
    }

    /// Whether contents may be scanned to bound values read from this array.
    pub fn is_scan_eligible(&self) -> bool {
        self.read_only
            && self.storage.is_some()
            && self.info.num_dimensions() == 1
            && self.info.ty().is_scannable()
    }
}
