//! LoopGuard: Safety Analysis for Parallel Loop Offloading
//!
//! Before a loop is handed to a parallel backend this library decides:
//! 1. Whether every array access and integer operation is provably in bounds,
//!    so its runtime check can be dropped
//! 2. Whether iterations are free of carried dependences, so they may run in parallel
//! 3. Whether the loop does enough work for offloading to pay off
//!
//! # Core Pipeline Flow
//! ```text
//! Loop AST → Bound Builder → Bound Finalizer → Verdicts (runtime checks)
//!     ↓                            ↑
//!     ↓                    constants / array scans
//!     ├──→ Cost Profiler → Offload decision
//!     └──→ Oracle lowering → Dependence oracle → Dependency graph → Parallel verdicts
//! ```
//!
//! # Module Organization
//!
//! ## Input Representation
//! - [`ast`]: Arena-backed loop/expression AST
//! - [`types`]: Type tags and literal values
//! - [`loop_info`]: Simple and symbolic loop ranges
//! - [`array`]: Array metadata and shared storage
//! - [`kernel`]: JSON kernel import format
//!
//! ## Bound Analysis
//! - [`bounds`]: The bound domain (literals, intervals, branches, symbolic forms)
//! - [`builder`]: Symbolic bound construction, once per loop nest
//! - [`finalizer`]: Bound narrowing and safety verification
//! - [`context`]: Per-session state and the array-value scan cache
//!
//! ## Dependence Analysis
//! - [`cycle`]: Dependency graph with cycle detection
//! - [`oracle`]: Dependence oracle protocol (process, subscript and static oracles)
//! - [`dependence`]: Oracle lowering and per-loop parallel verdicts
//!
//! ## Cost Model
//! - [`profile`]: Operation-count profiling and offload decision
//!
//! ## Driver
//! - [`pipeline`]: End-to-end analysis of a kernel's candidate loops
//! - [`config`]: Analysis configuration

// ============================================================================
// Input Representation
// ============================================================================

pub mod array; // Array metadata, storage identity
pub mod ast; // Node arena and construction helpers
pub mod kernel; // JSON import
pub mod loop_info; // Loop ranges
pub mod types; // DataType, Value

// ============================================================================
// Bound Analysis
// ============================================================================

pub mod bounds; // Bound domain
pub mod builder; // First pass: AST -> symbolic bounds
pub mod context; // Session state, array scan cache
pub mod finalizer; // Second pass: narrowing + verdicts

// ============================================================================
// Dependence Analysis
// ============================================================================

pub mod cycle; // Dependency graph
pub mod dependence; // Lowering + verdict combination
pub mod oracle; // Oracle trait and implementations

// ============================================================================
// Cost Model and Driver
// ============================================================================

pub mod config;
pub mod error;
pub mod pipeline;
pub mod profile;

pub use ast::{Ast, LoopId, NodeId};
pub use bounds::Bound;
pub use config::AnalysisConfig;
pub use context::AnalysisContext;
pub use cycle::DependencyGraph;
pub use error::{AnalysisError, Result};
pub use oracle::{DependenceOracle, ProcessOracle, StaticOracle, SubscriptOracle};
pub use pipeline::{AnalysisPipeline, LoopReport, LoopSession, RegionOutcome};
pub use types::{DataType, Value};
