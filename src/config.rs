//! Analysis configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Switches and thresholds shared by every stage of the analysis.
///
/// Loaded from JSON with every field optional; missing fields keep their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Run the static bound check. When off, every access keeps its runtime check.
    pub bound_check: bool,

    /// Bound values read from read-only arrays by scanning their contents.
    pub scan_array_min_max: bool,

    /// Also record whether scanned arrays hold pairwise distinct values.
    pub scan_array_uniqueness: bool,

    /// Weighted operation count at which a loop is worth offloading.
    pub offload_threshold: u64,

    /// How many times a session is rebuilt after its bounds are invalidated.
    pub retry_limit: usize,

    /// Analyze independent top-level loops on the rayon pool.
    pub concurrent: bool,

    /// Run the dependence oracle on candidate loops.
    pub check_dependencies: bool,

    /// Divisor applied to the profiling multiplier at each conditional.
    pub branch_fanout: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            bound_check: true,
            scan_array_min_max: true,
            scan_array_uniqueness: false,
            offload_threshold: 1000,
            retry_limit: 5,
            concurrent: true,
            check_dependencies: true,
            branch_fanout: 2,
        }
    }
}

impl AnalysisConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
