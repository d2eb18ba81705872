//! Error taxonomy for loop analysis.
//!
//! Coverage and type failures are fatal for the loop session that raised them;
//! the caller falls back to sequential execution for that loop. Bound
//! invalidation is recoverable: the pipeline rebuilds the session and retries.

use thiserror::Error;

use crate::types::DataType;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// The analysis met a node shape it cannot model.
    #[error("unsupported construct `{node}`: {message}")]
    Coverage { node: String, message: String },

    /// A verdict previously proven safe no longer holds under strict checking.
    #[error("bound check invalidated a previously proven-safe access")]
    BoundInvalidated,

    #[error("type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch { expected: DataType, found: DataType },

    #[error("dependence oracle failed: {0}")]
    Oracle(String),

    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnalysisError {
    pub fn coverage(node: impl Into<String>, message: impl Into<String>) -> Self {
        AnalysisError::Coverage {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Fatal errors abort the loop session; everything else may be retried.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AnalysisError::BoundInvalidated)
    }
}

impl From<AnalysisError> for String {
    fn from(err: AnalysisError) -> String {
        err.to_string()
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
