use std::fmt;
use thiserror::Error;

use crate::parameters::expression::ExpressionError;

/// Which index space an out-of-range index was checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Position of a child inside a composite function.
    Child,
    /// Index in the declared parameter space.
    Declared,
    /// Index in the active parameter space.
    Active,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Child => write!(f, "child"),
            IndexKind::Declared => write!(f, "declared parameter"),
            IndexKind::Active => write!(f, "active parameter"),
        }
    }
}

/// Error types for the fitcore library.
#[derive(Error, Debug)]
pub enum FitError {
    /// A child, declared or active index exceeds the current count.
    #[error("{kind} index {index} is out of range (count is {len})")]
    IndexOutOfRange {
        kind: IndexKind,
        index: usize,
        len: usize,
    },

    /// Malformed parameter name, or an operation a function cannot support.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A tie references a parameter that is not part of the function tree.
    #[error("Logic error: {0}")]
    LogicError(String),

    /// A function lacks a capability the operation required.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Error indicating a mismatch in buffer or matrix dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Error during function evaluation.
    #[error("Function evaluation error: {0}")]
    FunctionEvaluation(String),

    /// Error indicating the solver failed to converge.
    #[error("Algorithm failed to converge: {0}")]
    ConvergenceFailure(String),

    /// Malformed function definition string.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Tie expression parse or evaluation error.
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FitError {
    pub fn index_out_of_range(kind: IndexKind, index: usize, len: usize) -> Self {
        FitError::IndexOutOfRange { kind, index, len }
    }

    /// Whether this error reports a missing capability.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, FitError::NotImplemented(_))
    }
}

/// Result type alias for fitcore operations.
pub type Result<T> = std::result::Result<T, FitError>;

/// Fails with `IndexOutOfRange` unless `index < len`.
pub(crate) fn check_index(kind: IndexKind, index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(FitError::index_out_of_range(kind, index, len))
    }
}
