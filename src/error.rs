//! Error types for recursive clustering operations.
//!
//! Provides rich error context for library consumers. Failures of a single
//! pipeline stage for a single parameter vector are recovered inside the
//! search strategies and never surface here; everything else does.

use thiserror::Error;

/// Main error type for recluster operations.
///
/// # Examples
///
/// ```
/// use recluster::error::ReclusterError;
///
/// let err = ReclusterError::DimensionMismatch {
///     expected: "100x10".to_string(),
///     actual: "100x5".to_string(),
/// };
/// assert!(err.to_string().contains("dimension mismatch"));
/// ```
#[derive(Debug, Error)]
pub enum ReclusterError {
    /// Matrix/vector dimensions don't match for the operation.
    #[error("Matrix dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimensions description
        expected: String,
        /// Actual dimensions found
        actual: String,
    },

    /// An operation received no rows or no features.
    #[error("empty input: {context}")]
    EmptyInput {
        /// What was empty
        context: String,
    },

    /// Contradictory or out-of-range configuration, detected before any computation.
    #[error("Invalid configuration: {param} = {value}, expected {constraint}")]
    InvalidConfig {
        /// Parameter name
        param: String,
        /// Provided value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// A pipeline stage could not process its input.
    #[error("Stage {stage} failed: {message}")]
    StageFailure {
        /// Stage name ("filter", "embed", "cluster")
        stage: &'static str,
        /// Failure description
        message: String,
    },

    /// Every candidate parameter vector of a node failed.
    #[error("Optimization failed for node {node}: all {candidates} candidate vectors failed")]
    OptimizationFailed {
        /// Node name
        node: String,
        /// Number of vectors attempted
        candidates: usize,
    },

    /// Checkpoint files are missing, partial or inconsistent.
    #[error("Checkpoint corrupt: {message}")]
    CheckpointCorrupt {
        /// Description of the inconsistency
        message: String,
    },

    /// Attempt to bring noise or undersized-cluster samples back into the active set.
    #[error("Unrecoverable discard: {message}")]
    UnrecoverableDiscard {
        /// Which group or samples were requested
        message: String,
    },

    /// I/O error (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with string message.
    #[error("{0}")]
    Other(String),
}

impl From<&str> for ReclusterError {
    fn from(msg: &str) -> Self {
        ReclusterError::Other(msg.to_string())
    }
}

impl From<String> for ReclusterError {
    fn from(msg: String) -> Self {
        ReclusterError::Other(msg)
    }
}

impl ReclusterError {
    /// Create a dimension mismatch error with descriptive context
    #[must_use]
    pub fn dimension_mismatch(context: &str, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            expected: format!("{context}={expected}"),
            actual: format!("{actual}"),
        }
    }

    /// Create an empty input error
    #[must_use]
    pub fn empty_input(context: &str) -> Self {
        Self::EmptyInput {
            context: context.to_string(),
        }
    }

    /// Create an invalid configuration error
    #[must_use]
    pub fn invalid_config(param: &str, value: impl ToString, constraint: &str) -> Self {
        Self::InvalidConfig {
            param: param.to_string(),
            value: value.to_string(),
            constraint: constraint.to_string(),
        }
    }

    /// Create a stage failure error
    #[must_use]
    pub fn stage(stage: &'static str, message: impl Into<String>) -> Self {
        Self::StageFailure {
            stage,
            message: message.into(),
        }
    }

    /// Create a checkpoint corruption error
    #[must_use]
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CheckpointCorrupt {
            message: message.into(),
        }
    }
}

/// Convenience type alias for Results.
pub type Result<T> = std::result::Result<T, ReclusterError>;
