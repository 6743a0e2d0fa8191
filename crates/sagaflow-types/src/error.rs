use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable classification of a workflow failure.
///
/// Callers use this to tell "the operation is not allowed" apart from
/// "something broke" without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The workflow definition itself is invalid.
    Definition,
    /// A step's invoke failed.
    StepFailed,
    /// The operation is not permitted in the current state.
    NotAllowed,
    /// Input data failed a step's precondition checks.
    InvalidData,
    /// A required entity does not exist.
    NotFound,
    /// A transform or predicate failed. Always a caller bug.
    TransformFailed,
    /// A step attempt or the whole run exceeded its deadline.
    Timeout,
    /// The run was cancelled by request.
    Cancelled,
    /// A node task panicked.
    Panicked,
    /// A nested workflow failed.
    SubWorkflowFailed,
}

impl ErrorKind {
    /// Whether this kind represents a precondition rejection rather than a fault.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorKind::NotAllowed | ErrorKind::InvalidData | ErrorKind::NotFound
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Definition => "definition",
            ErrorKind::StepFailed => "step_failed",
            ErrorKind::NotAllowed => "not_allowed",
            ErrorKind::InvalidData => "invalid_data",
            ErrorKind::NotFound => "not_found",
            ErrorKind::TransformFailed => "transform_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Panicked => "panicked",
            ErrorKind::SubWorkflowFailed => "sub_workflow_failed",
        };
        f.write_str(s)
    }
}

/// Errors from repository operations (used by trait definitions in sagaflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_kinds() {
        assert!(ErrorKind::NotAllowed.is_validation());
        assert!(ErrorKind::InvalidData.is_validation());
        assert!(ErrorKind::NotFound.is_validation());
        assert!(!ErrorKind::StepFailed.is_validation());
        assert!(!ErrorKind::Timeout.is_validation());
    }

    #[test]
    fn error_kind_display_matches_serde() {
        for kind in [
            ErrorKind::NotAllowed,
            ErrorKind::SubWorkflowFailed,
            ErrorKind::TransformFailed,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }
}
