//! Run outcomes.
//!
//! Every run ends in a [`RunResult`]: `Succeeded` with the output node's
//! value, or `Failed` with the original cause, any further failures that
//! happened while in-flight nodes drained, and the compensation outcome.

use std::time::Duration;

use sagaflow_types::error::ErrorKind;
use sagaflow_types::workflow::RunStatus;
use serde_json::Value;
use uuid::Uuid;

use super::compensation::CompensationOutcome;
use super::context::ExecutionContext;
use super::step::StepError;

// ---------------------------------------------------------------------------
// RunError
// ---------------------------------------------------------------------------

/// Why a run stopped making progress.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunError {
    /// A step (or sub-workflow, or hook handler) failed.
    #[error("step '{node}' failed: {error}")]
    Step { node: String, error: StepError },

    /// A transform, predicate or input mapper failed.
    #[error("transform '{node}' failed: {message}")]
    Transform { node: String, message: String },

    /// A node task panicked.
    #[error("node '{node}' panicked: {message}")]
    Panicked { node: String, message: String },

    /// A node's outcome could not be recorded.
    #[error("node '{node}' could not be recorded: {message}")]
    Context { node: String, message: String },

    /// The run deadline passed.
    #[error("run timed out after {0:?}")]
    TimedOut(Duration),

    /// The run was cancelled by request.
    #[error("run cancelled")]
    Cancelled,
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::Step { error, .. } => error.kind(),
            RunError::Transform { .. } => ErrorKind::TransformFailed,
            RunError::Panicked { .. } => ErrorKind::Panicked,
            RunError::Context { .. } => ErrorKind::Definition,
            RunError::TimedOut(_) => ErrorKind::Timeout,
            RunError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// The node the failure is attributed to, when there is one.
    pub fn node(&self) -> Option<&str> {
        match self {
            RunError::Step { node, .. }
            | RunError::Transform { node, .. }
            | RunError::Panicked { node, .. }
            | RunError::Context { node, .. } => Some(node),
            RunError::TimedOut(_) | RunError::Cancelled => None,
        }
    }
}

// ---------------------------------------------------------------------------
// RunFailure
// ---------------------------------------------------------------------------

/// A failed run: the original cause plus what the unwind achieved.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    /// The first failure observed. This is what the run failed with.
    pub cause: RunError,
    /// Failures of nodes that were already in flight when the run stopped.
    pub concurrent: Vec<RunError>,
    pub compensation: CompensationOutcome,
}

impl RunFailure {
    pub fn kind(&self) -> ErrorKind {
        self.cause.kind()
    }

    /// Whether every committed compensatable step was undone.
    pub fn fully_compensated(&self) -> bool {
        self.compensation.is_complete()
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cause)?;
        let failures = self.compensation.failures.len();
        if failures > 0 {
            write!(f, " ({failures} compensation failure(s))")?;
        }
        Ok(())
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

// ---------------------------------------------------------------------------
// RunResult
// ---------------------------------------------------------------------------

/// Terminal outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    Succeeded(Value),
    Failed(RunFailure),
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Succeeded(_))
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            RunResult::Succeeded(value) => Some(value),
            RunResult::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match self {
            RunResult::Succeeded(_) => None,
            RunResult::Failed(failure) => Some(failure),
        }
    }

    pub fn into_result(self) -> Result<Value, RunFailure> {
        match self {
            RunResult::Succeeded(value) => Ok(value),
            RunResult::Failed(failure) => Err(failure),
        }
    }
}

// ---------------------------------------------------------------------------
// RunReport / RunOptions
// ---------------------------------------------------------------------------

/// Everything known about a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow_id: String,
    /// `Succeeded` or `Failed`.
    pub status: RunStatus,
    pub result: RunResult,
    /// Final state of the run's execution context.
    pub context: ExecutionContext,
    pub duration: Duration,
}

/// Per-call run settings.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run id to use instead of a fresh UUIDv7 (lets callers cancel early).
    pub run_id: Option<Uuid>,
    /// Deadline for the whole run, overriding the configured default.
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
