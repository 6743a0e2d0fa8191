//! The step contract.
//!
//! A [`Step`] is the atomic, side-effecting unit of a workflow: an `invoke`
//! function and, for compensatable steps, a `compensate` function that undoes
//! a successful invoke. Because `Step` uses RPITIT it cannot be a trait
//! object, so the engine stores steps as [`BoxStep`]:
//! 1. `StepDyn` is an object-safe mirror with boxed futures
//! 2. `StepDyn` is blanket-implemented for every `T: Step`
//! 3. `BoxStep` wraps `Arc<dyn StepDyn>` and delegates
//!
//! [`StepFn`] builds steps from async closures.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use sagaflow_types::error::ErrorKind;
use sagaflow_types::workflow::CompensationMode;
use serde_json::Value;
use uuid::Uuid;

use super::result::RunFailure;

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// Identity of one step invocation, handed to `invoke` and `compensate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepContext {
    pub run_id: Uuid,
    pub workflow_id: String,
    /// Node name (for hook handlers: `{hook}:{handler}`).
    pub node: String,
    /// 1-based attempt number of the invoke that produced this context.
    pub attempt: u32,
}

impl StepContext {
    /// Stable key for deduplicating side effects: `{run_id}-{node}-{attempt}`.
    pub fn idempotency_key(&self) -> String {
        format!("{}-{}-{}", self.run_id, self.node, self.attempt)
    }
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Failure returned by a step's invoke or compensate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    /// Generic failure. Retryable when the step has a retry policy.
    #[error("{0}")]
    Failed(String),

    /// The operation is not permitted in the current state.
    #[error("not allowed: {0}")]
    NotAllowed(String),

    /// Input data failed a precondition.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A required entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The attempt exceeded its deadline.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// A nested workflow failed (its own steps have already been unwound).
    #[error("sub-workflow '{workflow_id}' failed: {failure}")]
    SubWorkflow {
        workflow_id: String,
        failure: Box<RunFailure>,
    },

    /// Nesting limit reached before the sub-workflow started.
    #[error("sub-workflow depth {depth} exceeds maximum {max}")]
    DepthExceeded { depth: u32, max: u32 },

    /// `compensate` was called on a step that has none.
    #[error("step has no compensate function")]
    NotCompensatable,
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed(message.into())
    }

    pub fn not_allowed(message: impl Into<String>) -> Self {
        StepError::NotAllowed(message.into())
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        StepError::InvalidData(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        StepError::NotFound(message.into())
    }

    /// Machine-readable kind. Sub-workflow failures report the child's kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::Failed(_) | StepError::NotCompensatable => ErrorKind::StepFailed,
            StepError::NotAllowed(_) => ErrorKind::NotAllowed,
            StepError::InvalidData(_) => ErrorKind::InvalidData,
            StepError::NotFound(_) => ErrorKind::NotFound,
            StepError::Timeout(_) => ErrorKind::Timeout,
            StepError::SubWorkflow { failure, .. } => failure.kind(),
            StepError::DepthExceeded { .. } => ErrorKind::SubWorkflowFailed,
        }
    }

    /// Only faults are retried. Validation failures would fail again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Failed(_) | StepError::Timeout(_))
    }
}

// ---------------------------------------------------------------------------
// Step trait
// ---------------------------------------------------------------------------

/// A unit of work with an optional undo.
///
/// Implementors must state their compensation mode explicitly; workflows
/// containing a step that reports `CompensationMode::Undeclared` fail to build.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait Step: Send + Sync + 'static {
    fn compensation_mode(&self) -> CompensationMode;

    /// Perform the step. Called once per attempt.
    fn invoke(
        &self,
        input: Value,
        ctx: &StepContext,
    ) -> impl Future<Output = Result<Value, StepError>> + Send;

    /// Undo a successful invoke, given its output and the input it was called with.
    ///
    /// Called at most once per successful invoke, only during unwind.
    fn compensate(
        &self,
        _output: Value,
        _input: Value,
        _ctx: &StepContext,
    ) -> impl Future<Output = Result<(), StepError>> + Send {
        async { Err(StepError::NotCompensatable) }
    }
}

/// Object-safe version of [`Step`] with boxed futures.
pub trait StepDyn: Send + Sync {
    fn compensation_mode(&self) -> CompensationMode;

    fn invoke_boxed<'a>(
        &'a self,
        input: Value,
        ctx: &'a StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>>;

    fn compensate_boxed<'a>(
        &'a self,
        output: Value,
        input: Value,
        ctx: &'a StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'a>>;
}

impl<T: Step> StepDyn for T {
    fn compensation_mode(&self) -> CompensationMode {
        Step::compensation_mode(self)
    }

    fn invoke_boxed<'a>(
        &'a self,
        input: Value,
        ctx: &'a StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StepError>> + Send + 'a>> {
        Box::pin(self.invoke(input, ctx))
    }

    fn compensate_boxed<'a>(
        &'a self,
        output: Value,
        input: Value,
        ctx: &'a StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'a>> {
        Box::pin(self.compensate(output, input, ctx))
    }
}

/// Type-erased, cheaply cloneable step.
#[derive(Clone)]
pub struct BoxStep {
    inner: Arc<dyn StepDyn>,
}

impl BoxStep {
    pub fn new<T: Step>(step: T) -> Self {
        Self {
            inner: Arc::new(step),
        }
    }

    pub fn compensation_mode(&self) -> CompensationMode {
        self.inner.compensation_mode()
    }

    pub async fn invoke(&self, input: Value, ctx: &StepContext) -> Result<Value, StepError> {
        self.inner.invoke_boxed(input, ctx).await
    }

    pub async fn compensate(
        &self,
        output: Value,
        input: Value,
        ctx: &StepContext,
    ) -> Result<(), StepError> {
        self.inner.compensate_boxed(output, input, ctx).await
    }
}

impl std::fmt::Debug for BoxStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStep")
            .field("compensation_mode", &self.compensation_mode())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// StepFn
// ---------------------------------------------------------------------------

type InvokeFn =
    Arc<dyn Fn(Value, StepContext) -> BoxFuture<'static, Result<Value, StepError>> + Send + Sync>;
type CompensateFn = Arc<
    dyn Fn(Value, Value, StepContext) -> BoxFuture<'static, Result<(), StepError>> + Send + Sync,
>;

/// A step built from async closures.
///
/// Starts out `Undeclared`; call [`StepFn::with_compensation`] or
/// [`StepFn::non_compensatable`] before handing it to a workflow.
///
/// ```ignore
/// let reserve = StepFn::new(|input, _ctx| async move { reserve_stock(input).await })
///     .with_compensation(|output, _input, _ctx| async move { release_stock(output).await });
/// ```
#[derive(Clone)]
pub struct StepFn {
    invoke: InvokeFn,
    compensate: Option<CompensateFn>,
    mode: CompensationMode,
}

impl StepFn {
    pub fn new<F, Fut>(invoke: F) -> Self
    where
        F: Fn(Value, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        Self {
            invoke: Arc::new(move |input, ctx| Box::pin(invoke(input, ctx))),
            compensate: None,
            mode: CompensationMode::Undeclared,
        }
    }

    /// Attach an undo function. Marks the step `Compensatable`.
    pub fn with_compensation<F, Fut>(mut self, compensate: F) -> Self
    where
        F: Fn(Value, Value, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        self.compensate = Some(Arc::new(move |output, input, ctx| {
            Box::pin(compensate(output, input, ctx))
        }));
        self.mode = CompensationMode::Compensatable;
        self
    }

    /// Declare that this step has no undo.
    pub fn non_compensatable(mut self) -> Self {
        self.compensate = None;
        self.mode = CompensationMode::NonCompensatable;
        self
    }
}

impl Step for StepFn {
    fn compensation_mode(&self) -> CompensationMode {
        self.mode
    }

    async fn invoke(&self, input: Value, ctx: &StepContext) -> Result<Value, StepError> {
        (self.invoke)(input, ctx.clone()).await
    }

    async fn compensate(
        &self,
        output: Value,
        input: Value,
        ctx: &StepContext,
    ) -> Result<(), StepError> {
        match &self.compensate {
            Some(compensate) => compensate(output, input, ctx.clone()).await,
            None => Err(StepError::NotCompensatable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> StepContext {
        StepContext {
            run_id: Uuid::nil(),
            workflow_id: "wf".to_string(),
            node: "reserve".to_string(),
            attempt: 2,
        }
    }

    struct Echo;

    impl Step for Echo {
        fn compensation_mode(&self) -> CompensationMode {
            CompensationMode::NonCompensatable
        }

        async fn invoke(&self, input: Value, _ctx: &StepContext) -> Result<Value, StepError> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn trait_impl_is_boxable_and_defaults_to_no_compensation() {
        let step = BoxStep::new(Echo);
        assert_eq!(step.compensation_mode(), CompensationMode::NonCompensatable);

        let out = step.invoke(json!({"a": 1}), &ctx()).await.unwrap();
        assert_eq!(out, json!({"a": 1}));

        let err = step.compensate(out, json!(null), &ctx()).await.unwrap_err();
        assert_eq!(err, StepError::NotCompensatable);
    }

    #[tokio::test]
    async fn step_fn_modes() {
        let undeclared = StepFn::new(|input, _| async move { Ok(input) });
        assert_eq!(
            Step::compensation_mode(&undeclared),
            CompensationMode::Undeclared
        );

        let none = undeclared.clone().non_compensatable();
        assert_eq!(
            Step::compensation_mode(&none),
            CompensationMode::NonCompensatable
        );

        let undo = undeclared.with_compensation(|_, _, _| async { Ok(()) });
        assert_eq!(
            Step::compensation_mode(&undo),
            CompensationMode::Compensatable
        );
    }

    #[tokio::test]
    async fn step_fn_compensate_receives_output_and_input() {
        let step = BoxStep::new(
            StepFn::new(|input, _| async move { Ok(json!({"reserved": input["qty"]})) })
                .with_compensation(|output, input, ctx| async move {
                    assert_eq!(output, json!({"reserved": 3}));
                    assert_eq!(input, json!({"qty": 3}));
                    assert_eq!(ctx.attempt, 2);
                    Ok(())
                }),
        );

        let input = json!({"qty": 3});
        let output = step.invoke(input.clone(), &ctx()).await.unwrap();
        step.compensate(output, input, &ctx()).await.unwrap();
    }

    #[test]
    fn error_kinds_and_retryability() {
        assert_eq!(StepError::failed("x").kind(), ErrorKind::StepFailed);
        assert_eq!(StepError::not_allowed("x").kind(), ErrorKind::NotAllowed);
        assert_eq!(StepError::invalid_data("x").kind(), ErrorKind::InvalidData);
        assert_eq!(StepError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(
            StepError::DepthExceeded { depth: 9, max: 8 }.kind(),
            ErrorKind::SubWorkflowFailed
        );

        assert!(StepError::failed("x").is_retryable());
        assert!(StepError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!StepError::not_allowed("x").is_retryable());
        assert!(!StepError::invalid_data("x").is_retryable());
    }

    #[test]
    fn idempotency_key_format() {
        let key = ctx().idempotency_key();
        assert_eq!(key, format!("{}-reserve-2", Uuid::nil()));
    }
}
