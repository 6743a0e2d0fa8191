//! Run repository trait definition.
//!
//! Defines the storage interface for workflow run records and per-node
//! transition logs written by the checkpoint layer.

use sagaflow_types::error::RepositoryError;
use sagaflow_types::workflow::{NodeLog, RunStatus, WorkflowRun};
use uuid::Uuid;

/// Repository trait for run persistence.
///
/// Covers two entity families:
/// - **Runs:** create, update and query workflow run records.
/// - **Node logs:** append-only transition records for individual nodes.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait RunRepository: Send + Sync + 'static {
    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Create a new run record. Fails with `Conflict` if the id is taken.
    fn create_run(
        &self,
        run: &WorkflowRun,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update a run's status (and optionally error message / context snapshot).
    ///
    /// Terminal statuses also stamp `completed_at`.
    fn update_run_status(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
        context: Option<&serde_json::Value>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a run by its UUID.
    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRun>, RepositoryError>> + Send;

    /// List runs for a workflow id, most recent first.
    fn list_runs(
        &self,
        workflow_id: &str,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRun>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Node logs
    // -----------------------------------------------------------------------

    /// Append a node transition record.
    fn append_node_log(
        &self,
        log: &NodeLog,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all node logs for a run, in append order.
    fn list_node_logs(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<NodeLog>, RepositoryError>> + Send;
}
