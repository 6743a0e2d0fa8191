//! Checkpoint manager for run and node transitions.
//!
//! Wraps a `RunRepository` to record every run status change and node
//! transition (running, completed, failed, skipped, compensated). The records
//! form an audit trail and the seam for external durable replay; the engine
//! itself never reads them back during a run.

use chrono::Utc;
use sagaflow_types::workflow::{NodeKind, NodeLog, NodeStatus, RunStatus, WorkflowRun};
use serde_json::Value;
use uuid::Uuid;

use crate::repository::run::RunRepository;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Records run and node transitions through a [`RunRepository`].
pub struct CheckpointManager<R: RunRepository> {
    repo: R,
}

/// One node transition to record.
#[derive(Debug, Clone, Copy)]
pub struct NodeTransition<'a> {
    pub run_id: Uuid,
    pub node: &'a str,
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub attempt: u32,
    pub output: Option<&'a Value>,
    pub error: Option<&'a str>,
}

impl<'a> NodeTransition<'a> {
    pub fn new(run_id: Uuid, node: &'a str, kind: NodeKind, status: NodeStatus) -> Self {
        Self {
            run_id,
            node,
            kind,
            status,
            attempt: 0,
            output: None,
            error: None,
        }
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn output(mut self, output: &'a Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn error(mut self, error: &'a str) -> Self {
        self.error = Some(error);
        self
    }
}

impl<R: RunRepository> CheckpointManager<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    // -----------------------------------------------------------------------
    // Run-level checkpoints
    // -----------------------------------------------------------------------

    /// Record a new run in `Pending` state.
    pub async fn checkpoint_run_created(
        &self,
        run_id: Uuid,
        workflow_id: &str,
        parent_run_id: Option<Uuid>,
        input: &Value,
    ) -> Result<(), CheckpointError> {
        let run = WorkflowRun {
            id: run_id,
            workflow_id: workflow_id.to_string(),
            parent_run_id,
            status: RunStatus::Pending,
            input: input.clone(),
            context: Value::Object(Default::default()),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        };

        self.repo
            .create_run(&run)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(run_id = %run_id, workflow = workflow_id, "checkpointed run created");
        Ok(())
    }

    /// Update the overall run status and optionally the context snapshot.
    pub async fn checkpoint_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<&str>,
        context: Option<&Value>,
    ) -> Result<(), CheckpointError> {
        self.repo
            .update_run_status(&run_id, status, error, context)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(run_id = %run_id, status = %status, "checkpointed run status");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Node-level checkpoints
    // -----------------------------------------------------------------------

    /// Append a node transition. Side-effecting nodes that were invoked get
    /// an idempotency key `{run_id}-{node}-{attempt}`.
    pub async fn checkpoint_node(&self, t: NodeTransition<'_>) -> Result<Uuid, CheckpointError> {
        let log_id = Uuid::now_v7();
        let idempotency_key = (t.kind.is_side_effecting() && t.attempt > 0)
            .then(|| format!("{}-{}-{}", t.run_id, t.node, t.attempt));

        let log = NodeLog {
            id: log_id,
            run_id: t.run_id,
            node: t.node.to_string(),
            kind: t.kind,
            status: t.status,
            attempt: t.attempt,
            idempotency_key,
            output: t.output.cloned(),
            error: t.error.map(str::to_string),
            recorded_at: Utc::now(),
        };

        self.repo
            .append_node_log(&log)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::trace!(
            run_id = %t.run_id,
            node = t.node,
            status = ?t.status,
            "checkpointed node transition"
        );
        Ok(log_id)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Names of nodes that completed in a run, in completion order.
    pub async fn completed_nodes(&self, run_id: Uuid) -> Result<Vec<String>, CheckpointError> {
        let logs = self
            .repo
            .list_node_logs(&run_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        Ok(logs
            .into_iter()
            .filter(|l| l.status == NodeStatus::Completed)
            .map(|l| l.node)
            .collect())
    }

    /// The context snapshot stored with a run.
    pub async fn restore_context(&self, run_id: Uuid) -> Result<Value, CheckpointError> {
        let run = self
            .repo
            .get_run(&run_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::RunNotFound(run_id))?;

        Ok(run.context)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    /// Run not found (for restore operations).
    #[error("workflow run not found: {0}")]
    RunNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryRunRepository;
    use serde_json::json;

    #[test]
    fn checkpoint_error_display() {
        let err = CheckpointError::Repository("disk full".to_string());
        assert!(err.to_string().contains("disk full"));

        let id = Uuid::now_v7();
        let err = CheckpointError::RunNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[tokio::test]
    async fn records_run_lifecycle() {
        let manager = CheckpointManager::new(InMemoryRunRepository::new());
        let run_id = Uuid::now_v7();
        manager
            .checkpoint_run_created(run_id, "cancel-order", None, &json!({"order_id": "o1"}))
            .await
            .unwrap();
        manager
            .checkpoint_run_status(run_id, RunStatus::Running, None, None)
            .await
            .unwrap();
        manager
            .checkpoint_run_status(
                run_id,
                RunStatus::Succeeded,
                None,
                Some(&json!({"input": {"order_id": "o1"}})),
            )
            .await
            .unwrap();

        let run = manager.repo().get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.completed_at.is_some());

        let ctx = manager.restore_context(run_id).await.unwrap();
        assert_eq!(ctx["input"]["order_id"], "o1");
    }

    #[tokio::test]
    async fn node_transitions_carry_idempotency_keys() {
        let manager = CheckpointManager::new(InMemoryRunRepository::new());
        let run_id = Uuid::now_v7();
        manager
            .checkpoint_run_created(run_id, "wf", None, &json!(null))
            .await
            .unwrap();

        let output = json!({"ok": true});
        manager
            .checkpoint_node(
                NodeTransition::new(run_id, "charge", NodeKind::Step, NodeStatus::Completed)
                    .attempt(2)
                    .output(&output),
            )
            .await
            .unwrap();
        manager
            .checkpoint_node(NodeTransition::new(
                run_id,
                "derive",
                NodeKind::Transform,
                NodeStatus::Completed,
            ))
            .await
            .unwrap();
        manager
            .checkpoint_node(NodeTransition::new(
                run_id,
                "skipped",
                NodeKind::Step,
                NodeStatus::Skipped,
            ))
            .await
            .unwrap();

        let logs = manager.repo().list_node_logs(&run_id).await.unwrap();
        assert_eq!(
            logs[0].idempotency_key.as_deref(),
            Some(format!("{run_id}-charge-2").as_str())
        );
        assert_eq!(logs[0].output, Some(output));
        assert!(logs[1].idempotency_key.is_none());
        assert!(logs[2].idempotency_key.is_none());

        let completed = manager.completed_nodes(run_id).await.unwrap();
        assert_eq!(completed, vec!["charge", "derive"]);
    }

    #[tokio::test]
    async fn restore_missing_run_is_not_found() {
        let manager = CheckpointManager::new(InMemoryRunRepository::new());
        let err = manager.restore_context(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::RunNotFound(_)));
    }
}
