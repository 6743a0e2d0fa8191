//! In-memory `RunRepository` implementation.
//!
//! Keeps run records and node logs in process memory. Suitable for tests,
//! the demo CLI and deployments that layer durability elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sagaflow_types::error::RepositoryError;
use sagaflow_types::workflow::{NodeLog, RunStatus, WorkflowRun};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::run::RunRepository;

#[derive(Default)]
struct Store {
    runs: HashMap<Uuid, WorkflowRun>,
    node_logs: HashMap<Uuid, Vec<NodeLog>>,
}

/// Shared in-memory run store. Clones share the same underlying data.
#[derive(Clone, Default)]
pub struct InMemoryRunRepository {
    store: Arc<RwLock<Store>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of run records held.
    pub async fn run_count(&self) -> usize {
        self.store.read().await.runs.len()
    }
}

impl std::fmt::Debug for InMemoryRunRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRunRepository")
            .finish_non_exhaustive()
    }
}

impl RunRepository for InMemoryRunRepository {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        if store.runs.contains_key(&run.id) {
            return Err(RepositoryError::Conflict(format!("run {} already exists", run.id)));
        }
        store.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
        context: Option<&serde_json::Value>,
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        let run = store.runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;

        run.status = status;
        if let Some(error) = error {
            run.error = Some(error.to_string());
        }
        if let Some(context) = context {
            run.context = context.clone();
        }
        if status.is_terminal() {
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        Ok(self.store.read().await.runs.get(run_id).cloned())
    }

    async fn list_runs(
        &self,
        workflow_id: &str,
        limit: u32,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let store = self.store.read().await;
        let mut runs: Vec<WorkflowRun> = store
            .runs
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn append_node_log(&self, log: &NodeLog) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        if !store.runs.contains_key(&log.run_id) {
            return Err(RepositoryError::NotFound);
        }
        store
            .node_logs
            .entry(log.run_id)
            .or_default()
            .push(log.clone());
        Ok(())
    }

    async fn list_node_logs(&self, run_id: &Uuid) -> Result<Vec<NodeLog>, RepositoryError> {
        Ok(self
            .store
            .read()
            .await
            .node_logs
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagaflow_types::workflow::{NodeKind, NodeStatus};
    use serde_json::json;

    fn make_run(workflow_id: &str) -> WorkflowRun {
        WorkflowRun {
            id: Uuid::now_v7(),
            workflow_id: workflow_id.to_string(),
            parent_run_id: None,
            status: RunStatus::Pending,
            input: json!({"order_id": "order_1"}),
            context: json!({}),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    fn make_log(run_id: Uuid, node: &str, status: NodeStatus) -> NodeLog {
        NodeLog {
            id: Uuid::now_v7(),
            run_id,
            node: node.to_string(),
            kind: NodeKind::Step,
            status,
            attempt: 1,
            idempotency_key: None,
            output: None,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_and_get_run() {
        let repo = InMemoryRunRepository::new();
        let run = make_run("cancel-order");
        repo.create_run(&run).await.unwrap();

        let fetched = repo.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(fetched.workflow_id, "cancel-order");
        assert_eq!(fetched.status, RunStatus::Pending);
        assert_eq!(repo.run_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_run_is_conflict() {
        let repo = InMemoryRunRepository::new();
        let run = make_run("cancel-order");
        repo.create_run(&run).await.unwrap();
        let err = repo.create_run(&run).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn terminal_status_sets_completed_at() {
        let repo = InMemoryRunRepository::new();
        let run = make_run("refund-payments");
        repo.create_run(&run).await.unwrap();

        repo.update_run_status(&run.id, RunStatus::Running, None, None)
            .await
            .unwrap();
        let fetched = repo.get_run(&run.id).await.unwrap().unwrap();
        assert!(fetched.completed_at.is_none());

        let ctx = json!({"input": {"order_id": "order_1"}});
        repo.update_run_status(&run.id, RunStatus::Succeeded, None, Some(&ctx))
            .await
            .unwrap();
        let fetched = repo.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Succeeded);
        assert!(fetched.completed_at.is_some());
        assert_eq!(fetched.context, ctx);
    }

    #[tokio::test]
    async fn update_missing_run_is_not_found() {
        let repo = InMemoryRunRepository::new();
        let err = repo
            .update_run_status(&Uuid::now_v7(), RunStatus::Running, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn list_runs_filters_and_limits() {
        let repo = InMemoryRunRepository::new();
        for _ in 0..3 {
            repo.create_run(&make_run("cancel-order")).await.unwrap();
        }
        repo.create_run(&make_run("refund-payments")).await.unwrap();

        assert_eq!(repo.list_runs("cancel-order", 10).await.unwrap().len(), 3);
        assert_eq!(repo.list_runs("cancel-order", 2).await.unwrap().len(), 2);
        assert_eq!(
            repo.list_runs("refund-payments", 10).await.unwrap().len(),
            1
        );
        assert!(repo.list_runs("unknown", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn node_logs_keep_append_order() {
        let repo = InMemoryRunRepository::new();
        let run = make_run("cancel-order");
        repo.create_run(&run).await.unwrap();

        repo.append_node_log(&make_log(run.id, "a", NodeStatus::Running))
            .await
            .unwrap();
        repo.append_node_log(&make_log(run.id, "a", NodeStatus::Completed))
            .await
            .unwrap();
        repo.append_node_log(&make_log(run.id, "a", NodeStatus::Compensated))
            .await
            .unwrap();

        let logs = repo.list_node_logs(&run.id).await.unwrap();
        let statuses: Vec<_> = logs.iter().map(|l| l.status).collect();
        assert_eq!(
            statuses,
            vec![NodeStatus::Running, NodeStatus::Completed, NodeStatus::Compensated]
        );
    }

    #[tokio::test]
    async fn node_log_for_unknown_run_is_rejected() {
        let repo = InMemoryRunRepository::new();
        let err = repo
            .append_node_log(&make_log(Uuid::now_v7(), "a", NodeStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }
}
