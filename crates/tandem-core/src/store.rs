//! Workflow store trait definition and the in-memory reference store.
//!
//! [`WorkflowStore`] is the storage interface for workflow definitions, runs,
//! and artifacts. The infrastructure layer (tandem-infra) implements it with
//! SQLite persistence; [`MemoryStore`] here backs tests and demos.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use tandem_types::error::StoreError;
use tandem_types::workflow::{
    Artifact, Run, RunPatch, RunStatus, StepKind, StepRow, Workflow,
};

// ---------------------------------------------------------------------------
// Step set input
// ---------------------------------------------------------------------------

/// A step as supplied when creating a workflow or replacing its step set.
/// The store assigns row IDs and the workflow ID.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub key: String,
    pub kind: StepKind,
    pub order: u32,
    pub config: serde_json::Value,
}

impl StepSpec {
    pub fn new(key: &str, kind: StepKind, order: u32) -> Self {
        Self {
            key: key.to_string(),
            kind,
            order,
            config: serde_json::Value::Null,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowStore trait
// ---------------------------------------------------------------------------

/// Store trait for workflow persistence.
///
/// Covers three entity families:
/// - **Definitions:** workflows and their ordered step rows. A step set is
///   immutable while a run executes; edits replace the whole set.
/// - **Runs:** one record per execution attempt, finalized exactly once.
/// - **Artifacts:** append-only step input/output/log records.
pub trait WorkflowStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Create a workflow with its step set attached transactionally.
    fn create_workflow(
        &self,
        name: &str,
        steps: &[StepSpec],
    ) -> impl std::future::Future<Output = Result<Workflow, StoreError>> + Send;

    /// Get a workflow definition by its UUID.
    fn get_workflow(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, StoreError>> + Send;

    /// List all workflow definitions, newest first.
    fn list_workflows(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Workflow>, StoreError>> + Send;

    /// Replace a workflow's step set wholesale and bump its version.
    fn replace_steps(
        &self,
        workflow_id: &Uuid,
        steps: &[StepSpec],
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Load a workflow's step rows ordered by `order` ascending.
    fn load_workflow_steps(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepRow>, StoreError>> + Send;

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Insert a run record.
    fn create_run(
        &self,
        run: &Run,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Create a queued run for a workflow unless an unfinished run with the
    /// same input already exists; returns the run ID either way.
    fn create_run_if_missing(
        &self,
        workflow_id: &Uuid,
        input: &serde_json::Value,
        max_retries: u32,
    ) -> impl std::future::Future<Output = Result<Uuid, StoreError>> + Send;

    /// Get a run by its UUID.
    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Run>, StoreError>> + Send;

    /// Apply a partial update to a run. `None` fields are left untouched.
    fn update_run(
        &self,
        run_id: &Uuid,
        patch: RunPatch,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// List runs awaiting processing (status `running`, not yet started),
    /// oldest first, up to `limit`.
    fn list_active_runs(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Run>, StoreError>> + Send;

    // -----------------------------------------------------------------------
    // Artifacts
    // -----------------------------------------------------------------------

    /// Append an artifact record. Artifacts are never updated or deleted.
    fn persist_artifact(
        &self,
        artifact: &Artifact,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// List a run's artifacts in insertion order.
    fn list_artifacts(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Artifact>, StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    workflows: HashMap<Uuid, Workflow>,
    steps: HashMap<Uuid, Vec<StepRow>>,
    runs: HashMap<Uuid, Run>,
    artifacts: Vec<Artifact>,
}

/// In-memory [`WorkflowStore`] used by tests and demos.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows_for(workflow_id: Uuid, steps: &[StepSpec]) -> Vec<StepRow> {
        let mut rows: Vec<StepRow> = steps
            .iter()
            .map(|s| StepRow {
                id: Uuid::now_v7(),
                workflow_id,
                key: s.key.clone(),
                kind: s.kind,
                order: s.order,
                config: s.config.clone(),
            })
            .collect();
        rows.sort_by_key(|r| r.order);
        rows
    }
}

impl WorkflowStore for MemoryStore {
    async fn create_workflow(
        &self,
        name: &str,
        steps: &[StepSpec],
    ) -> Result<Workflow, StoreError> {
        let workflow = Workflow {
            id: Uuid::now_v7(),
            name: name.to_string(),
            version: 1,
            created_at: Utc::now(),
        };
        let rows = Self::rows_for(workflow.id, steps);

        let mut state = self.state.write().await;
        state.steps.insert(workflow.id, rows);
        state.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, StoreError> {
        Ok(self.state.read().await.workflows.get(id).cloned())
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let state = self.state.read().await;
        let mut all: Vec<Workflow> = state.workflows.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn replace_steps(
        &self,
        workflow_id: &Uuid,
        steps: &[StepSpec],
    ) -> Result<(), StoreError> {
        let rows = Self::rows_for(*workflow_id, steps);
        let mut state = self.state.write().await;
        let workflow = state
            .workflows
            .get_mut(workflow_id)
            .ok_or(StoreError::NotFound)?;
        workflow.version += 1;
        state.steps.insert(*workflow_id, rows);
        Ok(())
    }

    async fn load_workflow_steps(&self, workflow_id: &Uuid) -> Result<Vec<StepRow>, StoreError> {
        let state = self.state.read().await;
        Ok(state.steps.get(workflow_id).cloned().unwrap_or_default())
    }

    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.runs.contains_key(&run.id) {
            return Err(StoreError::Conflict(format!("run {} exists", run.id)));
        }
        state.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn create_run_if_missing(
        &self,
        workflow_id: &Uuid,
        input: &serde_json::Value,
        max_retries: u32,
    ) -> Result<Uuid, StoreError> {
        let mut state = self.state.write().await;
        let existing = state.runs.values().find(|r| {
            r.workflow_id == *workflow_id
                && r.input == *input
                && matches!(r.status, RunStatus::Pending | RunStatus::Running)
        });
        if let Some(run) = existing {
            return Ok(run.id);
        }
        let run = Run::new(*workflow_id, input.clone(), max_retries);
        let id = run.id;
        state.runs.insert(id, run);
        Ok(id)
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<Run>, StoreError> {
        Ok(self.state.read().await.runs.get(run_id).cloned())
    }

    async fn update_run(&self, run_id: &Uuid, patch: RunPatch) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let run = state.runs.get_mut(run_id).ok_or(StoreError::NotFound)?;
        if let Some(status) = patch.status {
            run.status = status;
        }
        if let Some(metrics) = patch.metrics {
            run.metrics = Some(metrics);
        }
        if let Some(reason) = patch.failure_reason {
            run.failure_reason = Some(reason);
        }
        if let Some(error) = patch.last_error {
            run.last_error = Some(error);
        }
        if let Some(started_at) = patch.started_at {
            run.started_at = Some(started_at);
        }
        if let Some(finished_at) = patch.finished_at {
            run.finished_at = Some(finished_at);
        }
        Ok(())
    }

    async fn list_active_runs(&self, limit: u32) -> Result<Vec<Run>, StoreError> {
        let state = self.state.read().await;
        let mut active: Vec<Run> = state
            .runs
            .values()
            .filter(|r| r.status == RunStatus::Running && r.started_at.is_none())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        active.truncate(limit as usize);
        Ok(active)
    }

    async fn persist_artifact(&self, artifact: &Artifact) -> Result<(), StoreError> {
        self.state.write().await.artifacts.push(artifact.clone());
        Ok(())
    }

    async fn list_artifacts(&self, run_id: &Uuid) -> Result<Vec<Artifact>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .artifacts
            .iter()
            .filter(|a| a.run_id == *run_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_steps() -> Vec<StepSpec> {
        vec![
            StepSpec::new("echo", StepKind::Tool, 0),
            StepSpec::new("by_flag", StepKind::Branch, 1),
        ]
    }

    #[tokio::test]
    async fn test_create_and_load_workflow() {
        let store = MemoryStore::new();
        let wf = store.create_workflow("demo", &two_steps()).await.unwrap();
        assert_eq!(wf.version, 1);

        let found = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(found.name, "demo");

        let steps = store.load_workflow_steps(&wf.id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].key, "echo");
        assert_eq!(steps[1].order, 1);
    }

    #[tokio::test]
    async fn test_steps_returned_in_order() {
        let store = MemoryStore::new();
        let steps = vec![
            StepSpec::new("c", StepKind::Tool, 2),
            StepSpec::new("a", StepKind::Tool, 0),
            StepSpec::new("b", StepKind::Tool, 1),
        ];
        let wf = store.create_workflow("ordered", &steps).await.unwrap();
        let rows = store.load_workflow_steps(&wf.id).await.unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_replace_steps_bumps_version() {
        let store = MemoryStore::new();
        let wf = store.create_workflow("demo", &two_steps()).await.unwrap();

        let replacement = vec![StepSpec::new("echo", StepKind::Tool, 0)];
        store.replace_steps(&wf.id, &replacement).await.unwrap();

        let found = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(found.version, 2);
        assert_eq!(store.load_workflow_steps(&wf.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_steps_unknown_workflow() {
        let store = MemoryStore::new();
        let err = store
            .replace_steps(&Uuid::now_v7(), &two_steps())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_create_run_if_missing_dedupes_unfinished() {
        let store = MemoryStore::new();
        let wf = store.create_workflow("demo", &two_steps()).await.unwrap();
        let input = json!({"email": "hi"});

        let first = store.create_run_if_missing(&wf.id, &input, 3).await.unwrap();
        let second = store.create_run_if_missing(&wf.id, &input, 3).await.unwrap();
        assert_eq!(first, second);

        // Finalize the run; the same input now creates a fresh one.
        store
            .update_run(
                &first,
                RunPatch {
                    status: Some(RunStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let third = store.create_run_if_missing(&wf.id, &input, 3).await.unwrap();
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn test_update_run_partial_patch() {
        let store = MemoryStore::new();
        let run = Run::new(Uuid::now_v7(), json!({}), 3);
        store.create_run(&run).await.unwrap();

        store
            .update_run(
                &run.id,
                RunPatch {
                    status: Some(RunStatus::Failed),
                    last_error: Some("boom".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let found = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(found.status, RunStatus::Failed);
        assert_eq!(found.last_error.as_deref(), Some("boom"));
        assert!(found.failure_reason.is_none());
        assert_eq!(found.input, json!({}));
    }

    #[tokio::test]
    async fn test_list_active_runs_respects_limit_and_order() {
        let store = MemoryStore::new();
        let workflow_id = Uuid::now_v7();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let run = Run::new(workflow_id, json!({}), 3);
            ids.push(run.id);
            store.create_run(&run).await.unwrap();
        }

        let page = store.list_active_runs(3).await.unwrap();
        assert_eq!(page.len(), 3);
        // UUIDv7 is time-sortable; created_at ordering matches insertion.
        assert_eq!(page[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_list_active_runs_skips_started_and_finalized() {
        let store = MemoryStore::new();
        let run = Run::new(Uuid::now_v7(), json!({}), 3);
        store.create_run(&run).await.unwrap();

        store
            .update_run(
                &run.id,
                RunPatch {
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(store.list_active_runs(10).await.unwrap().is_empty());
    }
}
