//! SQLite workflow store implementation.
//!
//! Implements `WorkflowStore` from `tandem-core` using sqlx with split
//! read/write pools. JSON payloads (run input, artifact data, metrics) are
//! stored as TEXT columns; timestamps as RFC 3339 strings.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use tandem_core::store::{StepSpec, WorkflowStore};
use tandem_types::error::StoreError;
use tandem_types::metrics::{RunMetrics, StepMetrics};
use tandem_types::workflow::{
    Artifact, ArtifactKind, Run, RunPatch, RunStatus, StepKind, StepRow, StepStatus, Workflow,
};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowStore`.
pub struct SqliteStore {
    pool: DatabasePool,
}

impl SqliteStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowRow {
    id: String,
    name: String,
    version: i64,
    created_at: String,
}

impl WorkflowRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_workflow(self) -> Result<Workflow, StoreError> {
        Ok(Workflow {
            id: parse_uuid(&self.id)?,
            name: self.name,
            version: self.version as u32,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

struct StepDbRow {
    id: String,
    workflow_id: String,
    step_key: String,
    kind: String,
    step_order: i64,
    config: String,
}

impl StepDbRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            step_key: row.try_get("step_key")?,
            kind: row.try_get("kind")?,
            step_order: row.try_get("step_order")?,
            config: row.try_get("config")?,
        })
    }

    fn into_step(self) -> Result<StepRow, StoreError> {
        let kind: StepKind = self
            .kind
            .parse()
            .map_err(|e: String| StoreError::Query(e))?;
        let config = serde_json::from_str(&self.config)
            .map_err(|e| StoreError::Query(format!("invalid step config JSON: {e}")))?;
        Ok(StepRow {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            key: self.step_key,
            kind,
            order: self.step_order as u32,
            config,
        })
    }
}

struct RunDbRow {
    id: String,
    workflow_id: String,
    status: String,
    input: String,
    metrics: Option<String>,
    retry_count: i64,
    max_retries: i64,
    failure_reason: Option<String>,
    last_error: Option<String>,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
}

impl RunDbRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            status: row.try_get("status")?,
            input: row.try_get("input")?,
            metrics: row.try_get("metrics")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            failure_reason: row.try_get("failure_reason")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_run(self) -> Result<Run, StoreError> {
        let status: RunStatus = self
            .status
            .parse()
            .map_err(|e: String| StoreError::Query(e))?;
        let input = serde_json::from_str(&self.input)
            .map_err(|e| StoreError::Query(format!("invalid run input JSON: {e}")))?;
        let metrics: Option<RunMetrics> = self
            .metrics
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| StoreError::Query(format!("invalid run metrics JSON: {e}")))
            })
            .transpose()?;
        Ok(Run {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            status,
            input,
            metrics,
            retry_count: self.retry_count as u32,
            max_retries: self.max_retries as u32,
            failure_reason: self.failure_reason,
            last_error: self.last_error,
            created_at: parse_datetime(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            finished_at: self.finished_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct ArtifactDbRow {
    id: String,
    run_id: String,
    step_id: String,
    step_key: String,
    kind: String,
    data: String,
    status: String,
    metrics: Option<String>,
    error: Option<String>,
    started_at: String,
    finished_at: Option<String>,
}

impl ArtifactDbRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            step_id: row.try_get("step_id")?,
            step_key: row.try_get("step_key")?,
            kind: row.try_get("kind")?,
            data: row.try_get("data")?,
            status: row.try_get("status")?,
            metrics: row.try_get("metrics")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_artifact(self) -> Result<Artifact, StoreError> {
        let kind: ArtifactKind = self
            .kind
            .parse()
            .map_err(|e: String| StoreError::Query(e))?;
        let status: StepStatus = self
            .status
            .parse()
            .map_err(|e: String| StoreError::Query(e))?;
        let data = serde_json::from_str(&self.data)
            .map_err(|e| StoreError::Query(format!("invalid artifact data JSON: {e}")))?;
        let metrics: Option<StepMetrics> = self
            .metrics
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| StoreError::Query(format!("invalid artifact metrics JSON: {e}")))
            })
            .transpose()?;
        Ok(Artifact {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            step_id: parse_uuid(&self.step_id)?,
            step_key: self.step_key,
            kind,
            data,
            status,
            metrics,
            error: self.error,
            started_at: parse_datetime(&self.started_at)?,
            finished_at: self.finished_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    s.parse::<Uuid>()
        .map_err(|e| StoreError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn to_json(value: &impl serde::Serialize) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Query(format!("serialize: {e}")))
}

fn query_err(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

async fn insert_steps(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    workflow_id: &Uuid,
    steps: &[StepSpec],
) -> Result<(), StoreError> {
    for step in steps {
        sqlx::query(
            r#"INSERT INTO workflow_steps (id, workflow_id, step_key, kind, step_order, config)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(workflow_id.to_string())
        .bind(&step.key)
        .bind(step.kind.to_string())
        .bind(step.order as i64)
        .bind(to_json(&step.config)?)
        .execute(&mut **tx)
        .await
        .map_err(query_err)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// WorkflowStore impl
// ---------------------------------------------------------------------------

impl WorkflowStore for SqliteStore {
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

        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        sqlx::query("INSERT INTO workflows (id, name, version, created_at) VALUES (?, ?, ?, ?)")
            .bind(workflow.id.to_string())
            .bind(&workflow.name)
            .bind(workflow.version as i64)
            .bind(format_datetime(&workflow.created_at))
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        insert_steps(&mut tx, &workflow.id, steps).await?;
        tx.commit().await.map_err(query_err)?;

        Ok(workflow)
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>, StoreError> {
        let row = sqlx::query("SELECT id, name, version, created_at FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        match row {
            Some(row) => {
                let r = WorkflowRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_workflow()?))
            }
            None => Ok(None),
        }
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, version, created_at FROM workflows ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                WorkflowRow::from_row(row)
                    .map_err(query_err)
                    .and_then(WorkflowRow::into_workflow)
            })
            .collect()
    }

    async fn replace_steps(
        &self,
        workflow_id: &Uuid,
        steps: &[StepSpec],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let bumped = sqlx::query("UPDATE workflows SET version = version + 1 WHERE id = ?")
            .bind(workflow_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        if bumped.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        sqlx::query("DELETE FROM workflow_steps WHERE workflow_id = ?")
            .bind(workflow_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        insert_steps(&mut tx, workflow_id, steps).await?;

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn load_workflow_steps(&self, workflow_id: &Uuid) -> Result<Vec<StepRow>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT id, workflow_id, step_key, kind, step_order, config
               FROM workflow_steps WHERE workflow_id = ? ORDER BY step_order ASC"#,
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                StepDbRow::from_row(row)
                    .map_err(query_err)
                    .and_then(StepDbRow::into_step)
            })
            .collect()
    }

    async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO runs
               (id, workflow_id, status, input, metrics, retry_count, max_retries,
                failure_reason, last_error, created_at, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(run.status.to_string())
        .bind(to_json(&run.input)?)
        .bind(run.metrics.as_ref().map(to_json).transpose()?)
        .bind(run.retry_count as i64)
        .bind(run.max_retries as i64)
        .bind(&run.failure_reason)
        .bind(&run.last_error)
        .bind(format_datetime(&run.created_at))
        .bind(run.started_at.as_ref().map(format_datetime))
        .bind(run.finished_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn create_run_if_missing(
        &self,
        workflow_id: &Uuid,
        input: &serde_json::Value,
        max_retries: u32,
    ) -> Result<Uuid, StoreError> {
        let input_json = to_json(input)?;

        // The writer pool is a single connection, so check-then-insert is
        // serialized against other writers.
        let existing = sqlx::query(
            r#"SELECT id FROM runs
               WHERE workflow_id = ? AND input = ? AND status IN ('pending', 'running')
               LIMIT 1"#,
        )
        .bind(workflow_id.to_string())
        .bind(&input_json)
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if let Some(row) = existing {
            let id: String = row.try_get("id").map_err(query_err)?;
            return parse_uuid(&id);
        }

        let run = Run::new(*workflow_id, input.clone(), max_retries);
        self.create_run(&run).await?;
        Ok(run.id)
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<Run>, StoreError> {
        let row = sqlx::query(
            r#"SELECT id, workflow_id, status, input, metrics, retry_count, max_retries,
                      failure_reason, last_error, created_at, started_at, finished_at
               FROM runs WHERE id = ?"#,
        )
        .bind(run_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;
        match row {
            Some(row) => {
                let r = RunDbRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_run()?))
            }
            None => Ok(None),
        }
    }

    async fn update_run(&self, run_id: &Uuid, patch: RunPatch) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"UPDATE runs SET
                 status = COALESCE(?, status),
                 metrics = COALESCE(?, metrics),
                 failure_reason = COALESCE(?, failure_reason),
                 last_error = COALESCE(?, last_error),
                 started_at = COALESCE(?, started_at),
                 finished_at = COALESCE(?, finished_at)
               WHERE id = ?"#,
        )
        .bind(patch.status.map(|s| s.to_string()))
        .bind(patch.metrics.as_ref().map(to_json).transpose()?)
        .bind(patch.failure_reason)
        .bind(patch.last_error)
        .bind(patch.started_at.as_ref().map(format_datetime))
        .bind(patch.finished_at.as_ref().map(format_datetime))
        .bind(run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_active_runs(&self, limit: u32) -> Result<Vec<Run>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT id, workflow_id, status, input, metrics, retry_count, max_retries,
                      failure_reason, last_error, created_at, started_at, finished_at
               FROM runs
               WHERE status = 'running' AND started_at IS NULL
               ORDER BY created_at ASC
               LIMIT ?"#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                RunDbRow::from_row(row)
                    .map_err(query_err)
                    .and_then(RunDbRow::into_run)
            })
            .collect()
    }

    async fn persist_artifact(&self, artifact: &Artifact) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO artifacts
               (id, run_id, step_id, step_key, kind, data, status, metrics, error,
                started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(artifact.id.to_string())
        .bind(artifact.run_id.to_string())
        .bind(artifact.step_id.to_string())
        .bind(&artifact.step_key)
        .bind(artifact.kind.to_string())
        .bind(to_json(&artifact.data)?)
        .bind(artifact.status.to_string())
        .bind(artifact.metrics.as_ref().map(to_json).transpose()?)
        .bind(&artifact.error)
        .bind(format_datetime(&artifact.started_at))
        .bind(artifact.finished_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn list_artifacts(&self, run_id: &Uuid) -> Result<Vec<Artifact>, StoreError> {
        // UUIDv7 primary keys sort by creation time.
        let rows = sqlx::query(
            r#"SELECT id, run_id, step_id, step_key, kind, data, status, metrics, error,
                      started_at, finished_at
               FROM artifacts WHERE run_id = ? ORDER BY id ASC"#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                ArtifactDbRow::from_row(row)
                    .map_err(query_err)
                    .and_then(ArtifactDbRow::into_artifact)
            })
            .collect()
    }
}
