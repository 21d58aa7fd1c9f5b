//! Workflow domain types for Tandem.
//!
//! Defines the persisted shape of a workflow: the definition header, its
//! ordered step rows, run records (one per execution attempt), and the
//! append-only artifact trail each run leaves behind.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::{RunMetrics, StepMetrics};

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A workflow definition header. Steps are stored separately as ordered
/// [`StepRow`]s keyed by `workflow_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 assigned on creation.
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Definition version, bumped when the step set is replaced.
    pub version: u32,
    /// When the definition was created.
    pub created_at: DateTime<Utc>,
}

/// The kind of a workflow step. Closed set; dispatch is typed, not stringly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Deterministic handler invocation.
    Tool,
    /// Structured-output LLM call.
    Llm,
    /// Routing decision; writes its chosen label into state under `next`.
    Branch,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Tool => write!(f, "tool"),
            StepKind::Llm => write!(f, "llm"),
            StepKind::Branch => write!(f, "branch"),
        }
    }
}

impl FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tool" => Ok(StepKind::Tool),
            "llm" => Ok(StepKind::Llm),
            "branch" => Ok(StepKind::Branch),
            other => Err(format!("unknown step kind: '{other}'")),
        }
    }
}

/// One persisted step within a workflow.
///
/// `key` names the registered definition to execute (unique per kind in the
/// step registry); `order` positions the step in the linear pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRow {
    /// UUIDv7 step row ID.
    pub id: Uuid,
    /// Parent workflow definition ID.
    pub workflow_id: Uuid,
    /// Registry key of the step definition (e.g. "parse_email").
    pub key: String,
    /// Step kind; decides which registry namespace `key` is looked up in.
    pub kind: StepKind,
    /// Position in the pipeline, ascending. Duplicates are a config error.
    pub order: u32,
    /// Step-specific configuration payload.
    #[serde(default)]
    pub config: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Status of a workflow run. Transitions are monotonic:
/// pending -> running -> {completed, failed}. A run is finalized exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: '{other}'")),
        }
    }
}

/// A single execution attempt of a workflow.
///
/// Retrying a failed run never mutates it; a fresh run is created with the
/// same input and `retry_count + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// UUIDv7 run ID.
    pub id: Uuid,
    /// Workflow definition being executed.
    pub workflow_id: Uuid,
    /// Current run status.
    pub status: RunStatus,
    /// Initial input payload; seeds the run's state bag.
    pub input: serde_json::Value,
    /// Aggregate metrics, set when the run is finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<RunMetrics>,
    /// How many retries preceded this run (0 for the original attempt).
    pub retry_count: u32,
    /// Retry ceiling; a run with `retry_count == max_retries` is not retryable.
    pub max_retries: u32,
    /// Budget-or-execution failure category (e.g. "budget:max_tokens",
    /// "step:enrich_company").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Last error message when the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// When the engine began executing the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the run was finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Build a fresh run for a workflow, queued for the processor.
    pub fn new(workflow_id: Uuid, input: serde_json::Value, max_retries: u32) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            status: RunStatus::Running,
            input,
            metrics: None,
            retry_count: 0,
            max_retries,
            failure_reason: None,
            last_error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Whether this run is eligible for retry.
    pub fn is_retryable(&self) -> bool {
        self.status == RunStatus::Failed && self.retry_count < self.max_retries
    }
}

/// A partial update applied to a run record. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub metrics: Option<RunMetrics>,
    pub failure_reason: Option<String>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// The kind of artifact a step leaves behind.
///
/// Each executed step writes exactly one `input` artifact before execution
/// and exactly one terminal artifact after: `output` on success, `log`
/// carrying the error on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Input,
    Output,
    Log,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Input => write!(f, "input"),
            ArtifactKind::Output => write!(f, "output"),
            ArtifactKind::Log => write!(f, "log"),
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(ArtifactKind::Input),
            "output" => Ok(ArtifactKind::Output),
            "log" => Ok(ArtifactKind::Log),
            other => Err(format!("unknown artifact kind: '{other}'")),
        }
    }
}

/// Step execution status recorded on an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Running => write!(f, "running"),
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(StepStatus::Running),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            other => Err(format!("unknown step status: '{other}'")),
        }
    }
}

/// An append-only record of a step's input, output, or failure log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// UUIDv7 artifact ID.
    pub id: Uuid,
    /// Parent run ID.
    pub run_id: Uuid,
    /// Step row ID this artifact belongs to.
    pub step_id: Uuid,
    /// Registry key of the step (denormalized for display).
    pub step_key: String,
    /// Artifact kind.
    pub kind: ArtifactKind,
    /// JSON payload (step input, step output, or error log).
    pub data: serde_json::Value,
    /// Step status at the time this artifact was written.
    pub status: StepStatus,
    /// Per-step metrics, present on terminal artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StepMetrics>,
    /// Error message, present on `log` artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the step began executing.
    pub started_at: DateTime<Utc>,
    /// When the step finished (None on `input` artifacts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}
