//! The run execution engine.
//!
//! Drives a run through its workflow's ordered steps: project and validate
//! the step input from the state bag, persist the input artifact, dispatch by
//! step kind, validate and merge the output, persist the terminal artifact,
//! then check budgets before moving on. The engine is the only place a run's
//! terminal status is written, and writes it exactly once.
//!
//! A step failure is a *run outcome*, not an engine error: the run is
//! finalized as failed and `execute_run` returns `Ok` with the failed
//! outcome. `Err` is reserved for faults the engine cannot absorb (store
//! failures, missing runs, bad workflow configuration).

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use tandem_types::error::StoreError;
use tandem_types::metrics::{Budgets, RunMetrics, StepMetrics};
use tandem_types::schema::ObjectSchema;
use tandem_types::workflow::{
    Artifact, ArtifactKind, Run, RunPatch, RunStatus, StepKind, StepRow, StepStatus,
};

use crate::context::{Clock, ExecutionContext, MonotonicClock};
use crate::llm::LlmClient;
use crate::registry::{RegistryError, StepRegistry};
use crate::store::WorkflowStore;
use crate::structured::{StructuredOutputError, StructuredOutputOptions, call_structured};

// ---------------------------------------------------------------------------
// Errors and outcome
// ---------------------------------------------------------------------------

/// Faults the engine cannot turn into a failed-run outcome.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("run {0} is already finalized")]
    AlreadyFinalized(Uuid),

    #[error("workflow {workflow_id} has duplicate step order {order}")]
    DuplicateOrder { workflow_id: Uuid, order: u32 },

    #[error("run {0} is not in a failed state")]
    NotRetryable(Uuid),

    #[error("run {0} has exhausted its retries")]
    RetryExhausted(Uuid),
}

/// The result of driving a run to a terminal status.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub metrics: RunMetrics,
    /// Final state bag (for callers that want the pipeline's product).
    pub state: serde_json::Value,
    pub failure_reason: Option<String>,
    pub last_error: Option<String>,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

// ---------------------------------------------------------------------------
// Internal step result
// ---------------------------------------------------------------------------

struct StepSuccess {
    output: serde_json::Value,
    tokens: u64,
    cost_usd: f64,
    attempts: u32,
}

struct StepFailure {
    error: String,
    tag: &'static str,
    attempts: u32,
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// Engine construction knobs.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Budgets applied when a run is executed without explicit ones
    /// (processor-driven runs).
    pub default_budgets: Budgets,
    /// Retry knobs for the structured-output caller.
    pub output_options: StructuredOutputOptions,
}

/// The workflow run engine.
pub struct ExecutionEngine<S, C> {
    store: Arc<S>,
    registry: Arc<StepRegistry>,
    client: Arc<C>,
    options: EngineOptions,
}

impl<S: WorkflowStore, C: LlmClient> ExecutionEngine<S, C> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<StepRegistry>,
        client: Arc<C>,
        options: EngineOptions,
    ) -> Self {
        Self {
            store,
            registry,
            client,
            options,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Create a run for a workflow and drive it to completion with explicit
    /// budgets.
    pub async fn run_workflow(
        &self,
        workflow_id: &Uuid,
        input: serde_json::Value,
        budgets: Budgets,
        max_retries: u32,
    ) -> Result<RunOutcome, EngineError> {
        let run = Run::new(*workflow_id, input, max_retries);
        self.store.create_run(&run).await?;
        self.execute_run_with(&run.id, budgets).await
    }

    /// Execute an already-queued run under the engine's default budgets.
    pub async fn execute_run(&self, run_id: &Uuid) -> Result<RunOutcome, EngineError> {
        self.execute_run_with(run_id, self.options.default_budgets)
            .await
    }

    /// Create a fresh retry run for a failed one. The new run copies the
    /// input with `retry_count + 1` and is queued for the processor; the
    /// original run is never mutated.
    pub async fn retry_run(&self, run_id: &Uuid) -> Result<Uuid, EngineError> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or(EngineError::RunNotFound(*run_id))?;

        if run.status != RunStatus::Failed {
            return Err(EngineError::NotRetryable(*run_id));
        }
        if run.retry_count >= run.max_retries {
            return Err(EngineError::RetryExhausted(*run_id));
        }

        let mut retry = Run::new(run.workflow_id, run.input.clone(), run.max_retries);
        retry.retry_count = run.retry_count + 1;
        self.store.create_run(&retry).await?;

        tracing::info!(
            run_id = %run_id,
            retry_run_id = %retry.id,
            retry_count = retry.retry_count,
            "queued retry run"
        );
        Ok(retry.id)
    }

    /// Drive the run, and on an engine fault make a best-effort attempt to
    /// finalize it as failed before propagating. Without this, a store error
    /// mid-run would strand the run in `running` with `started_at` set, where
    /// neither the processor queue nor a caller would ever pick it up again.
    async fn execute_run_with(
        &self,
        run_id: &Uuid,
        budgets: Budgets,
    ) -> Result<RunOutcome, EngineError> {
        match self.drive_run(run_id, budgets).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                // Never touch a run that was not found or is already
                // finalized; re-finalizing could overwrite a completed run.
                if !matches!(
                    err,
                    EngineError::RunNotFound(_) | EngineError::AlreadyFinalized(_)
                ) {
                    let patch = RunPatch {
                        status: Some(RunStatus::Failed),
                        failure_reason: Some("engine:fault".to_string()),
                        last_error: Some(err.to_string()),
                        finished_at: Some(Utc::now()),
                        ..Default::default()
                    };
                    if let Err(update_err) = self.store.update_run(run_id, patch).await {
                        tracing::error!(
                            run_id = %run_id,
                            error = %update_err,
                            "failed to finalize faulted run"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    async fn drive_run(
        &self,
        run_id: &Uuid,
        budgets: Budgets,
    ) -> Result<RunOutcome, EngineError> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or(EngineError::RunNotFound(*run_id))?;

        if matches!(run.status, RunStatus::Completed | RunStatus::Failed) {
            return Err(EngineError::AlreadyFinalized(*run_id));
        }

        let steps = self.store.load_workflow_steps(&run.workflow_id).await?;
        for pair in steps.windows(2) {
            if pair[0].order == pair[1].order {
                return Err(EngineError::DuplicateOrder {
                    workflow_id: run.workflow_id,
                    order: pair[0].order,
                });
            }
        }

        self.store
            .update_run(
                run_id,
                RunPatch {
                    status: Some(RunStatus::Running),
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(
            run_id = %run_id,
            workflow_id = %run.workflow_id,
            steps = steps.len(),
            "starting workflow execution"
        );

        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let mut ctx =
            ExecutionContext::new(*run_id, run.workflow_id, &run.input, budgets, clock);
        let mut metrics = RunMetrics::default();

        for step in &steps {
            let schema = match self.input_schema_for(step) {
                Ok(schema) => schema,
                Err(failure) => {
                    // No registered definition means no input projection; the
                    // full state snapshot stands in so the step still gets its
                    // input artifact before the log.
                    self.persist_input(step, &ctx, &ctx.state_value()).await?;
                    self.persist_log(step, &ctx, &failure, 0).await?;
                    metrics.record(failed_metrics(step, 0, 0, &failure));
                    return self
                        .finalize_failed(run_id, &ctx, metrics, step, failure.error)
                        .await;
                }
            };

            let input = schema.project(ctx.state());
            self.persist_input(step, &ctx, &input).await?;

            if let Err(err) = schema.validate(&input) {
                let failure = StepFailure {
                    error: format!("input validation failed: {err}"),
                    tag: "input_schema",
                    attempts: 0,
                };
                self.persist_log(step, &ctx, &failure, 0).await?;
                metrics.record(failed_metrics(step, 0, 0, &failure));
                return self
                    .finalize_failed(run_id, &ctx, metrics, step, failure.error)
                    .await;
            }

            let step_started = ctx.elapsed_ms();

            let result = self.dispatch(step, &input, &mut ctx).await?;
            let step_ms = ctx.elapsed_ms() - step_started;

            match result {
                Ok(success) => {
                    ctx.add_tokens(success.tokens);
                    let step_metrics = StepMetrics {
                        step_key: step.key.clone(),
                        kind: step.kind.to_string(),
                        ms: step_ms,
                        tokens: success.tokens,
                        cost_usd: success.cost_usd,
                        attempts: success.attempts,
                        error_tag: None,
                    };
                    self.persist_output(step, &ctx, &success.output, step_metrics.clone())
                        .await?;
                    metrics.record(step_metrics);

                    tracing::debug!(
                        run_id = %run_id,
                        step_key = %step.key,
                        ms = step_ms,
                        tokens = success.tokens,
                        "step completed"
                    );
                }
                Err(failure) => {
                    self.persist_log(step, &ctx, &failure, step_ms).await?;
                    metrics.record(failed_metrics(step, step_ms, failure.attempts, &failure));

                    tracing::warn!(
                        run_id = %run_id,
                        step_key = %step.key,
                        error = %failure.error,
                        "step failed"
                    );
                    return self
                        .finalize_failed(run_id, &ctx, metrics, step, failure.error)
                        .await;
                }
            }

            // Budgets are soft: checked only between steps, never mid-step.
            if let Err(breach) = ctx.check_budgets() {
                let error = format!(
                    "{} after step '{}' ({} ms elapsed, {} tokens used)",
                    breach.reason(),
                    step.key,
                    ctx.elapsed_ms(),
                    ctx.tokens_used()
                );
                tracing::warn!(run_id = %run_id, reason = breach.reason(), "budget exceeded");
                self.store
                    .update_run(
                        run_id,
                        RunPatch {
                            status: Some(RunStatus::Failed),
                            metrics: Some(metrics.clone()),
                            failure_reason: Some(breach.reason().to_string()),
                            last_error: Some(error.clone()),
                            finished_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await?;
                return Ok(RunOutcome {
                    run_id: *run_id,
                    status: RunStatus::Failed,
                    metrics,
                    state: ctx.state_value(),
                    failure_reason: Some(breach.reason().to_string()),
                    last_error: Some(error),
                });
            }
        }

        self.store
            .update_run(
                run_id,
                RunPatch {
                    status: Some(RunStatus::Completed),
                    metrics: Some(metrics.clone()),
                    finished_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(
            run_id = %run_id,
            total_ms = metrics.total_ms,
            total_tokens = metrics.total_tokens,
            "workflow execution completed"
        );

        Ok(RunOutcome {
            run_id: *run_id,
            status: RunStatus::Completed,
            metrics,
            state: ctx.state_value(),
            failure_reason: None,
            last_error: None,
        })
    }

    // -----------------------------------------------------------------------
    // Step dispatch
    // -----------------------------------------------------------------------

    fn input_schema_for(&self, step: &StepRow) -> Result<ObjectSchema, StepFailure> {
        match step.kind {
            StepKind::Tool => self.registry.get_tool(&step.key).map(|d| d.input_schema),
            StepKind::Llm => self.registry.get_llm(&step.key).map(|d| d.input_schema),
            StepKind::Branch => self.registry.get_branch(&step.key).map(|d| d.input_schema),
        }
        .map_err(|err| StepFailure {
            error: err.to_string(),
            tag: "not_registered",
            attempts: 0,
        })
    }

    async fn dispatch(
        &self,
        step: &StepRow,
        input: &serde_json::Value,
        ctx: &mut ExecutionContext,
    ) -> Result<Result<StepSuccess, StepFailure>, EngineError> {
        let step_ctx = ctx.step_context();
        match step.kind {
            StepKind::Tool => {
                let def = self.registry.get_tool(&step.key)?;
                match (def.handler)(input.clone(), step_ctx).await {
                    Ok(output) => {
                        if let Err(err) = def.output_schema.validate(&output) {
                            return Ok(Err(StepFailure {
                                error: format!("output validation failed: {err}"),
                                tag: "output_schema",
                                attempts: 1,
                            }));
                        }
                        ctx.merge_output(&output);
                        Ok(Ok(StepSuccess {
                            output,
                            tokens: 0,
                            cost_usd: def.cost_usd,
                            attempts: 1,
                        }))
                    }
                    Err(err) => Ok(Err(StepFailure {
                        error: err.to_string(),
                        tag: "handler",
                        attempts: 1,
                    })),
                }
            }
            StepKind::Llm => {
                let def = self.registry.get_llm(&step.key)?;
                let prompt = (def.prompt)(input, &step_ctx);
                match call_structured(
                    self.client.as_ref(),
                    &prompt,
                    &def.output_schema,
                    &self.options.output_options,
                )
                .await
                {
                    Ok(out) => {
                        ctx.merge_output(&out.value);
                        Ok(Ok(StepSuccess {
                            output: out.value,
                            tokens: out.tokens,
                            cost_usd: out.cost_usd,
                            attempts: out.attempts,
                        }))
                    }
                    Err(StructuredOutputError::SchemaParseFailed { attempts, cause }) => {
                        Ok(Err(StepFailure {
                            error: format!(
                                "structured output failed after {attempts} attempts: {cause}"
                            ),
                            tag: "structured_output",
                            attempts,
                        }))
                    }
                    Err(StructuredOutputError::Llm(err)) => Ok(Err(StepFailure {
                        error: err.to_string(),
                        tag: "llm",
                        attempts: 1,
                    })),
                }
            }
            StepKind::Branch => {
                let def = self.registry.get_branch(&step.key)?;
                match (def.choose)(input, &step_ctx) {
                    Ok(label) => {
                        ctx.set_next(&label);
                        Ok(Ok(StepSuccess {
                            output: serde_json::json!({ "next": label }),
                            tokens: 0,
                            cost_usd: 0.0,
                            attempts: 1,
                        }))
                    }
                    Err(err) => Ok(Err(StepFailure {
                        error: err.to_string(),
                        tag: "branch",
                        attempts: 1,
                    })),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Artifact and finalization plumbing
    // -----------------------------------------------------------------------

    async fn persist_input(
        &self,
        step: &StepRow,
        ctx: &ExecutionContext,
        input: &serde_json::Value,
    ) -> Result<(), EngineError> {
        let artifact = Artifact {
            id: Uuid::now_v7(),
            run_id: ctx.run_id,
            step_id: step.id,
            step_key: step.key.clone(),
            kind: ArtifactKind::Input,
            data: input.clone(),
            status: StepStatus::Running,
            metrics: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.store.persist_artifact(&artifact).await?;
        Ok(())
    }

    async fn persist_output(
        &self,
        step: &StepRow,
        ctx: &ExecutionContext,
        output: &serde_json::Value,
        metrics: StepMetrics,
    ) -> Result<(), EngineError> {
        let artifact = Artifact {
            id: Uuid::now_v7(),
            run_id: ctx.run_id,
            step_id: step.id,
            step_key: step.key.clone(),
            kind: ArtifactKind::Output,
            data: output.clone(),
            status: StepStatus::Completed,
            metrics: Some(metrics),
            error: None,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
        };
        self.store.persist_artifact(&artifact).await?;
        Ok(())
    }

    async fn persist_log(
        &self,
        step: &StepRow,
        ctx: &ExecutionContext,
        failure: &StepFailure,
        step_ms: u64,
    ) -> Result<(), EngineError> {
        let artifact = Artifact {
            id: Uuid::now_v7(),
            run_id: ctx.run_id,
            step_id: step.id,
            step_key: step.key.clone(),
            kind: ArtifactKind::Log,
            data: serde_json::json!({ "error": failure.error, "tag": failure.tag }),
            status: StepStatus::Failed,
            metrics: Some(failed_metrics(step, step_ms, failure.attempts, failure)),
            error: Some(failure.error.clone()),
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
        };
        self.store.persist_artifact(&artifact).await?;
        Ok(())
    }

    async fn finalize_failed(
        &self,
        run_id: &Uuid,
        ctx: &ExecutionContext,
        metrics: RunMetrics,
        step: &StepRow,
        error: String,
    ) -> Result<RunOutcome, EngineError> {
        let reason = format!("step:{}", step.key);
        self.store
            .update_run(
                run_id,
                RunPatch {
                    status: Some(RunStatus::Failed),
                    metrics: Some(metrics.clone()),
                    failure_reason: Some(reason.clone()),
                    last_error: Some(error.clone()),
                    finished_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(RunOutcome {
            run_id: *run_id,
            status: RunStatus::Failed,
            metrics,
            state: ctx.state_value(),
            failure_reason: Some(reason),
            last_error: Some(error),
        })
    }
}

fn failed_metrics(step: &StepRow, ms: u64, attempts: u32, failure: &StepFailure) -> StepMetrics {
    StepMetrics {
        step_key: step.key.clone(),
        kind: step.kind.to_string(),
        ms,
        tokens: 0,
        cost_usd: 0.0,
        attempts: attempts.max(1),
        error_tag: Some(failure.tag.to_string()),
    }
}
