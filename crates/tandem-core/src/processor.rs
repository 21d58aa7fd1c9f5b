//! Background run processor.
//!
//! Polls the store for queued runs on a fixed interval and drives them
//! through the engine: a page of up to `page_size` runs per poll, executed
//! in batches of `concurrency` (runs within a batch are concurrent, batches
//! are sequential). A run whose engine invocation returns an error (not a
//! failed outcome, an actual engine fault) is defensively force-failed so it
//! cannot wedge the queue.
//!
//! `start`/`stop` are idempotent; `process_now` drains one page on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tandem_types::workflow::{RunPatch, RunStatus};

use crate::engine::{EngineError, ExecutionEngine};
use crate::llm::LlmClient;
use crate::store::WorkflowStore;

/// Processor tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    pub poll_interval: Duration,
    /// Maximum runs fetched per poll.
    pub page_size: u32,
    /// Runs executed concurrently within a batch.
    pub concurrency: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5_000),
            page_size: 10,
            concurrency: 3,
        }
    }
}

/// Outcome summary of one processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Runs force-failed because the engine itself errored.
    pub forced: usize,
}

/// Polls for queued runs and executes them.
pub struct RunProcessor<S, C> {
    engine: Arc<ExecutionEngine<S, C>>,
    config: ProcessorConfig,
    cancel: CancellationToken,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<S, C> RunProcessor<S, C>
where
    S: WorkflowStore + 'static,
    C: LlmClient + 'static,
{
    pub fn new(engine: Arc<ExecutionEngine<S, C>>, config: ProcessorConfig) -> Arc<Self> {
        Arc::new(Self {
            engine,
            config,
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    /// Whether the polling loop is active.
    pub fn is_processing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    /// Start the polling loop. A second call while running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let processor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tracing::info!(
                poll_interval_ms = processor.config.poll_interval.as_millis() as u64,
                "run processor started"
            );
            let mut ticker = tokio::time::interval(processor.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = processor.cancel.cancelled() => {
                        tracing::info!("run processor stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = processor.process_now().await {
                            tracing::error!(error = %err, "processing pass failed");
                        }
                    }
                }
            }
        });
        *self.handle.lock().await = Some(handle);
    }

    /// Stop the polling loop and wait for it to wind down. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Drain one page of queued runs immediately.
    pub async fn process_now(&self) -> Result<PassSummary, EngineError> {
        let runs = self
            .engine
            .store()
            .list_active_runs(self.config.page_size)
            .await?;
        if runs.is_empty() {
            return Ok(PassSummary::default());
        }

        tracing::debug!(count = runs.len(), "processing queued runs");
        let mut summary = PassSummary::default();

        for batch in runs.chunks(self.config.concurrency.max(1)) {
            let results = join_all(
                batch
                    .iter()
                    .map(|run| async move { (run.id, self.engine.execute_run(&run.id).await) }),
            )
            .await;

            for (run_id, result) in results {
                summary.processed += 1;
                match result {
                    Ok(outcome) if outcome.succeeded() => summary.completed += 1,
                    Ok(_) => summary.failed += 1,
                    Err(err) => {
                        // Engine fault, not a run outcome: force-fail the run
                        // so the queue cannot wedge on it.
                        tracing::error!(run_id = %run_id, error = %err, "force-failing run");
                        summary.forced += 1;
                        let patch = RunPatch {
                            status: Some(RunStatus::Failed),
                            failure_reason: Some("processor:engine_error".to_string()),
                            last_error: Some(err.to_string()),
                            finished_at: Some(Utc::now()),
                            ..Default::default()
                        };
                        if let Err(store_err) =
                            self.engine.store().update_run(&run_id, patch).await
                        {
                            tracing::error!(
                                run_id = %run_id,
                                error = %store_err,
                                "failed to force-fail run"
                            );
                        }
                    }
                }
            }
        }
        Ok(summary)
    }
}
