//! Per-run execution context: clock, budgets, token accounting, state bag.
//!
//! One context lives for the duration of a run. It owns the mutable
//! string-keyed state that steps read from and write into, tracks elapsed
//! time through a swappable [`Clock`], and accumulates the token estimate
//! used for budget checks. Budgets are enforced by the engine at step
//! boundaries only; the context just reports.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use tandem_types::metrics::{BudgetBreach, Budgets};

use crate::llm::estimate_tokens;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of elapsed milliseconds. The single time source for budget
/// accounting, swappable for a manual clock in tests.
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed since the clock was created.
    fn elapsed_ms(&self) -> u64;
}

/// Wall clock backed by `std::time::Instant`.
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// Read-only view of the run context handed to every step callback.
///
/// Carries the run's identity, its budgets, the shared clock, and the token
/// estimator. Cheap to clone; the clock is shared with the owning
/// [`ExecutionContext`], so elapsed time agrees between the two.
#[derive(Clone)]
pub struct StepContext {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub budgets: Budgets,
    clock: Arc<dyn Clock>,
}

impl StepContext {
    pub fn new(run_id: Uuid, workflow_id: Uuid, budgets: Budgets, clock: Arc<dyn Clock>) -> Self {
        Self {
            run_id,
            workflow_id,
            budgets,
            clock,
        }
    }

    /// Milliseconds elapsed since the run began.
    pub fn elapsed_ms(&self) -> u64 {
        self.clock.elapsed_ms()
    }

    /// Token estimate for a piece of text, ceil(chars / 4).
    pub fn count_tokens(&self, text: &str) -> u64 {
        estimate_tokens(text)
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Mutable per-run execution state.
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub workflow_id: Uuid,
    pub budgets: Budgets,
    clock: Arc<dyn Clock>,
    tokens_used: u64,
    state: serde_json::Map<String, serde_json::Value>,
}

impl ExecutionContext {
    /// Build a context for a run, seeding the state bag from the run input:
    /// a JSON object is taken as-is; any other value is wrapped under the
    /// `"input"` key.
    pub fn new(
        run_id: Uuid,
        workflow_id: Uuid,
        input: &serde_json::Value,
        budgets: Budgets,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = match input {
            serde_json::Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("input".to_string(), other.clone());
                map
            }
        };
        Self {
            run_id,
            workflow_id,
            budgets,
            clock,
            tokens_used: 0,
            state,
        }
    }

    /// Milliseconds elapsed since the run began.
    pub fn elapsed_ms(&self) -> u64 {
        self.clock.elapsed_ms()
    }

    /// Token estimate for a piece of text, ceil(chars / 4).
    pub fn count_tokens(&self, text: &str) -> u64 {
        estimate_tokens(text)
    }

    /// The view of this context passed into step callbacks.
    pub fn step_context(&self) -> StepContext {
        StepContext::new(
            self.run_id,
            self.workflow_id,
            self.budgets,
            self.clock.clone(),
        )
    }

    /// Tokens accumulated so far.
    pub fn tokens_used(&self) -> u64 {
        self.tokens_used
    }

    /// Add a step's token consumption to the running total.
    pub fn add_tokens(&mut self, tokens: u64) {
        self.tokens_used += tokens;
    }

    /// Check both budgets against current elapsed time and token total.
    /// Elapsed time is checked first.
    pub fn check_budgets(&self) -> Result<(), BudgetBreach> {
        if let Some(max_ms) = self.budgets.max_ms
            && self.elapsed_ms() > max_ms
        {
            return Err(BudgetBreach::Elapsed);
        }
        if let Some(max_tokens) = self.budgets.max_tokens
            && self.tokens_used > max_tokens
        {
            return Err(BudgetBreach::Tokens);
        }
        Ok(())
    }

    /// Read-only view of the state bag.
    pub fn state(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.state
    }

    /// The state bag as a JSON value (for persistence and assertions).
    pub fn state_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.state.clone())
    }

    /// Shallow-merge a step's output object into the state bag. Top-level
    /// keys overwrite; nested values are replaced wholesale.
    pub fn merge_output(&mut self, output: &serde_json::Value) {
        if let serde_json::Value::Object(map) = output {
            for (key, value) in map {
                self.state.insert(key.clone(), value.clone());
            }
        }
    }

    /// Record the label a branch step chose.
    pub fn set_next(&mut self, label: &str) {
        self.state
            .insert("next".to_string(), serde_json::Value::String(label.to_string()));
    }
}
