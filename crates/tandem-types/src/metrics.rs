//! Budgets and execution metrics.
//!
//! Budgets are soft limits enforced at step boundaries only; a step that is
//! already executing is never interrupted. Run totals are the sum of the
//! per-step contributions.

use serde::{Deserialize, Serialize};

/// Optional soft limits for a run. Checked after each step completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Budgets {
    /// Wall-clock ceiling in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ms: Option<u64>,
    /// Estimated-token ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

impl Budgets {
    pub fn new(max_ms: Option<u64>, max_tokens: Option<u64>) -> Self {
        Self { max_ms, max_tokens }
    }

    /// True when neither limit is set.
    pub fn is_unbounded(&self) -> bool {
        self.max_ms.is_none() && self.max_tokens.is_none()
    }
}

/// Which budget a run exceeded. Distinct from execution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetBreach {
    /// Elapsed wall-clock time crossed `max_ms`.
    Elapsed,
    /// Accumulated token estimate crossed `max_tokens`.
    Tokens,
}

impl BudgetBreach {
    /// Stable reason tag recorded on the failed run.
    pub fn reason(&self) -> &'static str {
        match self {
            BudgetBreach::Elapsed => "budget:max_ms",
            BudgetBreach::Tokens => "budget:max_tokens",
        }
    }
}

/// Metrics for a single executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Registry key of the step.
    pub step_key: String,
    /// Step kind as a string ("tool", "llm", "branch").
    pub kind: String,
    /// Wall-clock duration of the step in milliseconds.
    pub ms: u64,
    /// Estimated tokens consumed by the step.
    pub tokens: u64,
    /// Dollar cost attributed to the step.
    pub cost_usd: f64,
    /// Attempts taken (1 unless the structured-output caller retried).
    pub attempts: u32,
    /// Short error tag when the step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_tag: Option<String>,
}

/// Aggregate metrics for a finalized run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Total wall-clock milliseconds across all steps.
    pub total_ms: u64,
    /// Total estimated tokens across all steps.
    pub total_tokens: u64,
    /// Total dollar cost across all steps.
    pub total_cost_usd: f64,
    /// Per-step breakdown, in execution order.
    pub per_step: Vec<StepMetrics>,
}

impl RunMetrics {
    /// Fold a step's metrics into the running totals.
    pub fn record(&mut self, step: StepMetrics) {
        self.total_ms += step.ms;
        self.total_tokens += step.tokens;
        self.total_cost_usd += step.cost_usd;
        self.per_step.push(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(key: &str, ms: u64, tokens: u64, cost: f64) -> StepMetrics {
        StepMetrics {
            step_key: key.to_string(),
            kind: "tool".to_string(),
            ms,
            tokens,
            cost_usd: cost,
            attempts: 1,
            error_tag: None,
        }
    }

    #[test]
    fn test_totals_are_sum_of_steps() {
        let mut metrics = RunMetrics::default();
        metrics.record(step("a", 10, 100, 0.001));
        metrics.record(step("b", 25, 50, 0.0));
        metrics.record(step("c", 5, 0, 0.002));

        assert_eq!(metrics.total_ms, 40);
        assert_eq!(metrics.total_tokens, 150);
        assert!((metrics.total_cost_usd - 0.003).abs() < 1e-12);
        assert_eq!(metrics.per_step.len(), 3);
        assert_eq!(metrics.per_step[1].step_key, "b");
    }

    #[test]
    fn test_budgets_unbounded() {
        assert!(Budgets::default().is_unbounded());
        assert!(!Budgets::new(Some(1000), None).is_unbounded());
        assert!(!Budgets::new(None, Some(500)).is_unbounded());
    }

    #[test]
    fn test_budget_breach_reasons() {
        assert_eq!(BudgetBreach::Elapsed.reason(), "budget:max_ms");
        assert_eq!(BudgetBreach::Tokens.reason(), "budget:max_tokens");
    }
}
