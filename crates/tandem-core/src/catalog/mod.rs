//! Built-in step catalogs.
//!
//! Each submodule registers a family of step definitions into a
//! [`crate::registry::StepRegistry`] and, where the pipeline needs a model,
//! provides a deterministic mock [`crate::llm::LlmClient`] so the pipeline
//! runs offline in tests and demos.

pub mod defaults;
pub mod lead;
pub mod ticket;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use uuid::Uuid;

    use tandem_types::metrics::Budgets;

    use crate::context::{MonotonicClock, StepContext};

    /// A detached context for invoking step callbacks outside a run.
    pub(crate) fn step_ctx() -> StepContext {
        StepContext::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            Budgets::default(),
            Arc::new(MonotonicClock::new()),
        )
    }
}
