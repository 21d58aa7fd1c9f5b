//! Step registry: typed catalogs of tool, llm, and branch definitions.
//!
//! Steps are registered under a (kind, name) pair; each kind has its own
//! namespace, so a tool and a branch may share a name. Re-registering a name
//! silently replaces the previous definition (last writer wins). Lookups are
//! kind-specific and fail with a not-found error carrying both kind and name.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use thiserror::Error;

use tandem_types::schema::ObjectSchema;
use tandem_types::workflow::StepKind;

use crate::context::StepContext;

// ---------------------------------------------------------------------------
// Step definitions
// ---------------------------------------------------------------------------

/// Async handler for a tool step. Receives the validated input projection and
/// the run's context view, returns the output object to merge into run state.
pub type ToolHandler = Arc<
    dyn Fn(
            serde_json::Value,
            StepContext,
        ) -> BoxFuture<'static, Result<serde_json::Value, anyhow::Error>>
        + Send
        + Sync,
>;

/// Prompt builder for an llm step. Receives the validated input projection
/// and the run's context view.
pub type PromptBuilder = Arc<dyn Fn(&serde_json::Value, &StepContext) -> String + Send + Sync>;

/// Chooser for a branch step. Receives the validated input projection and the
/// run's context view, returns the label of the branch taken.
pub type BranchChooser =
    Arc<dyn Fn(&serde_json::Value, &StepContext) -> Result<String, anyhow::Error> + Send + Sync>;

/// A deterministic handler step.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub input_schema: ObjectSchema,
    pub output_schema: ObjectSchema,
    /// Fixed dollar cost attributed to each invocation.
    pub cost_usd: f64,
    pub handler: ToolHandler,
}

/// A structured-output LLM step. The prompt is built from the input
/// projection; the model's reply must satisfy `output_schema`.
#[derive(Clone)]
pub struct LlmDefinition {
    pub name: String,
    pub input_schema: ObjectSchema,
    pub output_schema: ObjectSchema,
    pub prompt: PromptBuilder,
}

/// A routing step. The chosen label is recorded in run state under `next`.
#[derive(Clone)]
pub struct BranchDefinition {
    pub name: String,
    pub input_schema: ObjectSchema,
    pub choose: BranchChooser,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Lookup failure: no definition under that (kind, name) pair.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no {kind} step registered under '{name}'")]
    NotFound { kind: StepKind, name: String },
}

/// Concurrent registry of step definitions, one namespace per kind.
#[derive(Default)]
pub struct StepRegistry {
    tools: DashMap<String, ToolDefinition>,
    llms: DashMap<String, LlmDefinition>,
    branches: DashMap<String, BranchDefinition>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool definition, replacing any previous one of that name.
    pub fn register_tool(&self, def: ToolDefinition) {
        self.tools.insert(def.name.clone(), def);
    }

    /// Register an llm definition, replacing any previous one of that name.
    pub fn register_llm(&self, def: LlmDefinition) {
        self.llms.insert(def.name.clone(), def);
    }

    /// Register a branch definition, replacing any previous one of that name.
    pub fn register_branch(&self, def: BranchDefinition) {
        self.branches.insert(def.name.clone(), def);
    }

    pub fn get_tool(&self, name: &str) -> Result<ToolDefinition, RegistryError> {
        self.tools
            .get(name)
            .map(|d| d.clone())
            .ok_or_else(|| RegistryError::NotFound {
                kind: StepKind::Tool,
                name: name.to_string(),
            })
    }

    pub fn get_llm(&self, name: &str) -> Result<LlmDefinition, RegistryError> {
        self.llms
            .get(name)
            .map(|d| d.clone())
            .ok_or_else(|| RegistryError::NotFound {
                kind: StepKind::Llm,
                name: name.to_string(),
            })
    }

    pub fn get_branch(&self, name: &str) -> Result<BranchDefinition, RegistryError> {
        self.branches
            .get(name)
            .map(|d| d.clone())
            .ok_or_else(|| RegistryError::NotFound {
                kind: StepKind::Branch,
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_types::schema::FieldKind;

    fn tool(name: &str, cost: f64) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            input_schema: ObjectSchema::new().field("payload", FieldKind::Any),
            output_schema: ObjectSchema::new().field("payload", FieldKind::Any),
            cost_usd: cost,
            handler: Arc::new(|input, _ctx| Box::pin(async move { Ok(input) })),
        }
    }

    #[test]
    fn test_lookup_by_kind_and_name() {
        let registry = StepRegistry::new();
        registry.register_tool(tool("echo", 0.0));
        registry.register_branch(BranchDefinition {
            name: "echo".to_string(), // same name, different namespace
            input_schema: ObjectSchema::new(),
            choose: Arc::new(|_, _| Ok("default".to_string())),
        });

        assert!(registry.get_tool("echo").is_ok());
        assert!(registry.get_branch("echo").is_ok());
        assert!(registry.get_llm("echo").is_err());
    }

    #[test]
    fn test_not_found_carries_kind_and_name() {
        let registry = StepRegistry::new();
        let Err(err) = registry.get_llm("parse_email") else {
            panic!("lookup of an unregistered llm step succeeded");
        };
        let msg = err.to_string();
        assert!(msg.contains("llm"));
        assert!(msg.contains("parse_email"));
    }

    #[test]
    fn test_reregistration_replaces() {
        let registry = StepRegistry::new();
        registry.register_tool(tool("echo", 0.0));
        registry.register_tool(tool("echo", 0.5));
        let def = registry.get_tool("echo").unwrap();
        assert_eq!(def.cost_usd, 0.5);
    }
}
