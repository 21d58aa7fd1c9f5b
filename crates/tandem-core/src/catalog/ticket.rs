//! Support-ticket catalog: classify and summarize a ticket, pick the next
//! action, and save a reply draft.

use std::sync::Arc;

use serde_json::json;

use tandem_types::llm::{Completion, LlmError};
use tandem_types::schema::{FieldKind, ObjectSchema};

use crate::llm::{LlmClient, estimate_tokens};
use crate::registry::{LlmDefinition, StepRegistry, ToolDefinition};
use crate::store::StepSpec;
use tandem_types::workflow::StepKind;

fn ticket_input_schema() -> ObjectSchema {
    ObjectSchema::new()
        .field("title", FieldKind::String)
        .field("description", FieldKind::String)
        .optional("tags", FieldKind::Array)
        .optional("attachments", FieldKind::Array)
}

/// Register the four ticket steps.
pub fn register_ticket(registry: &StepRegistry) {
    // LLM: classify_ticket
    registry.register_llm(LlmDefinition {
        name: "classify_ticket".to_string(),
        input_schema: ticket_input_schema(),
        output_schema: ObjectSchema::new()
            .field("category", FieldKind::String)
            .field("confidence", FieldKind::Number)
            .field("urgency", FieldKind::Integer),
        prompt: Arc::new(|input, _ctx| {
            let tags = input["tags"]
                .as_array()
                .map(|tags| {
                    tags.iter()
                        .filter_map(|t| t.as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();
            format!(
                "Classify support ticket into billing|bug|howto|feature. title={} description={} tags={}",
                input["title"].as_str().unwrap_or_default(),
                input["description"].as_str().unwrap_or_default(),
                tags,
            )
        }),
    });

    // LLM: summarize_ticket
    registry.register_llm(LlmDefinition {
        name: "summarize_ticket".to_string(),
        input_schema: ticket_input_schema(),
        output_schema: ObjectSchema::new()
            .field("bullets", FieldKind::Array)
            .field("tldr", FieldKind::String),
        prompt: Arc::new(|input, _ctx| {
            format!(
                "Summarize in 3 bullets and 1 TL;DR: title={} description={}",
                input["title"].as_str().unwrap_or_default(),
                input["description"].as_str().unwrap_or_default(),
            )
        }),
    });

    // Tool: next_action
    registry.register_tool(ToolDefinition {
        name: "next_action".to_string(),
        input_schema: ObjectSchema::new()
            .field("category", FieldKind::String)
            .field("confidence", FieldKind::Number)
            .field("urgency", FieldKind::Integer),
        output_schema: ObjectSchema::new().field("next_action", FieldKind::String),
        cost_usd: 0.0,
        handler: Arc::new(|input, _ctx| {
            Box::pin(async move {
                let action = match input["category"].as_str().unwrap_or_default() {
                    "billing" => "Send billing troubleshooting guide and check invoice status.",
                    "bug" => "Acknowledge bug; collect repro steps; escalate to engineering.",
                    "howto" => "Link to relevant docs; provide quick instructions.",
                    "feature" => "Thank and link to roadmap; create feature request ticket.",
                    _ => "Escalate to human agent.",
                };
                Ok(json!({ "next_action": action }))
            })
        }),
    });

    // Tool: save_draft
    registry.register_tool(ToolDefinition {
        name: "save_draft".to_string(),
        input_schema: ObjectSchema::new()
            .field("tldr", FieldKind::String)
            .field("category", FieldKind::String)
            .field("next_action", FieldKind::String),
        output_schema: ObjectSchema::new().field("reply_draft", FieldKind::String),
        cost_usd: 0.0,
        handler: Arc::new(|input, _ctx| {
            Box::pin(async move {
                let draft = format!(
                    "Hi, Regarding your {} request: {} Next: {}",
                    input["category"].as_str().unwrap_or_default(),
                    input["tldr"].as_str().unwrap_or_default(),
                    input["next_action"].as_str().unwrap_or_default(),
                );
                Ok(json!({ "reply_draft": draft }))
            })
        }),
    });
}

/// The canonical four-step ticket pipeline, in order.
pub fn ticket_workflow_steps() -> Vec<StepSpec> {
    vec![
        StepSpec::new("classify_ticket", StepKind::Llm, 0),
        StepSpec::new("summarize_ticket", StepKind::Llm, 1),
        StepSpec::new("next_action", StepKind::Tool, 2),
        StepSpec::new("save_draft", StepKind::Tool, 3),
    ]
}

// ---------------------------------------------------------------------------
// Mock model
// ---------------------------------------------------------------------------

/// Deterministic stand-in for the ticket model: keyword classification,
/// canned summary. Branches on whether the prompt asks for classification.
pub struct MockTicketClient;

impl MockTicketClient {
    fn category_for(prompt: &str) -> &'static str {
        // Match keywords against the ticket text only. The classify prompt's
        // instruction header names every category, so scanning the whole
        // prompt would always hit "billing" first.
        let text = prompt.split_once("title=").map_or(prompt, |(_, rest)| rest);
        let lower = text.to_lowercase();
        if ["invoice", "charge", "billing", "payment"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            "billing"
        } else if ["error", "exception", "stack", "crash", "fail"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            "bug"
        } else if ["feature", "request", "roadmap"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            "feature"
        } else {
            "howto"
        }
    }
}

impl LlmClient for MockTicketClient {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
        let category = Self::category_for(prompt);
        let confidence = if category == "howto" { 0.6 } else { 0.9 };
        let text = prompt.split_once("title=").map_or(prompt, |(_, rest)| rest);
        let lower = text.to_lowercase();
        let urgency = if ["urgent", "immediately", "asap", "down"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            5
        } else {
            3
        };

        let text = if prompt.starts_with("Classify") {
            json!({ "category": category, "confidence": confidence, "urgency": urgency })
                .to_string()
        } else {
            json!({
                "bullets": [
                    "User reports issue/question",
                    "Context parsed from description",
                    format!("Category guessed: {category}"),
                ],
                "tldr": format!("Likely {category}; provide appropriate guidance."),
            })
            .to_string()
        };

        Ok(Completion {
            text,
            tokens: estimate_tokens(prompt),
            cost_usd: 0.001,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_types::metrics::Budgets;

    use crate::catalog::test_support::step_ctx;
    use crate::engine::{EngineOptions, ExecutionEngine};
    use crate::store::{MemoryStore, WorkflowStore};

    #[tokio::test]
    async fn test_mock_client_classifies_by_keywords() {
        let out = MockTicketClient
            .complete("Classify support ticket into billing|bug|howto|feature. title=Double charge description=I was charged twice, fix asap tags=")
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(parsed["category"], "billing");
        assert_eq!(parsed["confidence"], json!(0.9));
        assert_eq!(parsed["urgency"], json!(5));
    }

    #[tokio::test]
    async fn test_classify_menu_wording_does_not_bias_category() {
        // The classify prompt lists every category in its instruction
        // header; only the ticket text after it may drive the match.
        let out = MockTicketClient
            .complete("Classify support ticket into billing|bug|howto|feature. title=App crashes on login description=Stack trace attached, fails every time tags=mobile")
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(parsed["category"], "bug");
    }

    #[tokio::test]
    async fn test_mock_client_summary_shape() {
        let out = MockTicketClient
            .complete("Summarize in 3 bullets and 1 TL;DR: title=How do I export description=Need help exporting data")
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(parsed["bullets"].as_array().unwrap().len(), 3);
        assert!(parsed["tldr"].as_str().unwrap().contains("howto"));
    }

    #[tokio::test]
    async fn test_next_action_maps_categories() {
        let registry = StepRegistry::new();
        register_ticket(&registry);
        let tool = registry.get_tool("next_action").unwrap();

        let bug = (tool.handler)(
            json!({"category": "bug", "confidence": 0.9, "urgency": 4}),
            step_ctx(),
        )
        .await
        .unwrap();
        assert!(bug["next_action"].as_str().unwrap().contains("engineering"));

        let unknown = (tool.handler)(
            json!({"category": "other", "confidence": 0.1, "urgency": 1}),
            step_ctx(),
        )
        .await
        .unwrap();
        assert_eq!(unknown["next_action"], "Escalate to human agent.");
    }

    #[tokio::test]
    async fn test_ticket_pipeline_end_to_end() {
        let registry = StepRegistry::new();
        register_ticket(&registry);
        let engine = ExecutionEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(registry),
            Arc::new(MockTicketClient),
            EngineOptions::default(),
        );

        let workflow_id = engine
            .store()
            .create_workflow("ticket-summarizer", &ticket_workflow_steps())
            .await
            .unwrap()
            .id;

        let outcome = engine
            .run_workflow(
                &workflow_id,
                json!({
                    "title": "App crashes on login",
                    "description": "Stack trace attached, fails every time",
                    "tags": ["mobile"],
                }),
                Budgets::default(),
                3,
            )
            .await
            .unwrap();

        assert!(outcome.succeeded(), "failed: {:?}", outcome.last_error);
        assert_eq!(outcome.metrics.per_step.len(), 4);
        assert_eq!(outcome.state["category"], "bug");
        let draft = outcome.state["reply_draft"].as_str().unwrap();
        assert!(draft.contains("bug"));
        assert!(draft.contains("Next:"));
        assert!(outcome.metrics.total_tokens > 0);
    }
}
