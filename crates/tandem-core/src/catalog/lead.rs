//! Lead-triage catalog: parse an inbound sales email, enrich the company,
//! score the lead, create a CRM record, and notify Slack.
//!
//! The enrichment, scoring, CRM, and Slack tools are deterministic mocks so
//! the pipeline runs end to end without network access. `MockLeadClient`
//! plays the parse-email model with a naive but stable extraction.

use std::sync::Arc;

use serde_json::json;

use tandem_types::llm::{Completion, LlmError};
use tandem_types::schema::{FieldKind, ObjectSchema};

use crate::llm::{LlmClient, estimate_tokens};
use crate::registry::{LlmDefinition, StepRegistry, ToolDefinition};
use crate::store::StepSpec;
use tandem_types::workflow::StepKind;

fn parse_email_output_schema() -> ObjectSchema {
    ObjectSchema::new()
        .field("company", FieldKind::String)
        .optional("domain", FieldKind::String)
        .field("intent", FieldKind::String)
        .optional("contacts", FieldKind::Array)
}

fn buying_intent(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["buy", "pricing", "quote", "trial"]
        .iter()
        .any(|kw| lower.contains(kw))
}

/// Register the five lead-triage steps.
pub fn register_lead(registry: &StepRegistry) {
    // LLM: parse_email
    registry.register_llm(LlmDefinition {
        name: "parse_email".to_string(),
        input_schema: ObjectSchema::new()
            .field("subject", FieldKind::String)
            .field("body", FieldKind::String)
            .field("from", FieldKind::String),
        output_schema: parse_email_output_schema(),
        prompt: Arc::new(|input, _ctx| {
            format!(
                "Extract JSON with keys company, domain, intent, contacts[] from: subj={} body={} from={}",
                input["subject"].as_str().unwrap_or_default(),
                input["body"].as_str().unwrap_or_default(),
                input["from"].as_str().unwrap_or_default(),
            )
        }),
    });

    // Tool: enrich_company (mock)
    registry.register_tool(ToolDefinition {
        name: "enrich_company".to_string(),
        input_schema: parse_email_output_schema(),
        output_schema: ObjectSchema::new().field("enrichment", FieldKind::Object),
        cost_usd: 0.0,
        handler: Arc::new(|input, _ctx| {
            Box::pin(async move {
                let company = input["company"].as_str().unwrap_or_default();
                let domain = match input["domain"].as_str() {
                    Some(d) if !d.is_empty() => d.to_lowercase(),
                    _ => company.to_lowercase(),
                };
                let size = if domain.contains("inc") || domain.contains("corp") {
                    "enterprise"
                } else if domain.len() % 2 == 1 {
                    "mid"
                } else {
                    "smb"
                };
                let industry = if ["university", "edu", "student"]
                    .iter()
                    .any(|kw| domain.contains(kw))
                {
                    "education"
                } else {
                    "software"
                };
                let tech = if industry == "software" {
                    json!(["node", "react"])
                } else {
                    json!(["python"])
                };
                Ok(json!({
                    "enrichment": { "size": size, "industry": industry, "tech": tech }
                }))
            })
        }),
    });

    // Tool: score_lead (pure)
    registry.register_tool(ToolDefinition {
        name: "score_lead".to_string(),
        input_schema: ObjectSchema::new()
            .field("intent", FieldKind::String)
            .field("enrichment", FieldKind::Object),
        output_schema: ObjectSchema::new().field("score", FieldKind::Number),
        cost_usd: 0.0,
        handler: Arc::new(|input, _ctx| {
            Box::pin(async move {
                let intent = input["intent"].as_str().unwrap_or_default();
                let size = input["enrichment"]["size"].as_str().unwrap_or_default();
                let mut score = 30i64;
                if buying_intent(intent) {
                    score += 40;
                }
                score += match size {
                    "enterprise" => 20,
                    "mid" => 10,
                    _ => 0,
                };
                Ok(json!({ "score": score.min(100) }))
            })
        }),
    });

    // Tool: create_crm_record (mock)
    registry.register_tool(ToolDefinition {
        name: "create_crm_record".to_string(),
        input_schema: ObjectSchema::new()
            .field("company", FieldKind::String)
            .optional("domain", FieldKind::String)
            .field("intent", FieldKind::String)
            .field("score", FieldKind::Number),
        output_schema: ObjectSchema::new().field("crm_id", FieldKind::String),
        cost_usd: 0.0,
        handler: Arc::new(|input, _ctx| {
            Box::pin(async move {
                let company = input["company"].as_str().unwrap_or_default();
                let score = input["score"].as_f64().unwrap_or(0.0);
                let id = (company.chars().count() as f64 + score).abs() as i64;
                Ok(json!({ "crm_id": format!("crm_{id}") }))
            })
        }),
    });

    // Tool: notify_slack (mock)
    registry.register_tool(ToolDefinition {
        name: "notify_slack".to_string(),
        input_schema: ObjectSchema::new()
            .field("company", FieldKind::String)
            .field("score", FieldKind::Number),
        output_schema: ObjectSchema::new().field("slack_message_id", FieldKind::String),
        cost_usd: 0.0,
        handler: Arc::new(|input, _ctx| {
            Box::pin(async move {
                let company = input["company"].as_str().unwrap_or_default();
                let prefix: String = company.chars().take(5).collect();
                let score = input["score"].as_f64().unwrap_or(0.0) as i64;
                Ok(json!({ "slack_message_id": format!("m_{prefix}_{score}") }))
            })
        }),
    });
}

/// The canonical five-step lead pipeline, in order.
pub fn lead_workflow_steps() -> Vec<StepSpec> {
    vec![
        StepSpec::new("parse_email", StepKind::Llm, 0),
        StepSpec::new("enrich_company", StepKind::Tool, 1),
        StepSpec::new("score_lead", StepKind::Tool, 2),
        StepSpec::new("create_crm_record", StepKind::Tool, 3),
        StepSpec::new("notify_slack", StepKind::Tool, 4),
    ]
}

// ---------------------------------------------------------------------------
// Mock model
// ---------------------------------------------------------------------------

/// Deterministic stand-in for the parse-email model: extracts company,
/// domain, intent, and contacts from the prompt with plain string surgery.
pub struct MockLeadClient;

impl LlmClient for MockLeadClient {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
        let subj = prompt
            .split_once("subj=")
            .and_then(|(_, rest)| rest.split_once(" body="))
            .map(|(subj, _)| subj)
            .unwrap_or_default();
        let from = prompt
            .rsplit_once("from=")
            .map(|(_, from)| from.trim())
            .unwrap_or_default();

        let raw_company = subj
            .split_whitespace()
            .next()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                from.split_once('@')
                    .and_then(|(_, domain)| domain.split('.').next())
            })
            .unwrap_or("Acme");
        let company: String = raw_company.chars().filter(|c| c.is_alphanumeric()).collect();

        let domain = match from.split_once('@') {
            Some((_, domain)) => domain.to_string(),
            None => format!("{}.com", company.to_lowercase()),
        };
        let intent = if buying_intent(prompt) { "pricing" } else { "info" };
        let contacts = if from.contains('@') {
            json!([{ "email": from }])
        } else {
            json!([])
        };

        let text = json!({
            "company": company,
            "domain": domain,
            "intent": intent,
            "contacts": contacts,
        })
        .to_string();

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
    async fn test_mock_client_parses_email_prompt() {
        let out = MockLeadClient
            .complete("Extract ... from: subj=Globex pricing request body=We want a quote from=jo@globex.com")
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(parsed["company"], "Globex");
        assert_eq!(parsed["domain"], "globex.com");
        assert_eq!(parsed["intent"], "pricing");
        assert_eq!(parsed["contacts"][0]["email"], "jo@globex.com");
        assert!(out.tokens > 0);
    }

    #[tokio::test]
    async fn test_score_lead_heuristics() {
        let registry = StepRegistry::new();
        register_lead(&registry);
        let tool = registry.get_tool("score_lead").unwrap();

        let hot = (tool.handler)(json!({
            "intent": "pricing",
            "enrichment": { "size": "enterprise", "industry": "software", "tech": [] }
        }), step_ctx())
        .await
        .unwrap();
        assert_eq!(hot["score"], json!(90)); // 30 + 40 + 20

        let cold = (tool.handler)(json!({
            "intent": "info",
            "enrichment": { "size": "smb", "industry": "software", "tech": [] }
        }), step_ctx())
        .await
        .unwrap();
        assert_eq!(cold["score"], json!(30));

        let mid = (tool.handler)(json!({
            "intent": "trial please",
            "enrichment": { "size": "mid", "industry": "software", "tech": [] }
        }), step_ctx())
        .await
        .unwrap();
        assert_eq!(mid["score"], json!(80)); // 30 + 40 + 10
    }

    #[tokio::test]
    async fn test_enrich_company_sizes() {
        let registry = StepRegistry::new();
        register_lead(&registry);
        let tool = registry.get_tool("enrich_company").unwrap();

        let enterprise = (tool.handler)(json!({
            "company": "Initech", "domain": "initech-corp.com", "intent": "info"
        }), step_ctx())
        .await
        .unwrap();
        assert_eq!(enterprise["enrichment"]["size"], "enterprise");

        let education = (tool.handler)(json!({
            "company": "State", "domain": "state.university.edu", "intent": "info"
        }), step_ctx())
        .await
        .unwrap();
        assert_eq!(education["enrichment"]["industry"], "education");
        assert_eq!(education["enrichment"]["tech"], json!(["python"]));
    }

    #[tokio::test]
    async fn test_lead_pipeline_end_to_end_under_budget() {
        let registry = StepRegistry::new();
        register_lead(&registry);
        let engine = ExecutionEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(registry),
            Arc::new(MockLeadClient),
            EngineOptions::default(),
        );

        let workflow_id = engine
            .store()
            .create_workflow("lead-triage", &lead_workflow_steps())
            .await
            .unwrap()
            .id;

        let outcome = engine
            .run_workflow(
                &workflow_id,
                json!({
                    "subject": "Globex pricing request",
                    "body": "We would like a quote for 100 seats",
                    "from": "jo@globex.com",
                }),
                Budgets::new(Some(2_000), Some(1_500)),
                3,
            )
            .await
            .unwrap();

        assert!(outcome.succeeded(), "failed: {:?}", outcome.last_error);
        assert_eq!(outcome.metrics.per_step.len(), 5);
        assert!(outcome.state["crm_id"].as_str().unwrap().starts_with("crm_"));
        assert!(
            outcome.state["slack_message_id"]
                .as_str()
                .unwrap()
                .starts_with("m_Globe")
        );
        assert_eq!(outcome.state["score"], json!(70)); // pricing intent, smb-ish domain

        // One input/output pair per step.
        let artifacts = engine.store().list_artifacts(&outcome.run_id).await.unwrap();
        assert_eq!(artifacts.len(), 10);
    }
}
