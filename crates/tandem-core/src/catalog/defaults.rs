//! Default step catalog: a pass-through tool and a boolean branch.

use std::sync::Arc;

use serde_json::json;

use tandem_types::schema::{FieldKind, ObjectSchema};

use crate::registry::{BranchDefinition, StepRegistry, ToolDefinition};

/// Register the `echo` tool and `by_flag` branch.
pub fn register_defaults(registry: &StepRegistry) {
    registry.register_tool(ToolDefinition {
        name: "echo".to_string(),
        input_schema: ObjectSchema::new().field("message", FieldKind::String),
        output_schema: ObjectSchema::new().field("echoed", FieldKind::String),
        cost_usd: 0.0,
        handler: Arc::new(|input, _ctx| {
            Box::pin(async move {
                let message = input["message"].as_str().unwrap_or_default().to_string();
                Ok(json!({ "echoed": message }))
            })
        }),
    });

    registry.register_branch(BranchDefinition {
        name: "by_flag".to_string(),
        input_schema: ObjectSchema::new().field("flag", FieldKind::Bool),
        choose: Arc::new(|input, _ctx| {
            Ok(if input["flag"].as_bool().unwrap_or(false) {
                "A".to_string()
            } else {
                "B".to_string()
            })
        }),
    });
}
