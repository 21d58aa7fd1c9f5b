//! Structured-output LLM caller.
//!
//! Sends a prompt, parses the reply as JSON, and validates it against an
//! object schema. Malformed or ill-typed replies are retried with pure
//! exponential backoff (`initial_delay_ms * 2^(attempt-1)`, no jitter; the
//! jittered primitive in [`crate::retry`] is for infrastructure faults, not
//! model output quality). Tokens and cost reported on success come from the
//! successful attempt only.

use std::time::Duration;

use thiserror::Error;

use tandem_types::llm::LlmError;
use tandem_types::schema::ObjectSchema;

use crate::llm::LlmClient;

/// Retry knobs for the structured caller.
#[derive(Debug, Clone, Copy)]
pub struct StructuredOutputOptions {
    /// Additional attempts after the first (total = max_retries + 1).
    pub max_retries: u32,
    pub initial_delay_ms: u64,
}

impl Default for StructuredOutputOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 250,
        }
    }
}

/// A validated structured reply.
#[derive(Debug, Clone)]
pub struct StructuredOutput {
    /// The parsed, schema-valid JSON object.
    pub value: serde_json::Value,
    /// Tokens consumed by the successful attempt.
    pub tokens: u64,
    /// Dollar cost of the successful attempt.
    pub cost_usd: f64,
    /// 1-based attempt number that succeeded.
    pub attempts: u32,
}

/// Structured caller failure.
#[derive(Debug, Error)]
pub enum StructuredOutputError {
    /// Every attempt produced output that failed to parse or validate.
    #[error("model output failed schema validation after {attempts} attempts: {cause}")]
    SchemaParseFailed { attempts: u32, cause: String },

    /// The provider itself failed; not retried at this layer.
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Call the model and demand a reply matching `schema`.
///
/// Provider errors are surfaced immediately. Parse/validation failures are
/// retried up to `options.max_retries` additional times.
pub async fn call_structured<C: LlmClient>(
    client: &C,
    prompt: &str,
    schema: &ObjectSchema,
    options: &StructuredOutputOptions,
) -> Result<StructuredOutput, StructuredOutputError> {
    let mut last_cause = String::new();
    let total_attempts = options.max_retries + 1;

    for attempt in 1..=total_attempts {
        if attempt > 1 {
            // Exponent capped so a large retry budget cannot overflow the
            // shift; delays this deep are absurd anyway.
            let delay = options
                .initial_delay_ms
                .saturating_mul(1u64 << (attempt - 2).min(32));
            tracing::debug!(
                attempt,
                delay_ms = delay,
                "retrying structured call after invalid output"
            );
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let completion = client.complete(prompt).await?;

        match serde_json::from_str::<serde_json::Value>(&completion.text) {
            Ok(value) => match schema.validate(&value) {
                Ok(()) => {
                    return Ok(StructuredOutput {
                        value,
                        tokens: completion.tokens,
                        cost_usd: completion.cost_usd,
                        attempts: attempt,
                    });
                }
                Err(err) => last_cause = err.to_string(),
            },
            Err(err) => last_cause = format!("invalid JSON: {err}"),
        }
    }

    Err(StructuredOutputError::SchemaParseFailed {
        attempts: total_attempts,
        cause: last_cause,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tandem_types::llm::Completion;
    use tandem_types::schema::FieldKind;

    /// Replays a scripted sequence of replies.
    struct ScriptedClient {
        replies: Mutex<Vec<String>>,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn new(replies: &[&str]) -> Self {
            let mut v: Vec<String> = replies.iter().map(|s| s.to_string()).collect();
            v.reverse(); // pop() serves them in order
            Self {
                replies: Mutex::new(v),
                calls: AtomicU32::new(0),
            }
        }
    }

    impl LlmClient for ScriptedClient {
        async fn complete(&self, _prompt: &str) -> Result<Completion, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| LlmError::Provider("script exhausted".to_string()))?;
            Ok(Completion {
                text,
                tokens: 10,
                cost_usd: 0.001,
            })
        }
    }

    fn schema() -> ObjectSchema {
        ObjectSchema::new()
            .field("intent", FieldKind::String)
            .field("urgency", FieldKind::String)
    }

    fn fast_options() -> StructuredOutputOptions {
        StructuredOutputOptions {
            max_retries: 2,
            initial_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_valid_first_reply() {
        let client = ScriptedClient::new(&[r#"{"intent":"buy","urgency":"high"}"#]);
        let out = call_structured(&client, "classify", &schema(), &fast_options())
            .await
            .unwrap();
        assert_eq!(out.attempts, 1);
        assert_eq!(out.tokens, 10);
        assert_eq!(out.value["intent"], "buy");
    }

    #[tokio::test]
    async fn test_recovers_from_malformed_json() {
        let client = ScriptedClient::new(&[
            "not json at all",
            r#"{"intent":"buy"}"#, // missing urgency
            r#"{"intent":"buy","urgency":"low"}"#,
        ]);
        let out = call_structured(&client, "classify", &schema(), &fast_options())
            .await
            .unwrap();
        assert_eq!(out.attempts, 3);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        // Tokens/cost from the successful attempt only, not summed.
        assert_eq!(out.tokens, 10);
    }

    #[tokio::test]
    async fn test_exhaustion_tags_schema_parse_failed() {
        let client = ScriptedClient::new(&["nope", "nope", "nope"]);
        let err = call_structured(&client, "classify", &schema(), &fast_options())
            .await
            .unwrap_err();
        match err {
            StructuredOutputError::SchemaParseFailed { attempts, cause } => {
                assert_eq!(attempts, 3);
                assert!(cause.contains("invalid JSON"));
            }
            other => panic!("expected SchemaParseFailed, got {other:?}"),
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_provider_error_not_retried() {
        struct FailingClient;
        impl LlmClient for FailingClient {
            async fn complete(&self, _prompt: &str) -> Result<Completion, LlmError> {
                Err(LlmError::RateLimited)
            }
        }

        let err = call_structured(&FailingClient, "x", &schema(), &fast_options())
            .await
            .unwrap_err();
        assert!(matches!(err, StructuredOutputError::Llm(LlmError::RateLimited)));
    }

    #[tokio::test]
    async fn test_large_retry_budget_does_not_overflow_delay() {
        struct AlwaysInvalid;
        impl LlmClient for AlwaysInvalid {
            async fn complete(&self, _prompt: &str) -> Result<Completion, LlmError> {
                Ok(Completion {
                    text: "nope".to_string(),
                    tokens: 1,
                    cost_usd: 0.0,
                })
            }
        }

        // 70 retries pushes the backoff exponent past 63 bits.
        let options = StructuredOutputOptions {
            max_retries: 70,
            initial_delay_ms: 0,
        };
        let err = call_structured(&AlwaysInvalid, "x", &schema(), &options)
            .await
            .unwrap_err();
        match err {
            StructuredOutputError::SchemaParseFailed { attempts, .. } => {
                assert_eq!(attempts, 71);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_validation_error_in_final_cause() {
        let client = ScriptedClient::new(&[
            r#"{"intent":"buy"}"#,
            r#"{"intent":"buy"}"#,
            r#"{"intent":"buy"}"#,
        ]);
        let err = call_structured(&client, "classify", &schema(), &fast_options())
            .await
            .unwrap_err();
        match err {
            StructuredOutputError::SchemaParseFailed { cause, .. } => {
                assert!(cause.contains("urgency"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
