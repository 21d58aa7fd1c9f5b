//! LLM completion types shared between the engine and provider clients.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single completion returned by an LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Raw model output text.
    pub text: String,
    /// Tokens consumed (provider-reported, or estimated at chars/4).
    pub tokens: u64,
    /// Dollar cost of the call under the provider's pricing table.
    pub cost_usd: f64,
}

/// Errors from an LLM provider client.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("failed to deserialize provider response: {0}")]
    Deserialization(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::Provider("upstream 500".to_string());
        assert_eq!(err.to_string(), "provider error: upstream 500");
        assert_eq!(LlmError::RateLimited.to_string(), "rate limited by provider");
    }

    #[test]
    fn test_completion_serde() {
        let c = Completion {
            text: "{\"intent\":\"buy\"}".to_string(),
            tokens: 12,
            cost_usd: 0.0,
        };
        let s = serde_json::to_string(&c).unwrap();
        let parsed: Completion = serde_json::from_str(&s).unwrap();
        assert_eq!(parsed.tokens, 12);
    }
}
