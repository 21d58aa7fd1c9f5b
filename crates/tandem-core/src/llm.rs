//! LlmClient trait definition.
//!
//! The single abstraction the engine uses to talk to a language model.
//! Uses native async fn in traits (RPITIT, Rust 2024 edition).
//! Implementations live in tandem-infra (`GeminiClient`) and in the step
//! catalogs (deterministic mock clients for tests and demos).

use tandem_types::llm::{Completion, LlmError};

/// Trait for LLM backends.
pub trait LlmClient: Send + Sync {
    /// Send a prompt and receive the full completion.
    fn complete(
        &self,
        prompt: &str,
    ) -> impl std::future::Future<Output = Result<Completion, LlmError>> + Send;
}

/// Estimate the token footprint of a piece of text: ceil(chars / 4).
///
/// The same estimate is used for budget accounting and as the fallback when
/// a provider does not report usage.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}
