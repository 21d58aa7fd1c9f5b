//! LLM provider clients.

pub mod gemini;

pub use gemini::GeminiClient;
