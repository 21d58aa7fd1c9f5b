//! Infrastructure implementations for Tandem.
//!
//! Implements the ports defined in `tandem-core`: SQLite-backed
//! [`tandem_core::store::WorkflowStore`] persistence and the Gemini
//! [`tandem_core::llm::LlmClient`]. Also home of environment-driven runtime
//! configuration.

pub mod config;
pub mod llm;
pub mod sqlite;
