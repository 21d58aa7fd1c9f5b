//! Shared domain types for Tandem.
//!
//! This crate contains the core domain types used across the Tandem workflow
//! engine: workflows, steps, runs, artifacts, metrics, budgets, declarative
//! object schemas, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod error;
pub mod llm;
pub mod metrics;
pub mod schema;
pub mod workflow;
