//! Workflow execution engine for Tandem.
//!
//! This crate defines the "ports" (the [`store::WorkflowStore`] and
//! [`llm::LlmClient`] traits) that the infrastructure layer implements, plus
//! the engine itself: step registry, execution context, run loop,
//! structured-output caller, retry primitive, and the background run
//! processor. It depends only on `tandem-types` -- never on `tandem-infra`
//! or any database/IO crate.

pub mod catalog;
pub mod context;
pub mod engine;
pub mod llm;
pub mod processor;
pub mod registry;
pub mod retry;
pub mod store;
pub mod structured;
