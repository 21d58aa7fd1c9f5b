//! Environment-driven runtime configuration.
//!
//! Every knob has a default; environment variables override. Unparseable
//! values fall back to the default with a warning rather than aborting.

use std::collections::HashMap;
use std::time::Duration;

use tandem_core::processor::ProcessorConfig;
use tandem_core::retry::RetryPolicy;
use tandem_core::structured::StructuredOutputOptions;

/// Runtime configuration for the engine, processor, and LLM client.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Default model for LLM steps.
    pub default_model: String,
    /// Dollar cost per token, keyed by model. Absent models cost 0.
    pub cost_per_token: HashMap<String, f64>,
    pub processor: ProcessorConfig,
    pub retry: RetryPolicy,
    pub structured_output: StructuredOutputOptions,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_model: "gemini-2.0-flash".to_string(),
            cost_per_token: HashMap::from([
                ("gemini-2.0-flash".to_string(), 0.0),
                ("gemini-1.5-flash".to_string(), 0.0),
                ("gemini-1.5-pro".to_string(), 0.000_001_25),
                ("gemini-1.0-pro".to_string(), 0.000_001_25),
            ]),
            processor: ProcessorConfig::default(),
            retry: RetryPolicy::default(),
            structured_output: StructuredOutputOptions::default(),
        }
    }
}

impl RuntimeConfig {
    /// Build the config from environment variables, using defaults for
    /// anything unset or malformed.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_model: std::env::var("GEMINI_DEFAULT_MODEL")
                .unwrap_or(defaults.default_model),
            cost_per_token: defaults.cost_per_token,
            processor: ProcessorConfig {
                poll_interval: Duration::from_millis(env_u64(
                    "PROCESSING_POLL_INTERVAL",
                    defaults.processor.poll_interval.as_millis() as u64,
                )),
                page_size: env_u64("PROCESSING_PAGE_SIZE", defaults.processor.page_size as u64)
                    as u32,
                concurrency: env_u64(
                    "PROCESSING_CONCURRENCY",
                    defaults.processor.concurrency as u64,
                ) as usize,
            },
            retry: RetryPolicy {
                max_retries: env_u64("RETRY_MAX_RETRIES", defaults.retry.max_retries as u64)
                    as u32,
                base_delay_ms: env_u64("RETRY_BASE_DELAY", defaults.retry.base_delay_ms),
                max_delay_ms: env_u64("RETRY_MAX_DELAY", defaults.retry.max_delay_ms),
                jitter_factor: env_f64("RETRY_JITTER_FACTOR", defaults.retry.jitter_factor),
            },
            structured_output: StructuredOutputOptions {
                max_retries: env_u64(
                    "STRUCTURED_MAX_RETRIES",
                    defaults.structured_output.max_retries as u64,
                ) as u32,
                initial_delay_ms: env_u64(
                    "STRUCTURED_INITIAL_DELAY",
                    defaults.structured_output.initial_delay_ms,
                ),
            },
        }
    }

    /// Cost per token for a model (0 for unknown models).
    pub fn cost_per_token(&self, model: &str) -> f64 {
        self.cost_per_token.get(model).copied().unwrap_or(0.0)
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "unparseable env var, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_f64(name: &str, default: f64) -> f64 {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "unparseable env var, using default");
            default
        }),
        Err(_) => default,
    }
}
