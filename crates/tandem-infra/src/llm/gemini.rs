//! GeminiClient -- concrete [`LlmClient`] implementation for Google Gemini.
//!
//! Sends requests to the Generative Language API
//! (`/v1beta/models/{model}:generateContent`) with the key passed via the
//! `x-goog-api-key` header.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use tandem_core::llm::{LlmClient, estimate_tokens};
use tandem_types::llm::{Completion, LlmError};

/// Google Gemini LLM client.
///
/// # API Key Security
///
/// The API key is stored as a [`SecretString`] and is only exposed when
/// constructing HTTP request headers. It never appears in Debug output,
/// Display output, or tracing logs.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    cost_per_token: f64,
}

impl GeminiClient {
    /// Create a new Gemini client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Gemini API key wrapped in SecretString
    /// * `model` - Model identifier (e.g., "gemini-2.0-flash")
    /// * `cost_per_token` - Dollar cost per token for this model
    pub fn new(api_key: SecretString, model: String, cost_per_token: f64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to create reqwest client");

        Self {
            client,
            api_key,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model,
            cost_per_token,
        }
    }

    /// Create a client from the `GEMINI_API_KEY` environment variable.
    pub fn from_env(model: String, cost_per_token: f64) -> Result<Self, LlmError> {
        let key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| LlmError::AuthenticationFailed)?;
        Ok(Self::new(SecretString::from(key), model, cost_per_token))
    }

    /// The model this client targets.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Override the base URL (useful for testing or proxies).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn build_request(prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 1000,
            },
        }
    }

    fn cost_for(&self, tokens: u64) -> f64 {
        tokens as f64 * self.cost_per_token
    }
}

// GeminiClient intentionally does NOT derive Debug to prevent accidental
// exposure of internal state. The SecretString field ensures the API key is
// never printed, but Debug is omitted entirely as well.

impl LlmClient for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
        let body = Self::build_request(prompt);

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Provider(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                400 => LlmError::InvalidRequest(error_body),
                401 | 403 => LlmError::AuthenticationFailed,
                429 => LlmError::RateLimited,
                _ => LlmError::Provider(format!("HTTP {status}: {error_body}")),
            });
        }

        let gemini_resp: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))?;

        let text = gemini_resp.first_text().ok_or_else(|| {
            LlmError::Deserialization("response contained no candidate text".to_string())
        })?;

        let tokens = gemini_resp
            .usage_metadata
            .as_ref()
            .map(|u| u.total_token_count)
            .unwrap_or_else(|| estimate_tokens(prompt) + estimate_tokens(&text));

        Ok(Completion {
            text,
            tokens,
            cost_usd: self.cost_for(tokens),
        })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
    fn first_text(&self) -> Option<String> {
        self.candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "totalTokenCount")]
    total_token_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client() -> GeminiClient {
        GeminiClient::new(
            SecretString::from("test-key-not-real"),
            "gemini-2.0-flash".to_string(),
            0.000_001_25,
        )
    }

    #[test]
    fn test_url_includes_model() {
        let client = make_client().with_base_url("http://localhost:9090".to_string());
        assert_eq!(
            client.url(),
            "http://localhost:9090/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn test_build_request_shape() {
        let req = GeminiClient::build_request("Classify this ticket");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json["contents"][0]["parts"][0]["text"],
            "Classify this ticket"
        );
        assert_eq!(json["generationConfig"]["temperature"], 0.1);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1000);
    }

    #[test]
    fn test_response_parsing_with_usage() {
        let raw = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "{\"category\":\"bug\"}"}]}}
            ],
            "usageMetadata": {"totalTokenCount": 42}
        }"#;
        let resp: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.first_text().as_deref(), Some("{\"category\":\"bug\"}"));
        assert_eq!(resp.usage_metadata.unwrap().total_token_count, 42);
    }

    #[test]
    fn test_response_parsing_without_candidates() {
        let resp: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.first_text().is_none());
        assert!(resp.usage_metadata.is_none());
    }

    #[test]
    fn test_cost_math() {
        let client = make_client();
        let cost = client.cost_for(1_000_000);
        assert!((cost - 1.25).abs() < 1e-9);

        let free = GeminiClient::new(
            SecretString::from("test-key"),
            "gemini-2.0-flash".to_string(),
            0.0,
        );
        assert_eq!(free.cost_for(10_000), 0.0);
    }

    #[test]
    fn test_model_accessor() {
        assert_eq!(make_client().model(), "gemini-2.0-flash");
    }
}
