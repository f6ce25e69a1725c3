//! [`GeminiDriver`] – Google Gemini `generateContent` client.
//!
//! Sends the prompt as a single user turn to
//! `{base_url}/v1beta/models/{model}:generateContent`, authenticating with the
//! `x-goog-api-key` header, and concatenates the text parts of the first
//! candidate.  A response without candidates (e.g. a safety block) is an
//! empty completion, not an error.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm_driver::{Generator, LlmError};

/// Public Gemini API host.
pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

/// Model used when none is configured.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

fn candidate_text(response: GenerateResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .concat()
        })
        .unwrap_or_default()
}

/// Async client for the Gemini REST API.
pub struct GeminiDriver {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiDriver {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_GEMINI_URL.to_string(),
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the driver at another host (builder-style).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Bound every request by `timeout` (builder-style).
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, LlmError> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl Generator for GeminiDriver {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            warn!("no Gemini API key configured; request will likely be rejected");
        }
        let body = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: prompt }],
            }],
        };
        let response: GenerateResponse = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = candidate_text(response);
        debug!(model = %self.model, chars = text.len(), "gemini completion received");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_once;

    #[test]
    fn endpoint_embeds_model_name() {
        let driver = GeminiDriver::new("key", DEFAULT_GEMINI_MODEL);
        assert_eq!(
            driver.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn candidate_parts_are_concatenated() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Story: A"},{"text":"\nChoices:"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(candidate_text(response), "Story: A\nChoices:");
    }

    #[test]
    fn blocked_response_is_empty_text() {
        let response: GenerateResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        assert_eq!(candidate_text(response), "");
    }

    #[tokio::test]
    async fn generate_posts_prompt_with_api_key_header() {
        let (url, request) = serve_once(
            200,
            r#"{"candidates":[{"content":{"parts":[{"text":"Story: The gate opens."}]}}]}"#,
        )
        .await;
        let driver = GeminiDriver::new("g-key", "gemini-1.5-flash").with_base_url(url);

        let text = driver.generate("Open the gate").await.unwrap();
        assert_eq!(text, "Story: The gate opens.");

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /v1beta/models/gemini-1.5-flash:generateContent"));
        assert!(raw.to_lowercase().contains("x-goog-api-key: g-key"));
        assert!(raw.contains("Open the gate"));
    }
}
