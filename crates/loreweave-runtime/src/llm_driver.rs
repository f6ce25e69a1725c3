//! [`LlmDriver`] – OpenAI-compatible LLM interface.
//!
//! Communicates with any model server that exposes an OpenAI-compatible
//! `/v1/chat/completions` endpoint, such as [Ollama](https://ollama.com)
//! (`http://localhost:11434`) or the OpenAI API itself.
//!
//! # Example
//!
//! ```rust,no_run
//! use loreweave_runtime::llm_driver::{Generator, LlmDriver};
//!
//! # async fn demo() -> Result<(), loreweave_runtime::LlmError> {
//! let driver = LlmDriver::new("http://localhost:11434", "llama3");
//!
//! // Requires a running Ollama instance.
//! let scene = driver.generate("Story: ...").await?;
//! # let _ = scene;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from LLM driver operations.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response from the model server could not be parsed.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Generator seam
// ─────────────────────────────────────────────────────────────────────────────

/// Maps a prompt to a completion.
///
/// An `Ok` carrying empty text is a legal answer; callers decide how to
/// degrade.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

/// The role of a participant in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal request / response shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Pull the first completion out of a chat-completions response.
///
/// A `null` content counts as an empty completion rather than an error.
fn first_completion(response: ChatResponse) -> Result<String, LlmError> {
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content.unwrap_or_default())
        .ok_or_else(|| LlmError::BadResponse("empty choices array".into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmDriver
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for an OpenAI-compatible chat-completions endpoint.
///
/// Construct once and share across requests.
pub struct LlmDriver {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl LlmDriver {
    /// Create a new driver pointing at `base_url` (e.g. `"http://localhost:11434"`)
    /// and using `model` (e.g. `"llama3"`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request (builder-style).
    /// An empty key is ignored.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    /// Bound every request by `timeout` (builder-style).
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Http`] if the HTTP client cannot be rebuilt.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, LlmError> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// Send `messages` to the model and return the assistant's reply text.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Http`] if the request fails, or
    /// [`LlmError::BadResponse`] if the response shape is unexpected.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
        };

        let mut request = self.client.post(self.completions_url()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response: ChatResponse = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = first_completion(response)?;
        debug!(model = %self.model, chars = text.len(), "chat completion received");
        Ok(text)
    }
}

#[async_trait]
impl Generator for LlmDriver {
    /// The whole prompt goes out as a single user message.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let messages = [ChatMessage {
            role: Role::User,
            content: prompt.to_string(),
        }];
        self.complete(&messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{UNREACHABLE_URL, serve_once};

    #[test]
    fn chat_message_role_variants_serialize() {
        let roles = [
            (Role::System, "system"),
            (Role::User, "user"),
            (Role::Assistant, "assistant"),
        ];
        for (role, expected) in roles {
            let msg = ChatMessage {
                role,
                content: String::new(),
            };
            let json = serde_json::to_string(&msg).unwrap();
            assert!(json.contains(expected));
        }
    }

    #[test]
    fn request_body_is_non_streaming() {
        let messages = [ChatMessage {
            role: Role::User,
            content: "hello".into(),
        }];
        let body = ChatRequest {
            model: "llama3",
            messages: &messages,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "llama3");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn first_completion_handles_null_content() {
        let response: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#)
                .unwrap();
        assert_eq!(first_completion(response).unwrap(), "");
    }

    #[test]
    fn first_completion_rejects_missing_choices() {
        let response: ChatResponse = serde_json::from_str("{}").unwrap();
        assert!(matches!(first_completion(response), Err(LlmError::BadResponse(_))));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let driver = LlmDriver::new("http://localhost:11434/", "llama3");
        assert_eq!(driver.completions_url(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn empty_api_key_is_ignored() {
        let driver = LlmDriver::new("http://localhost:11434", "llama3").with_api_key("");
        assert!(driver.api_key.is_none());
    }

    #[tokio::test]
    async fn generate_sends_prompt_as_user_message() {
        let (url, request) = serve_once(
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":"Story: Hi\nChoices:\n1. a\n2. b\n3. c"}}]}"#,
        )
        .await;
        let driver = LlmDriver::new(url, "llama3").with_api_key("sk-test");

        let text = driver.generate("Continue the tale").await.unwrap();
        assert!(text.starts_with("Story: Hi"));

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /v1/chat/completions"));
        assert!(raw.to_lowercase().contains("authorization: bearer sk-test"));
        assert!(raw.contains("Continue the tale"));
        assert!(raw.contains(r#""role":"user""#));
    }

    #[tokio::test]
    async fn server_error_status_is_http_error() {
        let (url, _request) = serve_once(500, r#"{"error":"boom"}"#).await;
        let driver = LlmDriver::new(url, "llama3");
        assert!(matches!(driver.generate("x").await, Err(LlmError::Http(_))));
    }

    #[tokio::test]
    async fn unreachable_server_is_http_error() {
        let driver = LlmDriver::new(UNREACHABLE_URL, "llama3")
            .with_timeout(Duration::from_secs(5))
            .unwrap();
        assert!(matches!(driver.generate("x").await, Err(LlmError::Http(_))));
    }
}
