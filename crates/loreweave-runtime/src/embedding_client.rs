//! [`HttpEmbedder`] – OpenAI-compatible embeddings client.
//!
//! Posts `{"model": ..., "input": ...}` to `{base_url}/v1/embeddings` and
//! returns the first vector of the `data` array.  Works against Ollama
//! (e.g. the `all-minilm` model) and the OpenAI API.

use std::time::Duration;

use async_trait::async_trait;
use loreweave_memory::{Embedder, EmbeddingError};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Embedding client for an OpenAI-compatible model server.
pub struct HttpEmbedder {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// An empty key is ignored.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, EmbeddingError> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;
        Ok(self)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EmbeddingError::Unavailable(format!("{url}: {e}")))?;
        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::BadResponse(e.to_string()))?;

        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EmbeddingError::BadResponse("no embedding in response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{UNREACHABLE_URL, serve_once};

    #[tokio::test]
    async fn embed_returns_first_vector() {
        let (url, request) =
            serve_once(200, r#"{"data":[{"embedding":[0.5,-0.25,1.0],"index":0}]}"#).await;
        let embedder = HttpEmbedder::new(url, "all-minilm");

        let v = embedder.embed("the old well").await.unwrap();
        assert_eq!(v, vec![0.5, -0.25, 1.0]);

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /v1/embeddings"));
        assert!(raw.contains(r#""model":"all-minilm""#));
        assert!(raw.contains("the old well"));
    }

    #[tokio::test]
    async fn empty_data_is_bad_response() {
        let (url, _request) = serve_once(200, r#"{"data":[]}"#).await;
        let embedder = HttpEmbedder::new(url, "all-minilm");
        assert!(matches!(
            embedder.embed("x").await,
            Err(EmbeddingError::BadResponse(_))
        ));
    }

    #[tokio::test]
    async fn error_status_is_unavailable() {
        let (url, _request) = serve_once(503, r#"{"error":"loading model"}"#).await;
        let embedder = HttpEmbedder::new(url, "all-minilm");
        assert!(matches!(
            embedder.embed("x").await,
            Err(EmbeddingError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let embedder = HttpEmbedder::new(UNREACHABLE_URL, "all-minilm");
        assert!(matches!(
            embedder.embed("x").await,
            Err(EmbeddingError::Unavailable(_))
        ));
    }
}
