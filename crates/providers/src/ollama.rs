//! Ollama embedding backend (`POST /api/embeddings`).

use async_trait::async_trait;
use cinder_config::EmbeddingConfig;
use cinder_core::EmbeddingBackend;
use cinder_core::error::EmbeddingError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::Unavailable(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        })
    }

    /// `None` when embeddings are disabled (`provider = "none"`).
    pub fn from_config(config: &EmbeddingConfig) -> Result<Option<Self>, EmbeddingError> {
        if !config.is_enabled() {
            return Ok(None);
        }
        Self::new(&config.base_url, &config.model, Duration::from_millis(config.timeout_ms)).map(Some)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

fn parse_embedding(body: &str) -> Result<Vec<f32>, EmbeddingError> {
    let response: EmbeddingResponse =
        serde_json::from_str(body).map_err(|e| EmbeddingError::Failed(format!("bad embedding response: {e}")))?;
    if response.embedding.is_empty() {
        return Err(EmbeddingError::Failed("empty embedding".into()));
    }
    Ok(response.embedding)
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/api/embeddings", self.base_url);
        debug!(model = %self.model, chars = text.len(), "Requesting embedding");

        let response = self
            .client
            .post(&url)
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(EmbeddingError::Failed(format!("HTTP {}: {body}", status.as_u16())));
        }
        parse_embedding(&body)
    }
}
