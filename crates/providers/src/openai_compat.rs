//! OpenAI-compatible chat completion client.
//!
//! Works with any server exposing `/v1/chat/completions`: llama.cpp,
//! MLX-LM, vLLM, Ollama's OpenAI endpoint, and hosted APIs. The same type
//! backs both the local [`GenerationEngine`] (two model names, one per
//! tier) and the remote [`EscalationService`].

use async_trait::async_trait;
use cinder_config::{EngineConfig, EscalationConfig};
use cinder_core::error::{EscalationError, GenerationError};
use cinder_core::{EscalationRequest, EscalationService, Generation, GenerationEngine, GenerationRequest, ModelTier};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Confidence reported when the server gives neither logprobs nor a
/// recognised finish reason.
const UNKNOWN_CONFIDENCE: f32 = 0.5;

const ESCALATION_SYSTEM_PROMPT: &str = "You are a careful expert assistant. A smaller local model attempted \
     this question and was not confident. Use the provided context where relevant and answer precisely.";

/// An OpenAI-compatible completion endpoint.
pub struct OpenAiCompatEngine {
    name: String,
    base_url: String,
    api_key: Option<String>,
    small_model: String,
    large_model: String,
    temperature: f32,
    /// Token cap used for escalation calls.
    escalation_max_tokens: usize,
    client: reqwest::Client,
}

impl OpenAiCompatEngine {
    /// Create a client using `model` for both tiers.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, GenerationError> {
        let model = model.into();
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GenerationError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            small_model: model.clone(),
            large_model: model,
            temperature: 0.7,
            escalation_max_tokens: 2048,
            client,
        })
    }

    /// The local engine described by `[engine]`.
    pub fn from_engine_config(config: &EngineConfig) -> Result<Self, GenerationError> {
        let mut engine = Self::new("local", &config.base_url, &config.small_model)?
            .with_models(&config.small_model, &config.large_model)
            .with_temperature(config.temperature);
        engine.api_key = config.api_key.clone();
        Ok(engine)
    }

    /// The escalation service described by `[escalation]`, if one is configured.
    pub fn from_escalation_config(config: &EscalationConfig) -> Result<Option<Self>, GenerationError> {
        let Some(base_url) = config.base_url.as_deref() else {
            return Ok(None);
        };
        let mut service = Self::new("escalation", base_url, &config.model)?;
        service.api_key = config.api_key.clone();
        service.escalation_max_tokens = config.max_tokens;
        Ok(Some(service))
    }

    pub fn with_models(mut self, small: impl Into<String>, large: impl Into<String>) -> Self {
        self.small_model = small.into();
        self.large_model = large.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Model name for a tier.
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Small => &self.small_model,
            ModelTier::Large => &self.large_model,
        }
    }

    fn body(&self, model: &str, messages: Vec<ApiMessage>, max_tokens: usize) -> ApiRequest {
        ApiRequest {
            model: model.to_string(),
            messages,
            temperature: self.temperature,
            max_tokens,
            logprobs: true,
            stream: false,
        }
    }

    async fn complete(&self, body: &ApiRequest) -> Result<ApiChoice, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(client = %self.name, model = %body.model, max_tokens = body.max_tokens, "Sending completion request");

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(client = %self.name, status, body = %error_body, "Completion endpoint returned error");
            return Err(GenerationError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| GenerationError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;
        api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GenerationError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })
    }
}

/// Build the message list sent to the escalation service.
fn escalation_messages(request: &EscalationRequest) -> Vec<ApiMessage> {
    let mut system = String::from(ESCALATION_SYSTEM_PROMPT);
    if !request.context.trim().is_empty() {
        system.push_str("\n\nContext:\n");
        system.push_str(request.context.trim());
    }
    if let Some(attempt) = request.local_attempt.as_deref().filter(|a| !a.trim().is_empty()) {
        system.push_str("\n\nLocal draft answer:\n");
        system.push_str(attempt.trim());
    }
    vec![ApiMessage::new("system", system), ApiMessage::new("user", request.query.clone())]
}

/// Engine confidence: the geometric-mean token probability when logprobs
/// are present, otherwise a fixed value per finish reason.
pub(crate) fn confidence_of(choice: &ApiChoice) -> f32 {
    let logprobs: Vec<f64> = choice
        .logprobs
        .as_ref()
        .and_then(|l| l.content.as_ref())
        .map(|tokens| tokens.iter().map(|t| t.logprob).filter(|l| l.is_finite()).collect())
        .unwrap_or_default();

    if !logprobs.is_empty() {
        let mean = logprobs.iter().sum::<f64>() / logprobs.len() as f64;
        return (mean.exp() as f32).clamp(0.0, 1.0);
    }

    match choice.finish_reason.as_deref() {
        Some("stop") => 0.7,
        Some("length") => 0.4,
        _ => UNKNOWN_CONFIDENCE,
    }
}

#[async_trait]
impl GenerationEngine for OpenAiCompatEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError> {
        let model = self.model_for(request.tier).to_string();
        let body = self.body(
            &model,
            vec![ApiMessage::new("user", request.prompt)],
            request.max_tokens.max(1),
        );
        let choice = self.complete(&body).await?;
        let confidence = confidence_of(&choice);
        let text = choice.message.content.unwrap_or_default();
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(Generation {
            text,
            confidence,
            model: Some(model),
        })
    }
}

#[async_trait]
impl EscalationService for OpenAiCompatEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn escalate(&self, request: EscalationRequest) -> Result<String, EscalationError> {
        let body = self.body(&self.large_model, escalation_messages(&request), self.escalation_max_tokens);
        let choice = self
            .complete(&body)
            .await
            .map_err(|e| EscalationError::Failed(e.to_string()))?;
        choice
            .message
            .content
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| EscalationError::Failed("empty response".into()))
    }
}

// --- OpenAI API wire types ---

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    temperature: f32,
    max_tokens: usize,
    logprobs: bool,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

impl ApiMessage {
    fn new(role: &str, content: String) -> Self {
        Self {
            role: role.into(),
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

/// One completion choice as returned by the server.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    logprobs: Option<ApiLogprobs>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiLogprobs {
    #[serde(default)]
    content: Option<Vec<ApiTokenLogprob>>,
}

#[derive(Debug, Deserialize)]
struct ApiTokenLogprob {
    logprob: f64,
}
