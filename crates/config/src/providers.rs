//! Endpoints for the generation engine, embedding backend and escalation service.

use serde::{Deserialize, Serialize};

/// Local OpenAI-compatible inference server (llama.cpp, MLX, vLLM ...).
#[derive(Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model used when the resource level only affords the small tier
    #[serde(default = "default_small_model")]
    pub small_model: String,

    #[serde(default = "default_large_model")]
    pub large_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "ollama" or "none" (lexical retrieval only)
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    #[serde(default = "default_embedding_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
}

/// Remote reasoning service used for escalation.
#[derive(Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_escalation_model")]
    pub model: String,

    #[serde(default = "default_escalation_max_tokens")]
    pub max_tokens: usize,
}

fn default_engine_url() -> String {
    "http://localhost:8080/v1".into()
}
fn default_small_model() -> String {
    "qwen2.5-1.5b-instruct".into()
}
fn default_large_model() -> String {
    "qwen2.5-3b-instruct".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_embedding_provider() -> String {
    "ollama".into()
}
fn default_embedding_url() -> String {
    "http://localhost:11434".into()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}
fn default_embedding_timeout_ms() -> u64 {
    2000
}
fn default_escalation_model() -> String {
    "gpt-4o".into()
}
fn default_escalation_max_tokens() -> usize {
    2048
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("small_model", &self.small_model)
            .field("large_model", &self.large_model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl std::fmt::Debug for EscalationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_engine_url(),
            api_key: None,
            small_model: default_small_model(),
            large_model: default_large_model(),
            temperature: default_temperature(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            base_url: default_embedding_url(),
            model: default_embedding_model(),
            timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: default_escalation_model(),
            max_tokens: default_escalation_max_tokens(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        !self.provider.eq_ignore_ascii_case("none")
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        match self.provider.to_ascii_lowercase().as_str() {
            "ollama" | "none" => Ok(()),
            other => Err(format!("embedding: unknown provider '{other}' (expected ollama or none)")),
        }
    }
}

impl EscalationConfig {
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_api_keys() {
        let engine = EngineConfig {
            api_key: Some("sk-secret".into()),
            ..EngineConfig::default()
        };
        let out = format!("{engine:?}");
        assert!(!out.contains("sk-secret"));
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn embedding_provider_none_disables() {
        let config = EmbeddingConfig {
            provider: "None".into(),
            ..EmbeddingConfig::default()
        };
        assert!(!config.is_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_embedding_provider_rejected() {
        let config = EmbeddingConfig {
            provider: "word2vec".into(),
            ..EmbeddingConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
