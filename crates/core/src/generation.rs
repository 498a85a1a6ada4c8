//! External collaborators: the local generation engine, the escalation
//! service and the embedding backend.
//!
//! All three are black boxes behind traits so the orchestrator can be
//! tested with scripted mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EmbeddingError, EscalationError, GenerationError};
use crate::resource::ModelTier;

/// A request to the local generation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Fully assembled prompt.
    pub prompt: String,

    /// Maximum tokens to generate.
    pub max_tokens: usize,

    pub tier: ModelTier,
}

/// Engine output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,

    /// Engine's own confidence in [0, 1].
    pub confidence: f32,

    /// Model that produced the text, if the engine reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// The local inference engine.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError>;
}

/// Everything the escalation service gets to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub query: String,

    /// The context assembled for the local attempt.
    pub context: String,

    /// The local answer, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_attempt: Option<String>,
}

/// A stronger, slower, out-of-process reasoning service.
#[async_trait]
pub trait EscalationService: Send + Sync {
    fn name(&self) -> &str;

    async fn escalate(&self, request: EscalationRequest) -> Result<String, EscalationError>;
}

/// Turns text into a vector for similarity search.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}
