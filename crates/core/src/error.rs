//! Error types for the cinder domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! Admission rejections, ambiguous decompositions and low-confidence
//! generations are *not* errors: they are ordinary values that the
//! orchestrator routes on (see `Rejection`, `DecompositionResult::fell_back`
//! and `Response::escalation_candidate`).

use thiserror::Error;

/// The top-level error type for all cinder operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Resource errors ---
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    // --- Retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Embedding errors ---
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    // --- Generation errors ---
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    // --- Escalation errors ---
    #[error("Escalation error: {0}")]
    Escalation(#[from] EscalationError),

    // --- Cancellation ---
    #[error("Request cancelled during {stage}")]
    Cancelled { stage: String },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    #[error("Memory probe failed: {0}")]
    ProbeFailed(String),

    #[error("Memory probe timed out after {timeout_ms}ms")]
    ProbeTimedOut { timeout_ms: u64 },

    #[error("Memory probing unsupported on this platform: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Source unavailable: {source_name} ({reason})")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("Source timed out: {source_name} after {timeout_ms}ms")]
    Timeout { source_name: String, timeout_ms: u64 },

    #[error("Corpus error: {0}")]
    Corpus(String),

    #[error("Retrieval cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("Embedding backend unavailable: {0}")]
    Unavailable(String),

    #[error("Embedding request failed: {0}")]
    Failed(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Generation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Engine returned an empty response")]
    EmptyResponse,

    #[error("Engine not configured: {0}")]
    NotConfigured(String),

    #[error("Generation failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Error)]
pub enum EscalationError {
    #[error("Escalation service not configured")]
    NotConfigured,

    #[error("Escalation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Escalation failed: {0}")]
    Failed(String),
}
