//! HTTP clients for the generation engine, the escalation service and
//! the embedding backend.
//!
//! All clients implement the traits in `cinder_core::generation`; the
//! orchestrator never sees HTTP.

pub mod ollama;
pub mod openai_compat;

pub use ollama::OllamaEmbedder;
pub use openai_compat::OpenAiCompatEngine;
