//! # cinder core
//!
//! Domain types, traits, and error definitions for the cinder
//! retrieval and context-assembly orchestrator. This crate has
//! **no framework dependencies**: it defines the domain model that all
//! other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (knowledge sources, the generation engine,
//! the escalation service, the embedding backend) is a trait here.
//! Implementations live in their respective crates, which keeps the
//! orchestrator testable with scripted mocks.

pub mod error;
pub mod event;
pub mod generation;
pub mod message;
pub mod query;
pub mod resource;
pub mod retrieval;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{EventBus, PipelineEvent, PipelineState};
pub use generation::{
    EmbeddingBackend, EscalationRequest, EscalationService, Generation, GenerationEngine,
    GenerationRequest,
};
pub use message::{Role, Turn};
pub use query::{DecompositionResult, DecompositionStrategy, QueryType, SubQuery};
pub use resource::{ModelTier, ResourceLevel, ResourceSnapshot};
pub use retrieval::{clamp_unit, CandidateResult, ContentKind, Provenance, SourceKind, SourceRetriever};
