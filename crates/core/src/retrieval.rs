//! Retrieval trait — one implementation per knowledge source.
//!
//! The reranker and orchestrator only ever see `dyn SourceRetriever`.
//! Concrete sources (code index, document index, episodic memory) live in
//! `cinder-retrieval` or in the embedding application.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// Which family of knowledge a source holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Code,
    Document,
    Episodic,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Code, SourceKind::Document, SourceKind::Episodic];
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Code => f.write_str("code"),
            SourceKind::Document => f.write_str("document"),
            SourceKind::Episodic => f.write_str("episodic"),
        }
    }
}

/// What a retrieved item is. Drives the kind-priority factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Class,
    Trait,
    Protocol,
    Interface,
    Struct,
    Enum,
    Function,
    Method,
    Module,
    Type,
    Import,
    Markdown,
    Docstring,
    Comment,
    BlockComment,
    Message,
    Fact,
    #[default]
    Other,
}

impl ContentKind {
    /// Priority in [0, 1]; definitions outrank usages and comments.
    pub fn priority(self) -> f32 {
        match self {
            ContentKind::Class | ContentKind::Trait | ContentKind::Protocol => 1.0,
            ContentKind::Interface => 0.95,
            ContentKind::Struct => 0.9,
            ContentKind::Enum => 0.85,
            ContentKind::Function => 0.8,
            ContentKind::Method => 0.75,
            ContentKind::Module => 0.7,
            ContentKind::Docstring => 0.7,
            ContentKind::Fact => 0.7,
            ContentKind::Type => 0.65,
            ContentKind::Markdown => 0.6,
            ContentKind::Message => 0.6,
            ContentKind::BlockComment => 0.5,
            ContentKind::Other => 0.5,
            ContentKind::Comment => 0.4,
            ContentKind::Import => 0.3,
        }
    }
}

/// How a candidate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Cosine similarity against a precomputed embedding.
    #[default]
    Vector,
    /// Keyword fallback; the score is already discounted.
    Lexical,
}

/// One retrieval hit. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    /// Unique id; the reranker deduplicates on it.
    pub id: String,

    /// Name of the source that produced this hit.
    pub source: String,

    pub source_kind: SourceKind,

    pub kind: ContentKind,

    /// Symbol name, document title or turn label.
    #[serde(default)]
    pub title: String,

    /// Snippet text, capped by the source.
    pub text: String,

    /// File path, URL or `path:line` reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Attached documentation (docstring, summary).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,

    /// Code signature when the item is a symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Source-local relevance in [0, 1].
    pub score: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub provenance: Provenance,
}

impl CandidateResult {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        source_kind: SourceKind,
        text: impl Into<String>,
        score: f32,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            source_kind,
            kind: ContentKind::Other,
            title: String::new(),
            text: text.into(),
            location: None,
            documentation: None,
            signature: None,
            score: clamp_unit(score),
            updated_at: None,
            provenance: Provenance::Vector,
        }
    }

    pub fn with_kind(mut self, kind: ContentKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    pub fn with_documentation(mut self, doc: impl Into<String>) -> Self {
        self.documentation = Some(doc.into());
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }
}

/// Clamp to [0, 1], mapping NaN to 0.
pub fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

/// A knowledge source that can be searched independently of all others.
#[async_trait]
pub trait SourceRetriever: Send + Sync {
    /// Source name (used in logs and on every candidate).
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Return at most `limit` candidates, ordered by score descending.
    /// An empty corpus yields `Ok(vec![])`.
    async fn search(&self, text: &str, limit: usize) -> Result<Vec<CandidateResult>, RetrievalError>;
}
