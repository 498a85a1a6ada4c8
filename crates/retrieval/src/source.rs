//! Built-in knowledge sources over an in-memory `Corpus`.
//!
//! The primary path embeds the query and ranks items by cosine
//! similarity. When no embedding backend is configured, or it fails, the
//! source falls back to keyword matching over the same items and marks
//! the results `Provenance::Lexical` with a discounted score.

use async_trait::async_trait;
use cinder_core::error::RetrievalError;
use cinder_core::{CandidateResult, EmbeddingBackend, Provenance, SourceKind, SourceRetriever};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::corpus::{Corpus, CorpusItem};
use crate::keyword::{KeywordMatcher, truncate_bytes};
use crate::vector::vector_search;

const TRUNCATION_MARKER: &str = "...";

/// Tunables shared by all built-in sources.
#[derive(Debug, Clone, Copy)]
pub struct SourceOptions {
    /// Cap on returned item text, in characters
    pub max_item_chars: usize,
    /// Multiplier applied to lexical scores
    pub lexical_discount: f32,
    /// Vector hits below this unit score are dropped
    pub min_vector_score: f32,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            max_item_chars: 4000,
            lexical_discount: 0.8,
            min_vector_score: 0.0,
        }
    }
}

/// A corpus-backed source of one knowledge kind.
pub struct IndexedSource {
    name: String,
    kind: SourceKind,
    corpus: Corpus,
    embedder: Option<Arc<dyn EmbeddingBackend>>,
    matcher: KeywordMatcher,
    options: SourceOptions,
}

impl IndexedSource {
    pub fn new(name: impl Into<String>, kind: SourceKind, corpus: Corpus) -> Self {
        Self {
            name: name.into(),
            kind,
            corpus,
            embedder: None,
            matcher: KeywordMatcher::new(),
            options: SourceOptions::default(),
        }
    }

    /// Source over indexed code symbols.
    pub fn code(name: impl Into<String>, corpus: Corpus) -> Self {
        Self::new(name, SourceKind::Code, corpus)
    }

    /// Source over prose documents (markdown, notes, manuals).
    pub fn documents(name: impl Into<String>, corpus: Corpus) -> Self {
        Self::new(name, SourceKind::Document, corpus)
    }

    /// Source over past conversation turns and remembered facts.
    pub fn episodic(name: impl Into<String>, corpus: Corpus) -> Self {
        Self::new(name, SourceKind::Episodic, corpus)
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_options(mut self, options: SourceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    fn candidate(&self, item: &CorpusItem, score: f32, provenance: Provenance) -> CandidateResult {
        let mut c = CandidateResult::new(
            item.id.clone(),
            self.name.clone(),
            self.kind,
            cap_text(&item.text, self.options.max_item_chars),
            score,
        )
        .with_kind(item.kind)
        .with_title(item.title.clone())
        .with_provenance(provenance);
        c.location = item.location.clone();
        c.documentation = item
            .documentation
            .as_deref()
            .map(|d| cap_text(d, self.options.max_item_chars));
        c.signature = item.signature.clone();
        c.updated_at = item.updated_at;
        c
    }

    async fn vector_path(&self, embedder: &dyn EmbeddingBackend, text: &str, limit: usize) -> Option<Vec<CandidateResult>> {
        let query_embedding = match embedder.embed(text).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => {
                warn!(source = %self.name, backend = embedder.name(), "Empty query embedding, using lexical fallback");
                return None;
            }
            Err(e) => {
                warn!(source = %self.name, backend = embedder.name(), error = %e, "Embedding unavailable, using lexical fallback");
                return None;
            }
        };

        let results = self
            .corpus
            .with_items(|items| {
                if !items.iter().any(|i| i.embedding.is_some()) {
                    return None;
                }
                Some(
                    vector_search(items, &query_embedding, limit, self.options.min_vector_score)
                        .into_iter()
                        .map(|(i, score)| self.candidate(&items[i], score, Provenance::Vector))
                        .collect::<Vec<_>>(),
                )
            })
            .await;

        if results.is_none() {
            debug!(source = %self.name, "Corpus has no embeddings, using lexical fallback");
        }
        results
    }

    async fn lexical_path(&self, text: &str, limit: usize) -> Vec<CandidateResult> {
        let query_tokens: BTreeSet<String> = self.matcher.tokenize(text).into_iter().collect();
        if query_tokens.is_empty() {
            return vec![];
        }
        let discount = self.options.lexical_discount;

        self.corpus
            .with_items(|items| {
                let mut scored: Vec<(usize, f32)> = items
                    .iter()
                    .enumerate()
                    .filter_map(|(i, item)| {
                        let item_tokens: BTreeSet<String> =
                            self.matcher.tokenize(&item.searchable_text()).into_iter().collect();
                        let score = self.matcher.score_tokens(&query_tokens, &item_tokens) * discount;
                        (score > 0.0).then_some((i, score))
                    })
                    .collect();
                scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| items[a.0].id.cmp(&items[b.0].id)));
                scored.truncate(limit);
                scored
                    .into_iter()
                    .map(|(i, score)| self.candidate(&items[i], score, Provenance::Lexical))
                    .collect()
            })
            .await
    }
}

#[async_trait]
impl SourceRetriever for IndexedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn search(&self, text: &str, limit: usize) -> Result<Vec<CandidateResult>, RetrievalError> {
        if limit == 0 || text.trim().is_empty() || self.corpus.is_empty().await {
            return Ok(vec![]);
        }

        if let Some(embedder) = &self.embedder {
            if let Some(results) = self.vector_path(embedder.as_ref(), text, limit).await {
                return Ok(results);
            }
        }
        Ok(self.lexical_path(text, limit).await)
    }
}

/// Cap `text` at `max_chars` characters, appending a marker when cut.
pub fn cap_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(TRUNCATION_MARKER.len());
    let cut = text.char_indices().nth(keep).map(|(i, _)| i).unwrap_or(text.len());
    let mut out = truncate_bytes(text, cut).to_string();
    out.push_str(TRUNCATION_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::ContentKind;
    use cinder_core::error::EmbeddingError;

    struct StaticEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingBackend for StaticEmbedder {
        fn name(&self) -> &str {
            "static"
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(self.0.clone())
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl EmbeddingBackend for DownEmbedder {
        fn name(&self) -> &str {
            "down"
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Unavailable("connection refused".into()))
        }
    }

    fn corpus() -> Corpus {
        Corpus::from_items(vec![
            CorpusItem::new("auth", "AuthHandler", "struct AuthHandler { tokens: Vec<Token> }")
                .with_kind(ContentKind::Struct)
                .with_embedding(vec![1.0, 0.0]),
            CorpusItem::new("log", "log_request", "fn log_request(req: &Request) { info!(...) }")
                .with_kind(ContentKind::Function)
                .with_embedding(vec![0.0, 1.0]),
        ])
    }

    #[tokio::test]
    async fn empty_corpus_returns_empty() {
        let source = IndexedSource::code("code", Corpus::new());
        assert!(source.search("anything", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn vector_path_ranks_by_similarity() {
        let source = IndexedSource::code("code", corpus()).with_embedder(Arc::new(StaticEmbedder(vec![1.0, 0.1])));
        let results = source.search("auth", 5).await.unwrap();
        assert_eq!(results[0].id, "auth");
        assert_eq!(results[0].provenance, Provenance::Vector);
        assert!(results[0].score >= results[1].score);
        assert_eq!(results[0].source, "code");
        assert_eq!(results[0].kind, ContentKind::Struct);
    }

    #[tokio::test]
    async fn embedder_failure_falls_back_to_lexical() {
        let source = IndexedSource::code("code", corpus()).with_embedder(Arc::new(DownEmbedder));
        let results = source.search("log request", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "log");
        assert_eq!(results[0].provenance, Provenance::Lexical);
        assert!(results[0].score <= 0.8);
    }

    #[tokio::test]
    async fn no_embedder_uses_lexical() {
        let source = IndexedSource::documents("docs", corpus());
        let results = source.search("AuthHandler tokens", 5).await.unwrap();
        assert_eq!(results[0].id, "auth");
        assert_eq!(results[0].provenance, Provenance::Lexical);
        assert_eq!(results[0].source_kind, SourceKind::Document);
    }

    #[tokio::test]
    async fn respects_limit() {
        let source = IndexedSource::code("code", corpus()).with_embedder(Arc::new(StaticEmbedder(vec![1.0, 1.0])));
        assert_eq!(source.search("x", 1).await.unwrap().len(), 1);
        assert!(source.search("x", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn caps_oversized_items() {
        let big = "word ".repeat(10_000);
        let corpus = Corpus::from_items(vec![CorpusItem::new("big", "word", big)]);
        let source = IndexedSource::documents("docs", corpus).with_options(SourceOptions {
            max_item_chars: 100,
            ..SourceOptions::default()
        });
        let results = source.search("word", 5).await.unwrap();
        assert_eq!(results[0].text.chars().count(), 100);
        assert!(results[0].text.ends_with("..."));
    }

    #[test]
    fn cap_text_respects_char_boundaries() {
        let text = "ééééééééééé";
        let capped = cap_text(text, 6);
        assert_eq!(capped, "ééé...");
        assert_eq!(cap_text("short", 10), "short");
    }
}
