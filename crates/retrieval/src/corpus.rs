//! In-memory corpora backing the built-in knowledge sources.
//!
//! A corpus is loaded from a JSON Lines file (one `CorpusItem` per line)
//! and held behind a `RwLock` so embeddings can be filled in after load.

use chrono::{DateTime, Utc};
use cinder_core::error::RetrievalError;
use cinder_core::{ContentKind, EmbeddingBackend};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// One searchable unit: a symbol, a document chunk or a conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusItem {
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub kind: ContentKind,

    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl CorpusItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind: ContentKind::Other,
            text: text.into(),
            location: None,
            documentation: None,
            signature: None,
            updated_at: None,
            embedding: None,
        }
    }

    pub fn with_kind(mut self, kind: ContentKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_documentation(mut self, doc: impl Into<String>) -> Self {
        self.documentation = Some(doc.into());
        self
    }

    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Text used for embedding and lexical matching.
    pub fn searchable_text(&self) -> String {
        let mut out = String::with_capacity(self.title.len() + self.text.len() + 1);
        out.push_str(&self.title);
        if let Some(sig) = &self.signature {
            out.push(' ');
            out.push_str(sig);
        }
        if let Some(doc) = &self.documentation {
            out.push(' ');
            out.push_str(doc);
        }
        out.push(' ');
        out.push_str(&self.text);
        out
    }
}

/// A shared, growable collection of items.
#[derive(Clone, Default)]
pub struct Corpus {
    items: Arc<RwLock<Vec<CorpusItem>>>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<CorpusItem>) -> Self {
        Self {
            items: Arc::new(RwLock::new(items)),
        }
    }

    /// Load a JSON Lines file. Corrupt lines are skipped with a warning;
    /// an unreadable file is an error.
    pub async fn load_jsonl(path: &Path) -> Result<Self, RetrievalError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RetrievalError::Corpus(format!("{}: {e}", path.display())))?;
        let items = parse_jsonl(&content);
        debug!(path = %path.display(), count = items.len(), "Corpus loaded");
        Ok(Self::from_items(items))
    }

    pub async fn insert(&self, item: CorpusItem) {
        self.items.write().await.push(item);
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Run `f` over the items under the read lock.
    pub async fn with_items<R>(&self, f: impl FnOnce(&[CorpusItem]) -> R) -> R {
        let items = self.items.read().await;
        f(&items)
    }

    /// Compute embeddings for items that have none. Stops at the first
    /// backend failure and returns how many were embedded before it.
    pub async fn embed_missing(&self, backend: &dyn EmbeddingBackend) -> (usize, Option<String>) {
        let pending: Vec<(usize, String)> = self
            .with_items(|items| {
                items
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| item.embedding.is_none())
                    .map(|(i, item)| (i, item.searchable_text()))
                    .collect()
            })
            .await;

        let mut embedded = 0;
        for (index, text) in pending {
            match backend.embed(&text).await {
                Ok(vector) => {
                    let mut items = self.items.write().await;
                    if let Some(item) = items.get_mut(index) {
                        item.embedding = Some(vector);
                        embedded += 1;
                    }
                }
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, embedded, "Embedding backfill stopped");
                    return (embedded, Some(e.to_string()));
                }
            }
        }
        (embedded, None)
    }
}

fn parse_jsonl(content: &str) -> Vec<CorpusItem> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<CorpusItem>(line) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(error = %e, "Skipping corrupted corpus line");
                None
            }
        })
        .collect()
}
