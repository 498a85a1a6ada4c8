//! Retrieval fan-out, knowledge sources and decomposition settings.

use cinder_core::SourceKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Worker pool size for parallel source lookups
    #[serde(default = "default_max_concurrent_sources")]
    pub max_concurrent_sources: usize,

    /// Per-source, per-sub-query timeout
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,

    /// Results requested from each source for each sub-query
    #[serde(default = "default_per_query_limit")]
    pub per_query_limit: usize,

    /// Cap on a single item's text, in characters
    #[serde(default = "default_max_item_chars")]
    pub max_item_chars: usize,

    /// Multiplier applied to lexical-fallback scores
    #[serde(default = "default_lexical_discount")]
    pub lexical_discount: f32,

    /// Knowledge sources loaded at startup
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub decomposition: DecompositionConfig,
}

/// One knowledge source backed by a JSON Lines corpus file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Strategies below this confidence fall back to the atomic query
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    #[serde(default = "default_max_sub_queries")]
    pub max_sub_queries: usize,

    /// Fragments shorter than this are discarded
    #[serde(default = "default_min_sub_query_chars")]
    pub min_sub_query_chars: usize,
}

fn default_max_concurrent_sources() -> usize {
    4
}
fn default_source_timeout_ms() -> u64 {
    2000
}
fn default_per_query_limit() -> usize {
    10
}
fn default_max_item_chars() -> usize {
    4000
}
fn default_lexical_discount() -> f32 {
    0.8
}
fn default_true() -> bool {
    true
}
fn default_min_confidence() -> f32 {
    0.6
}
fn default_max_sub_queries() -> usize {
    5
}
fn default_min_sub_query_chars() -> usize {
    3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sources: default_max_concurrent_sources(),
            source_timeout_ms: default_source_timeout_ms(),
            per_query_limit: default_per_query_limit(),
            max_item_chars: default_max_item_chars(),
            lexical_discount: default_lexical_discount(),
            sources: vec![],
            decomposition: DecompositionConfig::default(),
        }
    }
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: default_min_confidence(),
            max_sub_queries: default_max_sub_queries(),
            min_sub_query_chars: default_min_sub_query_chars(),
        }
    }
}

impl RetrievalConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_sources == 0 {
            return Err("retrieval: max_concurrent_sources must be >= 1".into());
        }
        if self.source_timeout_ms == 0 {
            return Err("retrieval: source_timeout_ms must be > 0".into());
        }
        if self.per_query_limit == 0 || self.max_item_chars == 0 {
            return Err("retrieval: per_query_limit and max_item_chars must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.lexical_discount) {
            return Err("retrieval: lexical_discount must be within [0, 1]".into());
        }
        let d = &self.decomposition;
        if !(0.0..=1.0).contains(&d.min_confidence) {
            return Err("retrieval.decomposition: min_confidence must be within [0, 1]".into());
        }
        if d.max_sub_queries == 0 {
            return Err("retrieval.decomposition: max_sub_queries must be >= 1".into());
        }
        let mut names: Vec<&str> = self.sources.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err("retrieval: source names must be unique".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(RetrievalConfig::default().validate().is_ok());
    }

    #[test]
    fn duplicate_source_names_rejected() {
        let source = SourceConfig {
            name: "code".into(),
            kind: SourceKind::Code,
            path: "a.jsonl".into(),
        };
        let config = RetrievalConfig {
            sources: vec![source.clone(), source],
            ..RetrievalConfig::default()
        };
        assert!(config.validate().unwrap_err().contains("unique"));
    }

    #[test]
    fn discount_out_of_range_rejected() {
        let config = RetrievalConfig {
            lexical_discount: 1.5,
            ..RetrievalConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
