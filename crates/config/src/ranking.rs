//! Reranker weights.

use cinder_core::{QueryType, SourceKind};
use serde::{Deserialize, Serialize};

use crate::per_query::PerQueryType;

/// Factor weights of the composite score. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub semantic: f32,
    pub keyword: f32,
    pub kind: f32,
    pub quality: f32,
    pub name: f32,
    pub recency: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            semantic: 0.35,
            keyword: 0.20,
            kind: 0.15,
            quality: 0.10,
            name: 0.10,
            recency: 0.10,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f32 {
        self.semantic + self.keyword + self.kind + self.quality + self.name + self.recency
    }

    fn validate(&self) -> Result<(), String> {
        let all = [self.semantic, self.keyword, self.kind, self.quality, self.name, self.recency];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("rerank: weights must be finite and >= 0".into());
        }
        if (self.sum() - 1.0).abs() > 1e-3 {
            return Err(format!("rerank: weights must sum to 1.0 (got {:.3})", self.sum()));
        }
        Ok(())
    }
}

/// Source-type multipliers for one query type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceWeights {
    pub code: f32,
    pub document: f32,
    pub episodic: f32,
}

impl SourceWeights {
    pub const fn new(code: f32, document: f32, episodic: f32) -> Self {
        Self {
            code,
            document,
            episodic,
        }
    }

    pub fn for_kind(&self, kind: SourceKind) -> f32 {
        match kind {
            SourceKind::Code => self.code,
            SourceKind::Document => self.document,
            SourceKind::Episodic => self.episodic,
        }
    }

    /// Source kinds from highest to lowest weight; equal weights keep
    /// the code, document, episodic order.
    pub fn priority_order(&self) -> [SourceKind; 3] {
        let mut kinds = SourceKind::ALL;
        kinds.sort_by(|a, b| self.for_kind(*b).total_cmp(&self.for_kind(*a)).then(a.cmp(b)));
        kinds
    }
}

fn default_source_weights() -> PerQueryType<SourceWeights> {
    PerQueryType {
        chat: SourceWeights::new(0.4, 0.5, 0.6),
        code: SourceWeights::new(0.6, 0.4, 0.4),
        recall: SourceWeights::new(0.3, 0.4, 0.7),
        reasoning: SourceWeights::new(0.5, 0.5, 0.4),
        roleplay: SourceWeights::new(0.2, 0.3, 0.7),
        project: SourceWeights::new(0.55, 0.45, 0.4),
    }
}

fn default_profiles() -> PerQueryType<ScoringWeights> {
    PerQueryType::uniform(ScoringWeights::default())
}

fn default_half_life_days() -> f64 {
    30.0
}

fn default_max_evidence_items() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Scorer profile per query type
    #[serde(default = "default_profiles")]
    pub profiles: PerQueryType<ScoringWeights>,

    /// Source-type multiplier per query type
    #[serde(default = "default_source_weights")]
    pub source_weights: PerQueryType<SourceWeights>,

    /// Recency half-life for exponential decay
    #[serde(default = "default_half_life_days")]
    pub recency_half_life_days: f64,

    /// How many reranked results are offered to the context budget
    #[serde(default = "default_max_evidence_items")]
    pub max_evidence_items: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            profiles: default_profiles(),
            source_weights: default_source_weights(),
            recency_half_life_days: default_half_life_days(),
            max_evidence_items: default_max_evidence_items(),
        }
    }
}

impl RerankConfig {
    pub fn weights_for(&self, query_type: QueryType) -> ScoringWeights {
        self.profiles.get(query_type)
    }

    pub fn source_weights_for(&self, query_type: QueryType) -> SourceWeights {
        self.source_weights.get(query_type)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        for (query_type, weights) in self.profiles.iter() {
            weights
                .validate()
                .map_err(|e| format!("{e} for query type {query_type}"))?;
        }
        for (query_type, w) in self.source_weights.iter() {
            if [w.code, w.document, w.episodic]
                .iter()
                .any(|v| !(0.0..=1.0).contains(v))
            {
                return Err(format!("rerank: source weights for {query_type} must be within [0, 1]"));
            }
        }
        if !(self.recency_half_life_days.is_finite() && self.recency_half_life_days > 0.0) {
            return Err("rerank: recency_half_life_days must be > 0".into());
        }
        Ok(())
    }
}
