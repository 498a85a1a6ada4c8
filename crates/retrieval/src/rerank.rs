//! Multi-factor reranking of candidates from every source and sub-query.
//!
//! ```text
//! base  = 0.35 semantic + 0.20 keyword + 0.15 kind
//!       + 0.10 quality  + 0.10 name    + 0.10 recency
//! final = source_weight(query_type, source_kind) * base
//! ```
//!
//! Weights come from the per-query-type scorer profile in
//! [`RerankConfig`]. Ties on `final_score` are broken by source priority
//! for the query type, then recency (newer first, unknown last), then id.

use crate::keyword::KeywordMatcher;
use crate::SourceBatch;
use chrono::{DateTime, Utc};
use cinder_config::{RerankConfig, ScoringWeights};
use cinder_core::{clamp_unit, CandidateResult, ContentKind, QueryType, SourceKind};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

const UNKNOWN_RECENCY: f32 = 0.5;
const MIN_RECENCY: f32 = 0.1;
const SEMANTIC_FROM_KEYWORD: f32 = 0.8;

/// Per-factor scores, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SubScores {
    pub semantic: f32,
    pub keyword: f32,
    pub kind: f32,
    pub quality: f32,
    pub name: f32,
    pub recency: f32,
}

impl SubScores {
    pub fn weighted(&self, w: &ScoringWeights) -> f32 {
        w.semantic * self.semantic
            + w.keyword * self.keyword
            + w.kind * self.kind
            + w.quality * self.quality
            + w.name * self.name
            + w.recency * self.recency
    }
}

/// A candidate with the scores that placed it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredResult {
    pub candidate: CandidateResult,
    pub scores: SubScores,
    /// Weighted sum of the sub-scores.
    pub base_score: f32,
    pub source_weight: f32,
    pub final_score: f32,
}

pub struct Reranker {
    config: RerankConfig,
    matcher: KeywordMatcher,
}

impl Default for Reranker {
    fn default() -> Self {
        Self::new(RerankConfig::default())
    }
}

impl Reranker {
    pub fn new(config: RerankConfig) -> Self {
        Self {
            config,
            matcher: KeywordMatcher::new(),
        }
    }

    pub fn config(&self) -> &RerankConfig {
        &self.config
    }

    pub fn rerank(&self, query: &str, batches: &[SourceBatch], query_type: QueryType) -> Vec<ScoredResult> {
        self.rerank_at(query, batches, query_type, Utc::now())
    }

    /// [`Reranker::rerank`] with a fixed clock for recency.
    pub fn rerank_at(
        &self,
        query: &str,
        batches: &[SourceBatch],
        query_type: QueryType,
        now: DateTime<Utc>,
    ) -> Vec<ScoredResult> {
        let weights = self.config.weights_for(query_type);
        let source_weights = self.config.source_weights_for(query_type);
        let priority = source_weights.priority_order();
        let query_tokens: BTreeSet<String> = self.matcher.tokenize(query).into_iter().collect();
        let query_lower = query.trim().to_lowercase();

        let candidates = dedupe(batches);
        let total = candidates.len();

        let mut scored: Vec<ScoredResult> = candidates
            .into_iter()
            .map(|candidate| {
                let scores = self.score(&candidate, &query_tokens, &query_lower, now);
                let base_score = clamp_unit(scores.weighted(&weights));
                let source_weight = clamp_unit(source_weights.for_kind(candidate.source_kind));
                ScoredResult {
                    final_score: base_score * source_weight,
                    candidate,
                    scores,
                    base_score,
                    source_weight,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.final_score
                .total_cmp(&a.final_score)
                .then_with(|| rank_of(&priority, a.candidate.source_kind).cmp(&rank_of(&priority, b.candidate.source_kind)))
                .then_with(|| newer_first(a.candidate.updated_at, b.candidate.updated_at))
                .then_with(|| a.candidate.id.cmp(&b.candidate.id))
        });

        debug!(
            query_type = %query_type,
            sources = batches.len(),
            candidates = total,
            "Reranked candidates"
        );
        scored
    }

    fn score(
        &self,
        c: &CandidateResult,
        query_tokens: &BTreeSet<String>,
        query_lower: &str,
        now: DateTime<Utc>,
    ) -> SubScores {
        let haystack = [
            c.title.as_str(),
            c.text.as_str(),
            c.documentation.as_deref().unwrap_or(""),
            c.signature.as_deref().unwrap_or(""),
        ]
        .join(" ");
        let text_tokens: BTreeSet<String> = self.matcher.tokenize(&haystack).into_iter().collect();
        let keyword = self.matcher.score_tokens(query_tokens, &text_tokens);

        let semantic = if c.score > 0.0 { c.score } else { keyword * SEMANTIC_FROM_KEYWORD };

        SubScores {
            semantic: clamp_unit(semantic),
            keyword: clamp_unit(keyword),
            kind: c.kind.priority(),
            quality: documentation_quality(c),
            name: self.name_match(&c.title, query_tokens, query_lower),
            recency: self.recency(c.updated_at, now),
        }
    }

    fn name_match(&self, title: &str, query_tokens: &BTreeSet<String>, query_lower: &str) -> f32 {
        let title = title.trim().to_lowercase();
        if title.is_empty() || query_lower.is_empty() {
            return 0.0;
        }
        if title == query_lower {
            return 1.0;
        }
        if title.contains(query_lower) {
            return 0.8;
        }
        if query_lower.contains(&title) {
            return 0.6;
        }
        if query_tokens.is_empty() {
            return 0.0;
        }
        let title_tokens: BTreeSet<String> = self.matcher.tokenize(&title).into_iter().collect();
        let overlap = query_tokens.intersection(&title_tokens).count();
        clamp_unit(overlap as f32 / query_tokens.len() as f32)
    }

    fn recency(&self, updated_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f32 {
        let Some(at) = updated_at else {
            return UNKNOWN_RECENCY;
        };
        let half_life = self.config.recency_half_life_days;
        if half_life.is_nan() || half_life <= 0.0 {
            return UNKNOWN_RECENCY;
        }
        let age_days = ((now - at).num_seconds().max(0) as f64) / 86_400.0;
        (0.5f64.powf(age_days / half_life) as f32).clamp(MIN_RECENCY, 1.0)
    }
}

/// Explanatory text counts toward quality: attached docs for symbols,
/// the body itself for prose.
fn documentation_quality(c: &CandidateResult) -> f32 {
    let prose = matches!(
        c.kind,
        ContentKind::Markdown | ContentKind::Docstring | ContentKind::Fact | ContentKind::Message
    );
    let doc = match (&c.documentation, prose) {
        (Some(d), _) if !d.trim().is_empty() => d.as_str(),
        (_, true) => c.text.as_str(),
        _ => "",
    };

    let mut score = 0.3;
    let len = doc.trim().chars().count();
    if len > 0 {
        score += 0.3;
        for threshold in [50, 100, 200] {
            if len > threshold {
                score += 0.1;
            }
        }
        let lower = doc.to_lowercase();
        if ["param", "args:", "arguments", "returns", "return:", "-> "].iter().any(|m| lower.contains(m)) {
            score += 0.05;
        }
    }
    if c.signature.as_deref().is_some_and(|s| s.contains(':') || s.contains("->")) {
        score += 0.05;
    }
    clamp_unit(score)
}

/// Merge all batches, keeping the highest-scoring copy of each id.
/// On equal scores the copy seen first wins.
fn dedupe(batches: &[SourceBatch]) -> Vec<CandidateResult> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut out: Vec<CandidateResult> = Vec::new();
    for candidate in batches.iter().flat_map(|b| b.candidates.iter()) {
        match index.get(candidate.id.as_str()) {
            Some(&i) => {
                if candidate.score > out[i].score {
                    out[i] = candidate.clone();
                }
            }
            None => {
                index.insert(candidate.id.as_str(), out.len());
                out.push(candidate.clone());
            }
        }
    }
    out
}

fn rank_of(priority: &[SourceKind; 3], kind: SourceKind) -> usize {
    priority.iter().position(|k| *k == kind).unwrap_or(priority.len())
}

fn newer_first(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn batch(source: &str, kind: SourceKind, candidates: Vec<CandidateResult>) -> SourceBatch {
        SourceBatch {
            source: source.into(),
            kind,
            candidates,
        }
    }

    fn code(id: &str, text: &str, score: f32) -> CandidateResult {
        CandidateResult::new(id, "code", SourceKind::Code, text, score).with_kind(ContentKind::Function)
    }

    fn doc(id: &str, text: &str, score: f32) -> CandidateResult {
        CandidateResult::new(id, "docs", SourceKind::Document, text, score).with_kind(ContentKind::Markdown)
    }

    #[test]
    fn empty_input_gives_empty_output() {
        let r = Reranker::default();
        assert!(r.rerank_at("anything", &[], QueryType::Chat, now()).is_empty());
    }

    #[test]
    fn sorted_by_final_score() {
        let r = Reranker::default();
        let batches = vec![batch(
            "code",
            SourceKind::Code,
            vec![code("weak", "unrelated body", 0.1), code("strong", "fn login handler", 0.9)],
        )];
        let out = r.rerank_at("login handler", &batches, QueryType::Code, now());
        assert_eq!(out[0].candidate.id, "strong");
        assert!(out.windows(2).all(|w| w[0].final_score >= w[1].final_score));
    }

    #[test]
    fn final_score_is_weighted_sum_times_source_weight() {
        let r = Reranker::default();
        let batches = vec![batch("code", SourceKind::Code, vec![code("a", "parse tokens", 0.7)])];
        let out = r.rerank_at("parse", &batches, QueryType::Code, now());
        let s = &out[0];
        let expected = s.scores.weighted(&ScoringWeights::default());
        assert!((s.base_score - expected).abs() < 1e-6);
        assert_eq!(s.source_weight, 0.6);
        assert!((s.final_score - expected * 0.6).abs() < 1e-6);
        for v in [s.scores.semantic, s.scores.keyword, s.scores.kind, s.scores.quality, s.scores.name, s.scores.recency] {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn dedupes_keeping_highest_score() {
        let r = Reranker::default();
        let batches = vec![
            batch("code", SourceKind::Code, vec![code("dup", "fn a", 0.3)]),
            batch("code2", SourceKind::Code, vec![code("dup", "fn a", 0.8)]),
        ];
        let out = r.rerank_at("a", &batches, QueryType::Code, now());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].candidate.score, 0.8);
    }

    #[test]
    fn code_query_prefers_code_source() {
        let r = Reranker::default();
        let batches = vec![
            batch("docs", SourceKind::Document, vec![doc("d", "session tokens", 0.8)]),
            batch("code", SourceKind::Code, vec![code("c", "session tokens", 0.8).with_kind(ContentKind::Markdown)]),
        ];
        let out = r.rerank_at("session tokens", &batches, QueryType::Code, now());
        assert_eq!(out[0].candidate.id, "c");

        let out = r.rerank_at("session tokens", &batches, QueryType::Chat, now());
        assert_eq!(out[0].candidate.id, "d");
    }

    #[test]
    fn ties_break_by_recency_then_id() {
        let r = Reranker::new(RerankConfig {
            recency_half_life_days: 30.0,
            ..RerankConfig::default()
        });
        // Both unknown recency and identical content: id decides.
        let batches = vec![batch(
            "code",
            SourceKind::Code,
            vec![code("b", "same", 0.5), code("a", "same", 0.5)],
        )];
        let out = r.rerank_at("q", &batches, QueryType::Code, now());
        assert_eq!(out[0].candidate.id, "a");
        assert_eq!(out[0].final_score, out[1].final_score);

        assert_eq!(newer_first(Some(now()), None), Ordering::Less);
        assert_eq!(newer_first(Some(now()), Some(now() - Duration::days(1))), Ordering::Less);
    }

    #[test]
    fn recency_decays_by_half_life() {
        let r = Reranker::default();
        let n = now();
        assert_eq!(r.recency(Some(n), n), 1.0);
        assert!((r.recency(Some(n - Duration::days(30)), n) - 0.5).abs() < 1e-4);
        assert_eq!(r.recency(Some(n - Duration::days(3650)), n), MIN_RECENCY);
        assert_eq!(r.recency(None, n), UNKNOWN_RECENCY);
        // Future timestamps count as brand new.
        assert_eq!(r.recency(Some(n + Duration::days(2)), n), 1.0);
    }

    #[test]
    fn name_match_levels() {
        let r = Reranker::default();
        let tokens = |q: &str| -> BTreeSet<String> { KeywordMatcher::new().tokenize(q).into_iter().collect() };
        assert_eq!(r.name_match("Parser", &tokens("parser"), "parser"), 1.0);
        assert_eq!(r.name_match("TokenParser", &tokens("parser"), "parser"), 0.8);
        assert_eq!(r.name_match("parse", &tokens("parse headers"), "parse headers"), 0.6);
        assert_eq!(r.name_match("", &tokens("x"), "x"), 0.0);
        assert_eq!(r.name_match("header_map", &tokens("http header"), "http header"), 0.5);
    }

    #[test]
    fn documentation_quality_rewards_docs() {
        let bare = code("a", "fn a()", 0.5);
        assert!((documentation_quality(&bare) - 0.3).abs() < 1e-6);

        let mut documented = code("b", "fn b(x: u32) -> u32", 0.5).with_documentation(
            "Doubles the input value and returns it. Args: x, the number to double. \
             This is used by the scheduler when computing backoff intervals for retries \
             across every queue in the system, so keep it cheap and pure.",
        );
        documented.signature = Some("fn b(x: u32) -> u32".into());
        assert!((documentation_quality(&documented) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_source_score_falls_back_to_keyword() {
        let r = Reranker::default();
        let batches = vec![batch("code", SourceKind::Code, vec![code("a", "login handler", 0.0)])];
        let out = r.rerank_at("login handler", &batches, QueryType::Code, now());
        assert!((out[0].scores.semantic - out[0].scores.keyword * 0.8).abs() < 1e-6);
        assert!(out[0].scores.semantic > 0.0);
    }

    #[test]
    fn rerank_is_deterministic() {
        let r = Reranker::default();
        let batches = vec![
            batch(
                "code",
                SourceKind::Code,
                vec![code("a", "auth", 0.5), code("b", "logging", 0.5)],
            ),
            batch(
                "memory",
                SourceKind::Episodic,
                vec![CandidateResult::new("m", "memory", SourceKind::Episodic, "auth talk", 0.5)
                    .with_updated_at(now() - Duration::days(2))],
            ),
        ];
        let first = r.rerank_at("auth logging", &batches, QueryType::Chat, now());
        let second = r.rerank_at("auth logging", &batches, QueryType::Chat, now());
        assert_eq!(first, second);
    }
}
