//! Property tests for decomposition and reranking.

use chrono::{Duration, TimeZone, Utc};
use cinder_core::{CandidateResult, ContentKind, QueryType, SourceKind};
use cinder_retrieval::{QueryDecomposer, Reranker, SourceBatch};
use proptest::prelude::*;

const VOCAB: &[&str] = &[
    "auth", "and", "or", "logging", "handlers", "how", "what", "database", "cache", "python", "files", "for",
    "parser", "plus", "session", ",", "?", "works", "the", "api", "token", "as", "well",
];

fn query() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(VOCAB), 0..12).prop_map(|words| words.join(" "))
}

fn query_type() -> impl Strategy<Value = QueryType> {
    prop::sample::select(QueryType::ALL.to_vec())
}

fn candidate() -> impl Strategy<Value = CandidateResult> {
    (
        0u8..12,
        prop::sample::select(SourceKind::ALL.to_vec()),
        prop::sample::select(VOCAB),
        0.0f32..1.0,
        prop::option::of(0i64..400),
    )
        .prop_map(|(id, kind, word, score, age)| {
            let mut c = CandidateResult::new(format!("item-{id}"), kind.to_string(), kind, format!("{word} body"), score)
                .with_kind(ContentKind::Function)
                .with_title(word);
            if let Some(days) = age {
                c = c.with_updated_at(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() - Duration::days(days));
            }
            c
        })
}

fn batches() -> impl Strategy<Value = Vec<SourceBatch>> {
    prop::collection::vec(
        (prop::sample::select(SourceKind::ALL.to_vec()), prop::collection::vec(candidate(), 0..6)),
        0..4,
    )
    .prop_map(|groups| {
        groups
            .into_iter()
            .enumerate()
            .map(|(i, (kind, candidates))| SourceBatch {
                source: format!("source-{i}"),
                kind,
                candidates,
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn decomposition_never_empty(q in query()) {
        let result = QueryDecomposer::default().decompose(&q);
        prop_assert!(!result.sub_queries.is_empty());
        prop_assert!(result.sub_queries.len() <= 5);
        prop_assert_eq!(result.is_complex, result.sub_queries.len() > 1);
        for sub in &result.sub_queries {
            prop_assert!((0.0..=1.0).contains(&sub.confidence));
        }
    }

    #[test]
    fn simple_sub_queries_are_fixed_points(q in query()) {
        let d = QueryDecomposer::default();
        for sub in d.decompose(&q).sub_queries {
            let again = d.decompose(&sub.text);
            if !again.is_complex {
                prop_assert_eq!(again.texts(), vec![sub.text.as_str()]);
                let third = d.decompose(&again.sub_queries[0].text);
                prop_assert_eq!(third, again);
            }
        }
    }

    #[test]
    fn rerank_is_deterministic(q in query(), qt in query_type(), input in batches()) {
        let r = Reranker::default();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let first = r.rerank_at(&q, &input, qt, now);
        let second = r.rerank_at(&q, &input, qt, now);
        prop_assert_eq!(&first, &second);

        let mut ids: Vec<&str> = first.iter().map(|s| s.candidate.id.as_str()).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), total);

        for pair in first.windows(2) {
            prop_assert!(pair[0].final_score >= pair[1].final_score);
        }
        for s in &first {
            prop_assert!((0.0..=1.0).contains(&s.final_score));
        }
    }
}
