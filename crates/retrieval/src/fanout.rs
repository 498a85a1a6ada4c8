//! Parallel retrieval across sources and sub-queries.
//!
//! Every (source, sub-query) pair is one job. Jobs run on a bounded
//! `buffer_unordered` pool, each under its own timeout, and all of them
//! stop early when the request's cancellation token fires. A failing or
//! slow source only loses its own results.

use cinder_core::error::RetrievalError;
use cinder_core::{CandidateResult, SourceKind, SourceRetriever, SubQuery};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Merged results of one source across all sub-queries.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source: String,
    pub kind: SourceKind,
    /// Deduplicated by id, score descending.
    pub candidates: Vec<CandidateResult>,
}

/// A (source, sub-query) job that contributed nothing.
#[derive(Debug, Clone)]
pub struct SourceFailure {
    pub source: String,
    pub sub_query: String,
    pub error: RetrievalError,
}

#[derive(Debug, Clone, Default)]
pub struct FanoutOutcome {
    /// One batch per source that answered at least once, in registration order.
    pub batches: Vec<SourceBatch>,
    pub failures: Vec<SourceFailure>,
}

impl FanoutOutcome {
    pub fn total_candidates(&self) -> usize {
        self.batches.iter().map(|b| b.candidates.len()).sum()
    }
}

/// Bounded parallel search over a fixed set of sources.
pub struct RetrievalFanout {
    sources: Vec<Arc<dyn SourceRetriever>>,
    max_concurrency: usize,
    per_source_timeout: Duration,
    per_query_limit: usize,
}

impl RetrievalFanout {
    pub fn new(sources: Vec<Arc<dyn SourceRetriever>>) -> Self {
        Self {
            sources,
            max_concurrency: 4,
            per_source_timeout: Duration::from_secs(2),
            per_query_limit: 10,
        }
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_source_timeout = timeout;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.per_query_limit = limit;
        self
    }

    pub fn sources(&self) -> &[Arc<dyn SourceRetriever>] {
        &self.sources
    }

    /// Search every source for every sub-query.
    ///
    /// Only cancellation is an error; source failures are reported in
    /// `FanoutOutcome::failures`.
    pub async fn gather(
        &self,
        sub_queries: &[SubQuery],
        cancel: &CancellationToken,
    ) -> Result<FanoutOutcome, RetrievalError> {
        if cancel.is_cancelled() {
            return Err(RetrievalError::Cancelled);
        }

        let timeout = self.per_source_timeout;
        let limit = self.per_query_limit;
        let jobs: Vec<(usize, Arc<dyn SourceRetriever + 'static>, String)> = self
            .sources
            .iter()
            .enumerate()
            .flat_map(|(si, source)| {
                sub_queries
                    .iter()
                    .map(move |q| (si, Arc::clone(source), q.text.clone()))
            })
            .collect();

        let futures: Vec<_> = jobs
            .into_iter()
            .map(|(si, source, text)| {
                let cancel = cancel.clone();
                async move {
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(RetrievalError::Cancelled),
                        r = tokio::time::timeout(timeout, source.search(&text, limit)) => match r {
                            Ok(r) => r,
                            Err(_) => Err(RetrievalError::Timeout {
                                source_name: source.name().to_string(),
                                timeout_ms: timeout.as_millis() as u64,
                            }),
                        },
                    };
                    (si, text, result)
                }
            })
            .collect();

        let results: Vec<(usize, String, Result<Vec<CandidateResult>, RetrievalError>)> = stream::iter(futures)
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        if cancel.is_cancelled() {
            debug!("Retrieval cancelled");
            return Err(RetrievalError::Cancelled);
        }

        let mut per_source: HashMap<usize, HashMap<String, CandidateResult>> = HashMap::new();
        let mut failures = Vec::new();

        for (si, sub_query, result) in results {
            let source_name = self.sources[si].name().to_string();
            match result {
                Ok(candidates) => {
                    let merged = per_source.entry(si).or_default();
                    for c in candidates {
                        match merged.get(&c.id) {
                            Some(existing) if existing.score >= c.score => {}
                            _ => {
                                merged.insert(c.id.clone(), c);
                            }
                        }
                    }
                }
                Err(error) => {
                    warn!(source = %source_name, sub_query = %sub_query, error = %error, "Source failed, contributing no results");
                    failures.push(SourceFailure {
                        source: source_name,
                        sub_query,
                        error,
                    });
                }
            }
        }

        failures.sort_by(|a, b| a.source.cmp(&b.source).then_with(|| a.sub_query.cmp(&b.sub_query)));

        let batches = self
            .sources
            .iter()
            .enumerate()
            .filter_map(|(si, source)| {
                let merged = per_source.remove(&si)?;
                let mut candidates: Vec<CandidateResult> = merged.into_values().collect();
                candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
                Some(SourceBatch {
                    source: source.name().to_string(),
                    kind: source.kind(),
                    candidates,
                })
            })
            .collect::<Vec<_>>();

        debug!(
            sources = batches.len(),
            failures = failures.len(),
            candidates = batches.iter().map(|b| b.candidates.len()).sum::<usize>(),
            "Retrieval fan-out complete"
        );

        Ok(FanoutOutcome { batches, failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSource {
        name: &'static str,
        kind: SourceKind,
        hits: Vec<(&'static str, f32)>,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn new(name: &'static str, kind: SourceKind, hits: Vec<(&'static str, f32)>) -> Self {
            Self {
                name,
                kind,
                hits,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SourceRetriever for StubSource {
        fn name(&self) -> &str {
            self.name
        }
        fn kind(&self) -> SourceKind {
            self.kind
        }
        async fn search(&self, text: &str, limit: usize) -> Result<Vec<CandidateResult>, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let bonus = if text.contains("logging") { 0.1 } else { 0.0 };
            Ok(self
                .hits
                .iter()
                .take(limit)
                .map(|(id, score)| CandidateResult::new(*id, self.name, self.kind, format!("{id} text"), score + bonus))
                .collect())
        }
    }

    struct HangingSource;

    #[async_trait]
    impl SourceRetriever for HangingSource {
        fn name(&self) -> &str {
            "hanging"
        }
        fn kind(&self) -> SourceKind {
            SourceKind::Document
        }
        async fn search(&self, _text: &str, _limit: usize) -> Result<Vec<CandidateResult>, RetrievalError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl SourceRetriever for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }
        fn kind(&self) -> SourceKind {
            SourceKind::Episodic
        }
        async fn search(&self, _text: &str, _limit: usize) -> Result<Vec<CandidateResult>, RetrievalError> {
            Err(RetrievalError::SourceUnavailable {
                source_name: "broken".into(),
                reason: "index locked".into(),
            })
        }
    }

    fn queries(texts: &[&str]) -> Vec<SubQuery> {
        texts.iter().map(|t| SubQuery::atomic(*t)).collect()
    }

    #[tokio::test]
    async fn merges_sub_queries_keeping_best_score() {
        let code = Arc::new(StubSource::new("code", SourceKind::Code, vec![("a", 0.5), ("b", 0.4)]));
        let fanout = RetrievalFanout::new(vec![code.clone()]);
        let outcome = fanout
            .gather(&queries(&["auth handlers", "logging handlers"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(code.calls.load(Ordering::SeqCst), 2);
        let batch = &outcome.batches[0];
        assert_eq!(batch.candidates.len(), 2);
        assert_eq!(batch.candidates[0].id, "a");
        assert!((batch.candidates[0].score - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn timed_out_source_contributes_nothing() {
        let fanout = RetrievalFanout::new(vec![
            Arc::new(StubSource::new("code", SourceKind::Code, vec![("a", 0.9)])),
            Arc::new(HangingSource),
            Arc::new(StubSource::new("notes", SourceKind::Episodic, vec![("n", 0.7)])),
        ])
        .with_timeout(Duration::from_millis(50));

        let outcome = fanout
            .gather(&queries(&["auth"]), &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<&str> = outcome.batches.iter().map(|b| b.source.as_str()).collect();
        assert_eq!(names, vec!["code", "notes"]);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(outcome.failures[0].error, RetrievalError::Timeout { .. }));
    }

    #[tokio::test]
    async fn erroring_source_is_isolated() {
        let fanout = RetrievalFanout::new(vec![
            Arc::new(BrokenSource),
            Arc::new(StubSource::new("code", SourceKind::Code, vec![("a", 0.9)])),
        ]);
        let outcome = fanout.gather(&queries(&["x"]), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.total_candidates(), 1);
        assert_eq!(outcome.failures[0].source, "broken");
    }

    #[tokio::test]
    async fn cancellation_stops_in_flight_work() {
        let fanout = RetrievalFanout::new(vec![Arc::new(HangingSource)]).with_timeout(Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = tokio::time::timeout(Duration::from_secs(5), fanout.gather(&queries(&["x"]), &cancel)).await;
        assert!(matches!(result, Ok(Err(RetrievalError::Cancelled))));
    }

    #[tokio::test]
    async fn already_cancelled_never_calls_sources() {
        let code = Arc::new(StubSource::new("code", SourceKind::Code, vec![("a", 0.9)]));
        let fanout = RetrievalFanout::new(vec![code.clone()]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(fanout.gather(&queries(&["x"]), &cancel).await.is_err());
        assert_eq!(code.calls.load(Ordering::SeqCst), 0);
    }
}
