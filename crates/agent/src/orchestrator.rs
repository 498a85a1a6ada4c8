//! The request orchestrator: admission, decomposition, retrieval,
//! reranking, budgeting, generation and escalation.
//!
//! ```text
//! RECEIVED ─▶ ADMITTED ─▶ DECOMPOSED ─▶ RETRIEVED ─▶ RERANKED ─▶ BUDGETED ─▶ GENERATING ─▶ DONE
//!     │                                                                          ├──────▶ ESCALATED
//!     └─▶ REJECTED (degraded response)                                           └──────▶ FAILED
//! ```
//!
//! One heavy-operation permit is taken at admission and held through
//! generation. It is released before any escalation call, so a slow
//! remote service never pins local capacity.

use crate::context::{
    ContextBudgetAllocator, ContextUsage, EvidenceItem, QueryClassifier, SectionContents,
};
use chrono::Utc;
use cinder_config::{AppConfig, OrchestratorConfig};
use cinder_core::error::{Error, GenerationError};
use cinder_core::{
    EscalationRequest, EscalationService, EventBus, Generation, GenerationEngine, GenerationRequest, ModelTier,
    PipelineEvent, PipelineState, QueryType, ResourceLevel, SourceRetriever, Turn,
};
use cinder_resource::{OperationKind, Rejection, ResourceContext};
use cinder_retrieval::{QueryDecomposer, Reranker, RetrievalFanout};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-request caller context.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    /// Prior turns, oldest first.
    pub history: Vec<Turn>,
    /// Corrections and stated preferences, most important first.
    pub user_facts: Vec<String>,
    pub working_notes: String,
    /// Skip classification and use this type.
    pub query_type: Option<QueryType>,
    /// Per-request opt-in to await escalation inline.
    pub allow_blocking_escalation: Option<bool>,
    /// Treat the query as complex regardless of local confidence.
    pub force_escalation: bool,
}

/// Why a request produced a degraded answer without generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DegradedReason {
    ResourceExhausted { rejection: Rejection },
    EmptyQuery,
}

/// Result of one request.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub request_id: String,
    pub text: String,
    pub query_type: QueryType,
    /// `None` when nothing was generated.
    pub tier_used: Option<ModelTier>,
    pub escalated: bool,
    /// Local confidence was below the threshold for the query type, or
    /// the caller flagged the query complex.
    pub escalation_candidate: bool,
    /// Set when escalation is warranted but was not run inline; the caller
    /// may submit it later with [`Orchestrator::escalate`].
    pub pending_escalation: Option<EscalationRequest>,
    pub confidence: Option<f32>,
    pub degraded: Option<DegradedReason>,
    pub sub_queries: Vec<String>,
    /// Diagnostic only: sources that failed or timed out for at least one
    /// sub-query. The answer itself never mentions them; each failure is
    /// also logged and published as `SourceFailed`.
    pub failed_sources: Vec<String>,
    /// Whether generation needed its one retry.
    pub retried: bool,
    pub usage: Option<ContextUsage>,
    /// Every state the request passed through, in order.
    pub states: Vec<PipelineState>,
}

impl Response {
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    pub fn final_state(&self) -> Option<PipelineState> {
        self.states.last().copied()
    }
}

/// Introspection counters.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub resource_level: ResourceLevel,
    pub available_memory_gb: f64,
    pub admitted_count: u64,
    pub rejected_count: u64,
    pub active_permits: usize,
    pub permit_capacity: usize,
    pub completed_count: u64,
    pub failed_count: u64,
    pub escalated_count: u64,
    pub escalation_candidates: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    escalated: AtomicU64,
    candidates: AtomicU64,
}

/// Tracks and publishes the state of one request.
struct Trace<'a> {
    request_id: String,
    states: Vec<PipelineState>,
    events: &'a EventBus,
}

impl<'a> Trace<'a> {
    fn new(request_id: String, events: &'a EventBus) -> Self {
        Self {
            request_id,
            states: vec![PipelineState::Received],
            events,
        }
    }

    fn current(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Received)
    }

    fn to(&mut self, next: PipelineState) {
        let from = self.current();
        if !from.can_transition_to(next) {
            warn!(request_id = %self.request_id, %from, to = %next, "Unexpected state transition");
        }
        debug!(request_id = %self.request_id, %from, to = %next, "State change");
        self.states.push(next);
        self.events.publish(PipelineEvent::StateChanged {
            request_id: self.request_id.clone(),
            from,
            to: next,
            timestamp: Utc::now(),
        });
    }
}

/// Coordinates one request at a time per call; safe to share across tasks.
pub struct Orchestrator {
    config: OrchestratorConfig,
    resources: ResourceContext,
    decomposer: QueryDecomposer,
    decomposition_enabled: bool,
    fanout: RetrievalFanout,
    reranker: Reranker,
    max_evidence_items: usize,
    allocator: ContextBudgetAllocator,
    classifier: QueryClassifier,
    engine: Arc<dyn GenerationEngine>,
    escalation: Option<Arc<dyn EscalationService>>,
    events: Arc<EventBus>,
    counters: Counters,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        resources: ResourceContext,
        sources: Vec<Arc<dyn SourceRetriever>>,
        engine: Arc<dyn GenerationEngine>,
    ) -> Self {
        let retrieval = &config.retrieval;
        let fanout = RetrievalFanout::new(sources)
            .with_max_concurrency(retrieval.max_concurrent_sources)
            .with_timeout(Duration::from_millis(retrieval.source_timeout_ms))
            .with_limit(retrieval.per_query_limit);

        Self {
            config: config.orchestrator.clone(),
            resources,
            decomposer: QueryDecomposer::new(retrieval.decomposition.clone()),
            decomposition_enabled: retrieval.decomposition.enabled,
            fanout,
            reranker: Reranker::new(config.rerank.clone()),
            max_evidence_items: config.rerank.max_evidence_items,
            allocator: ContextBudgetAllocator::new(config.budget.clone()),
            classifier: QueryClassifier::new(),
            engine,
            escalation: None,
            events: Arc::new(EventBus::default()),
            counters: Counters::default(),
        }
    }

    /// Attach the remote escalation service.
    pub fn with_escalation(mut self, service: Arc<dyn EscalationService>) -> Self {
        self.escalation = Some(service);
        self
    }

    /// Publish pipeline events on a shared bus.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn resources(&self) -> &ResourceContext {
        &self.resources
    }

    /// Handle one query to completion.
    pub async fn handle(&self, query: &str, user: UserContext) -> cinder_core::Result<Response> {
        self.handle_with_cancel(query, user, &CancellationToken::new()).await
    }

    /// [`Orchestrator::handle`] with cooperative cancellation.
    ///
    /// Cancelling before generation starts stops in-flight retrieval and
    /// returns [`Error::Cancelled`]; the permit is released either way.
    pub async fn handle_with_cancel(
        &self,
        query: &str,
        user: UserContext,
        cancel: &CancellationToken,
    ) -> cinder_core::Result<Response> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut trace = Trace::new(request_id.clone(), &self.events);
        let query = sanitize(query, self.config.max_query_chars);
        let query_type = user.query_type.unwrap_or_else(|| self.classifier.classify(&query));

        info!(request_id = %request_id, query_type = %query_type, chars = query.len(), "Request received");

        if query.is_empty() {
            trace.to(PipelineState::Rejected);
            return Ok(self.degraded(trace, query_type, DegradedReason::EmptyQuery));
        }

        // ── Admission ─────────────────────────────────────────────────────
        // A queued admission must not outlive the caller's interest in it.
        let admitted = tokio::select! {
            biased;
            admitted = self.resources.admission.try_admit(OperationKind::Generation) => admitted,
            _ = cancel.cancelled() => {
                info!(request_id = %request_id, "Cancelled while waiting for admission");
                return Err(self.fail(trace, "admission"));
            }
        };
        let permit = match admitted {
            Ok(permit) => permit,
            Err(rejection) => {
                warn!(request_id = %request_id, level = %rejection.level, reason = %rejection.reason, "Admission rejected");
                self.events.publish(PipelineEvent::AdmissionRejected {
                    request_id: request_id.clone(),
                    level: rejection.level,
                    reason: rejection.reason.to_string(),
                    timestamp: Utc::now(),
                });
                trace.to(PipelineState::Rejected);
                return Ok(self.degraded(trace, query_type, DegradedReason::ResourceExhausted { rejection }));
            }
        };
        let grant = *permit.grant();
        trace.to(PipelineState::Admitted);
        info!(
            request_id = %request_id,
            level = %grant.level,
            tier = %grant.tier,
            context_tokens = grant.context_tokens,
            degraded = grant.degraded,
            "Admitted"
        );

        // ── Decomposition ─────────────────────────────────────────────────
        let decomposition = if self.decomposition_enabled {
            self.decomposer.decompose(&query)
        } else {
            cinder_core::DecompositionResult::atomic(query.clone())
        };
        if decomposition.fell_back {
            debug!(request_id = %request_id, "Ambiguous decomposition, searching the whole query");
        }
        trace.to(PipelineState::Decomposed);

        // ── Retrieval ─────────────────────────────────────────────────────
        let outcome = match self.fanout.gather(&decomposition.sub_queries, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                info!(request_id = %request_id, error = %e, "Retrieval cancelled");
                return Err(self.fail(trace, "retrieval"));
            }
        };
        let mut failed_sources: Vec<String> = Vec::new();
        for failure in &outcome.failures {
            self.events.publish(PipelineEvent::SourceFailed {
                request_id: request_id.clone(),
                source: failure.source.clone(),
                error_message: failure.error.to_string(),
                timestamp: Utc::now(),
            });
            if !failed_sources.contains(&failure.source) {
                failed_sources.push(failure.source.clone());
            }
        }
        trace.to(PipelineState::Retrieved);

        // ── Reranking ─────────────────────────────────────────────────────
        let ranked = self.reranker.rerank(&query, &outcome.batches, query_type);
        let evidence: Vec<EvidenceItem> = ranked
            .iter()
            .take(self.max_evidence_items)
            .map(EvidenceItem::from)
            .collect();
        trace.to(PipelineState::Reranked);

        // ── Budgeting ─────────────────────────────────────────────────────
        let contents = SectionContents {
            system_instructions: self.config.system_instructions.clone(),
            user_facts: user.user_facts.clone(),
            working_notes: user.working_notes.clone(),
            evidence,
            history: user.history.clone(),
            query: query.clone(),
        };
        let mut assembled = self.allocator.allocate(grant.context_tokens, Some(query_type), &contents);
        trace.to(PipelineState::Budgeted);

        if cancel.is_cancelled() {
            return Err(self.fail(trace, "generation"));
        }

        // ── Generation ────────────────────────────────────────────────────
        let current = self.resources.monitor.sample().await;
        let tier = grant.tier.min(current.resource_level.model_tier());
        if tier != grant.tier {
            info!(request_id = %request_id, admitted = %grant.tier, now = %tier, "Memory dropped since admission, using the smaller tier");
        }
        trace.to(PipelineState::Generating);

        let mut retried = false;
        let generation = match self.generate(&assembled.text, grant.generation_tokens, tier).await {
            Ok(g) => g,
            Err(first) => {
                warn!(request_id = %request_id, error = %first, "Generation failed, retrying with a reduced budget");
                self.events.publish(PipelineEvent::GenerationRetried {
                    request_id: request_id.clone(),
                    error_message: first.to_string(),
                    timestamp: Utc::now(),
                });
                retried = true;
                let factor = f64::from(self.config.retry_budget_factor);
                let context_tokens = scale(grant.context_tokens, factor);
                let max_tokens = scale(grant.generation_tokens, factor).max(1);
                assembled = self.allocator.allocate(context_tokens, Some(query_type), &contents);
                match self.generate(&assembled.text, max_tokens, tier).await {
                    Ok(g) => g,
                    Err(e) => {
                        warn!(request_id = %request_id, error = %e, "Generation failed after retry");
                        drop(permit);
                        trace.to(PipelineState::Failed);
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        return Err(Error::Generation(e));
                    }
                }
            }
        };
        // Escalation must not hold local capacity.
        drop(permit);

        // ── Escalation decision ───────────────────────────────────────────
        let threshold = self.config.confidence_thresholds.get(query_type);
        let confidence = generation.confidence;
        let escalation_candidate = user.force_escalation || confidence < threshold;
        if escalation_candidate {
            self.counters.candidates.fetch_add(1, Ordering::Relaxed);
            self.events.publish(PipelineEvent::EscalationCandidate {
                request_id: request_id.clone(),
                confidence,
                threshold,
                timestamp: Utc::now(),
            });
            info!(request_id = %request_id, confidence, threshold, "Marked for escalation");
        }

        let mut response = Response {
            request_id: request_id.clone(),
            text: generation.text,
            query_type,
            tier_used: Some(tier),
            escalated: false,
            escalation_candidate,
            pending_escalation: None,
            confidence: Some(confidence),
            degraded: None,
            sub_queries: decomposition.texts().into_iter().map(String::from).collect(),
            failed_sources,
            retried,
            usage: Some(assembled.usage),
            states: Vec::new(),
        };

        let escalation = self
            .escalation
            .as_ref()
            .filter(|_| escalation_candidate && self.config.escalation_enabled);
        if let Some(service) = escalation {
            let request = EscalationRequest {
                query: query.clone(),
                context: assembled.text,
                local_attempt: Some(response.text.clone()),
            };
            let blocking = user
                .allow_blocking_escalation
                .unwrap_or(self.config.allow_blocking_escalation);

            if blocking {
                match self.run_escalation(service.as_ref(), request).await {
                    Ok(text) => {
                        response.text = text;
                        response.escalated = true;
                        trace.to(PipelineState::Escalated);
                        self.counters.escalated.fetch_add(1, Ordering::Relaxed);
                        self.counters.completed.fetch_add(1, Ordering::Relaxed);
                        info!(request_id = %request_id, service = service.name(), "Escalated");
                        response.states = trace.states;
                        return Ok(response);
                    }
                    Err(e) => {
                        warn!(request_id = %request_id, error = %e, "Escalation failed, keeping the local answer");
                    }
                }
            } else {
                response.pending_escalation = Some(request);
            }
        }

        trace.to(PipelineState::Done);
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        info!(request_id = %request_id, tier = %tier, confidence, "Request complete");
        response.states = trace.states;
        Ok(response)
    }

    /// Send a deferred escalation, outside any request's resource budget.
    pub async fn escalate(&self, request: EscalationRequest) -> cinder_core::Result<String> {
        let service = self
            .escalation
            .as_ref()
            .ok_or(cinder_core::error::EscalationError::NotConfigured)?;
        let text = self.run_escalation(service.as_ref(), request).await?;
        self.counters.escalated.fetch_add(1, Ordering::Relaxed);
        Ok(text)
    }

    pub async fn stats(&self) -> OrchestratorStats {
        let snapshot = self.resources.monitor.sample().await;
        let admission = self.resources.admission.stats();
        OrchestratorStats {
            resource_level: snapshot.resource_level,
            available_memory_gb: snapshot.available_memory_gb,
            admitted_count: admission.admitted,
            rejected_count: admission.rejected,
            active_permits: admission.active,
            permit_capacity: admission.capacity,
            completed_count: self.counters.completed.load(Ordering::Relaxed),
            failed_count: self.counters.failed.load(Ordering::Relaxed),
            escalated_count: self.counters.escalated.load(Ordering::Relaxed),
            escalation_candidates: self.counters.candidates.load(Ordering::Relaxed),
        }
    }

    async fn generate(&self, prompt: &str, max_tokens: usize, tier: ModelTier) -> Result<Generation, GenerationError> {
        let timeout_secs = self.config.generation_timeout_secs;
        let request = GenerationRequest {
            prompt: prompt.to_string(),
            max_tokens,
            tier,
        };
        match tokio::time::timeout(Duration::from_secs(timeout_secs), self.engine.generate(request)).await {
            Ok(Ok(g)) if g.text.trim().is_empty() => Err(GenerationError::EmptyResponse),
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout { timeout_secs }),
        }
    }

    async fn run_escalation(
        &self,
        service: &dyn EscalationService,
        request: EscalationRequest,
    ) -> Result<String, cinder_core::error::EscalationError> {
        let timeout_secs = self.config.escalation_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(timeout_secs), service.escalate(request)).await {
            Ok(result) => result,
            Err(_) => Err(cinder_core::error::EscalationError::Timeout { timeout_secs }),
        }
    }

    fn degraded(&self, trace: Trace<'_>, query_type: QueryType, reason: DegradedReason) -> Response {
        Response {
            request_id: trace.request_id.clone(),
            text: self.config.degraded_message.clone(),
            query_type,
            tier_used: None,
            escalated: false,
            escalation_candidate: false,
            pending_escalation: None,
            confidence: None,
            degraded: Some(reason),
            sub_queries: Vec::new(),
            failed_sources: Vec::new(),
            retried: false,
            usage: None,
            states: trace.states,
        }
    }

    fn fail(&self, mut trace: Trace<'_>, stage: &str) -> Error {
        trace.to(PipelineState::Failed);
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        Error::Cancelled { stage: stage.into() }
    }
}

/// Trim and cap at `max_chars` characters.
fn sanitize(query: &str, max_chars: usize) -> String {
    let trimmed = query.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((end, _)) => trimmed[..end].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

fn scale(tokens: usize, factor: f64) -> usize {
    (tokens as f64 * factor.clamp(0.0, 1.0)).floor() as usize
}
