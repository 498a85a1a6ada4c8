//! Orchestrator behaviour: retries, escalation and response shaping.

use serde::{Deserialize, Serialize};

use crate::per_query::PerQueryType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Prepended to every prompt
    #[serde(default = "default_system_instructions")]
    pub system_instructions: String,

    /// Returned when admission is refused or the query is unusable
    #[serde(default = "default_degraded_message")]
    pub degraded_message: String,

    /// Queries are cut to this many characters before processing
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,

    /// Below this engine confidence an answer becomes an escalation candidate
    #[serde(default = "default_confidence_thresholds")]
    pub confidence_thresholds: PerQueryType<f32>,

    /// Context and generation budgets are scaled by this on the single retry
    #[serde(default = "default_retry_budget_factor")]
    pub retry_budget_factor: f32,

    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    /// Whether escalation candidates are sent to the escalation service at all
    #[serde(default = "default_true")]
    pub escalation_enabled: bool,

    /// Await the escalation service inside the request path
    #[serde(default)]
    pub allow_blocking_escalation: bool,

    #[serde(default = "default_escalation_timeout_secs")]
    pub escalation_timeout_secs: u64,
}

fn default_system_instructions() -> String {
    "You are a concise local assistant. Answer from the provided context when it is relevant, \
     and say so when the context does not contain the answer."
        .into()
}
fn default_degraded_message() -> String {
    "I'm running low on memory right now and can't work on that request. Please try again in a moment."
        .into()
}
fn default_max_query_chars() -> usize {
    4000
}
fn default_confidence_thresholds() -> PerQueryType<f32> {
    PerQueryType {
        chat: 0.4,
        code: 0.6,
        recall: 0.5,
        reasoning: 0.65,
        roleplay: 0.3,
        project: 0.55,
    }
}
fn default_retry_budget_factor() -> f32 {
    0.5
}
fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_escalation_timeout_secs() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_instructions: default_system_instructions(),
            degraded_message: default_degraded_message(),
            max_query_chars: default_max_query_chars(),
            confidence_thresholds: default_confidence_thresholds(),
            retry_budget_factor: default_retry_budget_factor(),
            generation_timeout_secs: default_generation_timeout_secs(),
            escalation_enabled: true,
            allow_blocking_escalation: false,
            escalation_timeout_secs: default_escalation_timeout_secs(),
        }
    }
}

impl OrchestratorConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self
            .confidence_thresholds
            .iter()
            .any(|(_, t)| !(0.0..=1.0).contains(&t))
        {
            return Err("orchestrator: confidence thresholds must be within [0, 1]".into());
        }
        if !(self.retry_budget_factor > 0.0 && self.retry_budget_factor <= 1.0) {
            return Err("orchestrator: retry_budget_factor must be within (0, 1]".into());
        }
        if self.generation_timeout_secs == 0 || self.escalation_timeout_secs == 0 {
            return Err("orchestrator: timeouts must be > 0".into());
        }
        if self.max_query_chars == 0 {
            return Err("orchestrator: max_query_chars must be > 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::QueryType;

    #[test]
    fn reasoning_has_strictest_threshold() {
        let c = OrchestratorConfig::default();
        let max = c
            .confidence_thresholds
            .iter()
            .map(|(_, t)| t)
            .fold(0.0_f32, f32::max);
        assert_eq!(c.confidence_thresholds.get(QueryType::Reasoning), max);
    }

    #[test]
    fn blocking_escalation_is_opt_in() {
        assert!(!OrchestratorConfig::default().allow_blocking_escalation);
    }

    #[test]
    fn zero_retry_factor_rejected() {
        let c = OrchestratorConfig {
            retry_budget_factor: 0.0,
            ..OrchestratorConfig::default()
        };
        assert!(c.validate().is_err());
    }
}
