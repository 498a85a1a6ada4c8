//! Context budget ratios and per-query-type multipliers.

use cinder_core::QueryType;
use serde::{Deserialize, Serialize};

use crate::per_query::PerQueryType;

/// Base share of the total budget for each section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectionRatios {
    pub system_instructions: f32,
    pub user_facts: f32,
    pub retrieved_evidence: f32,
    pub conversation_history: f32,
    pub working_notes: f32,
}

impl Default for SectionRatios {
    fn default() -> Self {
        Self {
            system_instructions: 0.05,
            user_facts: 0.10,
            retrieved_evidence: 0.20,
            conversation_history: 0.25,
            working_notes: 0.075,
        }
    }
}

/// Multipliers applied to the variable sections.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectionMultipliers {
    pub user_facts: f32,
    pub retrieved_evidence: f32,
    pub conversation_history: f32,
    pub working_notes: f32,
}

impl SectionMultipliers {
    pub const NEUTRAL: SectionMultipliers = SectionMultipliers {
        user_facts: 1.0,
        retrieved_evidence: 1.0,
        conversation_history: 1.0,
        working_notes: 1.0,
    };
}

fn default_multipliers() -> PerQueryType<SectionMultipliers> {
    let n = SectionMultipliers::NEUTRAL;
    PerQueryType {
        chat: SectionMultipliers {
            conversation_history: 1.3,
            retrieved_evidence: 0.7,
            user_facts: 1.2,
            ..n
        },
        code: SectionMultipliers {
            retrieved_evidence: 1.5,
            conversation_history: 0.8,
            ..n
        },
        recall: SectionMultipliers {
            user_facts: 1.5,
            conversation_history: 1.3,
            working_notes: 1.2,
            retrieved_evidence: 0.7,
        },
        reasoning: SectionMultipliers {
            retrieved_evidence: 1.3,
            conversation_history: 0.9,
            ..n
        },
        roleplay: SectionMultipliers {
            conversation_history: 1.4,
            retrieved_evidence: 0.5,
            ..n
        },
        project: SectionMultipliers {
            retrieved_evidence: 1.2,
            user_facts: 0.8,
            ..n
        },
    }
}

fn default_query_floor_tokens() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Tokens always reserved for the literal user query
    #[serde(default = "default_query_floor_tokens")]
    pub query_floor_tokens: usize,

    #[serde(default)]
    pub ratios: SectionRatios,

    #[serde(default = "default_multipliers")]
    pub multipliers: PerQueryType<SectionMultipliers>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            query_floor_tokens: default_query_floor_tokens(),
            ratios: SectionRatios::default(),
            multipliers: default_multipliers(),
        }
    }
}

impl BudgetConfig {
    pub fn multipliers_for(&self, query_type: QueryType) -> SectionMultipliers {
        self.multipliers.get(query_type)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        let r = &self.ratios;
        let ratios = [
            r.system_instructions,
            r.user_facts,
            r.retrieved_evidence,
            r.conversation_history,
            r.working_notes,
        ];
        if ratios.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err("budget: ratios must be finite and >= 0".into());
        }
        if ratios.iter().sum::<f32>() > 1.0 + 1e-3 {
            return Err("budget: ratios must not sum to more than 1.0".into());
        }
        for (query_type, m) in self.multipliers.iter() {
            let values = [m.user_facts, m.retrieved_evidence, m.conversation_history, m.working_notes];
            if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(format!("budget: multipliers for {query_type} must be finite and >= 0"));
            }
        }
        Ok(())
    }
}
