//! Resource levels and generation tiers.
//!
//! A `ResourceLevel` is the coarse view of how much memory the host can spare
//! right now. Higher levels unlock strictly more: larger context budgets,
//! larger generation caps and the larger model tier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discrete memory-pressure classification, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLevel {
    /// Heavy operations must not start.
    Critical,
    /// Admit with a reduced budget and the small tier.
    Low,
    /// Admit with a reduced budget and the small tier.
    Moderate,
    /// Full capability.
    Good,
}

impl ResourceLevel {
    pub const ALL: [ResourceLevel; 4] = [
        ResourceLevel::Critical,
        ResourceLevel::Low,
        ResourceLevel::Moderate,
        ResourceLevel::Good,
    ];

    /// The generation tier this level can afford.
    pub fn model_tier(self) -> ModelTier {
        match self {
            ResourceLevel::Good => ModelTier::Large,
            _ => ModelTier::Small,
        }
    }

    /// Whether callers must run with reduced budgets at this level.
    pub fn is_degraded(self) -> bool {
        matches!(self, ResourceLevel::Low | ResourceLevel::Moderate)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceLevel::Critical => "critical",
            ResourceLevel::Low => "low",
            ResourceLevel::Moderate => "moderate",
            ResourceLevel::Good => "good",
        }
    }
}

impl std::fmt::Display for ResourceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which local generation model to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Small,
    Large,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelTier::Small => f.write_str("small"),
            ModelTier::Large => f.write_str("large"),
        }
    }
}

/// One point-in-time memory reading and its classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Memory the host reports as available, in GB.
    pub available_memory_gb: f64,

    /// Total physical memory in GB (0 when unknown).
    pub total_memory_gb: f64,

    /// Classification after the safety margin was applied.
    pub resource_level: ResourceLevel,

    /// True when the reading could not be refreshed and an older
    /// or assumed value was used instead.
    pub stale: bool,

    pub sampled_at: DateTime<Utc>,
}
