//! Resource thresholds and admission settings.

use cinder_core::ResourceLevel;
use serde::{Deserialize, Serialize};

/// Memory thresholds, admission capacity and per-level budgets.
///
/// Created once at startup and shared read-only (`Arc<ResourceConfig>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// At or below this many GB (after the safety margin) the level is CRITICAL
    #[serde(default = "default_critical_gb")]
    pub critical_gb: f64,

    /// At or below this the level is LOW
    #[serde(default = "default_low_gb")]
    pub low_gb: f64,

    /// At or below this the level is MODERATE; above it, GOOD
    #[serde(default = "default_moderate_gb")]
    pub moderate_gb: f64,

    /// Subtracted from the reported available memory before classification
    #[serde(default = "default_safety_margin_gb")]
    pub safety_margin_gb: f64,

    /// Capacity of the heavy-operation permit pool
    #[serde(default = "default_max_concurrent_heavy_ops")]
    pub max_concurrent_heavy_ops: usize,

    /// What to do when the pool is full
    #[serde(default)]
    pub admission_policy: AdmissionPolicy,

    /// Maximum waiters when `admission_policy = "queue"`
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Maximum wait for a queued request
    #[serde(default = "default_queue_timeout_secs")]
    pub queue_timeout_secs: u64,

    /// Pause after a heavy operation before the next may start
    #[serde(default)]
    pub cooldown_ms: u64,

    /// Upper bound on a single memory probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// How long a snapshot is reused before probing again
    #[serde(default = "default_snapshot_ttl_ms")]
    pub snapshot_ttl_ms: u64,

    /// Token budgets unlocked at each level
    #[serde(default)]
    pub budgets: LevelBudgets,
}

/// Behaviour when every heavy-operation permit is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Refuse immediately.
    #[default]
    Reject,
    /// Wait (bounded) for a permit. Never applies at CRITICAL.
    Queue,
}

/// Context and generation budgets for one resource level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelBudget {
    /// Total context window handed to the allocator
    pub context_tokens: usize,
    /// Cap on generated tokens
    pub generation_tokens: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelBudgets {
    pub critical: LevelBudget,
    pub low: LevelBudget,
    pub moderate: LevelBudget,
    pub good: LevelBudget,
}

impl Default for LevelBudgets {
    fn default() -> Self {
        Self {
            critical: LevelBudget {
                context_tokens: 0,
                generation_tokens: 50,
            },
            low: LevelBudget {
                context_tokens: 1000,
                generation_tokens: 100,
            },
            moderate: LevelBudget {
                context_tokens: 1500,
                generation_tokens: 150,
            },
            good: LevelBudget {
                context_tokens: 2000,
                generation_tokens: 200,
            },
        }
    }
}

impl LevelBudgets {
    pub fn for_level(&self, level: ResourceLevel) -> LevelBudget {
        match level {
            ResourceLevel::Critical => self.critical,
            ResourceLevel::Low => self.low,
            ResourceLevel::Moderate => self.moderate,
            ResourceLevel::Good => self.good,
        }
    }
}

fn default_critical_gb() -> f64 {
    0.2
}
fn default_low_gb() -> f64 {
    0.4
}
fn default_moderate_gb() -> f64 {
    0.7
}
fn default_safety_margin_gb() -> f64 {
    0.1
}
fn default_max_concurrent_heavy_ops() -> usize {
    1
}
fn default_max_queue_size() -> usize {
    5
}
fn default_queue_timeout_secs() -> u64 {
    120
}
fn default_probe_timeout_ms() -> u64 {
    250
}
fn default_snapshot_ttl_ms() -> u64 {
    1000
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            critical_gb: default_critical_gb(),
            low_gb: default_low_gb(),
            moderate_gb: default_moderate_gb(),
            safety_margin_gb: default_safety_margin_gb(),
            max_concurrent_heavy_ops: default_max_concurrent_heavy_ops(),
            admission_policy: AdmissionPolicy::default(),
            max_queue_size: default_max_queue_size(),
            queue_timeout_secs: default_queue_timeout_secs(),
            cooldown_ms: 0,
            probe_timeout_ms: default_probe_timeout_ms(),
            snapshot_ttl_ms: default_snapshot_ttl_ms(),
            budgets: LevelBudgets::default(),
        }
    }
}

impl ResourceConfig {
    /// Thresholds only, everything else default. Handy for simulations.
    pub fn with_thresholds(critical_gb: f64, low_gb: f64, moderate_gb: f64) -> Self {
        Self {
            critical_gb,
            low_gb,
            moderate_gb,
            ..Self::default()
        }
    }

    /// Classify available memory. A value sitting exactly on a threshold
    /// gets the lower level; NaN is CRITICAL.
    pub fn level_for(&self, available_gb: f64) -> ResourceLevel {
        let effective = available_gb - self.safety_margin_gb;
        if effective.is_nan() || effective <= self.critical_gb {
            ResourceLevel::Critical
        } else if effective <= self.low_gb {
            ResourceLevel::Low
        } else if effective <= self.moderate_gb {
            ResourceLevel::Moderate
        } else {
            ResourceLevel::Good
        }
    }

    pub fn budget_for(&self, level: ResourceLevel) -> LevelBudget {
        self.budgets.for_level(level)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        let finite = [self.critical_gb, self.low_gb, self.moderate_gb, self.safety_margin_gb]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err("resources: thresholds must be finite numbers".into());
        }
        if self.critical_gb < 0.0 || self.safety_margin_gb < 0.0 {
            return Err("resources: thresholds and safety margin must be >= 0".into());
        }
        if !(self.critical_gb < self.low_gb && self.low_gb < self.moderate_gb) {
            return Err("resources: thresholds must satisfy critical_gb < low_gb < moderate_gb".into());
        }
        if self.max_concurrent_heavy_ops == 0 {
            return Err("resources: max_concurrent_heavy_ops must be >= 1".into());
        }
        if self.probe_timeout_ms == 0 {
            return Err("resources: probe_timeout_ms must be > 0".into());
        }
        let b = &self.budgets;
        let monotonic = b.critical.context_tokens <= b.low.context_tokens
            && b.low.context_tokens <= b.moderate.context_tokens
            && b.moderate.context_tokens <= b.good.context_tokens
            && b.critical.generation_tokens <= b.low.generation_tokens
            && b.low.generation_tokens <= b.moderate.generation_tokens
            && b.moderate.generation_tokens <= b.good.generation_tokens;
        if !monotonic {
            return Err("resources: level budgets must not shrink as the level improves".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_margin() -> ResourceConfig {
        ResourceConfig {
            safety_margin_gb: 0.0,
            ..ResourceConfig::with_thresholds(0.2, 0.4, 0.7)
        }
    }

    #[test]
    fn classifies_each_band() {
        let c = no_margin();
        assert_eq!(c.level_for(0.1), ResourceLevel::Critical);
        assert_eq!(c.level_for(0.3), ResourceLevel::Low);
        assert_eq!(c.level_for(0.5), ResourceLevel::Moderate);
        assert_eq!(c.level_for(4.0), ResourceLevel::Good);
    }

    #[test]
    fn boundary_ties_take_the_lower_level() {
        let c = no_margin();
        assert_eq!(c.level_for(0.2), ResourceLevel::Critical);
        assert_eq!(c.level_for(0.4), ResourceLevel::Low);
        assert_eq!(c.level_for(0.7), ResourceLevel::Moderate);
    }

    #[test]
    fn safety_margin_is_subtracted() {
        let c = ResourceConfig::with_thresholds(0.2, 0.4, 0.7);
        // 0.75 - 0.1 = 0.65 -> moderate
        assert_eq!(c.level_for(0.75), ResourceLevel::Moderate);
        assert_eq!(c.level_for(0.15), ResourceLevel::Critical);
    }

    #[test]
    fn nan_is_critical() {
        assert_eq!(no_margin().level_for(f64::NAN), ResourceLevel::Critical);
    }

    #[test]
    fn budgets_grow_with_level() {
        let c = ResourceConfig::default();
        assert!(c.budget_for(ResourceLevel::Good).context_tokens > c.budget_for(ResourceLevel::Low).context_tokens);
        assert_eq!(c.budget_for(ResourceLevel::Good).generation_tokens, 200);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn unordered_thresholds_rejected() {
        let c = ResourceConfig::with_thresholds(0.5, 0.4, 0.7);
        assert!(c.validate().is_err());
    }

    #[test]
    fn zero_capacity_rejected() {
        let c = ResourceConfig {
            max_concurrent_heavy_ops: 0,
            ..ResourceConfig::default()
        };
        assert!(c.validate().unwrap_err().contains("max_concurrent_heavy_ops"));
    }
}
