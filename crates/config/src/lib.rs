//! Configuration loading, validation, and management for cinder.
//!
//! Loads configuration from `~/.cinder/config.toml` with environment
//! variable overrides. Validates all settings at startup; the resulting
//! `AppConfig` is immutable for the life of the process.

pub mod budget;
pub mod orchestrator;
pub mod per_query;
pub mod providers;
pub mod ranking;
pub mod resource;
pub mod retrieval;

pub use budget::{BudgetConfig, SectionMultipliers, SectionRatios};
pub use orchestrator::OrchestratorConfig;
pub use per_query::PerQueryType;
pub use providers::{EmbeddingConfig, EngineConfig, EscalationConfig};
pub use ranking::{RerankConfig, ScoringWeights, SourceWeights};
pub use resource::{AdmissionPolicy, LevelBudget, LevelBudgets, ResourceConfig};
pub use retrieval::{DecompositionConfig, RetrievalConfig, SourceConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.cinder/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Memory thresholds and admission control
    #[serde(default)]
    pub resources: ResourceConfig,

    /// Sources, fan-out and decomposition
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Reranker profiles
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Context budget ratios
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Request handling
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Local generation engine
    #[serde(default)]
    pub engine: EngineConfig,

    /// Embedding backend
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Escalation service
    #[serde(default)]
    pub escalation: EscalationConfig,
}

impl AppConfig {
    /// Load configuration from the default location with env var overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Environment variable overrides (highest priority).
    ///
    /// `lookup` is `std::env::var` in production and a map in tests.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("CINDER_ENGINE_URL") {
            self.engine.base_url = url;
        }
        if let Some(key) = lookup("CINDER_ENGINE_API_KEY") {
            self.engine.api_key = Some(key);
        }
        if let Some(url) = lookup("CINDER_EMBEDDING_URL") {
            self.embedding.base_url = url;
        }
        if let Some(url) = lookup("CINDER_ESCALATION_URL") {
            self.escalation.base_url = Some(url);
        }
        if let Some(key) = lookup("CINDER_ESCALATION_API_KEY") {
            self.escalation.api_key = Some(key);
        }
        if let Some(ops) = lookup("CINDER_MAX_HEAVY_OPS") {
            self.resources.max_concurrent_heavy_ops = ops.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("CINDER_MAX_HEAVY_OPS is not a number: {ops}"))
            })?;
        }
        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".cinder")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resources
            .validate()
            .and_then(|_| self.retrieval.validate())
            .and_then(|_| self.rerank.validate())
            .and_then(|_| self.budget.validate())
            .and_then(|_| self.orchestrator.validate())
            .and_then(|_| self.embedding.validate())
            .map_err(ConfigError::ValidationError)
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        let body = toml::to_string_pretty(&config).unwrap_or_default();
        format!("{DEFAULT_TOML_HEADER}{body}")
    }
}

const DEFAULT_TOML_HEADER: &str = "\
# cinder configuration
#
# Memory thresholds are in GB of available memory after `safety_margin_gb`.
# Add knowledge sources as [[retrieval.sources]] tables (name, kind, path).
# Environment overrides: CINDER_ENGINE_URL, CINDER_ENGINE_API_KEY,
# CINDER_EMBEDDING_URL, CINDER_ESCALATION_URL, CINDER_ESCALATION_API_KEY,
# CINDER_MAX_HEAVY_OPS.

";

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for cinder_core::Error {
    fn from(e: ConfigError) -> Self {
        cinder_core::Error::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::{QueryType, ResourceLevel};
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resources.max_concurrent_heavy_ops, 1);
        assert_eq!(config.rerank.recency_half_life_days, 30.0);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = AppConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.resources.low_gb, config.resources.low_gb);
        assert_eq!(parsed.engine.small_model, config.engine.small_model);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [resources]
            critical_gb = 0.5
            low_gb = 1.0
            moderate_gb = 2.0
            admission_policy = "queue"

            [[retrieval.sources]]
            name = "code"
            kind = "code"
            path = "/tmp/code.jsonl"
            "#,
        )
        .unwrap();
        assert_eq!(config.resources.admission_policy, AdmissionPolicy::Queue);
        assert_eq!(config.resources.level_for(1.5), ResourceLevel::Moderate);
        assert_eq!(config.retrieval.sources.len(), 1);
        assert_eq!(config.retrieval.per_query_limit, 10);
        assert_eq!(config.budget.multipliers_for(QueryType::Code).retrieved_evidence, 1.5);
    }

    #[test]
    fn invalid_thresholds_rejected() {
        let err = AppConfig::from_toml_str(
            r#"
            [resources]
            critical_gb = 0.9
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.embedding.model, "nomic-embed-text");
    }

    #[test]
    fn load_from_file_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        match err {
            ConfigError::ParseError { path: p, .. } => assert_eq!(p, path),
            other => panic!("expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("CINDER_ENGINE_URL", "http://127.0.0.1:9000/v1"),
            ("CINDER_MAX_HEAVY_OPS", "2"),
            ("CINDER_ESCALATION_URL", "https://reasoner.example/v1"),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.engine.base_url, "http://127.0.0.1:9000/v1");
        assert_eq!(config.resources.max_concurrent_heavy_ops, 2);
        assert!(config.escalation.is_configured());
    }

    #[test]
    fn env_override_of_zero_capacity_rejected() {
        let mut config = AppConfig::default();
        let result = config.apply_env_overrides(|k| (k == "CINDER_MAX_HEAVY_OPS").then(|| "0".into()));
        assert!(result.is_err());
    }

    #[test]
    fn default_toml_generation() {
        let toml = AppConfig::default_toml();
        assert!(toml.contains("[resources]"));
        assert!(toml.contains("critical_gb"));
        assert!(toml.starts_with("# cinder configuration"));
        assert!(AppConfig::from_toml_str(&toml).is_ok());
    }
}
