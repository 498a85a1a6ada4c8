//! Shared wiring: config, resources, sources and the orchestrator.

use cinder_agent::Orchestrator;
use cinder_config::{AppConfig, ConfigError};
use cinder_core::{EmbeddingBackend, EscalationService, SourceRetriever};
use cinder_providers::{OllamaEmbedder, OpenAiCompatEngine};
use cinder_resource::{FixedProbe, ResourceContext};
use cinder_retrieval::{Corpus, IndexedSource, SourceOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            Ok(config)
        }
        None => AppConfig::load(),
    }
}

/// Resource context over the real probe, or a fixed reading when simulating.
pub fn resources(config: &AppConfig, simulate_memory_gb: Option<f64>) -> ResourceContext {
    match simulate_memory_gb {
        Some(gb) => ResourceContext::new(config.resources.clone(), Arc::new(FixedProbe::new(gb))),
        None => ResourceContext::from_system(config.resources.clone()),
    }
}

/// Load every configured source. A source whose corpus cannot be read is
/// skipped with a warning.
pub async fn load_sources(
    config: &AppConfig,
    embedder: Option<Arc<dyn EmbeddingBackend>>,
) -> Vec<Arc<dyn SourceRetriever>> {
    let options = SourceOptions {
        max_item_chars: config.retrieval.max_item_chars,
        lexical_discount: config.retrieval.lexical_discount,
        ..SourceOptions::default()
    };

    let mut sources: Vec<Arc<dyn SourceRetriever>> = Vec::new();
    for source in &config.retrieval.sources {
        let corpus = match Corpus::load_jsonl(&source.path).await {
            Ok(corpus) => corpus,
            Err(e) => {
                warn!(source = %source.name, error = %e, "Skipping source");
                continue;
            }
        };

        let mut indexed = IndexedSource::new(&source.name, source.kind, corpus).with_options(options);
        if let Some(embedder) = &embedder {
            let (embedded, error) = indexed.corpus().embed_missing(embedder.as_ref()).await;
            if let Some(error) = error {
                warn!(source = %source.name, error = %error, "Embedding backend unavailable, using lexical search");
            } else {
                indexed = indexed.with_embedder(Arc::clone(embedder));
            }
            info!(source = %source.name, embedded, "Source ready");
        }
        sources.push(Arc::new(indexed));
    }
    sources
}

/// Build the orchestrator with every collaborator the config names.
pub async fn orchestrator(
    config: &AppConfig,
    simulate_memory_gb: Option<f64>,
) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let embedder: Option<Arc<dyn EmbeddingBackend>> = match OllamaEmbedder::from_config(&config.embedding)? {
        Some(embedder) => Some(Arc::new(embedder)),
        None => None,
    };
    let sources = load_sources(config, embedder).await;
    let engine = Arc::new(OpenAiCompatEngine::from_engine_config(&config.engine)?);

    let mut orchestrator = Orchestrator::new(config, resources(config, simulate_memory_gb), sources, engine);
    if let Some(service) = OpenAiCompatEngine::from_escalation_config(&config.escalation)? {
        let service: Arc<dyn EscalationService> = Arc::new(service);
        orchestrator = orchestrator.with_escalation(service);
    }
    Ok(orchestrator)
}
