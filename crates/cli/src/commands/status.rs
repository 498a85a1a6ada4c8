//! `cinder status` — Show resource and admission status.

use super::runtime;
use cinder_config::AppConfig;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, simulate_memory_gb: Option<f64>) -> Result<(), Box<dyn std::error::Error>> {
    let config = runtime::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let resources = runtime::resources(&config, simulate_memory_gb);
    let snapshot = resources.monitor.sample().await;
    let admission = resources.admission.stats();
    let budget = config.resources.budgets.for_level(snapshot.resource_level);

    println!("cinder status");
    println!("=============");
    println!("  Config dir:      {}", AppConfig::config_dir().display());
    println!(
        "  Memory:          {:.2} GB available{}",
        snapshot.available_memory_gb,
        if snapshot.stale { " (stale)" } else { "" }
    );
    println!("  Level:           {}", snapshot.resource_level);
    println!("  Model tier:      {}", snapshot.resource_level.model_tier());
    println!("  Context budget:  {} tokens", budget.context_tokens);
    println!("  Generation cap:  {} tokens", budget.generation_tokens);
    println!("  Heavy ops:       {}/{} active", admission.active, admission.capacity);
    println!("  Engine:          {}", config.engine.base_url);
    println!(
        "  Escalation:      {}",
        config.escalation.base_url.as_deref().unwrap_or("not configured")
    );
    println!("  Sources:         {}", config.retrieval.sources.len());
    for source in &config.retrieval.sources {
        println!("    - {} ({}) {}", source.name, source.kind, source.path.display());
    }

    let config_file = AppConfig::config_dir().join("config.toml");
    if config_path.is_none() && !config_file.exists() {
        println!("\n  No config file — run `cinder onboard` first");
    }
    Ok(())
}
