//! `cinder ask` — Answer one query.

use super::runtime;
use cinder_agent::UserContext;
use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    query: &str,
    simulate_memory_gb: Option<f64>,
    escalate: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = runtime::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let orchestrator = runtime::orchestrator(&config, simulate_memory_gb).await?;

    let user = UserContext {
        force_escalation: escalate,
        allow_blocking_escalation: escalate.then_some(true),
        ..UserContext::default()
    };
    let response = orchestrator.handle(query, user).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("{}", response.text);
    println!();
    println!("  Request:     {}", response.request_id);
    println!("  Query type:  {}", response.query_type);
    if let Some(tier) = response.tier_used {
        println!("  Model tier:  {tier}");
    }
    if let Some(confidence) = response.confidence {
        println!("  Confidence:  {confidence:.2}");
    }
    if response.sub_queries.len() > 1 {
        println!("  Sub-queries: {}", response.sub_queries.join(" | "));
    }
    if !response.failed_sources.is_empty() {
        println!("  Failed:      {}", response.failed_sources.join(", "));
    }
    if let Some(usage) = &response.usage {
        println!(
            "  Context:     {}/{} tokens ({:.0}%)",
            usage.total_used, usage.total_tokens, usage.utilization_pct
        );
    }
    if response.escalated {
        println!("  Escalated:   yes");
    } else if response.escalation_candidate {
        println!("  Escalated:   no (candidate; re-run with --escalate)");
    }
    if let Some(reason) = &response.degraded {
        println!("  Degraded:    {}", serde_json::to_string(reason)?);
    }
    Ok(())
}
