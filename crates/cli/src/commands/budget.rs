//! `cinder budget` — Show the context budget for a query.

use super::runtime;
use cinder_agent::{ContextBudgetAllocator, QueryClassifier, SectionContents};
use std::path::Path;

pub fn run(config_path: Option<&Path>, query: &str, tokens: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = runtime::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let query_type = QueryClassifier::new().classify(query);
    let allocator = ContextBudgetAllocator::new(config.budget.clone());
    let contents = SectionContents {
        system_instructions: config.orchestrator.system_instructions.clone(),
        query: query.to_string(),
        ..SectionContents::default()
    };
    let assembled = allocator.allocate(tokens, Some(query_type), &contents);

    println!("Query type: {query_type}");
    println!("Budget:     {} tokens", assembled.budget.total);
    println!();
    println!("  {:<22} {:>8} {:>10}", "section", "target", "allocated");
    for usage in &assembled.usage.sections {
        println!("  {:<22} {:>8} {:>10}", usage.section.to_string(), usage.target, usage.allocated);
    }
    Ok(())
}
