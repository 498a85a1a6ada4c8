//! `cinder decompose` — Show how a query would be split.

use super::runtime;
use cinder_retrieval::QueryDecomposer;
use std::path::Path;

pub fn run(config_path: Option<&Path>, query: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = runtime::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let result = QueryDecomposer::new(config.retrieval.decomposition.clone()).decompose(query);

    println!("Complex: {}", result.is_complex);
    if result.fell_back {
        println!("(pattern matched below the confidence threshold; kept whole)");
    }
    for (i, sub) in result.sub_queries.iter().enumerate() {
        println!("  {}. {}  [{:?}, {:.2}]", i + 1, sub.text, sub.strategy, sub.confidence);
    }
    Ok(())
}
