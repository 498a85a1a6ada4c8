//! `cinder onboard` — First-time setup.

use cinder_config::AppConfig;
use std::path::Path;

pub fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => AppConfig::config_dir().join("config.toml"),
    };

    if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            println!("Created config directory: {}", dir.display());
        }
    }

    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        println!("Edit it manually or delete and re-run onboard.");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("Created config.toml at: {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Point [engine] base_url at your local inference server");
    println!("  2. Add [[retrieval.sources]] entries for your JSON Lines corpora");
    println!("  3. Run: cinder ask \"...\"");
    Ok(())
}
