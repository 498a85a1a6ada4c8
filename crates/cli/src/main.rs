//! cinder CLI — the main entry point.
//!
//! Commands:
//! - `ask`        — Run one query through the full pipeline
//! - `status`     — Show memory level, admission state and configuration
//! - `decompose`  — Show how a query would be split
//! - `budget`     — Show how a context window would be allocated
//! - `onboard`    — Write a default config file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "cinder",
    about = "cinder — resource-aware retrieval and context assembly for local models",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "CINDER_LOG_JSON")]
    log_json: bool,

    /// Config file (defaults to ~/.cinder/config.toml)
    #[arg(short, long, global = true, env = "CINDER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a query
    Ask {
        query: String,

        /// Pretend this many GB of memory are available
        #[arg(long)]
        simulate_memory_gb: Option<f64>,

        /// Send the query to the escalation service and wait for it
        #[arg(long)]
        escalate: bool,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show resource and admission status
    Status {
        #[arg(long)]
        simulate_memory_gb: Option<f64>,
    },

    /// Show the sub-queries a query decomposes into
    Decompose { query: String },

    /// Show the context budget for a query
    Budget {
        query: String,

        /// Total context tokens to allocate
        #[arg(short, long, default_value_t = 2000)]
        tokens: usize,
    },

    /// Write a default configuration file
    Onboard,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Ask {
            query,
            simulate_memory_gb,
            escalate,
            json,
        } => commands::ask::run(config_path, &query, simulate_memory_gb, escalate, json).await?,
        Commands::Status { simulate_memory_gb } => commands::status::run(config_path, simulate_memory_gb).await?,
        Commands::Decompose { query } => commands::decompose::run(config_path, &query)?,
        Commands::Budget { query, tokens } => commands::budget::run(config_path, &query, tokens)?,
        Commands::Onboard => commands::onboard::run(config_path)?,
    }

    Ok(())
}
