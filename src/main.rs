//! Regime Trader - single-instrument paper-trading engine
//!
//! # WARNING
//! - Paper trading only. Simulated fills ignore queue position and partial fills.
//! - Backtest-like results on a random-walk feed say nothing about live edge.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

// Use the library crate
use regime_trader::cli::commands;
use regime_trader::config::Config;

/// Regime Trader - regime-routed paper trading
#[derive(Parser)]
#[command(name = "regime-trader")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "TRADER_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Paper-trade against the live quote feed
    Run,

    /// Run offline over a seeded random-walk feed
    Simulate {
        /// Number of ticks to simulate
        #[arg(long, default_value = "3600")]
        ticks: u64,

        /// Random-walk seed
        #[arg(long, default_value = "1")]
        seed: u64,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("regime_trader=info"));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_line_number(true)
            .init();
    }

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Run => commands::run(&config).await,
        Commands::Simulate { ticks, seed } => commands::simulate(&config, ticks, seed).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
