//! CLI command implementations

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::{simulate as run_simulation, EngineRunner};
use crate::feed::HttpMarketData;

/// Paper-trade against the live racing feed until Ctrl-C
pub async fn run(config: &Config) -> Result<()> {
    info!("Starting paper trader...");
    info!(
        "Equity: {:.2}, auto-trade: {}, fees: {}/{} bps",
        config.engine.start_equity,
        config.engine.auto_trade,
        config.venue.maker_fee_bps,
        config.venue.taker_fee_bps
    );

    let feed = HttpMarketData::new(config.feed.clone()).context("Failed to build market data client")?;
    let shutdown = CancellationToken::new();
    let runner = EngineRunner::new(feed, config, shutdown.clone());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, stopping"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        signal.cancel();
    });

    runner.run().await.context("Engine loop failed")?;

    let status = runner.handle().status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Deterministic offline run over the seeded random-walk feed
pub async fn simulate(config: &Config, ticks: u64, seed: u64) -> Result<()> {
    info!("Simulating {} ticks (seed {})", ticks, seed);
    let status = run_simulation(config, ticks, seed, Utc::now())
        .await
        .context("Simulation failed")?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    info!("{}", status.summary_line());
    Ok(())
}

/// Show the effective configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_command() {
        let config = Config::default();
        tokio_test::block_on(simulate(&config, 120, 9)).unwrap();
    }

    #[test]
    fn test_show_config() {
        show_config(&Config::default()).unwrap();
    }
}
