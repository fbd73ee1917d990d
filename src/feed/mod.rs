//! Market data collaborator
//!
//! The engine only sees [`MarketData`]: one seed call and one poll per tick.
//! Racing, retries and per-request timeouts stay inside the implementations.

pub mod http;
pub mod racing;
pub mod simulated;

pub use http::{BinanceBookSource, BinanceKlines, CoinbaseSource, HttpMarketData};
pub use racing::RacingFeed;
pub use simulated::SimulatedFeed;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::market::{Bar, Quote};

/// Feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub binance_base_url: String,
    pub binance_symbol: String,
    pub coinbase_base_url: String,
    pub coinbase_product: String,
    /// Per-request HTTP timeout
    pub request_timeout_ms: u64,
    /// Bound on one racing poll across all sources
    pub tick_timeout_ms: u64,
    pub seed_m1_bars: usize,
    pub seed_h1_bars: usize,
    pub seed_max_elapsed_secs: u64,
    pub seed_initial_backoff_ms: u64,
    /// Half-spread synthesized around spot when a side is missing
    pub synth_half_spread_bps: f64,
    /// Spreads wider than this are treated as padded and re-synthesized
    pub max_spread_bps: f64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            binance_base_url: "https://api.binance.com".to_string(),
            binance_symbol: "BTCUSDT".to_string(),
            coinbase_base_url: "https://api.coinbase.com".to_string(),
            coinbase_product: "BTC-USD".to_string(),
            request_timeout_ms: 8_000,
            tick_timeout_ms: 2_500,
            seed_m1_bars: 300,
            seed_h1_bars: 400,
            seed_max_elapsed_secs: 60,
            seed_initial_backoff_ms: 500,
            synth_half_spread_bps: 4.0,
            max_spread_bps: 30.0,
        }
    }
}

/// One poll result. All three `None` means the tick failed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawTick {
    pub price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

impl RawTick {
    pub fn new(price: Option<f64>, bid: Option<f64>, ask: Option<f64>) -> Self {
        Self { price, bid, ask }
    }

    pub fn is_empty(&self) -> bool {
        self.price.is_none() && self.bid.is_none() && self.ask.is_none()
    }

    /// Usable quote: explicit price, or mid when only the book is known
    pub fn to_quote(&self) -> Option<Quote> {
        let price = self.price.or(match (self.bid, self.ask) {
            (Some(b), Some(a)) => Some((a + b) / 2.0),
            _ => None,
        })?;
        (price.is_finite() && price > 0.0).then(|| Quote::new(price, self.bid, self.ask))
    }
}

/// Seed history
#[derive(Debug, Clone, Default)]
pub struct SeedData {
    pub m1: Vec<Bar>,
    pub h1: Vec<Bar>,
    /// Where the history came from
    pub source: String,
}

/// The data collaborator seen by the engine
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn seed(&self) -> Result<SeedData>;

    async fn poll_tick(&self) -> Result<RawTick>;
}

/// A single quote endpoint raced by [`RacingFeed`]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<RawTick>;
}

/// Fill a missing side around spot and replace padded retail spreads
pub fn normalize_spread(
    price: Option<f64>,
    bid: Option<f64>,
    ask: Option<f64>,
    synth_half_spread_bps: f64,
    max_spread_bps: f64,
) -> (Option<f64>, Option<f64>) {
    let Some(px) = price.filter(|p| *p > 0.0) else {
        return (bid, ask);
    };
    let half = synth_half_spread_bps / 10_000.0;
    let bid = bid.unwrap_or(px * (1.0 - half));
    let ask = ask.unwrap_or(px * (1.0 + half));
    if (ask - bid) / px * 10_000.0 > max_spread_bps {
        return (Some(px * (1.0 - half)), Some(px * (1.0 + half)));
    }
    (Some(bid), Some(ask))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_synthesizes_missing_side() {
        let (bid, ask) = normalize_spread(Some(100.0), None, Some(100.02), 4.0, 30.0);
        assert!((bid.unwrap() - 99.96).abs() < 1e-9);
        assert_eq!(ask, Some(100.02));
    }

    #[test]
    fn test_normalize_clamps_padded_spread() {
        let (bid, ask) = normalize_spread(Some(100.0), Some(99.0), Some(101.0), 4.0, 30.0);
        assert!((bid.unwrap() - 99.96).abs() < 1e-9);
        assert!((ask.unwrap() - 100.04).abs() < 1e-9);

        let (bid, ask) = normalize_spread(Some(100.0), Some(99.9), Some(100.1), 4.0, 30.0);
        assert_eq!((bid, ask), (Some(99.9), Some(100.1)));
    }

    #[test]
    fn test_normalize_without_spot_passes_through() {
        assert_eq!(normalize_spread(None, Some(1.0), None, 4.0, 30.0), (Some(1.0), None));
    }

    #[test]
    fn test_raw_tick_quote() {
        assert!(RawTick::default().is_empty());
        assert!(RawTick::default().to_quote().is_none());
        let q = RawTick::new(None, Some(99.0), Some(101.0)).to_quote().unwrap();
        assert_eq!(q.price, 100.0);
    }
}
