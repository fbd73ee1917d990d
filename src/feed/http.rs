//! HTTP quote sources and kline seeding
//!
//! Coinbase spot/buy/sell and the Binance book ticker are raced for ticks;
//! Binance klines seed the bar history with exponential backoff.

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{normalize_spread, FeedConfig, MarketData, QuoteSource, RacingFeed, RawTick, SeedData};
use crate::error::{Error, Result};
use crate::market::Bar;

fn build_client(config: &FeedConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .build()
        .map_err(|e| Error::Http(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct CoinbasePrice {
    data: CoinbaseAmount,
}

#[derive(Debug, Deserialize)]
struct CoinbaseAmount {
    amount: String,
}

/// Coinbase retail prices; buy is the ask, sell is the bid
pub struct CoinbaseSource {
    client: reqwest::Client,
    base_url: String,
    product: String,
    synth_half_spread_bps: f64,
    max_spread_bps: f64,
}

impl CoinbaseSource {
    pub fn new(client: reqwest::Client, config: &FeedConfig) -> Self {
        Self {
            client,
            base_url: config.coinbase_base_url.trim_end_matches('/').to_string(),
            product: config.coinbase_product.clone(),
            synth_half_spread_bps: config.synth_half_spread_bps,
            max_spread_bps: config.max_spread_bps,
        }
    }

    async fn price(&self, kind: &str) -> Option<f64> {
        let url = format!("{}/v2/prices/{}/{}", self.base_url, self.product, kind);
        let result: Result<CoinbasePrice> = async {
            let resp = self.client.get(&url).send().await?.error_for_status()?;
            Ok(resp.json().await?)
        }
        .await;
        match result {
            Ok(p) => p.data.amount.parse().ok(),
            Err(e) => {
                warn!("Coinbase {} failed: {}", kind, e);
                None
            }
        }
    }
}

#[async_trait]
impl QuoteSource for CoinbaseSource {
    fn name(&self) -> &str {
        "coinbase"
    }

    async fn fetch(&self) -> Result<RawTick> {
        let (spot, buy, sell) = tokio::join!(self.price("spot"), self.price("buy"), self.price("sell"));
        let (bid, ask) = normalize_spread(spot, sell, buy, self.synth_half_spread_bps, self.max_spread_bps);
        Ok(RawTick::new(spot, bid, ask))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    bid_price: String,
    ask_price: String,
}

/// Binance best bid/ask; price is the mid
pub struct BinanceBookSource {
    client: reqwest::Client,
    base_url: String,
    symbol: String,
}

impl BinanceBookSource {
    pub fn new(client: reqwest::Client, config: &FeedConfig) -> Self {
        Self {
            client,
            base_url: config.binance_base_url.trim_end_matches('/').to_string(),
            symbol: config.binance_symbol.clone(),
        }
    }
}

#[async_trait]
impl QuoteSource for BinanceBookSource {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch(&self) -> Result<RawTick> {
        let url = format!("{}/api/v3/ticker/bookTicker?symbol={}", self.base_url, self.symbol);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let book: BookTicker = resp.json().await?;
        let bid: f64 = book.bid_price.parse().map_err(|_| Error::Decode(book.bid_price.clone()))?;
        let ask: f64 = book.ask_price.parse().map_err(|_| Error::Decode(book.ask_price.clone()))?;
        Ok(RawTick::new(Some((bid + ask) / 2.0), Some(bid), Some(ask)))
    }
}

/// Binance kline history
pub struct BinanceKlines {
    client: reqwest::Client,
    base_url: String,
    symbol: String,
}

impl BinanceKlines {
    pub fn new(client: reqwest::Client, config: &FeedConfig) -> Self {
        Self {
            client,
            base_url: config.binance_base_url.trim_end_matches('/').to_string(),
            symbol: config.binance_symbol.clone(),
        }
    }

    pub async fn fetch(&self, interval: &str, limit: usize) -> Result<Vec<Bar>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, self.symbol, interval, limit
        );
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let rows: Vec<Vec<serde_json::Value>> = resp.json().await?;
        rows.iter().map(|row| parse_kline(row)).collect()
    }
}

/// `[open_time_ms, "open", "high", "low", "close", "volume", ...]`
fn parse_kline(row: &[serde_json::Value]) -> Result<Bar> {
    let num = |i: usize| -> Result<f64> {
        let v = row.get(i).ok_or_else(|| Error::Decode(format!("kline missing field {}", i)))?;
        match v {
            serde_json::Value::String(s) => s.parse().map_err(|_| Error::Decode(format!("kline field {}: {}", i, s))),
            serde_json::Value::Number(n) => n.as_f64().ok_or_else(|| Error::Decode(format!("kline field {}", i))),
            other => Err(Error::Decode(format!("kline field {}: {}", i, other))),
        }
    };
    Ok(Bar {
        time: (num(0)? / 1000.0) as i64,
        open: num(1)?,
        high: num(2)?,
        low: num(3)?,
        close: num(4)?,
        volume: num(5)?,
    })
}

/// Live data collaborator: racing quote sources plus Binance seeding
pub struct HttpMarketData {
    racing: RacingFeed,
    klines: BinanceKlines,
    config: FeedConfig,
}

impl HttpMarketData {
    pub fn new(config: FeedConfig) -> Result<Self> {
        let client = build_client(&config)?;
        let sources: Vec<Arc<dyn QuoteSource>> = vec![
            Arc::new(CoinbaseSource::new(client.clone(), &config)),
            Arc::new(BinanceBookSource::new(client.clone(), &config)),
        ];
        Ok(Self {
            racing: RacingFeed::new(sources, Duration::from_millis(config.tick_timeout_ms)),
            klines: BinanceKlines::new(client, &config),
            config,
        })
    }

    async fn seed_once(&self) -> Result<SeedData> {
        let (m1, h1) = tokio::try_join!(
            self.klines.fetch("1m", self.config.seed_m1_bars),
            self.klines.fetch("1h", self.config.seed_h1_bars),
        )?;
        if m1.is_empty() {
            return Err(Error::Feed("empty m1 kline response".to_string()));
        }
        Ok(SeedData {
            m1,
            h1,
            source: "binance".to_string(),
        })
    }
}

#[async_trait]
impl MarketData for HttpMarketData {
    async fn seed(&self) -> Result<SeedData> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.seed_initial_backoff_ms),
            max_interval: Duration::from_millis(self.config.seed_initial_backoff_ms * 8),
            max_elapsed_time: Some(Duration::from_secs(self.config.seed_max_elapsed_secs)),
            ..Default::default()
        };

        let seed = retry(policy, || async {
            match self.seed_once().await {
                Ok(seed) => Ok(seed),
                Err(e) if e.is_retryable() => {
                    warn!("Seed attempt failed, retrying: {}", e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await?;

        info!(
            "Seeded {} m1 / {} h1 bars from {} (quote sources: {})",
            seed.m1.len(),
            seed.h1.len(),
            seed.source,
            self.racing.source_names().join(", ")
        );
        Ok(seed)
    }

    async fn poll_tick(&self) -> Result<RawTick> {
        self.racing.race().await
    }
}
