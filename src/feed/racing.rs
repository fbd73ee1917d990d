//! Racing quote feed
//!
//! Polls every source concurrently and keeps the first one that returns a
//! price. The remaining requests are dropped, which cancels them.

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{QuoteSource, RawTick};
use crate::error::{Error, Result};

/// Races a set of [`QuoteSource`]s under one timeout
#[derive(Clone)]
pub struct RacingFeed {
    sources: Vec<Arc<dyn QuoteSource>>,
    timeout: Duration,
}

impl RacingFeed {
    pub fn new(sources: Vec<Arc<dyn QuoteSource>>, timeout: Duration) -> Self {
        Self { sources, timeout }
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// First source to return a price wins
    pub async fn race(&self) -> Result<RawTick> {
        if self.sources.is_empty() {
            return Err(Error::AllSourcesFailed("no quote sources configured".to_string()));
        }

        let attempts: Vec<BoxFuture<'static, Result<(String, RawTick)>>> = self
            .sources
            .iter()
            .cloned()
            .map(|source| {
                async move {
                    let tick = source.fetch().await?;
                    if tick.price.is_none() {
                        return Err(Error::Feed(format!("{} returned no price", source.name())));
                    }
                    Ok((source.name().to_string(), tick))
                }
                .boxed()
            })
            .collect();

        match tokio::time::timeout(self.timeout, future::select_ok(attempts)).await {
            Ok(Ok(((name, tick), _losers))) => {
                debug!("Tick from {}", name);
                Ok(tick)
            }
            Ok(Err(e)) => Err(Error::AllSourcesFailed(e.to_string())),
            Err(_) => Err(Error::FeedTimeout(self.timeout.as_millis() as u64)),
        }
    }
}
