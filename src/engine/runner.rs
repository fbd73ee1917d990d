//! Async engine loop
//!
//! Polls the data collaborator on a fixed cadence (slower while the feed is
//! stale) and advances the shared [`EngineState`] once per tick until the
//! shutdown token fires.

use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handle::EngineHandle;
use super::state::EngineState;
use super::status::StatusSnapshot;
use super::EngineConfig;
use crate::config::Config;
use crate::error::Result;
use crate::feed::simulated::SimulatedFeed;
use crate::feed::{MarketData, RawTick};

pub struct EngineRunner<F: MarketData> {
    feed: F,
    handle: EngineHandle,
    config: EngineConfig,
    shutdown: CancellationToken,
}

impl<F: MarketData> EngineRunner<F> {
    pub fn new(feed: F, config: &Config, shutdown: CancellationToken) -> Self {
        Self {
            feed,
            handle: EngineHandle::new(EngineState::new(config)),
            config: config.engine.clone(),
            shutdown,
        }
    }

    /// Handle for the control surface; valid for the runner's lifetime
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Seed, then tick until shutdown
    pub async fn run(&self) -> Result<()> {
        match self.feed.seed().await {
            Ok(seed) => self.handle.write().await.seed(seed, Utc::now()),
            Err(e) => warn!("Seeding failed, starting from live ticks only: {}", e),
        }

        info!(interval_ms = self.config.tick_interval_ms, "engine started");
        let mut last_status = Instant::now();

        loop {
            let interval = if self.handle.read().await.feed_stale() {
                self.config.stale_poll_interval_ms
            } else {
                self.config.tick_interval_ms
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("engine shutting down");
                    break;
                }
                _ = sleep(Duration::from_millis(interval)) => {
                    self.tick_once().await;
                }
            }

            if self.config.status_log_secs > 0 && last_status.elapsed().as_secs() >= self.config.status_log_secs {
                info!("{}", self.handle.status().await.summary_line());
                last_status = Instant::now();
            }
        }

        let status = self.handle.status().await;
        info!("Final: {}", status.summary_line());
        Ok(())
    }

    async fn tick_once(&self) {
        let started = Instant::now();
        let tick = match self.feed.poll_tick().await {
            Ok(tick) => tick,
            Err(e) => {
                debug!("Tick failed: {}", e);
                RawTick::default()
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut state = self.handle.write().await;
        if let Err(e) = state.on_tick(tick, Utc::now(), Some(latency_ms)) {
            error!("Tick processing failed: {}", e);
        }
    }
}

/// Run `ticks` simulated ticks on virtual time starting at `start` and
/// return the final status
pub async fn simulate(config: &Config, ticks: u64, seed: u64, start: DateTime<Utc>) -> Result<StatusSnapshot> {
    let feed = SimulatedFeed::new(seed, 60_000.0, start);
    let mut state = EngineState::new(config);
    state.seed(feed.seed().await?, start);

    let step = ChronoDuration::milliseconds(config.engine.tick_interval_ms.max(1) as i64);
    let mut now = start;
    let mut closed = 0usize;
    for _ in 0..ticks {
        let tick = feed.poll_tick().await.unwrap_or_default();
        let report = state.on_tick(tick, now, None)?;
        closed += report.trades.len();
        now += step;
    }

    info!(ticks, closed, "simulation finished");
    Ok(state.status(now))
}
