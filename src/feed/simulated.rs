//! Seeded random-walk feed for offline runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;

use super::{MarketData, RawTick, SeedData};
use crate::error::{Error, Result};
use crate::market::{Bar, H1_SECS, M1_SECS};

struct WalkState {
    rng: StdRng,
    price: f64,
}

impl WalkState {
    /// One multiplicative step of at most `vol` in either direction
    fn step(&mut self, vol: f64) -> f64 {
        let shock: f64 = self.rng.gen_range(-1.0..1.0);
        self.price = (self.price * (1.0 + shock * vol)).max(0.01);
        self.price
    }

    fn bars(&mut self, end: i64, width: i64, count: usize, steps: usize, vol: f64) -> Vec<Bar> {
        let start = end - width * count as i64;
        (0..count)
            .map(|k| {
                let open = self.price;
                let mut bar = Bar::from_price(start + width * k as i64, open);
                for _ in 0..steps {
                    let p = self.step(vol);
                    bar.high = bar.high.max(p);
                    bar.low = bar.low.min(p);
                    bar.close = p;
                }
                bar.volume = self.rng.gen_range(5.0..50.0);
                bar
            })
            .collect()
    }
}

/// Deterministic random-walk market for `simulate` runs and tests
pub struct SimulatedFeed {
    state: Mutex<WalkState>,
    start: DateTime<Utc>,
    tick_vol: f64,
    failure_rate: f64,
    seed_m1_bars: usize,
    seed_h1_bars: usize,
}

impl SimulatedFeed {
    pub fn new(seed: u64, start_price: f64, start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(WalkState {
                rng: StdRng::seed_from_u64(seed),
                price: start_price,
            }),
            start,
            tick_vol: 0.0006,
            failure_rate: 0.02,
            seed_m1_bars: 300,
            seed_h1_bars: 400,
        }
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_tick_vol(mut self, vol: f64) -> Self {
        self.tick_vol = vol.max(0.0);
        self
    }
}

#[async_trait]
impl MarketData for SimulatedFeed {
    async fn seed(&self) -> Result<SeedData> {
        let mut walk = self.state.lock().await;
        let end = self.start.timestamp();
        // Hour history first, then the recent minutes continue from it
        let h1_end = end - end.rem_euclid(H1_SECS);
        let h1 = walk.bars(h1_end, H1_SECS, self.seed_h1_bars, 12, self.tick_vol * 3.0);
        let m1_end = end - end.rem_euclid(M1_SECS);
        let m1 = walk.bars(m1_end, M1_SECS, self.seed_m1_bars, 4, self.tick_vol);
        Ok(SeedData {
            m1,
            h1,
            source: "simulated".to_string(),
        })
    }

    async fn poll_tick(&self) -> Result<RawTick> {
        let mut walk = self.state.lock().await;
        if walk.rng.gen_bool(self.failure_rate) {
            return Err(Error::Feed("simulated outage".to_string()));
        }
        let price = walk.step(self.tick_vol);
        let half_bps: f64 = walk.rng.gen_range(0.5..3.0);
        let half = price * half_bps / 10_000.0;
        Ok(RawTick::new(Some(price), Some(price - half), Some(price + half)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn test_seed_shapes() {
        let feed = SimulatedFeed::new(7, 60_000.0, start());
        let seed = feed.seed().await.unwrap();
        assert_eq!(seed.m1.len(), 300);
        assert_eq!(seed.h1.len(), 400);
        assert!(seed.m1.windows(2).all(|w| w[1].time - w[0].time == M1_SECS));
        assert!(seed.m1.last().unwrap().time < start().timestamp());
        assert!(seed.h1.iter().all(|b| b.low <= b.close && b.close <= b.high));
    }

    #[tokio::test]
    async fn test_same_seed_same_path() {
        let a = SimulatedFeed::new(42, 100.0, start()).with_failure_rate(0.0);
        let b = SimulatedFeed::new(42, 100.0, start()).with_failure_rate(0.0);
        for _ in 0..20 {
            let (ta, tb) = (a.poll_tick().await.unwrap(), b.poll_tick().await.unwrap());
            assert_eq!(ta, tb);
            let q = ta.to_quote().unwrap();
            assert!(q.has_bbo());
        }
    }

    #[tokio::test]
    async fn test_always_failing_feed() {
        let feed = SimulatedFeed::new(1, 100.0, start()).with_failure_rate(1.0);
        assert!(feed.poll_tick().await.is_err());
    }
}
