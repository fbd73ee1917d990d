//! Rolling windows over wall-clock time
//!
//! Breakers count events (slow ticks, taker failures, fee violations) and
//! track equity marks inside a trailing window. Every call takes `now`
//! explicitly so the windows are deterministic under test.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Rolling window for time-stamped samples
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<(DateTime<Utc>, f64)>,
    window: Duration,
    max_samples: usize,
}

impl RollingWindow {
    pub fn new(window: Duration) -> Self {
        Self::with_max_samples(window, 1000)
    }

    pub fn with_max_samples(window: Duration, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
            max_samples,
        }
    }

    /// Add a sample at `now`, dropping anything that has aged out
    pub fn add(&mut self, now: DateTime<Utc>, value: f64) {
        self.samples.push_back((now, value));
        self.prune(now);
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Remove samples older than the window
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while let Some((time, _)) = self.samples.front() {
            if *time < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples still inside the window at `now`
    pub fn count_since(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        self.samples.iter().filter(|(t, _)| *t >= cutoff).count()
    }

    pub fn sum(&self) -> f64 {
        self.samples.iter().map(|(_, v)| v).sum()
    }

    pub fn max(&self) -> Option<f64> {
        self.samples.iter().map(|(_, v)| *v).reduce(f64::max)
    }

    pub fn latest(&self) -> Option<(DateTime<Utc>, f64)> {
        self.samples.back().copied()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
