//! Market data model
//!
//! - `bars`: minute/hour bar series, hour aggregation, session VWAP
//! - `indicators`: pure indicator functions aligned to their input
//! - `context`: the per-decision snapshot the evaluators read

pub mod bars;
pub mod context;
pub mod indicators;

pub use bars::{Bar, BarSeries, H1_SECS, M1_SECS};
pub use context::{IndicatorConfig, MarketContext, Momentum, SessionView};

use serde::{Deserialize, Serialize};

/// Latest price and top of book
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

impl Quote {
    pub fn new(price: f64, bid: Option<f64>, ask: Option<f64>) -> Self {
        Self { price, bid, ask }
    }

    /// Both sides present and not crossed
    pub fn has_bbo(&self) -> bool {
        matches!((self.bid, self.ask), (Some(b), Some(a)) if b > 0.0 && a >= b)
    }

    pub fn spread(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) if self.has_bbo() => Some(a - b),
            _ => None,
        }
    }

    pub fn spread_bps(&self) -> Option<f64> {
        let mid = self.mid()?;
        self.spread().map(|s| s / mid * 10_000.0)
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) if self.has_bbo() => Some((a + b) / 2.0),
            _ => None,
        }
    }
}
