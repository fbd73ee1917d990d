//! Bar series maintenance
//!
//! Minute bars are built from ticks; hour bars are re-derived from the minute
//! series and merged into seeded hour history. Series stay time-ordered and
//! deduplicated by bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minute bucket width in seconds
pub const M1_SECS: i64 = 60;
/// Hour bucket width in seconds
pub const H1_SECS: i64 = 3_600;
const DAY_SECS: i64 = 86_400;

/// A single OHLCV candle keyed by its bucket start (unix seconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// A bar opened by a single print
    pub fn from_price(time: i64, price: f64) -> Self {
        Self {
            time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1.0,
        }
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    pub fn is_red(&self) -> bool {
        self.close < self.open
    }

    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    /// Where the close sits inside the bar range, 0.0 = low, 1.0 = high
    pub fn close_position(&self) -> f64 {
        let range = self.range();
        if range <= 0.0 {
            return 0.5;
        }
        (self.close - self.low) / range
    }

    /// True range against the previous close
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        match prev_close {
            Some(pc) => self
                .range()
                .max((self.high - pc).abs())
                .max((self.low - pc).abs()),
            None => self.range(),
        }
    }
}

/// Start of the bucket containing `ts`
pub fn bucket_start(ts: i64, bucket_secs: i64) -> i64 {
    ts - ts.rem_euclid(bucket_secs)
}

/// UTC day index of a unix timestamp
pub fn utc_day(ts: i64) -> i64 {
    ts.div_euclid(DAY_SECS)
}

/// A capped, time-ordered bar series with one bar per bucket
#[derive(Debug, Clone)]
pub struct BarSeries {
    bucket_secs: i64,
    cap: usize,
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(bucket_secs: i64, cap: usize) -> Self {
        Self {
            bucket_secs,
            cap: cap.max(2),
            bars: Vec::new(),
        }
    }

    /// Build from seed history: normalizes bucket times, sorts, keeps the
    /// last bar per bucket.
    pub fn from_seed(bucket_secs: i64, cap: usize, seed: Vec<Bar>) -> Self {
        let mut series = Self::new(bucket_secs, cap);
        let mut bars: Vec<Bar> = seed
            .into_iter()
            .filter(|b| b.close.is_finite() && b.close > 0.0)
            .map(|mut b| {
                b.time = bucket_start(b.time, bucket_secs);
                b
            })
            .collect();
        bars.sort_by_key(|b| b.time);
        for bar in bars {
            match series.bars.last_mut() {
                Some(last) if last.time == bar.time => *last = bar,
                _ => series.bars.push(bar),
            }
        }
        series.trim();
        series
    }

    pub fn bucket_secs(&self) -> i64 {
        self.bucket_secs
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Index of the most recent closed bar (the last bar is still forming)
    pub fn closed_index(&self) -> Option<usize> {
        self.bars.len().checked_sub(2)
    }

    pub fn closed(&self) -> Option<&Bar> {
        self.closed_index().map(|i| &self.bars[i])
    }

    /// Fold a trade print into the forming bar. Returns true when the print
    /// opened a new bucket. Prints older than the forming bucket are ignored.
    pub fn push_price(&mut self, at: DateTime<Utc>, price: f64) -> bool {
        if !price.is_finite() || price <= 0.0 {
            return false;
        }
        let bucket = bucket_start(at.timestamp(), self.bucket_secs);
        match self.bars.last_mut() {
            Some(last) if last.time == bucket => {
                last.high = last.high.max(price);
                last.low = last.low.min(price);
                last.close = price;
                last.volume += 1.0;
                false
            }
            Some(last) if last.time > bucket => false,
            _ => {
                self.bars.push(Bar::from_price(bucket, price));
                self.trim();
                true
            }
        }
    }

    /// Insert or replace the bar for `bar.time`, keeping order
    pub fn upsert(&mut self, bar: Bar) {
        match self.bars.binary_search_by_key(&bar.time, |b| b.time) {
            Ok(i) => self.bars[i] = bar,
            Err(i) => {
                self.bars.insert(i, bar);
                self.trim();
            }
        }
    }

    fn trim(&mut self) {
        if self.bars.len() > self.cap {
            let excess = self.bars.len() - self.cap;
            self.bars.drain(..excess);
        }
    }
}

/// Re-derive hour bars from minute bars and merge them into `h1`.
///
/// An hour whose first minute is missing from `m1` only replaces an existing
/// seeded bar when none exists yet, so partial leading hours never clobber
/// complete history.
pub fn aggregate_into(m1: &[Bar], h1: &mut BarSeries) {
    let width = h1.bucket_secs();
    let mut current: Option<(Bar, bool)> = None;

    for m in m1 {
        let hour = bucket_start(m.time, width);
        if let Some((agg, _)) = current.as_mut().filter(|(agg, _)| agg.time == hour) {
            agg.high = agg.high.max(m.high);
            agg.low = agg.low.min(m.low);
            agg.close = m.close;
            agg.volume += m.volume;
            continue;
        }
        merge_hour(current.take(), h1);
        current = Some((Bar { time: hour, ..*m }, m.time == hour));
    }
    merge_hour(current, h1);
}

fn merge_hour(entry: Option<(Bar, bool)>, h1: &mut BarSeries) {
    if let Some((bar, starts_on_hour)) = entry {
        let exists = h1.bars().binary_search_by_key(&bar.time, |b| b.time).is_ok();
        if starts_on_hour || !exists {
            h1.upsert(bar);
        }
    }
}

/// Cumulative typical-price VWAP, reset at each UTC day boundary
pub fn session_vwap(bars: &[Bar]) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    let mut day = i64::MIN;
    let mut pv = 0.0;
    let mut vol = 0.0;
    for bar in bars {
        let d = utc_day(bar.time);
        if d != day {
            day = d;
            pv = 0.0;
            vol = 0.0;
        }
        let v = bar.volume.max(0.0);
        pv += bar.typical_price() * v;
        vol += v;
        out.push(if vol > 0.0 { pv / vol } else { bar.close });
    }
    out
}
