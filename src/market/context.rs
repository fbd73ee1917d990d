//! Market context
//!
//! A per-decision snapshot of both bar series with every indicator the
//! evaluators read precomputed once, aligned to the closed bar index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bars::{session_vwap, Bar};
use super::indicators::{self, Macd};
use super::Quote;

/// Indicator lengths shared by the classifier and the evaluators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub atr_len: usize,
    pub adx_len: usize,
    pub rsi_len: usize,
    pub ema_trend_len: usize,
    pub donchian_len: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    /// Rolling window for the close-vs-VWAP z-score (m1 bars)
    pub zvwap_window: usize,
    /// Window for the ATR% median behind VS and the macro spike check
    pub atr_median_window: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            atr_len: 14,
            adx_len: 14,
            rsi_len: 14,
            ema_trend_len: 200,
            donchian_len: 20,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            zvwap_window: 40,
            atr_median_window: 50,
        }
    }
}

/// Session scalars the evaluators are allowed to read
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionView {
    pub vs: f64,
    pub ps: f64,
    pub loss_streak: u32,
    pub red_day_level: u8,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            vs: 1.0,
            ps: 0.5,
            loss_streak: 0,
            red_day_level: 0,
        }
    }
}

/// Minute-series view with its derived indicators
#[derive(Debug, Clone)]
pub struct M1View<'a> {
    pub bars: &'a [Bar],
    /// Closed bar index
    pub i: usize,
    pub vwap: Vec<f64>,
    pub atr: Vec<Option<f64>>,
    pub rsi: Vec<Option<f64>>,
    pub macd: Macd,
    pub zvwap: Vec<Option<f64>>,
}

impl M1View<'_> {
    pub fn closed(&self) -> &Bar {
        &self.bars[self.i]
    }

    /// ATR as a fraction of close on bar `i`
    pub fn atr_pct(&self, i: usize) -> Option<f64> {
        let close = self.bars.get(i)?.close;
        self.atr.get(i).copied().flatten().filter(|_| close > 0.0).map(|a| a / close)
    }
}

/// Hour-series view with its derived indicators
#[derive(Debug, Clone)]
pub struct H1View<'a> {
    pub bars: &'a [Bar],
    /// Closed bar index
    pub i: usize,
    pub atr: Vec<Option<f64>>,
    pub true_range: Vec<f64>,
    pub adx: Vec<Option<f64>>,
    pub ema_trend: Vec<f64>,
    pub rsi: Vec<Option<f64>>,
    pub macd: Macd,
    pub don_hi: Vec<f64>,
    pub don_lo: Vec<f64>,
}

impl H1View<'_> {
    pub fn closed(&self) -> &Bar {
        &self.bars[self.i]
    }

    pub fn atr_pct(&self, i: usize) -> Option<f64> {
        let close = self.bars.get(i)?.close;
        self.atr.get(i).copied().flatten().filter(|_| close > 0.0).map(|a| a / close)
    }

    /// Close of bar `i` broke the Donchian channel of the bars before it.
    /// Returns +1 for an upside break, -1 for downside, 0 otherwise.
    pub fn donchian_break(&self, i: usize) -> i8 {
        if i == 0 || i >= self.bars.len() {
            return 0;
        }
        let close = self.bars[i].close;
        if close > self.don_hi[i - 1] {
            1
        } else if close < self.don_lo[i - 1] {
            -1
        } else {
            0
        }
    }
}

/// Everything one decision needs, computed once
#[derive(Debug, Clone)]
pub struct MarketContext<'a> {
    pub m1: Option<M1View<'a>>,
    pub h1: Option<H1View<'a>>,
    pub quote: Quote,
    pub session: SessionView,
    pub now: DateTime<Utc>,
}

impl<'a> MarketContext<'a> {
    pub fn build(
        m1: &'a [Bar],
        h1: &'a [Bar],
        quote: Quote,
        session: SessionView,
        cfg: &IndicatorConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            m1: build_m1(m1, cfg),
            h1: build_h1(h1, cfg),
            quote,
            session,
            now,
        }
    }

    /// Bid/ask spread in basis points of mid, when both sides are known
    pub fn spread_bps(&self) -> Option<f64> {
        self.quote.spread_bps()
    }
}

fn build_m1<'a>(bars: &'a [Bar], cfg: &IndicatorConfig) -> Option<M1View<'a>> {
    let i = bars.len().checked_sub(2)?;
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let vwap = session_vwap(bars);
    let zvwap = zscore_vs_vwap(&closes, &vwap, cfg.zvwap_window);
    Some(M1View {
        bars,
        i,
        atr: indicators::atr(bars, cfg.atr_len),
        rsi: indicators::rsi(&closes, cfg.rsi_len),
        macd: indicators::macd(&closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal),
        vwap,
        zvwap,
    })
}

fn build_h1<'a>(bars: &'a [Bar], cfg: &IndicatorConfig) -> Option<H1View<'a>> {
    let i = bars.len().checked_sub(2)?;
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let (don_hi, don_lo) = indicators::donchian(bars, cfg.donchian_len);
    Some(H1View {
        bars,
        i,
        atr: indicators::atr(bars, cfg.atr_len),
        true_range: indicators::true_range(bars),
        adx: indicators::adx(bars, cfg.adx_len),
        ema_trend: indicators::ema(&closes, cfg.ema_trend_len),
        rsi: indicators::rsi(&closes, cfg.rsi_len),
        macd: indicators::macd(&closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal),
        don_hi,
        don_lo,
    })
}

/// z-score of (close - VWAP) against its own rolling deviation window
pub fn zscore_vs_vwap(closes: &[f64], vwap: &[f64], window: usize) -> Vec<Option<f64>> {
    let dev: Vec<f64> = closes.iter().zip(vwap).map(|(c, v)| c - v).collect();
    (0..dev.len())
        .map(|j| {
            if window < 2 || j + 1 < window {
                return None;
            }
            let sd = indicators::std_dev(&dev[j + 1 - window..=j])?;
            (sd > 0.0).then(|| dev[j] / sd)
        })
        .collect()
}

/// Ratio of the latest closed m1 ATR% to its median over `window` closed bars
pub fn atr_pct_ratio(m1: &[Bar], cfg: &IndicatorConfig) -> Option<f64> {
    let i = m1.len().checked_sub(2)?;
    let atr = indicators::atr(m1, cfg.atr_len);
    let pct: Vec<f64> = (0..=i)
        .filter_map(|j| atr[j].filter(|_| m1[j].close > 0.0).map(|a| a / m1[j].close))
        .collect();
    if pct.len() < cfg.atr_median_window {
        return None;
    }
    let current = *pct.last()?;
    let med = indicators::median(&pct[pct.len() - cfg.atr_median_window..])?;
    (med > 0.0).then(|| current / med)
}

/// Momentum readings the position manager needs every tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Momentum {
    pub rsi: Option<f64>,
    pub rsi_prev: Option<f64>,
    pub macd_hist: Option<f64>,
    pub macd_hist_prev: Option<f64>,
}

impl Momentum {
    /// Histogram growing in the direction of `dir` (+1 long, -1 short)
    pub fn accelerating(&self, dir: f64, mult: f64) -> bool {
        match (self.macd_hist, self.macd_hist_prev) {
            (Some(h), Some(p)) => h * dir > 0.0 && h * dir >= (p * dir).max(0.0) * mult && h * dir > p * dir,
            _ => false,
        }
    }

    /// Histogram shrinking against `dir`
    pub fn fading(&self, dir: f64) -> bool {
        match (self.macd_hist, self.macd_hist_prev) {
            (Some(h), Some(p)) => h * dir < p * dir,
            _ => false,
        }
    }
}

/// Momentum on the latest closed m1 bar, computed over a bounded tail
pub fn momentum(m1: &[Bar], cfg: &IndicatorConfig) -> Momentum {
    let tail = &m1[m1.len().saturating_sub(300)..];
    let Some(i) = tail.len().checked_sub(2) else {
        return Momentum::default();
    };
    let closes: Vec<f64> = tail.iter().map(|b| b.close).collect();
    let rsi = indicators::rsi(&closes, cfg.rsi_len);
    let macd = indicators::macd(&closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal);
    Momentum {
        rsi: rsi[i],
        rsi_prev: i.checked_sub(1).and_then(|p| rsi[p]),
        macd_hist: Some(macd.hist[i]),
        macd_hist_prev: i.checked_sub(1).map(|p| macd.hist[p]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::indicators::make_bars;

    #[test]
    fn test_closed_index_is_second_to_last() {
        let bars = make_bars(&[1.0, 2.0, 3.0]);
        let ctx = MarketContext::build(
            &bars,
            &bars,
            Quote::default(),
            SessionView::default(),
            &IndicatorConfig::default(),
            Utc::now(),
        );
        assert_eq!(ctx.m1.as_ref().map(|v| v.i), Some(1));
        assert_eq!(ctx.h1.as_ref().map(|v| v.closed().close), Some(2.0));
    }

    #[test]
    fn test_empty_series_have_no_view() {
        let ctx = MarketContext::build(
            &[],
            &[],
            Quote::default(),
            SessionView::default(),
            &IndicatorConfig::default(),
            Utc::now(),
        );
        assert!(ctx.m1.is_none());
        assert!(ctx.h1.is_none());
    }

    #[test]
    fn test_zscore_flat_is_undefined_then_signed() {
        let vwap = vec![100.0; 6];
        let closes = vec![100.0, 101.0, 99.0, 100.0, 101.0, 95.0];
        let z = zscore_vs_vwap(&closes, &vwap, 3);
        assert_eq!(z[0], None);
        assert_eq!(z[1], None);
        assert!(z[5].unwrap() < -1.0);
    }

    #[test]
    fn test_atr_ratio_needs_history() {
        let bars = make_bars(&vec![100.0; 30]);
        assert_eq!(atr_pct_ratio(&bars, &IndicatorConfig::default()), None);
        let bars = make_bars(&vec![100.0; 120]);
        let ratio = atr_pct_ratio(&bars, &IndicatorConfig::default()).unwrap();
        assert!((ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_donchian_break_uses_prior_channel() {
        let mut closes = vec![100.0; 25];
        closes.push(110.0);
        closes.push(110.0);
        let bars = make_bars(&closes);
        let ctx = MarketContext::build(
            &bars,
            &bars,
            Quote::default(),
            SessionView::default(),
            &IndicatorConfig::default(),
            Utc::now(),
        );
        let h1 = ctx.h1.unwrap();
        assert_eq!(h1.donchian_break(25), 1);
        assert_eq!(h1.donchian_break(10), 0);
    }
}
