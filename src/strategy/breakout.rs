//! h1 breakout
//!
//! Volatility squeeze followed by an expansion bar that breaks the Donchian
//! channel on rising volume with a same-bar MACD cross.

use serde::{Deserialize, Serialize};

use super::types::{EntrySignal, Side, Signal, SignalMeta, StrategyKind, Timeframe, WaitReason};
use super::EntryStrategy;
use crate::market::indicators::median;
use crate::market::MarketContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutConfig {
    pub min_bars: usize,
    pub atr_median_window: usize,
    /// Prior ATR must sit at or below this fraction of its median
    pub squeeze_frac: f64,
    /// Breakout bar true range must reach this multiple of the ATR median
    pub expansion_mult: f64,
    pub volume_lookback: usize,
    /// Volume multiple is clamp(volume_vs_mult * VS, min, max)
    pub volume_vs_mult: f64,
    pub volume_mult_min: f64,
    pub volume_mult_max: f64,
    pub stop_atr: f64,
    pub take_atr: f64,
    pub score: f64,
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            min_bars: 220,
            atr_median_window: 30,
            squeeze_frac: 0.6,
            expansion_mult: 1.4,
            volume_lookback: 20,
            volume_vs_mult: 1.3,
            volume_mult_min: 1.1,
            volume_mult_max: 2.0,
            stop_atr: 1.2,
            take_atr: 1.1,
            score: 5.0,
        }
    }
}

pub struct BreakoutStrategy {
    config: BreakoutConfig,
}

impl BreakoutStrategy {
    pub fn new(config: BreakoutConfig) -> Self {
        Self { config }
    }
}

impl EntryStrategy for BreakoutStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::H1Breakout
    }

    fn evaluate(&self, ctx: &MarketContext) -> Signal {
        let c = &self.config;
        let Some(h1) = ctx.h1.as_ref() else {
            return Signal::Wait(WaitReason::Warmup { have: 0, need: c.min_bars });
        };
        let i = h1.i;
        let lookback = c.atr_median_window.max(c.volume_lookback);
        let (Some(atr), Some(atr_prev)) = (h1.atr[i], i.checked_sub(1).and_then(|p| h1.atr[p])) else {
            return Signal::Wait(WaitReason::Warmup { have: i + 1, need: c.min_bars });
        };
        if i + 1 < c.min_bars || i < lookback {
            return Signal::Wait(WaitReason::Warmup { have: i + 1, need: c.min_bars });
        }

        let atr_window: Vec<f64> = h1.atr[i - c.atr_median_window..i].iter().flatten().copied().collect();
        let Some(atr_med) = median(&atr_window).filter(|m| *m > 0.0) else {
            return Signal::Wait(WaitReason::Warmup { have: i + 1, need: c.min_bars });
        };
        if atr_prev > c.squeeze_frac * atr_med {
            return Signal::Wait(WaitReason::NoSqueeze);
        }
        if h1.true_range[i] < c.expansion_mult * atr_med {
            return Signal::Wait(WaitReason::NoExpansion);
        }

        let side = match h1.donchian_break(i) {
            1 => Side::Long,
            -1 => Side::Short,
            _ => return Signal::Wait(WaitReason::NoDonchianBreak),
        };

        let need = (c.volume_vs_mult * ctx.session.vs).clamp(c.volume_mult_min, c.volume_mult_max);
        let volumes: Vec<f64> = h1.bars[i - c.volume_lookback..i].iter().map(|b| b.volume).collect();
        let ratio = match median(&volumes) {
            Some(m) if m > 0.0 => h1.closed().volume / m,
            _ => 0.0,
        };
        if ratio < need {
            return Signal::Wait(WaitReason::LowVolume { ratio, need });
        }

        let crossed = match side {
            Side::Long => h1.macd.crossed_up(i),
            Side::Short => h1.macd.crossed_down(i),
        };
        if !crossed {
            return Signal::Wait(WaitReason::NoMacdCross);
        }

        Signal::Enter(EntrySignal {
            side,
            strategy: StrategyKind::H1Breakout,
            timeframe: Timeframe::H1,
            stop_distance: c.stop_atr * atr,
            take_distance: c.take_atr * atr,
            score: c.score,
            meta: SignalMeta {
                atr_pct: h1.atr_pct(i),
                adx: h1.adx[i],
                rsi: h1.rsi[i],
                ..Default::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{Bar, IndicatorConfig, Quote, SessionView};
    use chrono::Utc;

    /// Wide flat bars, a tight squeeze, then an upside expansion bar
    fn squeeze_then_break(volume: f64) -> Vec<Bar> {
        let mut bars = Vec::new();
        for k in 0..215 {
            bars.push(Bar { time: k * 3600, open: 100.0, high: 103.0, low: 97.0, close: 100.0, volume: 1.0 });
        }
        for k in 215..245 {
            bars.push(Bar { time: k * 3600, open: 100.0, high: 100.1, low: 99.9, close: 100.0, volume: 1.0 });
        }
        bars.push(Bar { time: 245 * 3600, open: 100.0, high: 104.2, low: 99.9, close: 104.0, volume });
        bars.push(Bar::from_price(246 * 3600, 104.0));
        bars
    }

    fn evaluate(h1: &[Bar]) -> Signal {
        let ctx = MarketContext::build(&[], h1, Quote::default(), SessionView::default(), &IndicatorConfig::default(), Utc::now());
        BreakoutStrategy::new(BreakoutConfig::default()).evaluate(&ctx)
    }

    #[test]
    fn test_squeeze_expansion_break_goes_long() {
        let h1 = squeeze_then_break(3.0);
        let Signal::Enter(entry) = evaluate(&h1) else {
            panic!("expected entry, got {:?}", evaluate(&h1));
        };
        assert_eq!(entry.side, Side::Long);
        assert_eq!(entry.score, 5.0);
        assert!(entry.stop_distance > entry.take_distance);
    }

    #[test]
    fn test_breakout_needs_volume() {
        let h1 = squeeze_then_break(1.0);
        assert!(matches!(evaluate(&h1), Signal::Wait(WaitReason::LowVolume { .. })));
    }

    #[test]
    fn test_no_squeeze_in_steady_volatility() {
        let mut h1: Vec<Bar> = (0..246)
            .map(|k| Bar { time: k * 3600, open: 100.0, high: 103.0, low: 97.0, close: 100.0, volume: 1.0 })
            .collect();
        h1.push(Bar::from_price(246 * 3600, 100.0));
        assert_eq!(evaluate(&h1), Signal::Wait(WaitReason::NoSqueeze));
    }
}
