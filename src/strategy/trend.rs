//! h1 trend following
//!
//! Joins a Donchian break in the direction of the long EMA slope once ADX
//! clears a threshold that eases as session performance improves.

use serde::{Deserialize, Serialize};

use super::types::{EntrySignal, Side, Signal, SignalMeta, StrategyKind, Timeframe, WaitReason};
use super::EntryStrategy;
use crate::market::MarketContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub min_bars: usize,
    pub adx_base: f64,
    /// Threshold is adx_base * (1 - ps_relief * (1 - PS))
    pub ps_relief: f64,
    pub slope_lookback: usize,
    pub stop_atr: f64,
    pub take_atr: f64,
    pub score: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            min_bars: 220,
            adx_base: 25.0,
            ps_relief: 0.2,
            slope_lookback: 5,
            stop_atr: 1.8,
            take_atr: 1.4,
            score: 5.0,
        }
    }
}

pub struct TrendStrategy {
    config: TrendConfig,
}

impl TrendStrategy {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }

    pub fn adx_threshold(&self, ps: f64) -> f64 {
        let c = &self.config;
        c.adx_base * (1.0 - c.ps_relief * (1.0 - ps.clamp(0.0, 1.0)))
    }
}

impl EntryStrategy for TrendStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::H1Trend
    }

    fn evaluate(&self, ctx: &MarketContext) -> Signal {
        let c = &self.config;
        let Some(h1) = ctx.h1.as_ref() else {
            return Signal::Wait(WaitReason::Warmup { have: 0, need: c.min_bars });
        };
        let i = h1.i;
        let (Some(adx), Some(atr)) = (h1.adx[i], h1.atr[i]) else {
            return Signal::Wait(WaitReason::Warmup { have: i + 1, need: c.min_bars });
        };
        if i + 1 < c.min_bars || i < c.slope_lookback {
            return Signal::Wait(WaitReason::Warmup { have: i + 1, need: c.min_bars });
        }

        let min = self.adx_threshold(ctx.session.ps);
        if adx < min {
            return Signal::Wait(WaitReason::TrendWeak { adx, min });
        }

        let side = match h1.donchian_break(i) {
            1 => Side::Long,
            -1 => Side::Short,
            _ => return Signal::Wait(WaitReason::NoDonchianBreak),
        };
        let slope = h1.ema_trend[i] - h1.ema_trend[i - c.slope_lookback];
        if slope * side.sign() <= 0.0 {
            return Signal::Wait(WaitReason::SlopeDisagrees);
        }

        Signal::Enter(EntrySignal {
            side,
            strategy: StrategyKind::H1Trend,
            timeframe: Timeframe::H1,
            stop_distance: c.stop_atr * atr,
            take_distance: c.take_atr * atr,
            score: c.score,
            meta: SignalMeta {
                adx: Some(adx),
                atr_pct: h1.atr_pct(i),
                rsi: h1.rsi[i],
                ..Default::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::indicators::{assert_approx, make_bars};
    use crate::market::{IndicatorConfig, Quote, SessionView};
    use chrono::Utc;

    fn evaluate(closes: &[f64], ps: f64) -> Signal {
        let h1 = make_bars(closes);
        let session = SessionView { ps, ..Default::default() };
        let ctx = MarketContext::build(&[], &h1, Quote::default(), session, &IndicatorConfig::default(), Utc::now());
        TrendStrategy::new(TrendConfig::default()).evaluate(&ctx)
    }

    #[test]
    fn test_rising_breakout_goes_long() {
        let closes: Vec<f64> = (0..250).map(|k| 100.0 + 2.0 * k as f64).collect();
        let Signal::Enter(entry) = evaluate(&closes, 0.5) else {
            panic!("expected entry");
        };
        assert_eq!(entry.side, Side::Long);
        assert_approx(entry.stop_distance, 1.8 * 4.0, 1e-6);
        assert_approx(entry.take_distance, 1.4 * 4.0, 1e-6);
    }

    #[test]
    fn test_falling_breakout_goes_short() {
        let closes: Vec<f64> = (0..250).map(|k| 1_000.0 - 2.0 * k as f64).collect();
        let Signal::Enter(entry) = evaluate(&closes, 0.5) else {
            panic!("expected entry");
        };
        assert_eq!(entry.side, Side::Short);
    }

    #[test]
    fn test_flat_market_is_weak() {
        let closes: Vec<f64> = (0..250).map(|k| if k % 2 == 0 { 100.0 } else { 101.0 }).collect();
        assert!(matches!(evaluate(&closes, 0.5), Signal::Wait(WaitReason::TrendWeak { .. })));
    }

    #[test]
    fn test_threshold_eases_with_performance() {
        let s = TrendStrategy::new(TrendConfig::default());
        assert_approx(s.adx_threshold(1.0), 25.0, 1e-12);
        assert_approx(s.adx_threshold(0.5), 22.5, 1e-12);
        assert_approx(s.adx_threshold(0.0), 20.0, 1e-12);
    }
}
