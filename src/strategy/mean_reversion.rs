//! h1 mean reversion
//!
//! Fades stretched moves away from the Donchian midpoint while the hour
//! trend is weak. Entry depth grows as ADX falls; targets widen on
//! capitulation volume.

use serde::{Deserialize, Serialize};

use super::types::{EntrySignal, Side, Signal, SignalMeta, StrategyKind, Timeframe, WaitReason};
use super::EntryStrategy;
use crate::market::indicators::median;
use crate::market::MarketContext;

/// h1 mean reversion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanReversionConfig {
    pub min_bars: usize,
    /// ADX cap before VS scaling
    pub adx_cap: f64,
    pub k_entry: f64,
    pub low_adx: f64,
    pub k_entry_low_adx: f64,
    pub very_low_adx: f64,
    pub k_entry_very_low_adx: f64,
    pub k_stop: f64,
    pub k_take: f64,
    pub k_take_capitulation: f64,
    pub k_take_capitulation_hot: f64,
    pub hot_vs: f64,
    pub volume_lookback: usize,
    pub rsi_long_max: f64,
    pub rsi_short_min: f64,
    pub score: f64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            min_bars: 220,
            adx_cap: 17.0,
            k_entry: 0.75,
            low_adx: 14.0,
            k_entry_low_adx: 0.85,
            very_low_adx: 10.0,
            k_entry_very_low_adx: 0.95,
            k_stop: 0.85,
            k_take: 0.95,
            k_take_capitulation: 1.2,
            k_take_capitulation_hot: 1.1,
            hot_vs: 1.2,
            volume_lookback: 20,
            rsi_long_max: 35.0,
            rsi_short_min: 65.0,
            score: 3.5,
        }
    }
}

pub struct MeanReversionStrategy {
    config: MeanReversionConfig,
}

impl MeanReversionStrategy {
    pub fn new(config: MeanReversionConfig) -> Self {
        Self { config }
    }

    /// Required deviation in ATR units for the given ADX
    pub fn entry_multiple(&self, adx: f64) -> f64 {
        let c = &self.config;
        if adx < c.very_low_adx {
            c.k_entry_very_low_adx
        } else if adx < c.low_adx {
            c.k_entry_low_adx
        } else {
            c.k_entry
        }
    }
}

impl EntryStrategy for MeanReversionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::H1MeanReversion
    }

    fn evaluate(&self, ctx: &MarketContext) -> Signal {
        let c = &self.config;
        let vs = ctx.session.vs;

        let Some(h1) = ctx.h1.as_ref() else {
            return Signal::Wait(WaitReason::Warmup { have: 0, need: c.min_bars });
        };
        let i = h1.i;
        let (Some(adx), Some(atr), Some(rsi)) = (h1.adx[i], h1.atr[i], h1.rsi[i]) else {
            return Signal::Wait(WaitReason::Warmup { have: i + 1, need: c.min_bars });
        };
        if i + 1 < c.min_bars || i < c.volume_lookback {
            return Signal::Wait(WaitReason::Warmup { have: i + 1, need: c.min_bars });
        }

        let cap = c.adx_cap * vs;
        if adx >= cap {
            return Signal::Wait(WaitReason::AdxTooHigh { adx, cap });
        }
        if atr <= 0.0 {
            return Signal::Wait(WaitReason::Warmup { have: i + 1, need: c.min_bars });
        }

        let bar = h1.closed();
        let mid = (h1.don_hi[i] + h1.don_lo[i]) / 2.0;
        let deviation_atr = (bar.close - mid) / atr;
        let need = self.entry_multiple(adx);
        if deviation_atr.abs() < need {
            return Signal::Wait(WaitReason::NearMean { deviation_atr: deviation_atr.abs(), need });
        }

        let side = if deviation_atr < 0.0 { Side::Long } else { Side::Short };
        let rsi_ok = match side {
            Side::Long => rsi <= c.rsi_long_max,
            Side::Short => rsi >= c.rsi_short_min,
        };
        if !rsi_ok {
            return Signal::Wait(WaitReason::RsiNotExtreme { rsi });
        }

        let volumes: Vec<f64> = h1.bars[i - c.volume_lookback..i].iter().map(|b| b.volume).collect();
        let capitulation = adx < c.low_adx && median(&volumes).is_some_and(|m| bar.volume > m);
        let k_take = match (capitulation, vs > c.hot_vs) {
            (true, false) => c.k_take_capitulation,
            (true, true) => c.k_take_capitulation_hot,
            (false, _) => c.k_take,
        };

        Signal::Enter(EntrySignal {
            side,
            strategy: StrategyKind::H1MeanReversion,
            timeframe: Timeframe::H1,
            stop_distance: c.k_stop * atr,
            take_distance: k_take * atr,
            score: c.score,
            meta: SignalMeta {
                rsi: Some(rsi),
                adx: Some(adx),
                atr_pct: h1.atr_pct(i),
                capitulation: Some(capitulation),
                ..Default::default()
            },
        })
    }
}
