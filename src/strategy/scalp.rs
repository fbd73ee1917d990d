//! m1 VWAP scalp
//!
//! Mean reversion against the session VWAP: the prior bar overshoots a
//! volatility-scaled band, the closed bar reclaims it with a quality candle,
//! volume and a z-score turn confirm, and the score clears a threshold that
//! rises under session stress.

use serde::{Deserialize, Serialize};

use super::trend_bias;
use super::types::{EntrySignal, Side, Signal, SignalMeta, StrategyKind, Timeframe, WaitReason};
use super::EntryStrategy;
use crate::market::bars::Bar;
use crate::market::indicators::{ema, median};
use crate::market::MarketContext;

/// m1 scalp configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalpConfig {
    pub min_bars: usize,
    /// ATR% band before VS scaling
    pub atr_pct_min: f64,
    pub atr_pct_max: f64,
    /// VWAP slope cap before VS scaling, fraction per `slope_lookback` bars
    pub vwap_slope_cap_pct: f64,
    pub slope_ema_len: usize,
    pub slope_lookback: usize,
    pub spread_cap_bps: f64,
    pub band_pct_min: f64,
    pub band_atr_mult: f64,
    /// Reclaim must close within this fraction of the band
    pub reclaim_band_frac: f64,
    pub tp_pct_floor: f64,
    pub tp_from_band_mult: f64,
    pub volume_lookback: usize,
    pub volume_mult: f64,
    pub z_min: f64,
    /// Hammer / shooting-star close position inside the bar range
    pub wick_close_pos: f64,
    pub counter_trend_adx: f64,
    pub counter_trend_rsi_low: f64,
    pub counter_trend_rsi_high: f64,
    pub rsi_low: f64,
    pub rsi_high: f64,
    pub h1_rsi_low: f64,
    pub h1_rsi_high: f64,
    pub macd_cross_lookback: usize,
    pub base_score: f64,
    pub bonus: f64,
    pub micro_bonus: f64,
    pub score_min: f64,
    pub stress_score_add: f64,
    pub stress_ps_below: f64,
    pub stress_loss_streak: u32,
    pub red_day_score_add: f64,
}

impl Default for ScalpConfig {
    fn default() -> Self {
        Self {
            min_bars: 40,
            atr_pct_min: 0.0005,
            atr_pct_max: 0.0175,
            vwap_slope_cap_pct: 0.0005,
            slope_ema_len: 10,
            slope_lookback: 3,
            spread_cap_bps: 8.0,
            band_pct_min: 0.0015,
            band_atr_mult: 0.75,
            reclaim_band_frac: 0.65,
            tp_pct_floor: 0.0015,
            tp_from_band_mult: 0.85,
            volume_lookback: 20,
            volume_mult: 2.0,
            z_min: 1.0,
            wick_close_pos: 0.75,
            counter_trend_adx: 20.0,
            counter_trend_rsi_low: 25.0,
            counter_trend_rsi_high: 75.0,
            rsi_low: 30.0,
            rsi_high: 70.0,
            h1_rsi_low: 35.0,
            h1_rsi_high: 65.0,
            macd_cross_lookback: 3,
            base_score: 4.0,
            bonus: 0.5,
            micro_bonus: 0.25,
            score_min: 5.25,
            stress_score_add: 0.5,
            stress_ps_below: 0.4,
            stress_loss_streak: 2,
            red_day_score_add: 0.25,
        }
    }
}

/// Candle quality behind a reclaim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimCandle {
    Engulfing,
    Wick,
}

/// m1 VWAP scalp evaluator
pub struct ScalpStrategy {
    config: ScalpConfig,
    /// Round-trip maker fee as a fraction of notional
    round_trip_fee: f64,
    fee_to_target_max: f64,
}

impl ScalpStrategy {
    pub fn new(config: ScalpConfig, round_trip_fee: f64, fee_to_target_max: f64) -> Self {
        Self {
            config,
            round_trip_fee,
            fee_to_target_max,
        }
    }

    /// Score threshold after session stress adjustments
    pub fn score_threshold(&self, ps: f64, loss_streak: u32, red_day_level: u8) -> f64 {
        let c = &self.config;
        let mut min = c.score_min;
        if ps < c.stress_ps_below || loss_streak >= c.stress_loss_streak {
            min += c.stress_score_add;
        }
        if red_day_level >= 1 {
            min += c.red_day_score_add;
        }
        min
    }

    /// Band overshoot on `prev` and reclaim on `cur`
    pub fn reclaim_side(&self, prev: &Bar, cur: &Bar, vwap_prev: f64, vwap_cur: f64, band: f64) -> Option<Side> {
        let inner = self.config.reclaim_band_frac * band;
        if prev.low <= vwap_prev * (1.0 - band) && cur.close >= vwap_cur * (1.0 - inner) && cur.is_green() {
            return Some(Side::Long);
        }
        if prev.high >= vwap_prev * (1.0 + band) && cur.close <= vwap_cur * (1.0 + inner) && cur.is_red() {
            return Some(Side::Short);
        }
        None
    }

    /// Directional body quality of the reclaim bar
    pub fn candle_quality(&self, side: Side, prev: &Bar, cur: &Bar) -> Option<ReclaimCandle> {
        let pos = cur.close_position();
        match side {
            Side::Long => {
                if prev.is_red() && cur.open <= prev.close && cur.close >= prev.open {
                    Some(ReclaimCandle::Engulfing)
                } else if pos >= self.config.wick_close_pos && cur.lower_wick() >= cur.body() {
                    Some(ReclaimCandle::Wick)
                } else {
                    None
                }
            }
            Side::Short => {
                if prev.is_green() && cur.open >= prev.close && cur.close <= prev.open {
                    Some(ReclaimCandle::Engulfing)
                } else if pos <= 1.0 - self.config.wick_close_pos && cur.upper_wick() >= cur.body() {
                    Some(ReclaimCandle::Wick)
                } else {
                    None
                }
            }
        }
    }
}

impl EntryStrategy for ScalpStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::M1Scalp
    }

    fn evaluate(&self, ctx: &MarketContext) -> Signal {
        let c = &self.config;
        let vs = ctx.session.vs;

        let Some(m1) = ctx.m1.as_ref() else {
            return Signal::Wait(WaitReason::Warmup { have: 0, need: c.min_bars });
        };
        let i = m1.i;
        if i + 1 < c.min_bars.max(c.volume_lookback + 1).max(c.slope_lookback + 1) {
            return Signal::Wait(WaitReason::Warmup { have: i + 1, need: c.min_bars });
        }

        let Some(spread_bps) = ctx.spread_bps() else {
            return Signal::Wait(WaitReason::NoQuote);
        };
        if spread_bps > c.spread_cap_bps {
            return Signal::Wait(WaitReason::SpreadWide { bps: spread_bps, max: c.spread_cap_bps });
        }

        let Some(atr_pct) = m1.atr_pct(i) else {
            return Signal::Wait(WaitReason::Warmup { have: i + 1, need: c.min_bars });
        };
        let (lo, hi) = (c.atr_pct_min * vs, c.atr_pct_max * vs);
        if atr_pct < lo || atr_pct > hi {
            return Signal::Wait(WaitReason::AtrBand { actual: atr_pct, min: lo, max: hi });
        }

        // Slope of the smoothed VWAP over the lookback
        let vwap_tail = &m1.vwap[..=i];
        let smooth = ema(vwap_tail, c.slope_ema_len);
        let base = smooth[i - c.slope_lookback];
        let slope = if base > 0.0 { (smooth[i] - base).abs() / base } else { 0.0 };
        let slope_cap = c.vwap_slope_cap_pct * vs;
        if slope > slope_cap {
            return Signal::Wait(WaitReason::VwapSlope { slope, cap: slope_cap });
        }

        let band_pct = c.band_pct_min.max(c.band_atr_mult * atr_pct);
        let tp_pct = c.tp_pct_floor.max(c.tp_from_band_mult * band_pct);

        let prev = &m1.bars[i - 1];
        let cur = m1.closed();
        let Some(side) = self.reclaim_side(prev, cur, m1.vwap[i - 1], m1.vwap[i], band_pct) else {
            return Signal::Wait(WaitReason::InsideBand);
        };
        let Some(candle) = self.candle_quality(side, prev, cur) else {
            return Signal::Wait(WaitReason::NoPattern);
        };

        let volumes: Vec<f64> = m1.bars[i - c.volume_lookback..i].iter().map(|b| b.volume).collect();
        let vol_ratio = match median(&volumes) {
            Some(med) if med > 0.0 => cur.volume / med,
            _ => 0.0,
        };
        if vol_ratio < c.volume_mult {
            return Signal::Wait(WaitReason::LowVolume { ratio: vol_ratio, need: c.volume_mult });
        }

        let z_cur = m1.zvwap[i];
        let z_confirmed = match (m1.zvwap[i - 1], z_cur, side) {
            (Some(zp), Some(zc), Side::Long) => zp <= -c.z_min && zc > zp,
            (Some(zp), Some(zc), Side::Short) => zp >= c.z_min && zc < zp,
            _ => false,
        };
        if !z_confirmed {
            return Signal::Wait(WaitReason::ZScoreUnconfirmed { z: z_cur });
        }

        let rsi = m1.rsi[i];
        if let Some(h1) = ctx.h1.as_ref() {
            let bias = trend_bias(h1);
            if !bias.allows(side) {
                let h1_adx = h1.adx[h1.i].unwrap_or(f64::MAX);
                let rsi_extreme = match (side, rsi) {
                    (Side::Long, Some(r)) => r < c.counter_trend_rsi_low,
                    (Side::Short, Some(r)) => r > c.counter_trend_rsi_high,
                    _ => false,
                };
                if !(h1_adx < c.counter_trend_adx * vs && rsi_extreme) {
                    return Signal::Wait(WaitReason::BiasConflict { bias });
                }
            }
        }

        // Score
        let mut score = c.base_score + 2.0 * c.micro_bonus;
        let rsi_prev = m1.rsi[i - 1];
        let rsi_turn = match (side, rsi, rsi_prev) {
            (Side::Long, Some(r), Some(p)) => r <= c.rsi_low && r > p,
            (Side::Short, Some(r), Some(p)) => r >= c.rsi_high && r < p,
            _ => false,
        };
        if rsi_turn {
            score += c.bonus;
        }
        let recent_cross = (i + 1).saturating_sub(c.macd_cross_lookback)..=i;
        let crossed = recent_cross.into_iter().any(|j| match side {
            Side::Long => m1.macd.crossed_up(j),
            Side::Short => m1.macd.crossed_down(j),
        });
        if crossed {
            score += c.bonus;
        }
        if let Some(h1_rsi) = ctx.h1.as_ref().and_then(|h1| h1.rsi[h1.i]) {
            let extreme = match side {
                Side::Long => h1_rsi <= c.h1_rsi_low,
                Side::Short => h1_rsi >= c.h1_rsi_high,
            };
            if extreme {
                score += c.bonus;
            }
        }
        let min = self.score_threshold(ctx.session.ps, ctx.session.loss_streak, ctx.session.red_day_level);
        if score < min {
            return Signal::Wait(WaitReason::ScoreLow { score, min });
        }

        let fee_ratio = self.round_trip_fee / tp_pct;
        if fee_ratio > self.fee_to_target_max {
            return Signal::Wait(WaitReason::FeeToTarget { ratio: fee_ratio, max: self.fee_to_target_max });
        }

        let distance = cur.close * tp_pct;
        Signal::Enter(EntrySignal {
            side,
            strategy: StrategyKind::M1Scalp,
            timeframe: Timeframe::M1,
            stop_distance: distance,
            take_distance: distance,
            score,
            meta: SignalMeta {
                band_pct: Some(band_pct),
                tp_pct: Some(tp_pct),
                micro_confirmed: Some(candle == ReclaimCandle::Engulfing),
                z_vwap: z_cur,
                rsi,
                atr_pct: Some(atr_pct),
                ..Default::default()
            },
        })
    }
}
