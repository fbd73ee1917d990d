//! Sizing & Execution Gate
//!
//! Turns an entry candidate into a concrete order plan or a reject reason.
//! Checks run in a fixed order and the first failure wins; rejects are the
//! expected path and are never escalated as errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::venue::{Rounding, VenueConfig};
use crate::market::{Momentum, Quote};
use crate::risk::{RiskBlock, SessionRiskState, TradingHoursConfig};
use crate::strategy::{EntrySignal, Regime, Side, StrategyKind, Timeframe};

/// Why the gate refused to place an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    StaleFeed,
    NoBbo,
    Blocked { block: RiskBlock },
    M1Cooldown,
    BottomHours,
    RedDayOffHours,
    ConfirmationRequired,
    InvalidDistance { stop: f64, take: f64 },
    LiveRiskCap { open_risk: f64, cap: f64 },
    DepthInsufficient { ratio: f64, min: f64 },
    SlippageTooHigh { slip_r: f64, cap: f64 },
    BelowMinNotional { notional: f64, min: f64 },
    FeeToTarget { ratio: f64, max: f64 },
}

impl RejectReason {
    /// Get human-readable description
    pub fn description(&self) -> String {
        match self {
            RejectReason::StaleFeed => "feed stale".to_string(),
            RejectReason::NoBbo => "no bid/ask".to_string(),
            RejectReason::Blocked { block } => block.description(),
            RejectReason::M1Cooldown => "m1 cooldown".to_string(),
            RejectReason::BottomHours => "m1 blocked in bottom hours".to_string(),
            RejectReason::RedDayOffHours => "red day: top hours only".to_string(),
            RejectReason::ConfirmationRequired => "loss streak: micro confirmation required".to_string(),
            RejectReason::InvalidDistance { stop, take } => {
                format!("invalid distances stop={:.6} take={:.6}", stop, take)
            }
            RejectReason::LiveRiskCap { open_risk, cap } => {
                format!("live risk {:.2} at cap {:.2}", open_risk, cap)
            }
            RejectReason::DepthInsufficient { ratio, min } => {
                format!("depth/notional {:.2} < {:.2}", ratio, min)
            }
            RejectReason::SlippageTooHigh { slip_r, cap } => {
                format!("slippage {:.3}R > {:.3}R", slip_r, cap)
            }
            RejectReason::BelowMinNotional { notional, min } => {
                format!("notional {:.2} < min {:.2}", notional, min)
            }
            RejectReason::FeeToTarget { ratio, max } => {
                format!("fee/target {:.3} > {:.3}", ratio, max)
            }
        }
    }
}

/// Risk and sizing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Percent of equity risked per m1 trade
    pub base_risk_pct_m1: f64,
    pub base_risk_pct_h1: f64,
    /// Combined open risk ceiling, percent of equity
    pub live_risk_cap_pct: f64,
    /// PS factor is (PS / 0.5) clamped to this range
    pub ps_factor_min: f64,
    pub ps_factor_max: f64,
    pub reentry_risk_mult: f64,
    pub leverage_cap_h1: f64,
    pub leverage_cap_m1: f64,
    pub leverage_cap_m1_tight: f64,
    pub tight_spread_bps: f64,
    pub asym_tp_enabled: bool,
    pub asym_tp_widen_base: f64,
    pub a_plus_tp_widen: f64,
    pub a_plus_spread_to_stop_max: f64,
    pub fast_tape_enabled: bool,
    pub fast_tape_macd_accel: f64,
    pub fast_tape_spread_to_stop_max: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            base_risk_pct_m1: 0.8,
            base_risk_pct_h1: 0.25,
            live_risk_cap_pct: 1.5,
            ps_factor_min: 0.5,
            ps_factor_max: 1.25,
            reentry_risk_mult: 0.5,
            leverage_cap_h1: 1.0,
            leverage_cap_m1: 5.0,
            leverage_cap_m1_tight: 8.0,
            tight_spread_bps: 3.0,
            asym_tp_enabled: true,
            asym_tp_widen_base: 0.25,
            a_plus_tp_widen: 0.35,
            a_plus_spread_to_stop_max: 0.04,
            fast_tape_enabled: true,
            fast_tape_macd_accel: 1.0,
            fast_tape_spread_to_stop_max: 0.04,
        }
    }
}

/// Fixed, versioned telemetry captured when a position opens
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionMeta {
    pub version: u16,
    pub regime: Option<Regime>,
    pub score: Option<f64>,
    pub vs: Option<f64>,
    pub ps: Option<f64>,
    pub risk_pct: Option<f64>,
    pub spread_bps: Option<f64>,
    pub fee_to_target: Option<f64>,
    pub slip_r: Option<f64>,
    pub depth_ratio: Option<f64>,
    pub leverage: Option<f64>,
    pub shrink_iters: Option<usize>,
    pub fast_tape: Option<bool>,
    pub a_plus: Option<bool>,
    pub micro_confirmed: Option<bool>,
    pub reentry: Option<bool>,
    pub red_day_level: Option<u8>,
    pub tp_pct: Option<f64>,
    pub band_pct: Option<f64>,
    pub z_vwap: Option<f64>,
}

impl PositionMeta {
    pub const VERSION: u16 = 1;
}

/// A fully sized order ready for the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlan {
    pub side: Side,
    pub timeframe: Timeframe,
    pub strategy: StrategyKind,
    pub qty: f64,
    pub entry: f64,
    pub stop: f64,
    pub take: f64,
    pub stop_distance: f64,
    pub take_distance: f64,
    pub taker: bool,
    pub fee_rate: f64,
    pub meta: PositionMeta,
}

/// Everything one gate pass reads besides session risk
#[derive(Debug, Clone)]
pub struct GateInput<'a> {
    pub signal: &'a EntrySignal,
    pub price: f64,
    pub quote: Quote,
    pub feed_stale: bool,
    pub equity: f64,
    /// Risk (in account currency) already carried by an open position
    pub open_risk: f64,
    pub regime: Regime,
    pub momentum: Momentum,
    pub now: DateTime<Utc>,
}

/// Sizing & Execution Gate
pub struct SizingGate {
    config: SizingConfig,
    venue: VenueConfig,
    hours: TradingHoursConfig,
}

impl SizingGate {
    pub fn new(config: SizingConfig, venue: VenueConfig, hours: TradingHoursConfig) -> Self {
        Self { config, venue, hours }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    pub fn venue(&self) -> &VenueConfig {
        &self.venue
    }

    pub fn hours(&self) -> &TradingHoursConfig {
        &self.hours
    }

    /// Effective percent of equity to risk on this entry
    pub fn effective_risk_pct(&self, timeframe: Timeframe, risk: &SessionRiskState, now: DateTime<Utc>) -> f64 {
        let c = &self.config;
        let base = match timeframe {
            Timeframe::M1 => c.base_risk_pct_m1,
            Timeframe::H1 => c.base_risk_pct_h1,
        };
        let ps_factor = (risk.ps() / 0.5).clamp(c.ps_factor_min, c.ps_factor_max);
        let mut pct = base * ps_factor * self.hours.risk_tilt(now) * risk.red_day_risk_mult();
        if risk.in_reentry_window(now) {
            pct *= c.reentry_risk_mult;
        }
        pct
    }

    /// Run the gate. Fast-tape failures and fee violations are recorded on
    /// `risk` as side effects.
    pub fn plan(&self, input: &GateInput, risk: &mut SessionRiskState) -> Result<OrderPlan, RejectReason> {
        let c = &self.config;
        let v = &self.venue;
        let signal = input.signal;
        let now = input.now;
        let tf = signal.timeframe;
        let price = input.price;

        // 1. Data freshness
        if input.feed_stale || price <= 0.0 {
            return Err(RejectReason::StaleFeed);
        }
        if !input.quote.has_bbo() {
            return Err(RejectReason::NoBbo);
        }
        let spread = input.quote.spread().unwrap_or(0.0);
        let spread_bps = input.quote.spread_bps().unwrap_or(0.0);

        // 2. Session breakers and timing gates
        if let Some(block) = risk.active_block(now) {
            return Err(RejectReason::Blocked { block });
        }
        let top_hour = self.hours.is_top(now);
        let micro_confirmed = signal.meta.micro_confirmed.unwrap_or(false);
        if risk.red_day_level() == 1 && !top_hour {
            return Err(RejectReason::RedDayOffHours);
        }
        if tf == Timeframe::M1 {
            if risk.m1_cooldown_active(now) {
                return Err(RejectReason::M1Cooldown);
            }
            if self.hours.block_m1_bottom_hours && self.hours.is_bottom(now) {
                return Err(RejectReason::BottomHours);
            }
            if risk.confirm_required() && !micro_confirmed {
                return Err(RejectReason::ConfirmationRequired);
            }
        }

        // 3. Effective risk
        let reentry = risk.in_reentry_window(now);
        let risk_pct = self.effective_risk_pct(tf, risk, now);

        // 4. Fee-aware target finalization and tick quantization
        let stop_raw = signal.stop_distance;
        let mut take_raw = signal.take_distance;
        if !(stop_raw > 0.0 && take_raw > 0.0 && stop_raw.is_finite() && take_raw.is_finite()) {
            return Err(RejectReason::InvalidDistance { stop: stop_raw, take: take_raw });
        }
        let spread_to_stop = spread / stop_raw;
        let mut a_plus = false;
        if tf == Timeframe::M1 {
            let floor_pct = v.round_trip_fee(false) / v.fee_to_target_max(false);
            let mut take_pct = (take_raw / price).max(floor_pct);
            if c.asym_tp_enabled {
                a_plus = top_hour
                    && micro_confirmed
                    && matches!(input.regime, Regime::Trend | Regime::Breakout)
                    && spread_to_stop <= c.a_plus_spread_to_stop_max;
                let widen = if a_plus { c.a_plus_tp_widen } else { c.asym_tp_widen_base };
                take_pct *= 1.0 + widen;
            }
            take_raw = take_pct * price;
        }

        let dir = signal.side.sign();
        let (stop_round, take_round) = outward_rounding(signal.side);
        let entry = price;
        let stop = v.quantize_price(entry - dir * stop_raw, stop_round);
        let take = v.quantize_price(entry + dir * take_raw, take_round);
        let stop_distance = (entry - stop).abs();
        let take_distance = (take - entry).abs();
        if stop_distance <= 0.0 || take_distance <= 0.0 || stop <= 0.0 {
            return Err(RejectReason::InvalidDistance {
                stop: stop_distance,
                take: take_distance,
            });
        }

        // 5. Quantity from risk, capped by leverage and live risk
        let equity = input.equity;
        let mut qty = equity * risk_pct / 100.0 / stop_distance;
        let leverage = match tf {
            Timeframe::H1 => c.leverage_cap_h1,
            Timeframe::M1 if spread_bps <= c.tight_spread_bps => c.leverage_cap_m1_tight,
            Timeframe::M1 => c.leverage_cap_m1,
        };
        qty = qty.min(equity * leverage / price);
        let live_cap = equity * c.live_risk_cap_pct / 100.0;
        let headroom = live_cap - input.open_risk;
        if headroom <= 0.0 {
            return Err(RejectReason::LiveRiskCap {
                open_risk: input.open_risk,
                cap: live_cap,
            });
        }
        qty = qty.min(headroom / stop_distance);

        // 6. Taker vs maker admission
        let take_pct = take_distance / price;
        let mut taker = false;
        if c.fast_tape_enabled && risk.fast_tape_allowed(now) {
            let wants_taker = input.momentum.accelerating(dir, c.fast_tape_macd_accel)
                && v.depth_ratio(qty * price) >= v.depth_ratio_min
                && spread_to_stop <= c.fast_tape_spread_to_stop_max;
            if wants_taker {
                let ratio = v.round_trip_fee(true) / take_pct;
                if ratio <= v.fee_to_target_max(true) {
                    taker = true;
                } else {
                    debug!("Fast tape fee/target {:.3} over taker bound, falling back to maker", ratio);
                    risk.record_taker_failure(now);
                }
            }
        }

        // 7. Shrink to fit depth and slippage
        let mut shrink_iters = 0;
        let (depth_ratio, slip_r) = loop {
            let notional = qty * price;
            let depth_ratio = v.depth_ratio(notional);
            let slip_r = v.slippage_price(notional, price, spread) / stop_distance;
            if depth_ratio >= v.depth_ratio_min && slip_r <= v.slip_r_cap {
                break (depth_ratio, slip_r);
            }
            if shrink_iters >= v.max_shrink_iters {
                return Err(if depth_ratio < v.depth_ratio_min {
                    RejectReason::DepthInsufficient {
                        ratio: depth_ratio,
                        min: v.depth_ratio_min,
                    }
                } else {
                    RejectReason::SlippageTooHigh {
                        slip_r,
                        cap: v.slip_r_cap,
                    }
                });
            }
            qty *= v.shrink_factor;
            shrink_iters += 1;
        };

        // 8. Floors and the final fee check
        qty = v.quantize_qty(qty);
        let notional = qty * price;
        let min_notional = v.min_order_notional();
        if notional < min_notional || qty <= 0.0 {
            return Err(RejectReason::BelowMinNotional {
                notional,
                min: min_notional,
            });
        }
        let fee_to_target = v.round_trip_fee(taker) / take_pct;
        let fee_max = v.fee_to_target_max(taker);
        if fee_to_target > fee_max {
            risk.record_fee_violation(now);
            return Err(RejectReason::FeeToTarget {
                ratio: fee_to_target,
                max: fee_max,
            });
        }

        Ok(OrderPlan {
            side: signal.side,
            timeframe: tf,
            strategy: signal.strategy,
            qty,
            entry,
            stop,
            take,
            stop_distance,
            take_distance,
            taker,
            fee_rate: v.fee_rate(taker),
            meta: PositionMeta {
                version: PositionMeta::VERSION,
                regime: Some(input.regime),
                score: Some(signal.score),
                vs: Some(risk.vs()),
                ps: Some(risk.ps()),
                risk_pct: Some(risk_pct),
                spread_bps: Some(spread_bps),
                fee_to_target: Some(fee_to_target),
                slip_r: Some(slip_r),
                depth_ratio: Some(depth_ratio),
                leverage: Some(notional / equity),
                shrink_iters: Some(shrink_iters),
                fast_tape: Some(taker),
                a_plus: Some(a_plus),
                micro_confirmed: signal.meta.micro_confirmed,
                reentry: Some(reentry),
                red_day_level: Some(risk.red_day_level()),
                tp_pct: signal.meta.tp_pct,
                band_pct: signal.meta.band_pct,
                z_vwap: signal.meta.z_vwap,
            },
        })
    }

    /// Size a forced entry from base risk alone. Signal gates and session
    /// breakers are bypassed; the target is 2R.
    pub fn manual_plan(
        &self,
        side: Side,
        timeframe: Timeframe,
        price: f64,
        stop_distance: f64,
        equity: f64,
    ) -> Result<OrderPlan, RejectReason> {
        let c = &self.config;
        let v = &self.venue;
        let dir = side.sign();
        let (stop_round, take_round) = outward_rounding(side);
        let stop = v.quantize_price(price - dir * stop_distance, stop_round);
        let take = v.quantize_price(price + dir * 2.0 * stop_distance, take_round);
        let stop_distance = (price - stop).abs();
        let take_distance = (take - price).abs();
        if !(stop_distance > 0.0 && take_distance > 0.0 && stop > 0.0) {
            return Err(RejectReason::InvalidDistance {
                stop: stop_distance,
                take: take_distance,
            });
        }

        let (risk_pct, leverage) = match timeframe {
            Timeframe::M1 => (c.base_risk_pct_m1, c.leverage_cap_m1),
            Timeframe::H1 => (c.base_risk_pct_h1, c.leverage_cap_h1),
        };
        let qty = v.quantize_qty((equity * risk_pct / 100.0 / stop_distance).min(equity * leverage / price));
        let notional = qty * price;
        if notional < v.min_order_notional() || qty <= 0.0 {
            return Err(RejectReason::BelowMinNotional {
                notional,
                min: v.min_order_notional(),
            });
        }

        Ok(OrderPlan {
            side,
            timeframe,
            strategy: StrategyKind::Manual,
            qty,
            entry: price,
            stop,
            take,
            stop_distance,
            take_distance,
            taker: false,
            fee_rate: v.fee_rate(false),
            meta: PositionMeta {
                version: PositionMeta::VERSION,
                risk_pct: Some(risk_pct),
                leverage: Some(notional / equity),
                fast_tape: Some(false),
                ..Default::default()
            },
        })
    }
}

/// Stops round away from entry on the losing side, targets on the winning side
fn outward_rounding(side: Side) -> (Rounding, Rounding) {
    match side {
        Side::Long => (Rounding::Down, Rounding::Up),
        Side::Short => (Rounding::Up, Rounding::Down),
    }
}
