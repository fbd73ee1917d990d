//! Position lifecycle
//!
//! Advances the open position every tick: pyramid adds, the one-shot
//! partial, the RSI scale-out, trailing and runner floors, the m1 time
//! scratch and finally the stop / take exit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::broker::{CloseTelemetry, ExitReason, PaperBroker, Position, Trade};
use crate::market::Momentum;
use crate::strategy::{StrategyKind, Timeframe};

/// Lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Partial fires at this R multiple
    pub partial_at_r: f64,
    /// Fraction of the remaining m1 quantity closed by the partial
    pub partial_fraction: f64,
    /// VS at or above which the partial comes earlier and larger
    pub hot_vs: f64,
    pub hot_partial_at_r: f64,
    pub hot_partial_fraction: f64,
    pub h1_partial_fraction_mean_reversion: f64,
    pub h1_partial_fraction: f64,
    /// Stop buffer beyond entry after the partial, in R
    pub breakeven_buffer_r: f64,
    /// Trail distance is `k * VS` R
    pub trail_k: f64,
    pub trail_k_fading: f64,
    pub runner_trigger_r: f64,
    pub runner_trigger_accel_r: f64,
    /// MACD histogram growth that counts as acceleration
    pub runner_accel_mult: f64,
    pub runner_floor_r: f64,
    pub scratch_max_vs: f64,
    pub scratch_after_secs: i64,
    pub scratch_mfe_r: f64,
    pub scale_out_fraction: f64,
    pub scale_out_rsi_long: f64,
    pub scale_out_rsi_short: f64,
    pub pyramid_enabled: bool,
    /// First add, as a fraction of the current quantity
    pub add1_max_fraction: f64,
    /// Second, profit-funded add
    pub add2_fraction: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            partial_at_r: 0.5,
            partial_fraction: 0.5,
            hot_vs: 1.2,
            hot_partial_at_r: 0.4,
            hot_partial_fraction: 0.6,
            h1_partial_fraction_mean_reversion: 0.33,
            h1_partial_fraction: 0.25,
            breakeven_buffer_r: 0.10,
            trail_k: 0.8,
            trail_k_fading: 0.6,
            runner_trigger_r: 1.2,
            runner_trigger_accel_r: 1.1,
            runner_accel_mult: 1.5,
            runner_floor_r: 0.5,
            scratch_max_vs: 0.9,
            scratch_after_secs: 240,
            scratch_mfe_r: 0.25,
            scale_out_fraction: 0.25,
            scale_out_rsi_long: 80.0,
            scale_out_rsi_short: 20.0,
            pyramid_enabled: true,
            add1_max_fraction: 0.5,
            add2_fraction: 0.25,
        }
    }
}

/// Per-tick inputs
#[derive(Debug, Clone)]
pub struct ManageInput {
    pub price: f64,
    pub now: DateTime<Utc>,
    pub vs: f64,
    pub momentum: Momentum,
    /// Live risk cap in currency, bounds the first pyramid add
    pub live_risk_cap: f64,
    pub telemetry: CloseTelemetry,
}

/// Drives the open position through its lifecycle
#[derive(Debug, Clone, Default)]
pub struct PositionManager {
    config: LifecycleConfig,
}

impl PositionManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Run one tick. Returns every lot closed, the final close last.
    pub fn manage(&self, broker: &mut PaperBroker, input: &ManageInput) -> Vec<Trade> {
        let mut trades = Vec::new();
        if broker.position().is_none() {
            return trades;
        }
        broker.mark(input.price);

        // 1. Pyramid (m1 only, one add per tick)
        self.pyramid(broker, input);

        // 2. Partial
        if let Some(t) = self.partial(broker, input) {
            let done = t.is_final;
            trades.push(t);
            if done {
                return trades;
            }
        }

        // 3. Extreme-RSI scale-out
        if let Some(t) = self.scale_out(broker, input) {
            let done = t.is_final;
            trades.push(t);
            if done {
                return trades;
            }
        }

        // 4. Trail and runner floor
        self.trail(broker, input);

        // 5. Time scratch
        self.scratch(broker, input);

        // 6. Exit
        if let Some(t) = self.exit(broker, input) {
            trades.push(t);
        }
        trades
    }

    fn partial_plan(&self, pos: &Position, vs: f64) -> (f64, f64) {
        let hot = vs >= self.config.hot_vs;
        let at_r = if hot { self.config.hot_partial_at_r } else { self.config.partial_at_r };
        let fraction = match (pos.timeframe, pos.strategy) {
            (Timeframe::H1, StrategyKind::H1MeanReversion) => {
                self.config.h1_partial_fraction_mean_reversion
            }
            (Timeframe::H1, _) => self.config.h1_partial_fraction,
            (Timeframe::M1, _) if hot => self.config.hot_partial_fraction,
            (Timeframe::M1, _) => self.config.partial_fraction,
        };
        (at_r, fraction)
    }

    /// One-shot partial exit. Moves the stop to breakeven plus a buffer.
    /// No-op once `partial_taken` is set.
    pub fn partial(&self, broker: &mut PaperBroker, input: &ManageInput) -> Option<Trade> {
        let pos = broker.position()?;
        if pos.partial_taken {
            return None;
        }
        let (at_r, fraction) = self.partial_plan(pos, input.vs);
        if pos.r_multiple(input.price) < at_r {
            return None;
        }

        let trade = broker.partial_close(
            fraction,
            input.price,
            ExitReason::Partial,
            input.telemetry.clone(),
            input.now,
        )?;
        if let Some(pos) = broker.position_mut() {
            let be = pos.entry + pos.direction() * self.config.breakeven_buffer_r * pos.stop_distance;
            pos.ratchet_stop(be);
            pos.breakeven = true;
            pos.partial_taken = true;
            info!("Partial {:.0}% at {:.2}R, stop -> {:.2}", fraction * 100.0, at_r, pos.stop);
        }
        Some(trade)
    }

    fn pyramid(&self, broker: &mut PaperBroker, input: &ManageInput) {
        if !self.config.pyramid_enabled {
            return;
        }
        let Some(pos) = broker.position() else {
            return;
        };
        if pos.timeframe != Timeframe::M1
            || !pos.partial_taken
            || !pos.breakeven
            || pos.extra_scaled
            || pos.take_touched(input.price)
            || pos.r_multiple(input.price) < self.config.partial_at_r
        {
            return;
        }

        let dir = pos.direction();
        let risk_per_unit = dir * (input.price - pos.stop);
        if risk_per_unit <= 0.0 {
            return;
        }
        let qty = match pos.adds {
            0 => {
                let headroom = (input.live_risk_cap - pos.open_risk()).max(0.0);
                (self.config.add1_max_fraction * pos.qty).min(headroom / risk_per_unit)
            }
            1 => {
                let qty = self.config.add2_fraction * pos.qty;
                // Only from open profit
                if pos.unrealized_net(input.price) < qty * risk_per_unit {
                    return;
                }
                qty
            }
            _ => return,
        };
        if qty <= 0.0 {
            return;
        }

        // Re-averaged entry must stay on the right side of the stop
        let new_entry = (pos.entry * pos.qty + input.price * qty) / (pos.qty + qty);
        if dir * (new_entry - pos.stop) <= 0.0 {
            debug!("Pyramid skipped: entry {:.4} would cross stop {:.4}", new_entry, pos.stop);
            return;
        }

        let second = pos.adds == 1;
        match broker.add(qty, input.price) {
            Ok(_) => {
                if second {
                    if let Some(pos) = broker.position_mut() {
                        pos.extra_scaled = true;
                    }
                }
            }
            Err(e) => debug!("Pyramid add rejected: {}", e),
        }
    }

    fn scale_out(&self, broker: &mut PaperBroker, input: &ManageInput) -> Option<Trade> {
        let pos = broker.position()?;
        if pos.scaled_out {
            return None;
        }
        let rsi = input.momentum.rsi?;
        let prev = input.momentum.rsi_prev;
        let crossed = if pos.direction() > 0.0 {
            let level = self.config.scale_out_rsi_long;
            rsi >= level && prev.map_or(true, |p| p < level)
        } else {
            let level = self.config.scale_out_rsi_short;
            rsi <= level && prev.map_or(true, |p| p > level)
        };
        if !crossed {
            return None;
        }

        let trade = broker.partial_close(
            self.config.scale_out_fraction,
            input.price,
            ExitReason::ScaleOut,
            input.telemetry.clone(),
            input.now,
        )?;
        if let Some(pos) = broker.position_mut() {
            pos.scaled_out = true;
        }
        info!("RSI {:.1} scale-out {:.0}%", rsi, self.config.scale_out_fraction * 100.0);
        Some(trade)
    }

    fn trail(&self, broker: &mut PaperBroker, input: &ManageInput) {
        let Some(pos) = broker.position_mut() else {
            return;
        };
        let dir = pos.direction();
        let r = pos.r_multiple(input.price);

        // Runner floor locks profit early on a strong move
        let trigger = if input.momentum.accelerating(dir, self.config.runner_accel_mult) {
            self.config.runner_trigger_accel_r
        } else {
            self.config.runner_trigger_r
        };
        if r >= trigger {
            let floor = pos.entry + dir * self.config.runner_floor_r * pos.stop_distance;
            if pos.ratchet_stop(floor) {
                pos.trailing = true;
                debug!("Runner floor at {:.2}R -> stop {:.2}", r, pos.stop);
            }
        }

        if !pos.partial_taken {
            return;
        }
        let k = if input.momentum.fading(dir) {
            self.config.trail_k_fading
        } else {
            self.config.trail_k
        };
        let candidate = input.price - dir * k * input.vs * pos.stop_distance;
        if pos.ratchet_stop(candidate) {
            pos.trailing = true;
            debug!("Trail -> stop {:.2}", pos.stop);
        }
    }

    fn scratch(&self, broker: &mut PaperBroker, input: &ManageInput) {
        let Some(pos) = broker.position_mut() else {
            return;
        };
        if pos.timeframe != Timeframe::M1
            || pos.scratched
            || pos.partial_taken
            || input.vs >= self.config.scratch_max_vs
            || (input.now - pos.opened_at).num_seconds() < self.config.scratch_after_secs
            || pos.mfe_r() >= self.config.scratch_mfe_r
        {
            return;
        }
        pos.ratchet_stop(pos.entry);
        pos.scratched = true;
        info!("Scratch: no follow-through, stop -> entry {:.2}", pos.entry);
    }

    fn exit(&self, broker: &mut PaperBroker, input: &ManageInput) -> Option<Trade> {
        let pos = broker.position()?;
        // Take wins when both are touched in one tick
        let (price, reason) = if pos.take_touched(input.price) {
            (pos.take, ExitReason::Take)
        } else if pos.stop_touched(input.price) {
            let reason = if pos.scratched && pos.stop == pos.entry {
                ExitReason::Scratch
            } else if pos.trailing {
                ExitReason::Trail
            } else {
                ExitReason::Stop
            };
            (input.price, reason)
        } else {
            return None;
        };
        broker.close(price, reason, input.telemetry.clone(), input.now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{OrderPlan, PositionMeta};
    use crate::strategy::Side;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn open(broker: &mut PaperBroker, side: Side, strategy: StrategyKind) {
        let dir = side.sign();
        let plan = OrderPlan {
            side,
            timeframe: strategy.timeframe(),
            strategy,
            qty: 10.0,
            entry: 100.0,
            stop: 100.0 - dir,
            take: 100.0 + 2.0 * dir,
            stop_distance: 1.0,
            take_distance: 2.0,
            taker: false,
            fee_rate: 0.0001,
            meta: PositionMeta::default(),
        };
        broker.open(&plan, t0()).unwrap();
    }

    fn input(price: f64, secs: i64) -> ManageInput {
        ManageInput {
            price,
            now: t0() + Duration::seconds(secs),
            vs: 1.0,
            momentum: Momentum::default(),
            live_risk_cap: 0.0,
            telemetry: CloseTelemetry::default(),
        }
    }

    #[test]
    fn test_breakeven_shift_after_partial() {
        let mgr = PositionManager::default();
        let mut b = PaperBroker::new(10_000.0, 500);
        open(&mut b, Side::Long, StrategyKind::M1Scalp);

        let trades = mgr.manage(&mut b, &input(100.5, 10));
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].reason, ExitReason::Partial);
        let pos = b.position().unwrap();
        assert!(pos.partial_taken && pos.breakeven);
        assert!(pos.stop >= 100.0);
        assert!((pos.stop - 100.1).abs() < 1e-9);
        assert!((pos.qty - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_is_idempotent() {
        let mgr = PositionManager::default();
        let mut b = PaperBroker::new(10_000.0, 500);
        open(&mut b, Side::Long, StrategyKind::M1Scalp);

        let tick = input(100.6, 10);
        assert!(mgr.partial(&mut b, &tick).is_some());
        let qty = b.position().unwrap().qty;
        assert!(mgr.partial(&mut b, &tick).is_none());
        assert_eq!(b.position().unwrap().qty, qty);
    }

    #[test]
    fn test_hot_vs_and_h1_fractions() {
        let mgr = PositionManager::default();

        let mut b = PaperBroker::new(10_000.0, 500);
        open(&mut b, Side::Short, StrategyKind::M1Scalp);
        let hot = ManageInput { vs: 1.3, ..input(99.6, 10) };
        let t = mgr.partial(&mut b, &hot).unwrap();
        assert!((t.qty - 6.0).abs() < 1e-9);

        let mut b = PaperBroker::new(10_000.0, 500);
        open(&mut b, Side::Long, StrategyKind::H1MeanReversion);
        let t = mgr.partial(&mut b, &input(100.5, 10)).unwrap();
        assert!((t.qty - 3.3).abs() < 1e-9);

        let mut b = PaperBroker::new(10_000.0, 500);
        open(&mut b, Side::Long, StrategyKind::H1Trend);
        let t = mgr.partial(&mut b, &input(100.5, 10)).unwrap();
        assert!((t.qty - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_stop_only_tightens() {
        let mgr = PositionManager::default();
        let mut b = PaperBroker::new(10_000.0, 500);
        open(&mut b, Side::Long, StrategyKind::H1Trend);

        mgr.manage(&mut b, &input(100.5, 10));
        mgr.manage(&mut b, &input(101.8, 20));
        let stop = b.position().unwrap().stop;
        assert!((stop - 101.0).abs() < 1e-9);
        assert!(b.position().unwrap().trailing);

        mgr.manage(&mut b, &input(101.5, 30));
        assert_eq!(b.position().unwrap().stop, stop);

        let trades = mgr.manage(&mut b, &input(100.9, 40));
        let last = trades.last().unwrap();
        assert_eq!(last.reason, ExitReason::Trail);
        assert!(last.is_final);
        assert!(b.position().is_none());
    }

    #[test]
    fn test_runner_floor_earlier_on_acceleration() {
        let cfg = LifecycleConfig { partial_at_r: 5.0, hot_partial_at_r: 5.0, ..Default::default() };
        let mgr = PositionManager::new(cfg);
        let mut b = PaperBroker::new(10_000.0, 500);
        open(&mut b, Side::Long, StrategyKind::H1Breakout);

        let accel = ManageInput {
            momentum: Momentum { macd_hist: Some(0.3), macd_hist_prev: Some(0.1), ..Default::default() },
            ..input(101.15, 10)
        };
        mgr.manage(&mut b, &accel);
        assert!((b.position().unwrap().stop - 100.5).abs() < 1e-9);

        let mut b = PaperBroker::new(10_000.0, 500);
        open(&mut b, Side::Long, StrategyKind::H1Breakout);
        mgr.manage(&mut b, &input(101.15, 10));
        assert_eq!(b.position().unwrap().stop, 99.0);
    }

    #[test]
    fn test_scratch_moves_stop_to_entry() {
        let mgr = PositionManager::default();
        let mut b = PaperBroker::new(10_000.0, 500);
        open(&mut b, Side::Long, StrategyKind::M1Scalp);

        let calm = |price: f64, secs: i64| ManageInput { vs: 0.8, ..input(price, secs) };
        mgr.manage(&mut b, &calm(100.1, 60));
        assert_eq!(b.position().unwrap().stop, 99.0);

        mgr.manage(&mut b, &calm(100.1, 241));
        let pos = b.position().unwrap();
        assert!(pos.scratched);
        assert_eq!(pos.stop, 100.0);

        let trades = mgr.manage(&mut b, &calm(99.99, 250));
        assert_eq!(trades.last().unwrap().reason, ExitReason::Scratch);
    }

    #[test]
    fn test_take_has_priority_and_fills_at_take() {
        let mgr = PositionManager::new(LifecycleConfig {
            partial_at_r: 10.0,
            hot_partial_at_r: 10.0,
            ..Default::default()
        });
        let mut b = PaperBroker::new(10_000.0, 500);
        open(&mut b, Side::Short, StrategyKind::H1Trend);

        let trades = mgr.manage(&mut b, &input(97.5, 10));
        let last = trades.last().unwrap();
        assert_eq!(last.reason, ExitReason::Take);
        assert_eq!(last.exit, 98.0);
        assert!(b.position().is_none());
    }

    #[test]
    fn test_stop_closes_at_market() {
        let mgr = PositionManager::default();
        let mut b = PaperBroker::new(10_000.0, 500);
        open(&mut b, Side::Long, StrategyKind::M1Scalp);

        let trades = mgr.manage(&mut b, &input(98.9, 10));
        let last = trades.last().unwrap();
        assert_eq!(last.reason, ExitReason::Stop);
        assert_eq!(last.exit, 98.9);
        assert!(last.pnl < 0.0);
    }

    #[test]
    fn test_pyramid_add_reaverages() {
        let mgr = PositionManager::default();
        let mut b = PaperBroker::new(10_000.0, 500);
        open(&mut b, Side::Long, StrategyKind::M1Scalp);

        mgr.manage(&mut b, &input(100.5, 10));
        let tick = ManageInput { live_risk_cap: 100.0, ..input(100.6, 20) };
        mgr.manage(&mut b, &tick);

        let pos = b.position().unwrap();
        assert_eq!(pos.adds, 1);
        assert!((pos.qty - 7.5).abs() < 1e-9);
        assert!((pos.entry - 100.2).abs() < 1e-9);
        assert!(pos.stop > 100.1 && pos.stop < 100.6);
    }

    #[test]
    fn test_rsi_scale_out_once() {
        let mgr = PositionManager::new(LifecycleConfig {
            partial_at_r: 10.0,
            hot_partial_at_r: 10.0,
            ..Default::default()
        });
        let mut b = PaperBroker::new(10_000.0, 500);
        open(&mut b, Side::Long, StrategyKind::H1Trend);

        let hot_rsi = ManageInput {
            momentum: Momentum { rsi: Some(81.0), rsi_prev: Some(78.0), ..Default::default() },
            ..input(100.3, 10)
        };
        let trades = mgr.manage(&mut b, &hot_rsi);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].reason, ExitReason::ScaleOut);
        assert!((b.position().unwrap().qty - 7.5).abs() < 1e-9);

        assert!(mgr.manage(&mut b, &hot_rsi).is_empty());
    }
}
