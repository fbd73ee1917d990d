//! Paper broker
//!
//! Owns the single open position, fills at the given price, charges the
//! position's fee rate on both legs and keeps a bounded trade history.
//! Closing when nothing is open is a no-op that returns `None`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::info;

use crate::error::{Error, Result};
use crate::execution::{OrderPlan, PositionMeta};
use crate::strategy::{Regime, Side, StrategyKind, Timeframe};

/// Quantities below this are treated as zero
const QTY_EPSILON: f64 = 1e-12;

/// Why a lot was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Take,
    Stop,
    Trail,
    Scratch,
    Partial,
    ScaleOut,
    Reverse,
    Heartbeat,
    Manual,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::Take => "take",
            ExitReason::Stop => "stop",
            ExitReason::Trail => "trail",
            ExitReason::Scratch => "scratch",
            ExitReason::Partial => "partial",
            ExitReason::ScaleOut => "scale_out",
            ExitReason::Reverse => "reverse",
            ExitReason::Heartbeat => "heartbeat",
            ExitReason::Manual => "manual",
        };
        write!(f, "{}", s)
    }
}

/// The single open trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: Side,
    pub qty: f64,
    pub initial_qty: f64,
    pub entry: f64,
    pub stop: f64,
    pub take: f64,
    /// 1R in price units; changes only when an add re-averages the entry
    pub stop_distance: f64,
    pub fee_rate: f64,
    pub opened_at: DateTime<Utc>,
    pub high: f64,
    pub low: f64,
    pub timeframe: Timeframe,
    pub strategy: StrategyKind,
    pub breakeven: bool,
    pub partial_taken: bool,
    /// Second, profit-funded pyramid add done
    pub extra_scaled: bool,
    pub adds: u8,
    pub scaled_out: bool,
    pub trailing: bool,
    pub scratched: bool,
    /// Net P&L already realized by partial closes
    pub realized_pnl: f64,
    pub meta: PositionMeta,
}

impl Position {
    pub fn direction(&self) -> f64 {
        self.side.sign()
    }

    pub fn gross_pnl(&self, price: f64, qty: f64) -> f64 {
        self.direction() * (price - self.entry) * qty
    }

    /// Entry and exit fees for `qty` closed at `price`
    pub fn fees(&self, price: f64, qty: f64) -> f64 {
        (self.entry + price) * qty * self.fee_rate
    }

    /// Unrealized P&L net of both legs' fees
    pub fn unrealized_net(&self, price: f64) -> f64 {
        self.gross_pnl(price, self.qty) - self.fees(price, self.qty)
    }

    /// Favorable move from entry in units of R
    pub fn r_multiple(&self, price: f64) -> f64 {
        if self.stop_distance <= 0.0 {
            return 0.0;
        }
        self.direction() * (price - self.entry) / self.stop_distance
    }

    /// Best excursion since open in units of R
    pub fn mfe_r(&self) -> f64 {
        let best = match self.side {
            Side::Long => self.high,
            Side::Short => self.low,
        };
        self.r_multiple(best)
    }

    /// Currency still at risk if the stop fills
    pub fn open_risk(&self) -> f64 {
        (self.direction() * (self.entry - self.stop)).max(0.0) * self.qty
    }

    pub fn stop_touched(&self, price: f64) -> bool {
        match self.side {
            Side::Long => price <= self.stop,
            Side::Short => price >= self.stop,
        }
    }

    pub fn take_touched(&self, price: f64) -> bool {
        match self.side {
            Side::Long => price >= self.take,
            Side::Short => price <= self.take,
        }
    }

    /// Move the stop only if it tightens. Returns true when it moved.
    pub fn ratchet_stop(&mut self, candidate: f64) -> bool {
        let better = match self.side {
            Side::Long => candidate > self.stop,
            Side::Short => candidate < self.stop,
        };
        if better {
            self.stop = candidate;
        }
        better
    }
}

/// Telemetry copied onto a trade record at close time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloseTelemetry {
    pub regime: Option<Regime>,
    pub vs: Option<f64>,
    pub ps: Option<f64>,
    pub spread_bps: Option<f64>,
    /// Breaker active at close, if any
    pub active_guard: Option<String>,
}

/// Immutable closed-lot record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub side: Side,
    pub strategy: StrategyKind,
    pub timeframe: Timeframe,
    pub qty: f64,
    pub entry: f64,
    pub exit: f64,
    /// Net P&L of this lot
    pub pnl: f64,
    /// Net P&L of the whole position so far, including earlier partials
    pub position_pnl: f64,
    pub r_multiple: f64,
    pub fees: f64,
    pub reason: ExitReason,
    /// Position fully closed by this lot
    pub is_final: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub meta: PositionMeta,
    pub telemetry: CloseTelemetry,
}

/// Paper broker
#[derive(Debug, Clone)]
pub struct PaperBroker {
    equity: f64,
    position: Option<Position>,
    history: VecDeque<Trade>,
    history_cap: usize,
}

impl PaperBroker {
    pub fn new(start_equity: f64, history_cap: usize) -> Self {
        Self {
            equity: start_equity,
            position: None,
            history: VecDeque::new(),
            history_cap: history_cap.max(1),
        }
    }

    /// Realized equity
    pub fn equity(&self) -> f64 {
        self.equity
    }

    /// Equity marked to `price`
    pub fn marked_equity(&self, price: f64) -> f64 {
        self.equity + self.position.as_ref().map_or(0.0, |p| p.unrealized_net(price))
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn position_mut(&mut self) -> Option<&mut Position> {
        self.position.as_mut()
    }

    pub fn history(&self) -> impl Iterator<Item = &Trade> {
        self.history.iter()
    }

    /// Open a position from a sized plan
    pub fn open(&mut self, plan: &OrderPlan, now: DateTime<Utc>) -> Result<&Position> {
        if let Some(p) = &self.position {
            return Err(Error::PositionAlreadyOpen {
                side: p.side.to_string(),
                qty: p.qty,
            });
        }
        let valid = plan.qty > 0.0
            && plan.qty.is_finite()
            && plan.entry > 0.0
            && plan.stop_distance > 0.0
            && plan.stop_distance.is_finite();
        if !valid {
            return Err(Error::InvalidOrder(format!(
                "qty={} entry={} stop_distance={}",
                plan.qty, plan.entry, plan.stop_distance
            )));
        }

        info!(
            "Open {} {} qty={:.6} @ {:.2} stop={:.2} take={:.2} ({})",
            plan.side, plan.timeframe, plan.qty, plan.entry, plan.stop, plan.take, plan.strategy
        );
        Ok(self.position.insert(Position {
            side: plan.side,
            qty: plan.qty,
            initial_qty: plan.qty,
            entry: plan.entry,
            stop: plan.stop,
            take: plan.take,
            stop_distance: plan.stop_distance,
            fee_rate: plan.fee_rate,
            opened_at: now,
            high: plan.entry,
            low: plan.entry,
            timeframe: plan.timeframe,
            strategy: plan.strategy,
            breakeven: false,
            partial_taken: false,
            extra_scaled: false,
            adds: 0,
            scaled_out: false,
            trailing: false,
            scratched: false,
            realized_pnl: 0.0,
            meta: plan.meta.clone(),
        }))
    }

    /// Update watermarks and return unrealized net P&L
    pub fn mark(&mut self, price: f64) -> f64 {
        match self.position.as_mut() {
            Some(p) => {
                p.high = p.high.max(price);
                p.low = p.low.min(price);
                p.unrealized_net(price)
            }
            None => 0.0,
        }
    }

    /// Close the whole remaining quantity
    pub fn close(
        &mut self,
        price: f64,
        reason: ExitReason,
        telemetry: CloseTelemetry,
        now: DateTime<Utc>,
    ) -> Option<Trade> {
        let qty = self.position.as_ref()?.qty;
        self.close_qty(qty, price, reason, telemetry, now)
    }

    /// Close `fraction` of the remaining quantity; a fraction that would
    /// leave nothing closes the position
    pub fn partial_close(
        &mut self,
        fraction: f64,
        price: f64,
        reason: ExitReason,
        telemetry: CloseTelemetry,
        now: DateTime<Utc>,
    ) -> Option<Trade> {
        let qty = self.position.as_ref()?.qty;
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction <= 0.0 {
            return None;
        }
        self.close_qty(qty * fraction, price, reason, telemetry, now)
    }

    fn close_qty(
        &mut self,
        qty: f64,
        price: f64,
        reason: ExitReason,
        telemetry: CloseTelemetry,
        now: DateTime<Utc>,
    ) -> Option<Trade> {
        let pos = self.position.as_mut()?;
        let qty = qty.min(pos.qty);
        let is_final = pos.qty - qty <= QTY_EPSILON;

        let fees = pos.fees(price, qty);
        let pnl = pos.gross_pnl(price, qty) - fees;
        pos.realized_pnl += pnl;
        pos.qty = if is_final { 0.0 } else { pos.qty - qty };
        self.equity += pnl;

        let trade = Trade {
            side: pos.side,
            strategy: pos.strategy,
            timeframe: pos.timeframe,
            qty,
            entry: pos.entry,
            exit: price,
            pnl,
            position_pnl: pos.realized_pnl,
            r_multiple: pos.r_multiple(price),
            fees,
            reason,
            is_final,
            opened_at: pos.opened_at,
            closed_at: now,
            meta: pos.meta.clone(),
            telemetry,
        };

        info!(
            "{} {} qty={:.6} @ {:.2} pnl={:.2} ({:+.2}R){}",
            if is_final { "Close" } else { "Partial" },
            trade.side,
            qty,
            price,
            pnl,
            trade.r_multiple,
            if is_final { format!(" total={:.2}", trade.position_pnl) } else { String::new() }
        );

        if is_final {
            self.position = None;
        }
        self.history.push_back(trade.clone());
        while self.history.len() > self.history_cap {
            self.history.pop_front();
        }
        Some(trade)
    }

    /// Pyramid add: re-average the entry and recompute 1R from the new
    /// average to the existing stop
    pub fn add(&mut self, qty: f64, price: f64) -> Result<&Position> {
        let pos = self.position.as_mut().ok_or(Error::NoOpenPosition)?;
        if !(qty > 0.0 && qty.is_finite() && price > 0.0) {
            return Err(Error::InvalidOrder(format!("add qty={} price={}", qty, price)));
        }
        let total = pos.qty + qty;
        let entry = (pos.entry * pos.qty + price * qty) / total;
        let stop_distance = pos.direction() * (entry - pos.stop);
        if stop_distance <= 0.0 {
            return Err(Error::Invariant(format!(
                "add would move entry {:.4} past stop {:.4}",
                entry, pos.stop
            )));
        }
        pos.entry = entry;
        pos.qty = total;
        pos.stop_distance = stop_distance;
        pos.adds += 1;
        info!("Add qty={:.6} @ {:.2}: entry {:.2}, 1R {:.4}", qty, price, entry, stop_distance);
        Ok(pos)
    }

    /// Same-day lots
    pub fn trades_on(&self, day: chrono::NaiveDate) -> impl Iterator<Item = &Trade> {
        self.history.iter().filter(move |t| t.closed_at.date_naive() == day)
    }

    /// Fills (lots) and net P&L for the UTC day of `now`
    pub fn day_stats(&self, now: DateTime<Utc>) -> (usize, f64) {
        self.trades_on(now.date_naive())
            .fold((0, 0.0), |(n, pnl), t| (n + 1, pnl + t.pnl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn plan(side: Side, qty: f64) -> OrderPlan {
        let dir = side.sign();
        OrderPlan {
            side,
            timeframe: Timeframe::M1,
            strategy: StrategyKind::M1Scalp,
            qty,
            entry: 100.0,
            stop: 100.0 - dir,
            take: 100.0 + 2.0 * dir,
            stop_distance: 1.0,
            take_distance: 2.0,
            taker: false,
            fee_rate: 0.0001,
            meta: PositionMeta::default(),
        }
    }

    #[test]
    fn test_open_then_close_accounts_fees() {
        let mut b = PaperBroker::new(10_000.0, 500);
        b.open(&plan(Side::Long, 10.0), now()).unwrap();
        let t = b.close(101.0, ExitReason::Take, CloseTelemetry::default(), now()).unwrap();
        // gross 10, fees (100 + 101) * 10 * 0.0001
        assert!((t.pnl - (10.0 - 0.201)).abs() < 1e-9);
        assert!(t.is_final);
        assert!((t.r_multiple - 1.0).abs() < 1e-12);
        assert!(b.position().is_none());
        assert!((b.equity() - (10_000.0 + t.pnl)).abs() < 1e-9);
    }

    #[test]
    fn test_second_open_is_rejected() {
        let mut b = PaperBroker::new(10_000.0, 500);
        b.open(&plan(Side::Long, 1.0), now()).unwrap();
        let err = b.open(&plan(Side::Short, 1.0), now()).unwrap_err();
        assert!(matches!(err, Error::PositionAlreadyOpen { .. }));
        assert_eq!(b.position().map(|p| p.side), Some(Side::Long));
    }

    #[test]
    fn test_close_without_position_is_noop() {
        let mut b = PaperBroker::new(10_000.0, 500);
        assert!(b.close(100.0, ExitReason::Manual, CloseTelemetry::default(), now()).is_none());
        assert!(b
            .partial_close(0.5, 100.0, ExitReason::Partial, CloseTelemetry::default(), now())
            .is_none());
        assert_eq!(b.equity(), 10_000.0);
    }

    #[test]
    fn test_quantity_never_negative() {
        let mut b = PaperBroker::new(10_000.0, 500);
        b.open(&plan(Side::Short, 3.0), now()).unwrap();
        let fractions = [0.5, 0.0, 0.33, 1.7, 0.9];
        for f in fractions {
            if b.position().is_some() {
                b.add(0.4, 99.5).unwrap();
            }
            let _ = b.partial_close(f, 99.0, ExitReason::Partial, CloseTelemetry::default(), now());
            if let Some(p) = b.position() {
                assert!(p.qty > 0.0);
            }
        }
        // 1.7 clamps to a full close
        assert!(b.position().is_none());
        assert!(b.history().last().unwrap().is_final);
    }

    #[test]
    fn test_add_reaverages_entry_and_r() {
        let mut b = PaperBroker::new(10_000.0, 500);
        b.open(&plan(Side::Long, 2.0), now()).unwrap();
        let p = b.add(1.0, 103.0).unwrap();
        assert!((p.entry - 101.0).abs() < 1e-12);
        assert!((p.stop_distance - 2.0).abs() < 1e-12);
        assert_eq!(p.qty, 3.0);
        assert_eq!(p.adds, 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut b = PaperBroker::new(10_000.0, 3);
        for _ in 0..5 {
            b.open(&plan(Side::Long, 1.0), now()).unwrap();
            b.close(100.5, ExitReason::Take, CloseTelemetry::default(), now());
        }
        assert_eq!(b.history().count(), 3);
        let (fills, pnl) = b.day_stats(now());
        assert_eq!(fills, 3);
        assert!(pnl > 0.0);
    }

    #[test]
    fn test_partial_then_final_carries_position_pnl() {
        let mut b = PaperBroker::new(10_000.0, 500);
        b.open(&plan(Side::Long, 2.0), now()).unwrap();
        let first = b
            .partial_close(0.5, 101.0, ExitReason::Partial, CloseTelemetry::default(), now())
            .unwrap();
        assert!(!first.is_final);
        let last = b.close(99.0, ExitReason::Stop, CloseTelemetry::default(), now()).unwrap();
        assert!((last.position_pnl - (first.pnl + last.pnl)).abs() < 1e-12);
    }
}
