//! Engine state
//!
//! One explicit aggregate owning every subsystem. Only the tick loop and
//! the control handle mutate it, always through `&mut self`, so components
//! never need their own locking.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::log::{LogLine, LogRing};
use super::status::{short_status, ExecutionTelemetry, StatusInputs, StatusSnapshot};
use super::EngineConfig;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::execution::{GateInput, PositionMeta, RejectReason, SizingGate};
use crate::feed::{RawTick, SeedData};
use crate::market::bars::aggregate_into;
use crate::market::context::{atr_pct_ratio, momentum};
use crate::market::{BarSeries, IndicatorConfig, MarketContext, Momentum, Quote, H1_SECS, M1_SECS};
use crate::position::{CloseTelemetry, ExitReason, ManageInput, PaperBroker, Position, PositionManager, Trade};
use crate::risk::SessionRiskState;
use crate::strategy::{EntrySignal, Regime, Side, Signal, StrategyRouter, Timeframe, WaitReason};

/// m1 bars re-aggregated into h1 on every fresh tick
const H1_REAGGREGATE_TAIL: usize = 120;

/// What one tick did
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// A new price arrived (as opposed to a reused or missing one)
    pub fresh: bool,
    /// A closed m1 bar triggered a routing decision
    pub decided: bool,
    pub opened: bool,
    pub trades: Vec<Trade>,
}

pub struct EngineState {
    config: EngineConfig,
    indicators: IndicatorConfig,
    m1: BarSeries,
    h1: BarSeries,
    seed_source: Option<String>,

    quote: Option<Quote>,
    last_good_tick: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    feed_stale: bool,
    auto_trade: bool,

    router: StrategyRouter,
    gate: SizingGate,
    manager: PositionManager,
    broker: PaperBroker,
    risk: SessionRiskState,

    last_m1_closed: Option<i64>,
    last_h1_acted: Option<i64>,
    last_reject: Option<RejectReason>,
    last_wait: Option<WaitReason>,
    last_open_meta: Option<PositionMeta>,
    log: LogRing,
}

impl EngineState {
    pub fn new(config: &Config) -> Self {
        let engine = config.engine.clone();
        let venue = config.venue.clone();
        Self {
            m1: BarSeries::new(M1_SECS, engine.m1_cap),
            h1: BarSeries::new(H1_SECS, engine.h1_cap),
            seed_source: None,
            quote: None,
            last_good_tick: None,
            consecutive_failures: 0,
            feed_stale: false,
            auto_trade: engine.auto_trade,
            router: StrategyRouter::new(
                config.strategy.clone(),
                venue.round_trip_fee(false),
                venue.fee_to_target_max(false),
            ),
            gate: SizingGate::new(config.sizing.clone(), venue, config.hours.clone()),
            manager: PositionManager::new(config.lifecycle.clone()),
            broker: PaperBroker::new(engine.start_equity, engine.history_cap),
            risk: SessionRiskState::new(config.risk.clone(), engine.start_equity),
            last_m1_closed: None,
            last_h1_acted: None,
            last_reject: None,
            last_wait: None,
            last_open_meta: None,
            log: LogRing::new(engine.log_cap),
            indicators: config.indicators.clone(),
            config: engine,
        }
    }

    /// Install seed history. h1 is re-derived from m1 on top of the seeded
    /// hours so earlier history is kept.
    pub fn seed(&mut self, seed: SeedData, now: DateTime<Utc>) {
        self.m1 = BarSeries::from_seed(M1_SECS, self.config.m1_cap, seed.m1);
        self.h1 = BarSeries::from_seed(H1_SECS, self.config.h1_cap, seed.h1);
        aggregate_into(self.m1.bars(), &mut self.h1);
        self.note(
            now,
            format!("Seeded {} m1 / {} h1 bars ({})", self.m1.len(), self.h1.len(), seed.source),
        );
        self.seed_source = Some(seed.source);
    }

    /// Advance one tick: ingest, breakers, bars, risk, position, and on a
    /// closed m1 bar the routing pipeline
    pub fn on_tick(&mut self, tick: RawTick, now: DateTime<Utc>, latency_ms: Option<u64>) -> Result<TickReport> {
        let mut report = TickReport::default();

        // 1. Ingest, reusing a recent tick on transient failures
        report.fresh = self.ingest(tick, now);

        // 2. Tick health breakers
        if let Some(ms) = latency_ms {
            if self.risk.record_latency(now, ms) {
                self.log.push(now, format!("Latency halt after {}ms tick", ms));
            }
        }
        if let Some(last_ok) = self.last_good_tick {
            if self.risk.check_heartbeat(now, last_ok) {
                self.log.push(now, "Heartbeat stall: flattening");
                if let Some(t) = self.close_position(ExitReason::Heartbeat, now) {
                    report.trades.push(t);
                }
            }
        }

        let Some(quote) = self.quote else {
            return Ok(report);
        };
        let price = quote.price;

        // 3. Bars
        if report.fresh {
            self.m1.push_price(now, price);
            let tail = self.m1.bars().len().saturating_sub(H1_REAGGREGATE_TAIL);
            aggregate_into(&self.m1.bars()[tail..], &mut self.h1);
        }

        // 4. Session risk
        let atr_ratio = atr_pct_ratio(self.m1.bars(), &self.indicators);
        self.risk.update(now, self.broker.marked_equity(price), atr_ratio);

        // 5. Position lifecycle
        let momentum = momentum(self.m1.bars(), &self.indicators);
        if self.broker.position().is_some() {
            let input = ManageInput {
                price,
                now,
                vs: self.risk.vs(),
                momentum,
                live_risk_cap: self.broker.marked_equity(price) * self.gate.config().live_risk_cap_pct / 100.0,
                telemetry: self.close_telemetry(now),
            };
            let trades = self.manager.manage(&mut self.broker, &input);
            for t in &trades {
                self.after_close(t, now);
            }
            report.trades.extend(trades);
        }

        // 6. Routing on the m1 bar-close edge
        let closed = self.m1.closed().map(|b| b.time);
        if closed.is_some() && closed != self.last_m1_closed {
            self.last_m1_closed = closed;
            if self.auto_trade && !self.feed_stale {
                report.decided = true;
                report.opened = self.decide(quote, momentum, now)?;
            }
        }
        Ok(report)
    }

    fn ingest(&mut self, tick: RawTick, now: DateTime<Utc>) -> bool {
        if let Some(q) = tick.to_quote() {
            if self.feed_stale {
                self.note(now, "Feed recovered".to_string());
            }
            self.quote = Some(q);
            self.last_good_tick = Some(now);
            self.consecutive_failures = 0;
            self.feed_stale = false;
            return true;
        }

        let ttl = Duration::seconds(self.config.stale_reuse_ttl_secs);
        let reusable = self.quote.is_some() && self.last_good_tick.is_some_and(|t| now - t <= ttl);
        if reusable {
            debug!("Tick failed, reusing cached quote");
            return false;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.config.stale_after_failures && !self.feed_stale {
            self.feed_stale = true;
            warn!("Feed stale after {} failed ticks", self.consecutive_failures);
            self.log.push(now, format!("Feed stale after {} failed ticks", self.consecutive_failures));
        }
        false
    }

    fn decide(&mut self, quote: Quote, momentum: Momentum, now: DateTime<Utc>) -> Result<bool> {
        let ctx = MarketContext::build(
            self.m1.bars(),
            self.h1.bars(),
            quote,
            self.risk.view(),
            &self.indicators,
            now,
        );
        let decision = self.router.decide(&ctx);

        match decision.signal {
            Signal::Wait(reason) => {
                debug!("{}: wait ({})", decision.strategy, reason);
                self.last_wait = Some(reason);
                self.last_reject = None;
                Ok(false)
            }
            Signal::Enter(entry) => {
                self.last_wait = None;
                self.act_on_entry(&entry, decision.reading.regime, quote, momentum, now)
            }
        }
    }

    /// Gate and place an entry. An opposite position is closed first; a
    /// same-side signal is ignored.
    fn act_on_entry(
        &mut self,
        entry: &EntrySignal,
        regime: Regime,
        quote: Quote,
        momentum: Momentum,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let h1_bar = self.h1.closed().map(|b| b.time);
        if entry.timeframe == Timeframe::H1 && h1_bar.is_some() && h1_bar == self.last_h1_acted {
            debug!("{} already acted on this h1 bar", entry.strategy);
            return Ok(false);
        }
        let reversing = match self.broker.position() {
            Some(p) if p.side == entry.side => {
                debug!("Already {}, ignoring {} signal", p.side, entry.strategy);
                return Ok(false);
            }
            Some(_) => true,
            None => false,
        };

        let price = quote.price;
        let input = GateInput {
            signal: entry,
            price,
            quote,
            feed_stale: self.feed_stale,
            equity: self.broker.marked_equity(price),
            open_risk: 0.0,
            regime,
            momentum,
            now,
        };
        let plan = match self.gate.plan(&input, &mut self.risk) {
            Ok(plan) => plan,
            Err(reason) => {
                let text = format!("{} {} rejected: {}", entry.strategy, entry.side, reason.description());
                debug!("{}", text);
                self.log.push(now, text);
                self.last_reject = Some(reason);
                return Ok(false);
            }
        };
        self.last_reject = None;

        if reversing {
            self.close_position(ExitReason::Reverse, now);
        }

        match self.broker.open(&plan, now) {
            Ok(_) => {}
            Err(e) if e.is_invariant_violation() => {
                warn!("Open refused: {}", e);
                self.log.push(now, format!("Open refused: {}", e));
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        self.risk.record_open(now, plan.timeframe, self.gate.hours().is_top(now));
        if plan.timeframe == Timeframe::H1 {
            self.last_h1_acted = h1_bar;
        }
        self.log.push(
            now,
            format!(
                "Open {} {} {:.6} @ {:.2} stop {:.2} take {:.2}{}",
                plan.strategy,
                plan.side,
                plan.qty,
                plan.entry,
                plan.stop,
                plan.take,
                if plan.taker { " (taker)" } else { "" }
            ),
        );
        self.last_open_meta = Some(plan.meta);
        Ok(true)
    }

    fn close_telemetry(&self, now: DateTime<Utc>) -> CloseTelemetry {
        CloseTelemetry {
            regime: Some(self.router.telemetry().regime),
            vs: Some(self.risk.vs()),
            ps: Some(self.risk.ps()),
            spread_bps: self.quote.and_then(|q| q.spread_bps()),
            active_guard: self.risk.active_block(now).map(|b| b.description()),
        }
    }

    fn close_position(&mut self, reason: ExitReason, now: DateTime<Utc>) -> Option<Trade> {
        let price = self.quote?.price;
        let telemetry = self.close_telemetry(now);
        let trade = self.broker.close(price, reason, telemetry, now)?;
        self.after_close(&trade, now);
        Some(trade)
    }

    /// Book a closed lot; a final close feeds the loss-streak logic
    fn after_close(&mut self, trade: &Trade, now: DateTime<Utc>) {
        self.log.push(
            now,
            format!(
                "{} {} {:.6} @ {:.2} pnl {:+.2} ({:+.2}R)",
                trade.reason, trade.side, trade.qty, trade.exit, trade.pnl, trade.r_multiple
            ),
        );
        if trade.is_final {
            self.risk.record_close(now, trade.position_pnl);
        }
    }

    fn note(&mut self, now: DateTime<Utc>, text: String) {
        info!("{}", text);
        self.log.push(now, text);
    }

    // Control surface

    pub fn set_auto_trade(&mut self, enabled: bool, now: DateTime<Utc>) {
        self.auto_trade = enabled;
        self.note(now, format!("Auto-trade {}", if enabled { "on" } else { "off" }));
    }

    pub fn set_macro_pause(&mut self, enabled: bool, now: DateTime<Utc>) {
        self.risk.set_macro_pause(enabled);
        self.log.push(now, format!("Macro pause {}", if enabled { "on" } else { "off" }));
    }

    /// Open at the cached price, bypassing signals and breakers
    pub fn force_open(&mut self, side: Side, timeframe: Timeframe, now: DateTime<Utc>) -> Result<Position> {
        let quote = self.quote.ok_or_else(|| Error::Feed("no price yet".to_string()))?;
        let price = quote.price;
        let stop_distance = price * self.config.force_stop_pct / 100.0;
        let plan = self
            .gate
            .manual_plan(side, timeframe, price, stop_distance, self.broker.marked_equity(price))
            .map_err(|r| Error::InvalidOrder(r.description()))?;
        let position = self.broker.open(&plan, now)?.clone();
        self.risk.record_open(now, timeframe, self.gate.hours().is_top(now));
        self.note(now, format!("Forced open {} {} {:.6} @ {:.2}", timeframe, side, plan.qty, price));
        self.last_open_meta = Some(plan.meta);
        Ok(position)
    }

    pub fn force_close(&mut self, now: DateTime<Utc>) -> Option<Trade> {
        self.close_position(ExitReason::Manual, now)
    }

    pub fn force_partial(&mut self, fraction: f64, now: DateTime<Utc>) -> Option<Trade> {
        let price = self.quote?.price;
        let telemetry = self.close_telemetry(now);
        let trade = self
            .broker
            .partial_close(fraction, price, ExitReason::Partial, telemetry, now)?;
        self.after_close(&trade, now);
        Some(trade)
    }

    // Read side

    pub fn feed_stale(&self) -> bool {
        self.feed_stale
    }

    pub fn quote(&self) -> Option<Quote> {
        self.quote
    }

    pub fn position(&self) -> Option<&Position> {
        self.broker.position()
    }

    pub fn auto_trade(&self) -> bool {
        self.auto_trade
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn logs(&self, limit: usize) -> Vec<LogLine> {
        self.log.tail(limit)
    }

    pub fn status(&self, now: DateTime<Utc>) -> StatusSnapshot {
        let price = self.quote.map(|q| q.price);
        let block = self.risk.active_block(now);
        let status = short_status(&StatusInputs {
            auto_trade: self.auto_trade,
            feed_stale: self.feed_stale,
            has_price: price.is_some(),
            position_open: self.broker.position().is_some(),
            block: block.as_ref(),
            last_reject: self.last_reject.as_ref(),
            last_wait: self.last_wait.as_ref(),
        });
        let (fills_today, pnl_today) = self.broker.day_stats(now);
        let marked_equity = price.map_or(self.broker.equity(), |p| self.broker.marked_equity(p));
        let venue = self.gate.venue();
        let recent = self.m1.bars().len().saturating_sub(self.config.status_recent_bars);

        StatusSnapshot {
            ts: now,
            status: status.to_string(),
            auto_trade: self.auto_trade,
            feed_stale: self.feed_stale,
            seed_source: self.seed_source.clone(),
            price,
            bid: self.quote.and_then(|q| q.bid),
            ask: self.quote.and_then(|q| q.ask),
            equity: self.broker.equity(),
            marked_equity,
            unrealized_pnl: marked_equity - self.broker.equity(),
            position: self.broker.position().cloned(),
            fills_today,
            pnl_today,
            trades: self.broker.history().cloned().collect(),
            recent_m1: self.m1.bars()[recent..].to_vec(),
            router: self.router.telemetry().clone(),
            risk: self.risk.snapshot(now),
            execution: ExecutionTelemetry {
                spread_bps: self.quote.and_then(|q| q.spread_bps()),
                maker_fee_bps: venue.maker_fee_bps,
                taker_fee_bps: venue.taker_fee_bps,
                last_open: self.last_open_meta.clone(),
            },
            last_reject: self.last_reject.clone(),
            last_wait: self.last_wait.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Bar;
    use crate::risk::RiskBlock;
    use crate::strategy::{SignalMeta, StrategyKind};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 30).unwrap()
    }

    fn good(price: f64) -> RawTick {
        RawTick::new(Some(price), Some(price - 0.01), Some(price + 0.01))
    }

    fn engine() -> EngineState {
        EngineState::new(&Config::default())
    }

    fn h1_signal(side: Side) -> EntrySignal {
        EntrySignal {
            side,
            strategy: StrategyKind::H1MeanReversion,
            timeframe: Timeframe::H1,
            stop_distance: 1.0,
            take_distance: 2.0,
            score: 6.0,
            meta: SignalMeta::default(),
        }
    }

    fn enter(state: &mut EngineState, side: Side, now: DateTime<Utc>) -> bool {
        let quote = state.quote().unwrap();
        state
            .act_on_entry(&h1_signal(side), Regime::Range, quote, Momentum::default(), now)
            .unwrap()
    }

    #[test]
    fn test_stale_feed_reuse_within_ttl() {
        let mut s = engine();
        s.on_tick(good(100.0), t0(), None).unwrap();

        let r = s.on_tick(RawTick::default(), t0() + Duration::seconds(3), None).unwrap();
        assert!(!r.fresh);
        assert_eq!(s.consecutive_failures, 0);
        assert_eq!(s.quote().unwrap().price, 100.0);

        for k in 0..4 {
            s.on_tick(RawTick::default(), t0() + Duration::seconds(7 + k), None).unwrap();
        }
        assert_eq!(s.consecutive_failures, 4);
        assert!(!s.feed_stale());
        s.on_tick(RawTick::default(), t0() + Duration::seconds(11), None).unwrap();
        assert!(s.feed_stale());
        assert_eq!(s.status(t0() + Duration::seconds(11)).status, "Feed stale");

        s.on_tick(good(100.5), t0() + Duration::seconds(12), None).unwrap();
        assert!(!s.feed_stale());
        assert_eq!(s.consecutive_failures, 0);
    }

    #[test]
    fn test_opposite_signal_closes_then_reverses() {
        let mut s = engine();
        s.on_tick(good(100.0), t0(), None).unwrap();

        assert!(enter(&mut s, Side::Long, t0()));
        assert!(!enter(&mut s, Side::Long, t0()));
        assert_eq!(s.position().unwrap().side, Side::Long);

        assert!(enter(&mut s, Side::Short, t0()));
        assert_eq!(s.position().unwrap().side, Side::Short);
        let reversed: Vec<&Trade> = s.broker.history().collect();
        assert_eq!(reversed.len(), 1);
        assert_eq!(reversed[0].reason, ExitReason::Reverse);
        assert!(reversed[0].is_final);
    }

    #[test]
    fn test_h1_acts_once_per_closed_bar() {
        let mut s = engine();
        let h1: Vec<Bar> = (6..9)
            .map(|h| Bar::from_price(Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap().timestamp(), 100.0))
            .collect();
        s.seed(SeedData { m1: Vec::new(), h1, source: "test".to_string() }, t0());
        s.on_tick(good(100.0), t0(), None).unwrap();

        assert!(enter(&mut s, Side::Long, t0()));
        s.force_close(t0()).unwrap();
        assert!(!enter(&mut s, Side::Long, t0() + Duration::seconds(5)));
        assert!(s.position().is_none());
    }

    #[test]
    fn test_heartbeat_stall_flattens() {
        let mut s = engine();
        s.on_tick(good(100.0), t0(), None).unwrap();
        s.force_open(Side::Long, Timeframe::M1, t0()).unwrap();

        let later = t0() + Duration::seconds(6);
        let r = s.on_tick(RawTick::default(), later, None).unwrap();
        assert!(s.position().is_none());
        assert_eq!(r.trades.last().unwrap().reason, ExitReason::Heartbeat);
        assert!(matches!(
            s.status(later).risk.active_block,
            Some(RiskBlock::HeartbeatStall { .. })
        ));
    }

    #[test]
    fn test_force_endpoints() {
        let mut s = engine();
        assert!(s.force_open(Side::Long, Timeframe::H1, t0()).is_err());
        s.on_tick(good(100.0), t0(), None).unwrap();

        let pos = s.force_open(Side::Short, Timeframe::H1, t0()).unwrap();
        assert_eq!(pos.strategy, StrategyKind::Manual);
        assert!(matches!(
            s.force_open(Side::Long, Timeframe::H1, t0()),
            Err(Error::PositionAlreadyOpen { .. })
        ));

        let qty = pos.qty;
        let part = s.force_partial(0.5, t0()).unwrap();
        assert!(!part.is_final);
        assert!((s.position().unwrap().qty - qty / 2.0).abs() < 1e-9);
        let last = s.force_close(t0()).unwrap();
        assert!(last.is_final);
        assert!(s.force_close(t0()).is_none());
        assert_eq!(s.status(t0()).fills_today, 2);
    }

    #[test]
    fn test_auto_trade_toggle_and_logs() {
        let mut s = engine();
        s.on_tick(good(100.0), t0(), None).unwrap();
        s.set_auto_trade(false, t0());
        let status = s.status(t0());
        assert_eq!(status.status, "Auto-trade off");
        assert!(!status.auto_trade);
        s.set_macro_pause(true, t0());
        assert!(s.status(t0()).risk.macro_pause);
        let logs = s.logs(10);
        assert_eq!(logs.last().unwrap().text, "Macro pause on");
    }

    #[test]
    fn test_bars_follow_fresh_ticks_only() {
        let mut s = engine();
        s.on_tick(good(100.0), t0(), None).unwrap();
        s.on_tick(good(101.0), t0() + Duration::seconds(10), None).unwrap();
        s.on_tick(RawTick::default(), t0() + Duration::seconds(12), None).unwrap();
        let bar = *s.m1.last().unwrap();
        assert_eq!(bar.close, 101.0);
        assert_eq!(bar.volume, 2.0);
        assert_eq!(s.h1.last().unwrap().close, 101.0);

        let r = s.on_tick(good(100.8), t0() + Duration::seconds(60), None).unwrap();
        assert!(r.decided);
        assert_eq!(s.m1.len(), 2);
    }
}
