//! Status snapshot and the short status phrase
//!
//! The phrase is derived by priority from the structured reasons: off,
//! feed, open trade, session breaker, last reject, last wait.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::{PositionMeta, RejectReason};
use crate::market::Bar;
use crate::position::{Position, Trade};
use crate::risk::{RiskBlock, RiskSnapshot};
use crate::strategy::{RouterTelemetry, WaitReason};

/// Fee, spread and slippage figures for the status view
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionTelemetry {
    pub spread_bps: Option<f64>,
    pub maker_fee_bps: f64,
    pub taker_fee_bps: f64,
    /// Metadata captured by the most recent open
    pub last_open: Option<PositionMeta>,
}

/// Read-only view served to the control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub ts: DateTime<Utc>,
    pub status: String,
    pub auto_trade: bool,
    pub feed_stale: bool,
    pub seed_source: Option<String>,
    pub price: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub equity: f64,
    pub marked_equity: f64,
    pub unrealized_pnl: f64,
    pub position: Option<Position>,
    pub fills_today: usize,
    pub pnl_today: f64,
    pub trades: Vec<Trade>,
    pub recent_m1: Vec<Bar>,
    pub router: RouterTelemetry,
    pub risk: RiskSnapshot,
    pub execution: ExecutionTelemetry,
    pub last_reject: Option<RejectReason>,
    pub last_wait: Option<WaitReason>,
}

impl StatusSnapshot {
    /// One line for periodic console output
    pub fn summary_line(&self) -> String {
        let position = match &self.position {
            Some(p) => format!("{} {:.4} @ {:.2}", p.side, p.qty, p.entry),
            None => "flat".to_string(),
        };
        format!(
            "[{}] px={} eq={:.2} day={:+.2} fills={} {} | regime={} VS={:.2} PS={:.2}",
            self.status,
            self.price.map_or("-".to_string(), |p| format!("{:.2}", p)),
            self.marked_equity,
            self.pnl_today,
            self.fills_today,
            position,
            self.router.regime,
            self.risk.vs,
            self.risk.ps,
        )
    }
}

/// Inputs the phrase is derived from
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs<'a> {
    pub auto_trade: bool,
    pub feed_stale: bool,
    pub has_price: bool,
    pub position_open: bool,
    pub block: Option<&'a RiskBlock>,
    pub last_reject: Option<&'a RejectReason>,
    pub last_wait: Option<&'a WaitReason>,
}

/// Short human status, two to four words
pub fn short_status(s: &StatusInputs) -> &'static str {
    if !s.auto_trade {
        return "Auto-trade off";
    }
    if s.feed_stale {
        return "Feed stale";
    }
    if !s.has_price {
        return "Waiting for data";
    }
    if s.position_open {
        return "Managing open trade";
    }
    if let Some(block) = s.block {
        return block_phrase(block);
    }
    if let Some(reject) = s.last_reject {
        return reject_phrase(reject);
    }
    match s.last_wait {
        Some(wait) => wait_phrase(wait),
        None => "Scanning for entries",
    }
}

fn block_phrase(block: &RiskBlock) -> &'static str {
    match block {
        RiskBlock::DayLocked { .. } => "Day locked",
        RiskBlock::RedDayHalt { .. } => "Red day halt",
        RiskBlock::DrawdownHalt { .. } => "Drawdown halt",
        RiskBlock::HeartbeatStall { .. } => "Heartbeat pause",
        RiskBlock::LatencyHalt { .. } => "Latency pause",
        RiskBlock::MacroPause { manual: true, .. } => "Paused (macro)",
        RiskBlock::MacroPause { manual: false, .. } => "Volatility pause",
        RiskBlock::LossStreakCooldown { .. } => "Loss-streak cooldown",
        RiskBlock::Giveback { .. } => "Giveback pause",
        RiskBlock::FeeViolations { .. } => "Fee breaker pause",
    }
}

fn reject_phrase(reject: &RejectReason) -> &'static str {
    match reject {
        RejectReason::StaleFeed => "Feed stale",
        RejectReason::NoBbo => "No bid/ask",
        RejectReason::Blocked { block } => block_phrase(block),
        RejectReason::M1Cooldown => "Entry cooldown",
        RejectReason::BottomHours => "Off-hours block",
        RejectReason::RedDayOffHours => "Red day throttle",
        RejectReason::ConfirmationRequired => "Awaiting confirmation",
        RejectReason::InvalidDistance { .. } => "Invalid order levels",
        RejectReason::LiveRiskCap { .. } => "Risk cap reached",
        RejectReason::DepthInsufficient { .. } => "Depth too thin",
        RejectReason::SlippageTooHigh { .. } => "Slippage too high",
        RejectReason::BelowMinNotional { .. } => "Order too small",
        RejectReason::FeeToTarget { .. } => "Fees exceed target",
    }
}

fn wait_phrase(wait: &WaitReason) -> &'static str {
    match wait {
        WaitReason::Warmup { .. } => "Warming up",
        WaitReason::AtrBand { .. } => "Volatility out of band",
        WaitReason::VwapSlope { .. } => "VWAP trending",
        WaitReason::SpreadWide { .. } => "Spread too wide",
        WaitReason::NoQuote => "No bid/ask",
        WaitReason::InsideBand => "Inside VWAP band",
        WaitReason::BiasConflict { .. } => "Bias conflict",
        WaitReason::LowVolume { .. } => "Volume too low",
        WaitReason::NoPattern => "Waiting for setup",
        WaitReason::ZScoreUnconfirmed { .. } => "Z-score unconfirmed",
        WaitReason::ScoreLow { .. } => "Score too low",
        WaitReason::FeeToTarget { .. } => "Fees exceed target",
        WaitReason::AdxTooHigh { .. } => "Trend too strong",
        WaitReason::NearMean { .. } => "Near the mean",
        WaitReason::RsiNotExtreme { .. } => "RSI not extreme",
        WaitReason::NoSqueeze => "No squeeze",
        WaitReason::NoExpansion => "No range expansion",
        WaitReason::NoDonchianBreak => "No channel break",
        WaitReason::NoMacdCross => "No MACD cross",
        WaitReason::TrendWeak { .. } => "Trend too weak",
        WaitReason::SlopeDisagrees => "Slope disagrees",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> StatusInputs<'static> {
        StatusInputs {
            auto_trade: true,
            feed_stale: false,
            has_price: true,
            position_open: false,
            block: None,
            last_reject: None,
            last_wait: None,
        }
    }

    #[test]
    fn test_priority_order() {
        let block = RiskBlock::LossStreakCooldown { streak: 3, resume_in_secs: 60 };
        let reject = RejectReason::M1Cooldown;
        let wait = WaitReason::NoPattern;
        let all = StatusInputs {
            block: Some(&block),
            last_reject: Some(&reject),
            last_wait: Some(&wait),
            ..idle()
        };
        assert_eq!(short_status(&all), "Loss-streak cooldown");
        assert_eq!(short_status(&StatusInputs { position_open: true, ..all }), "Managing open trade");
        assert_eq!(short_status(&StatusInputs { feed_stale: true, ..all }), "Feed stale");
        assert_eq!(short_status(&StatusInputs { auto_trade: false, ..all }), "Auto-trade off");
        assert_eq!(short_status(&StatusInputs { block: None, ..all }), "Entry cooldown");
        assert_eq!(
            short_status(&StatusInputs { block: None, last_reject: None, ..all }),
            "Waiting for setup"
        );
        assert_eq!(short_status(&idle()), "Scanning for entries");
    }

    #[test]
    fn test_phrases_are_short() {
        let waits = [
            WaitReason::Warmup { have: 1, need: 2 },
            WaitReason::AtrBand { actual: 0.0, min: 0.0, max: 0.0 },
            WaitReason::ZScoreUnconfirmed { z: None },
            WaitReason::SlopeDisagrees,
        ];
        let rejects = [
            RejectReason::ConfirmationRequired,
            RejectReason::SlippageTooHigh { slip_r: 0.3, cap: 0.25 },
        ];
        let phrases = waits
            .iter()
            .map(wait_phrase)
            .chain(rejects.iter().map(reject_phrase))
            .chain([block_phrase(&RiskBlock::MacroPause { manual: true, resume_in_secs: None })]);
        for p in phrases {
            let words = p.split_whitespace().count();
            assert!((2..=4).contains(&words), "{:?}", p);
        }
    }
}
