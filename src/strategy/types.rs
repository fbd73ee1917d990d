//! Shared types for the strategy system
//!
//! Signals, sides, timeframes and the closed set of wait reasons the
//! evaluators can return.

use serde::{Deserialize, Serialize};

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1.0 for long, -1.0 for short
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Bar timeframe a strategy trades on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    M1,
    H1,
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Timeframe::M1 => write!(f, "m1"),
            Timeframe::H1 => write!(f, "h1"),
        }
    }
}

/// Market regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Trend,
    Breakout,
    #[default]
    Range,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::Trend => write!(f, "trend"),
            Regime::Breakout => write!(f, "breakout"),
            Regime::Range => write!(f, "range"),
        }
    }
}

/// Close relative to the long EMA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bias {
    Long,
    Short,
    #[default]
    Neutral,
}

impl Bias {
    /// Bias permits entries on `side`
    pub fn allows(&self, side: Side) -> bool {
        matches!(
            (self, side),
            (Bias::Neutral, _) | (Bias::Long, Side::Long) | (Bias::Short, Side::Short)
        )
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bias::Long => write!(f, "long"),
            Bias::Short => write!(f, "short"),
            Bias::Neutral => write!(f, "neutral"),
        }
    }
}

/// Which evaluator produced a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    M1Scalp,
    H1MeanReversion,
    H1Breakout,
    H1Trend,
    /// Forced from the control surface
    Manual,
}

impl StrategyKind {
    pub fn timeframe(&self) -> Timeframe {
        match self {
            StrategyKind::M1Scalp => Timeframe::M1,
            StrategyKind::H1MeanReversion
            | StrategyKind::H1Breakout
            | StrategyKind::H1Trend
            | StrategyKind::Manual => Timeframe::H1,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::M1Scalp => write!(f, "m1_scalp"),
            StrategyKind::H1MeanReversion => write!(f, "h1_mean_reversion"),
            StrategyKind::H1Breakout => write!(f, "h1_breakout"),
            StrategyKind::H1Trend => write!(f, "h1_trend"),
            StrategyKind::Manual => write!(f, "manual"),
        }
    }
}

/// Optional hints an evaluator attaches for the sizing gate and telemetry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalMeta {
    /// Raw VWAP band as a fraction of price
    pub band_pct: Option<f64>,
    /// Raw target as a fraction of price, before fee-aware finalization
    pub tp_pct: Option<f64>,
    /// Engulfing reclaim with volume and z-score confirmation
    pub micro_confirmed: Option<bool>,
    pub z_vwap: Option<f64>,
    pub rsi: Option<f64>,
    pub atr_pct: Option<f64>,
    pub adx: Option<f64>,
    pub capitulation: Option<bool>,
}

/// An actionable entry candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub side: Side,
    pub strategy: StrategyKind,
    pub timeframe: Timeframe,
    /// Absolute price distance to the initial stop (1R)
    pub stop_distance: f64,
    /// Absolute price distance to the initial target
    pub take_distance: f64,
    pub score: f64,
    pub meta: SignalMeta,
}

/// Evaluator output: either an entry or a reason to wait
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Enter(EntrySignal),
    Wait(WaitReason),
}

impl Signal {
    pub fn is_wait(&self) -> bool {
        matches!(self, Signal::Wait(_))
    }

    pub fn entry(&self) -> Option<&EntrySignal> {
        match self {
            Signal::Enter(e) => Some(e),
            Signal::Wait(_) => None,
        }
    }
}

/// Why an evaluator declined to trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WaitReason {
    Warmup { have: usize, need: usize },
    AtrBand { actual: f64, min: f64, max: f64 },
    VwapSlope { slope: f64, cap: f64 },
    SpreadWide { bps: f64, max: f64 },
    NoQuote,
    InsideBand,
    BiasConflict { bias: Bias },
    LowVolume { ratio: f64, need: f64 },
    NoPattern,
    ZScoreUnconfirmed { z: Option<f64> },
    ScoreLow { score: f64, min: f64 },
    FeeToTarget { ratio: f64, max: f64 },
    AdxTooHigh { adx: f64, cap: f64 },
    NearMean { deviation_atr: f64, need: f64 },
    RsiNotExtreme { rsi: f64 },
    NoSqueeze,
    NoExpansion,
    NoDonchianBreak,
    NoMacdCross,
    TrendWeak { adx: f64, min: f64 },
    SlopeDisagrees,
}

impl std::fmt::Display for WaitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitReason::Warmup { have, need } => write!(f, "warmup {}/{} bars", have, need),
            WaitReason::AtrBand { actual, min, max } => write!(
                f,
                "ATR% {:.3}% outside [{:.3}%, {:.3}%]",
                actual * 100.0,
                min * 100.0,
                max * 100.0
            ),
            WaitReason::VwapSlope { slope, cap } => {
                write!(f, "VWAP slope {:.4}% > cap {:.4}%", slope * 100.0, cap * 100.0)
            }
            WaitReason::SpreadWide { bps, max } => write!(f, "spread {:.1}bps > {:.1}bps", bps, max),
            WaitReason::NoQuote => write!(f, "no bid/ask"),
            WaitReason::InsideBand => write!(f, "price inside VWAP band"),
            WaitReason::BiasConflict { bias } => write!(f, "h1 bias {} disagrees", bias),
            WaitReason::LowVolume { ratio, need } => {
                write!(f, "volume {:.2}x median < {:.2}x", ratio, need)
            }
            WaitReason::NoPattern => write!(f, "no reclaim pattern"),
            WaitReason::ZScoreUnconfirmed { z } => match z {
                Some(z) => write!(f, "z-VWAP {:.2} not confirming", z),
                None => write!(f, "z-VWAP undefined"),
            },
            WaitReason::ScoreLow { score, min } => write!(f, "score {:.2} < {:.2}", score, min),
            WaitReason::FeeToTarget { ratio, max } => {
                write!(f, "fee/target {:.3} > {:.3}", ratio, max)
            }
            WaitReason::AdxTooHigh { adx, cap } => write!(f, "ADX {:.1} > cap {:.1}", adx, cap),
            WaitReason::NearMean { deviation_atr, need } => {
                write!(f, "deviation {:.2} ATR < {:.2} ATR", deviation_atr, need)
            }
            WaitReason::RsiNotExtreme { rsi } => write!(f, "RSI {:.1} not extreme", rsi),
            WaitReason::NoSqueeze => write!(f, "no ATR squeeze"),
            WaitReason::NoExpansion => write!(f, "no range expansion"),
            WaitReason::NoDonchianBreak => write!(f, "no Donchian break"),
            WaitReason::NoMacdCross => write!(f, "no MACD cross"),
            WaitReason::TrendWeak { adx, min } => write!(f, "ADX {:.1} < {:.1}", adx, min),
            WaitReason::SlopeDisagrees => write!(f, "EMA slope disagrees"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_helpers() {
        assert_eq!(Side::Long.sign(), 1.0);
        assert_eq!(Side::Short.opposite(), Side::Long);
        assert_eq!(Side::Short.to_string(), "short");
    }

    #[test]
    fn test_bias_allows() {
        assert!(Bias::Neutral.allows(Side::Short));
        assert!(Bias::Long.allows(Side::Long));
        assert!(!Bias::Long.allows(Side::Short));
    }

    #[test]
    fn test_wait_reason_display() {
        let r = WaitReason::AtrBand { actual: 0.0002, min: 0.0005, max: 0.0175 };
        assert_eq!(r.to_string(), "ATR% 0.020% outside [0.050%, 1.750%]");
        let json = serde_json::to_string(&WaitReason::NoPattern).unwrap();
        assert_eq!(json, r#"{"kind":"no_pattern"}"#);
    }
}
