//! Regime-routed entry strategies
//!
//! ## Classification
//! - `regime` - Trend / Breakout / Range with ADX hysteresis
//!
//! ## Evaluators
//! - `scalp` - m1 VWAP-band reclaim scalp
//! - `mean_reversion` - h1 fade of Donchian-midpoint stretches
//! - `breakout` - h1 squeeze and expansion break
//! - `trend` - h1 Donchian break with the trend slope
//!
//! ## Routing
//! - `router` - regime dispatch and telemetry

pub mod types;

pub mod regime;

pub mod breakout;
pub mod mean_reversion;
pub mod scalp;
pub mod trend;

pub mod router;

pub use breakout::{BreakoutConfig, BreakoutStrategy};
pub use mean_reversion::{MeanReversionConfig, MeanReversionStrategy};
pub use regime::{RegimeClassifier, RegimeConfig, RegimeReading};
pub use router::{RouterConfig, RouterDecision, RouterTelemetry, StrategyConfig, StrategyRouter};
pub use scalp::{ScalpConfig, ScalpStrategy};
pub use trend::{TrendConfig, TrendStrategy};
pub use types::{
    Bias, EntrySignal, Regime, Side, Signal, SignalMeta, StrategyKind, Timeframe, WaitReason,
};

use crate::market::context::H1View;
use crate::market::MarketContext;

/// An entry evaluator. Pure over its context: the same context always
/// yields the same signal.
pub trait EntryStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn evaluate(&self, ctx: &MarketContext) -> Signal;
}

/// Hour bias from the closed bar against the long trend EMA
pub fn trend_bias(h1: &H1View) -> Bias {
    let close = h1.closed().close;
    let ema = h1.ema_trend[h1.i];
    if close > ema {
        Bias::Long
    } else if close < ema {
        Bias::Short
    } else {
        Bias::Neutral
    }
}
