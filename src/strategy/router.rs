//! Strategy Router
//!
//! Classifies the regime once per decision and dispatches to the evaluator
//! that owns it. In Range both mean-reversion evaluators compete, tried in
//! an order chosen by VS.

use serde::{Deserialize, Serialize};

use super::breakout::{BreakoutConfig, BreakoutStrategy};
use super::mean_reversion::{MeanReversionConfig, MeanReversionStrategy};
use super::regime::{RegimeClassifier, RegimeConfig, RegimeReading};
use super::scalp::{ScalpConfig, ScalpStrategy};
use super::trend::{TrendConfig, TrendStrategy};
use super::types::{Bias, Regime, Signal, StrategyKind, WaitReason};
use super::EntryStrategy;
use crate::market::MarketContext;

/// Router and evaluator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub router: RouterConfig,
    pub regime: RegimeConfig,
    pub scalp: ScalpConfig,
    pub mean_reversion: MeanReversionConfig,
    pub breakout: BreakoutConfig,
    pub trend: TrendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// VS at or above which the m1 scalp is tried before h1 mean reversion
    pub m1_first_min_vs: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { m1_first_min_vs: 1.0 }
    }
}

/// Read-only view of the last decision
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterTelemetry {
    pub regime: Regime,
    pub bias: Bias,
    pub adx: Option<f64>,
    pub atr_pct: Option<f64>,
    pub active_strategy: Option<StrategyKind>,
    pub last_wait: Option<WaitReason>,
}

/// One routed decision
#[derive(Debug, Clone)]
pub struct RouterDecision {
    pub signal: Signal,
    /// Evaluator whose answer was returned
    pub strategy: StrategyKind,
    pub reading: RegimeReading,
}

pub struct StrategyRouter {
    config: RouterConfig,
    classifier: RegimeClassifier,
    scalp: ScalpStrategy,
    mean_reversion: MeanReversionStrategy,
    breakout: BreakoutStrategy,
    trend: TrendStrategy,
    telemetry: RouterTelemetry,
}

impl StrategyRouter {
    /// `round_trip_fee` and `fee_to_target_max` feed the scalp's fee pre-check
    pub fn new(config: StrategyConfig, round_trip_fee: f64, fee_to_target_max: f64) -> Self {
        Self {
            config: config.router,
            classifier: RegimeClassifier::new(config.regime),
            scalp: ScalpStrategy::new(config.scalp, round_trip_fee, fee_to_target_max),
            mean_reversion: MeanReversionStrategy::new(config.mean_reversion),
            breakout: BreakoutStrategy::new(config.breakout),
            trend: TrendStrategy::new(config.trend),
            telemetry: RouterTelemetry::default(),
        }
    }

    /// Classify, dispatch, and record telemetry
    pub fn decide(&mut self, ctx: &MarketContext) -> RouterDecision {
        let reading = self.classifier.classify(ctx.h1.as_ref());

        let (signal, strategy) = match reading.regime {
            Regime::Trend => (self.trend.evaluate(ctx), StrategyKind::H1Trend),
            Regime::Breakout => (self.breakout.evaluate(ctx), StrategyKind::H1Breakout),
            Regime::Range => {
                let m1_first = ctx.session.vs >= self.config.m1_first_min_vs;
                let order: [&dyn EntryStrategy; 2] = if m1_first {
                    [&self.scalp, &self.mean_reversion]
                } else {
                    [&self.mean_reversion, &self.scalp]
                };
                first_entry(&order, ctx)
            }
        };

        self.telemetry = RouterTelemetry {
            regime: reading.regime,
            bias: reading.bias,
            adx: reading.adx,
            atr_pct: reading.atr_pct,
            active_strategy: Some(strategy),
            last_wait: match &signal {
                Signal::Wait(reason) => Some(reason.clone()),
                Signal::Enter(_) => None,
            },
        };

        RouterDecision {
            signal,
            strategy,
            reading,
        }
    }

    pub fn telemetry(&self) -> &RouterTelemetry {
        &self.telemetry
    }
}

/// First evaluator to return an entry wins; otherwise the first wait
fn first_entry(order: &[&dyn EntryStrategy; 2], ctx: &MarketContext) -> (Signal, StrategyKind) {
    let mut first_wait = None;
    for strategy in order {
        let signal = strategy.evaluate(ctx);
        if !signal.is_wait() {
            return (signal, strategy.kind());
        }
        first_wait.get_or_insert((signal, strategy.kind()));
    }
    first_wait.unwrap_or((Signal::Wait(WaitReason::NoPattern), order[0].kind()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::indicators::make_bars;
    use crate::market::{IndicatorConfig, Quote, SessionView};
    use chrono::Utc;

    fn router() -> StrategyRouter {
        StrategyRouter::new(StrategyConfig::default(), 0.0002, 0.20)
    }

    #[test]
    fn test_trend_regime_routes_to_trend() {
        let closes: Vec<f64> = (0..250).map(|k| 100.0 + 2.0 * k as f64).collect();
        let h1 = make_bars(&closes);
        let ctx = MarketContext::build(&[], &h1, Quote::default(), SessionView::default(), &IndicatorConfig::default(), Utc::now());
        let mut r = router();
        let decision = r.decide(&ctx);
        assert_eq!(decision.reading.regime, Regime::Trend);
        assert_eq!(decision.strategy, StrategyKind::H1Trend);
        assert!(!decision.signal.is_wait());
        assert_eq!(r.telemetry().active_strategy, Some(StrategyKind::H1Trend));
        assert_eq!(r.telemetry().bias, Bias::Long);
    }

    #[test]
    fn test_range_order_follows_vs() {
        let closes: Vec<f64> = (0..250).map(|k| if k % 2 == 0 { 100.0 } else { 101.0 }).collect();
        let h1 = make_bars(&closes);
        let mut r = router();

        let hot = SessionView { vs: 1.5, ..Default::default() };
        let ctx = MarketContext::build(&[], &h1, Quote::default(), hot, &IndicatorConfig::default(), Utc::now());
        let decision = r.decide(&ctx);
        assert_eq!(decision.reading.regime, Regime::Range);
        // Both wait; the preferred evaluator's reason is reported
        assert_eq!(decision.strategy, StrategyKind::M1Scalp);

        let calm = SessionView { vs: 0.8, ..Default::default() };
        let ctx = MarketContext::build(&[], &h1, Quote::default(), calm, &IndicatorConfig::default(), Utc::now());
        let decision = r.decide(&ctx);
        assert_eq!(decision.strategy, StrategyKind::H1MeanReversion);
        assert!(r.telemetry().last_wait.is_some());
    }

    #[test]
    fn test_range_falls_through_to_second_evaluator() {
        // Stretched h1 with no m1 data: scalp waits, mean reversion fires
        let mut closes: Vec<f64> = (0..240).map(|k| if k % 2 == 0 { 100.0 } else { 101.0 }).collect();
        closes.push(93.0);
        closes.push(93.0);
        let h1 = make_bars(&closes);
        let ctx = MarketContext::build(&[], &h1, Quote::default(), SessionView::default(), &IndicatorConfig::default(), Utc::now());
        let mut r = router();
        let decision = r.decide(&ctx);
        assert_eq!(decision.strategy, StrategyKind::H1MeanReversion);
        assert!(!decision.signal.is_wait());
    }
}
