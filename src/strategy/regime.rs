//! Regime Classifier
//!
//! Classifies the hour series into Trend, Breakout or Range. Trend has
//! hysteresis: it is entered at a high ADX and only left once ADX falls to
//! a lower exit level, so readings hovering at the boundary do not flap.

use serde::{Deserialize, Serialize};

use super::trend_bias;
use super::types::{Bias, Regime};
use crate::market::context::H1View;

/// Regime thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// ADX at or above which Trend is entered
    pub trend_enter_adx: f64,
    /// ADX at or below which Trend is left
    pub trend_exit_adx: f64,
    /// Breakout requires ADX at or below this
    pub breakout_max_adx: f64,
    pub breakout_atr_pct_min: f64,
    pub breakout_atr_pct_max: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            trend_enter_adx: 25.0,
            trend_exit_adx: 21.0,
            breakout_max_adx: 23.0,
            breakout_atr_pct_min: 0.0005,
            breakout_atr_pct_max: 0.0175,
        }
    }
}

/// Regime classification result
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimeReading {
    pub regime: Regime,
    pub bias: Bias,
    pub adx: Option<f64>,
    pub atr_pct: Option<f64>,
}

/// Regime Classifier
pub struct RegimeClassifier {
    config: RegimeConfig,
    in_trend: bool,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self {
            config,
            in_trend: false,
        }
    }

    /// Classify the closed hour bar
    pub fn classify(&mut self, h1: Option<&H1View>) -> RegimeReading {
        let Some(h1) = h1 else {
            return RegimeReading::default();
        };
        let i = h1.i;
        let bias = trend_bias(h1);
        let adx = h1.adx[i];
        let atr_pct = h1.atr_pct(i);

        let regime = match adx {
            Some(adx) => self.step(adx, h1.donchian_break(i) != 0, atr_pct),
            None => Regime::Range,
        };

        RegimeReading {
            regime,
            bias,
            adx,
            atr_pct,
        }
    }

    /// Advance the hysteresis state with one ADX reading
    pub fn step(&mut self, adx: f64, donchian_broken: bool, atr_pct: Option<f64>) -> Regime {
        let c = &self.config;
        if adx >= c.trend_enter_adx {
            self.in_trend = true;
        } else if self.in_trend && adx <= c.trend_exit_adx {
            self.in_trend = false;
        }

        if self.in_trend {
            return Regime::Trend;
        }

        let atr_ok = atr_pct
            .map(|p| p >= c.breakout_atr_pct_min && p <= c.breakout_atr_pct_max)
            .unwrap_or(false);
        if adx <= c.breakout_max_adx && donchian_broken && atr_ok {
            Regime::Breakout
        } else {
            Regime::Range
        }
    }

    pub fn in_trend(&self) -> bool {
        self.in_trend
    }
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new(RegimeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trend_hysteresis() {
        let mut c = RegimeClassifier::default();
        assert_eq!(c.step(25.0, false, Some(0.01)), Regime::Trend);
        // Dips right back to 22: still Trend
        assert_eq!(c.step(22.0, false, Some(0.01)), Regime::Trend);
        assert_eq!(c.step(21.5, false, Some(0.01)), Regime::Trend);
        // Only leaves at or below 21
        assert_eq!(c.step(21.0, false, Some(0.01)), Regime::Range);
        assert!(!c.in_trend());
    }

    #[test]
    fn test_no_trend_without_entry_level() {
        let mut c = RegimeClassifier::default();
        assert_eq!(c.step(24.9, false, Some(0.01)), Regime::Range);
        assert_eq!(c.step(22.0, false, Some(0.01)), Regime::Range);
    }

    #[test]
    fn test_breakout_requires_all_conditions() {
        let mut c = RegimeClassifier::default();
        assert_eq!(c.step(20.0, true, Some(0.01)), Regime::Breakout);
        assert_eq!(c.step(24.0, true, Some(0.01)), Regime::Range);
        assert_eq!(c.step(20.0, false, Some(0.01)), Regime::Range);
        assert_eq!(c.step(20.0, true, Some(0.02)), Regime::Range);
        assert_eq!(c.step(20.0, true, Some(0.0004)), Regime::Range);
        assert_eq!(c.step(20.0, true, None), Regime::Range);
    }

    #[test]
    fn test_trend_wins_over_breakout() {
        let config = RegimeConfig {
            breakout_max_adx: 30.0,
            ..Default::default()
        };
        let mut c = RegimeClassifier::new(config);
        assert_eq!(c.step(26.0, true, Some(0.01)), Regime::Trend);
    }

    #[test]
    fn test_missing_series_is_range() {
        let mut c = RegimeClassifier::default();
        let reading = c.classify(None);
        assert_eq!(reading.regime, Regime::Range);
        assert_eq!(reading.bias, Bias::Neutral);
    }
}
