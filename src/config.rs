//! Configuration loading and validation
//!
//! Every section has complete defaults, so an empty or missing file is a
//! valid configuration. Values are layered: defaults, then the TOML file,
//! then `TRADER__SECTION__KEY` environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::engine::EngineConfig;
pub use crate::execution::{SizingConfig, VenueConfig};
pub use crate::feed::FeedConfig;
pub use crate::market::IndicatorConfig;
pub use crate::position::LifecycleConfig;
pub use crate::risk::{RiskConfig, TradingHoursConfig};
pub use crate::strategy::StrategyConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub feed: FeedConfig,
    pub indicators: IndicatorConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub sizing: SizingConfig,
    pub venue: VenueConfig,
    pub hours: TradingHoursConfig,
    pub lifecycle: LifecycleConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("engine.start_equity", EngineConfig::default().start_equity)?
            .set_default("engine.auto_trade", EngineConfig::default().auto_trade)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (TRADER__ENGINE__START_EQUITY)
            .add_source(
                config::Environment::with_prefix("TRADER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let e = &self.engine;
        if !e.start_equity.is_finite() || e.start_equity <= 0.0 {
            anyhow::bail!("engine.start_equity must be positive");
        }
        if e.tick_interval_ms == 0 || e.stale_poll_interval_ms == 0 {
            anyhow::bail!("engine tick intervals must be positive");
        }
        if e.stale_after_failures == 0 {
            anyhow::bail!("engine.stale_after_failures must be at least 1");
        }
        if e.m1_cap < 60 || e.h1_cap < 24 {
            anyhow::bail!("engine.m1_cap must be >= 60 and engine.h1_cap >= 24");
        }
        if e.force_stop_pct <= 0.0 || e.force_stop_pct >= 100.0 {
            anyhow::bail!("engine.force_stop_pct must be between 0 and 100");
        }

        let v = &self.venue;
        if v.maker_fee_bps < 0.0 || v.taker_fee_bps < 0.0 {
            anyhow::bail!("venue fees cannot be negative");
        }
        if v.maker_fee_bps > v.taker_fee_bps {
            anyhow::bail!(
                "venue.maker_fee_bps ({}) exceeds taker_fee_bps ({})",
                v.maker_fee_bps,
                v.taker_fee_bps
            );
        }
        if v.price_tick < 0.0 || v.qty_tick < 0.0 {
            anyhow::bail!("venue ticks cannot be negative");
        }
        if v.shrink_factor <= 0.0 || v.shrink_factor >= 1.0 {
            anyhow::bail!("venue.shrink_factor must be between 0 and 1");
        }

        let s = &self.sizing;
        for (name, pct) in [
            ("sizing.base_risk_pct_m1", s.base_risk_pct_m1),
            ("sizing.base_risk_pct_h1", s.base_risk_pct_h1),
            ("sizing.live_risk_cap_pct", s.live_risk_cap_pct),
        ] {
            if pct <= 0.0 || pct > 10.0 {
                anyhow::bail!("{} must be in (0, 10], got {}", name, pct);
            }
        }
        if s.ps_factor_min > s.ps_factor_max {
            anyhow::bail!("sizing.ps_factor_min exceeds ps_factor_max");
        }

        let r = &self.risk;
        if r.vs_min <= 0.0 || r.vs_min >= r.vs_max {
            anyhow::bail!("risk.vs_min must be positive and below vs_max");
        }
        if r.heartbeat_max_stall_secs <= 0 {
            anyhow::bail!("risk.heartbeat_max_stall_secs must be positive");
        }

        let l = &self.lifecycle;
        for (name, f) in [
            ("lifecycle.partial_fraction", l.partial_fraction),
            ("lifecycle.hot_partial_fraction", l.hot_partial_fraction),
            ("lifecycle.h1_partial_fraction", l.h1_partial_fraction),
            ("lifecycle.h1_partial_fraction_mean_reversion", l.h1_partial_fraction_mean_reversion),
            ("lifecycle.scale_out_fraction", l.scale_out_fraction),
        ] {
            if f <= 0.0 || f >= 1.0 {
                anyhow::bail!("{} must be between 0 and 1, got {}", name, f);
            }
        }

        let h = &self.hours;
        if let Some(bad) = h.top_hours.iter().chain(&h.bottom_hours).find(|&&hr| hr > 23) {
            anyhow::bail!("Invalid UTC hour in trading hours: {}", bad);
        }
        if h.top_hours.iter().any(|hr| h.bottom_hours.contains(hr)) {
            anyhow::bail!("An hour cannot be both a top and a bottom hour");
        }

        let f = &self.feed;
        if f.tick_timeout_ms == 0 || f.request_timeout_ms == 0 {
            anyhow::bail!("feed timeouts must be positive");
        }
        if f.max_spread_bps <= 0.0 {
            anyhow::bail!("feed.max_spread_bps must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.engine.start_equity, 10_000.0);
        assert_eq!(config.venue.maker_fee_bps, 1.0);
        assert_eq!(config.sizing.live_risk_cap_pct, 1.5);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.engine.tick_interval_ms, 1_000);
        assert_eq!(config.hours.top_hours, vec![13, 14, 15, 16]);
    }

    #[test]
    fn test_file_overrides_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[engine]
start_equity = 2500.0
auto_trade = false

[venue]
taker_fee_bps = 3.5

[hours]
top_hours = [14, 15]
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.engine.start_equity, 2_500.0);
        assert!(!config.engine.auto_trade);
        assert_eq!(config.venue.taker_fee_bps, 3.5);
        assert_eq!(config.venue.maker_fee_bps, 1.0);
        assert_eq!(config.hours.top_hours, vec![14, 15]);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.venue.maker_fee_bps = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.risk.vs_min = 2.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.hours.bottom_hours.push(14);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.lifecycle.partial_fraction = 1.0;
        assert!(config.validate().is_err());
    }
}
