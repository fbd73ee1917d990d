//! Time-of-day preferences

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// UTC hours that tilt risk up or down
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingHoursConfig {
    pub top_hours: Vec<u32>,
    pub bottom_hours: Vec<u32>,
    /// Risk tilt in percent applied in top (+) and bottom (-) hours
    pub tilt_pct: f64,
    pub block_m1_bottom_hours: bool,
}

impl Default for TradingHoursConfig {
    fn default() -> Self {
        Self {
            top_hours: vec![13, 14, 15, 16],
            bottom_hours: vec![3, 4, 5],
            tilt_pct: 10.0,
            block_m1_bottom_hours: true,
        }
    }
}

impl TradingHoursConfig {
    pub fn is_top(&self, now: DateTime<Utc>) -> bool {
        self.top_hours.contains(&now.hour())
    }

    pub fn is_bottom(&self, now: DateTime<Utc>) -> bool {
        self.bottom_hours.contains(&now.hour())
    }

    /// Multiplicative risk tilt for the hour containing `now`
    pub fn risk_tilt(&self, now: DateTime<Utc>) -> f64 {
        if self.is_top(now) {
            1.0 + self.tilt_pct / 100.0
        } else if self.is_bottom(now) {
            1.0 - self.tilt_pct / 100.0
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tilt_by_hour() {
        let hours = TradingHoursConfig::default();
        let top = Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap();
        let bottom = Utc.with_ymd_and_hms(2024, 3, 1, 4, 0, 0).unwrap();
        let plain = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        assert!((hours.risk_tilt(top) - 1.1).abs() < 1e-12);
        assert!((hours.risk_tilt(bottom) - 0.9).abs() < 1e-12);
        assert_eq!(hours.risk_tilt(plain), 1.0);
        assert!(hours.is_top(top) && !hours.is_bottom(top));
    }
}
