//! Venue model: fees, tick sizes, synthetic depth and slippage

use serde::{Deserialize, Serialize};

/// Venue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
    pub maker_fee_bps: f64,
    pub taker_fee_bps: f64,
    /// Max round-trip fee / target for passive orders
    pub fee_to_target_max_maker: f64,
    /// Max round-trip fee / target for fast-tape taker orders
    pub fee_to_target_max_taker: f64,
    /// 0 disables price quantization
    pub price_tick: f64,
    /// 0 disables quantity quantization
    pub qty_tick: f64,
    pub exchange_min_notional: f64,
    pub min_notional: f64,
    /// Synthetic notional resting in the top three levels
    pub synthetic_top3_notional: f64,
    /// Required depth / order notional
    pub depth_ratio_min: f64,
    pub slip_k: f64,
    /// Max estimated slippage in units of R
    pub slip_r_cap: f64,
    pub max_shrink_iters: usize,
    pub shrink_factor: f64,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            maker_fee_bps: 1.0,
            taker_fee_bps: 2.0,
            fee_to_target_max_maker: 0.20,
            fee_to_target_max_taker: 0.18,
            price_tick: 0.01,
            qty_tick: 0.0,
            exchange_min_notional: 0.0,
            min_notional: 10.0,
            synthetic_top3_notional: 75_000.0,
            depth_ratio_min: 2.0,
            slip_k: 0.6,
            slip_r_cap: 0.25,
            max_shrink_iters: 12,
            shrink_factor: 0.8,
        }
    }
}

/// Direction to round a quantized value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Down,
    Up,
}

impl VenueConfig {
    /// Per-side fee rate as a fraction of notional
    pub fn fee_rate(&self, taker: bool) -> f64 {
        if taker {
            self.taker_fee_bps / 10_000.0
        } else {
            self.maker_fee_bps / 10_000.0
        }
    }

    /// Entry plus exit fee as a fraction of notional
    pub fn round_trip_fee(&self, taker: bool) -> f64 {
        2.0 * self.fee_rate(taker)
    }

    pub fn fee_to_target_max(&self, taker: bool) -> f64 {
        if taker {
            self.fee_to_target_max_taker
        } else {
            self.fee_to_target_max_maker
        }
    }

    pub fn quantize_price(&self, price: f64, rounding: Rounding) -> f64 {
        quantize(price, self.price_tick, rounding)
    }

    /// Quantities always round down
    pub fn quantize_qty(&self, qty: f64) -> f64 {
        quantize(qty, self.qty_tick, Rounding::Down)
    }

    pub fn min_order_notional(&self) -> f64 {
        self.min_notional.max(self.exchange_min_notional)
    }

    /// Synthetic depth over order notional
    pub fn depth_ratio(&self, notional: f64) -> f64 {
        if notional <= 0.0 {
            return f64::INFINITY;
        }
        self.synthetic_top3_notional / notional
    }

    /// Estimated fill slippage in price units: half the spread plus an
    /// impact term growing with the share of depth consumed
    pub fn slippage_price(&self, notional: f64, price: f64, spread: f64) -> f64 {
        let impact = if self.synthetic_top3_notional > 0.0 {
            self.slip_k * (notional / self.synthetic_top3_notional) * price * 0.001
        } else {
            f64::INFINITY
        };
        spread.max(0.0) / 2.0 + impact
    }
}

fn quantize(value: f64, tick: f64, rounding: Rounding) -> f64 {
    if tick <= 0.0 {
        return value;
    }
    let steps = value / tick;
    let nearest = steps.round();
    let n = if (steps - nearest).abs() < 1e-6 {
        nearest
    } else {
        match rounding {
            Rounding::Down => steps.floor(),
            Rounding::Up => steps.ceil(),
        }
    };
    n * tick
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_rates() {
        let v = VenueConfig::default();
        assert!((v.round_trip_fee(false) - 0.0002).abs() < 1e-15);
        assert!((v.round_trip_fee(true) - 0.0004).abs() < 1e-15);
        assert_eq!(v.fee_to_target_max(true), 0.18);
    }

    #[test]
    fn test_quantize_ignores_float_noise() {
        let v = VenueConfig::default();
        assert!((v.quantize_price(99.8, Rounding::Down) - 99.8).abs() < 1e-9);
        assert!((v.quantize_price(99.8049, Rounding::Down) - 99.80).abs() < 1e-9);
        assert!((v.quantize_price(99.8049, Rounding::Up) - 99.81).abs() < 1e-9);
        assert_eq!(v.quantize_qty(1.2345), 1.2345);
    }

    #[test]
    fn test_slippage_grows_with_size() {
        let v = VenueConfig::default();
        let small = v.slippage_price(1_000.0, 100.0, 0.01);
        let large = v.slippage_price(30_000.0, 100.0, 0.01);
        assert!(small > 0.005 && large > small);
        assert!((large - (0.005 + 0.6 * 0.4 * 0.1)).abs() < 1e-12);
    }
}
