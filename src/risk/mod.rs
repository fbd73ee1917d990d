//! Session risk
//!
//! - `session` - VS/PS scores, day equity, loss streaks and breakers
//! - `hours` - time-of-day risk tilt
//! - `rolling` - time-stamped rolling windows behind the breakers

pub mod hours;
pub mod rolling;
pub mod session;

pub use hours::TradingHoursConfig;
pub use rolling::RollingWindow;
pub use session::{next_day_start, RiskBlock, RiskConfig, RiskSnapshot, SessionRiskState};
