//! Position management module
//!
//! The paper broker owns the single open position; the manager advances
//! it through partials, adds, trailing and exits.

pub mod broker;
pub mod manager;

pub use broker::{CloseTelemetry, ExitReason, PaperBroker, Position, Trade};
pub use manager::{LifecycleConfig, ManageInput, PositionManager};
