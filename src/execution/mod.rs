//! Order sizing and admission
//!
//! - `venue` - fees, tick sizes, synthetic depth and slippage
//! - `gate` - the sequential sizing pipeline producing an `OrderPlan`

pub mod gate;
pub mod venue;

pub use gate::{GateInput, OrderPlan, PositionMeta, RejectReason, SizingConfig, SizingGate};
pub use venue::{Rounding, VenueConfig};
