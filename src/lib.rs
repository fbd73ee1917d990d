//! Regime Trader Library
//!
//! Single-instrument paper-trading engine: regime-routed entry signals,
//! session risk breakers, fee-aware sizing and a managed position lifecycle.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod feed;
pub mod market;
pub mod position;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use config::Config;
pub use engine::{EngineHandle, EngineRunner, EngineState, StatusSnapshot};
pub use error::{Error, Result};
