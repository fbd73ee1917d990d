//! Trading engine
//!
//! - `state`: the [`EngineState`] aggregate advanced once per tick
//! - `runner`: the async loop around the data collaborator
//! - `handle`: shared control surface over the running state
//! - `status`: status snapshot and short status phrase
//! - `log`: bounded log tail

pub mod handle;
pub mod log;
pub mod runner;
pub mod state;
pub mod status;

pub use handle::EngineHandle;
pub use log::{LogLine, LogRing};
pub use runner::{simulate, EngineRunner};
pub use state::{EngineState, TickReport};
pub use status::{short_status, ExecutionTelemetry, StatusInputs, StatusSnapshot};

use serde::{Deserialize, Serialize};

/// Engine loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub start_equity: f64,
    pub auto_trade: bool,
    pub history_cap: usize,
    pub log_cap: usize,
    pub m1_cap: usize,
    pub h1_cap: usize,
    pub tick_interval_ms: u64,
    /// Slower cadence while the feed is marked stale
    pub stale_poll_interval_ms: u64,
    /// A failed tick within this many seconds of the last good one reuses it
    pub stale_reuse_ttl_secs: i64,
    pub stale_after_failures: u32,
    /// Console status line period in the `run` command, 0 disables
    pub status_log_secs: u64,
    /// m1 bars included in the status snapshot
    pub status_recent_bars: usize,
    /// Stop distance for forced entries, percent of price
    pub force_stop_pct: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start_equity: 10_000.0,
            auto_trade: true,
            history_cap: 500,
            log_cap: 500,
            m1_cap: 1_500,
            h1_cap: 1_000,
            tick_interval_ms: 1_000,
            stale_poll_interval_ms: 5_000,
            stale_reuse_ttl_secs: 6,
            stale_after_failures: 5,
            status_log_secs: 30,
            status_recent_bars: 120,
            force_stop_pct: 0.2,
        }
    }
}
