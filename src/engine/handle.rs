//! Shared control surface over the running engine

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::log::LogLine;
use super::state::EngineState;
use super::status::StatusSnapshot;
use crate::error::Result;
use crate::position::{Position, Trade};
use crate::strategy::{Side, Timeframe};

/// Cloneable handle; every clone points at the same engine state
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<RwLock<EngineState>>,
}

impl EngineHandle {
    pub fn new(state: EngineState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.inner.read().await.status(Utc::now())
    }

    pub async fn logs(&self, limit: usize) -> Vec<LogLine> {
        self.inner.read().await.logs(limit)
    }

    pub async fn set_auto_trade(&self, enabled: bool) {
        self.inner.write().await.set_auto_trade(enabled, Utc::now());
    }

    pub async fn set_macro_pause(&self, enabled: bool) {
        self.inner.write().await.set_macro_pause(enabled, Utc::now());
    }

    pub async fn force_open(&self, side: Side, timeframe: Timeframe) -> Result<Position> {
        self.inner.write().await.force_open(side, timeframe, Utc::now())
    }

    pub async fn force_close(&self) -> Option<Trade> {
        self.inner.write().await.force_close(Utc::now())
    }

    pub async fn force_partial(&self, fraction: f64) -> Option<Trade> {
        self.inner.write().await.force_partial(fraction, Utc::now())
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, EngineState> {
        self.inner.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, EngineState> {
        self.inner.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::feed::RawTick;

    #[tokio::test]
    async fn test_clones_share_state() {
        let handle = EngineHandle::new(EngineState::new(&Config::default()));
        let other = handle.clone();

        assert_eq!(handle.status().await.status, "Waiting for data");
        other.set_auto_trade(false).await;
        let status = handle.status().await;
        assert!(!status.auto_trade);
        assert_eq!(status.status, "Auto-trade off");
        assert_eq!(handle.logs(5).await.len(), 1);
    }

    #[tokio::test]
    async fn test_manual_round_trip() {
        let handle = EngineHandle::new(EngineState::new(&Config::default()));
        assert!(handle.force_close().await.is_none());
        {
            let tick = RawTick::new(Some(100.0), Some(99.99), Some(100.01));
            handle.write().await.on_tick(tick, Utc::now(), None).unwrap();
        }

        let pos = handle.force_open(Side::Long, Timeframe::M1).await.unwrap();
        assert_eq!(pos.side, Side::Long);
        assert!(handle.force_partial(0.25).await.is_some());
        let last = handle.force_close().await.unwrap();
        assert!(last.is_final);
        assert!(handle.status().await.position.is_none());
    }
}
