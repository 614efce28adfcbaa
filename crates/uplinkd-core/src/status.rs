//! Typed engine status snapshot.
//!
//! Workers write through narrow update methods; readers take cheap copies.
//! Everything here is derived state, never a source of truth.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::gateway::GatewayBinding;

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    pub scanning_active: bool,
    pub monitoring_active: bool,
    pub selector_active: bool,
    pub selector_enabled: bool,
    pub radios_total: usize,
    pub radios_in_use: usize,
    pub reconnects: u64,
    pub gave_up: u64,
    pub gateway: Option<GatewayBinding>,
}

#[derive(Default)]
pub struct StatusBoard {
    inner: Mutex<EngineStatus>,
    revision: AtomicU64,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> EngineStatus {
        self.inner.lock().expect("status poisoned").clone()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Relaxed)
    }

    pub fn set_scanning_active(&self, active: bool) {
        self.update(|s| s.scanning_active = active);
    }

    pub fn set_monitoring_active(&self, active: bool) {
        self.update(|s| s.monitoring_active = active);
    }

    pub fn set_selector_active(&self, active: bool) {
        self.update(|s| s.selector_active = active);
    }

    pub fn set_selector_enabled(&self, enabled: bool) {
        self.update(|s| s.selector_enabled = enabled);
    }

    pub fn set_radios(&self, total: usize, in_use: usize) {
        self.update(|s| {
            s.radios_total = total;
            s.radios_in_use = in_use;
        });
    }

    pub fn record_reconnect(&self) {
        self.update(|s| s.reconnects += 1);
    }

    pub fn record_gave_up(&self) {
        self.update(|s| s.gave_up += 1);
    }

    pub fn set_gateway(&self, binding: Option<GatewayBinding>) {
        self.update(|s| s.gateway = binding);
    }

    fn update<F: FnOnce(&mut EngineStatus)>(&self, apply: F) {
        let mut inner = self.inner.lock().expect("status poisoned");
        apply(&mut inner);
        drop(inner);
        self.revision.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_are_visible_in_snapshots() {
        let board = StatusBoard::new();
        board.set_scanning_active(true);
        board.set_radios(3, 1);
        board.record_reconnect();
        board.record_reconnect();

        let status = board.snapshot();
        assert!(status.scanning_active);
        assert_eq!(status.radios_total, 3);
        assert_eq!(status.radios_in_use, 1);
        assert_eq!(status.reconnects, 2);
    }

    #[test]
    fn snapshots_are_copies() {
        let board = StatusBoard::new();
        let before = board.snapshot();
        board.record_gave_up();
        assert_eq!(before.gave_up, 0);
        assert_eq!(board.snapshot().gave_up, 1);
    }

    #[test]
    fn revision_advances_on_update() {
        let board = StatusBoard::new();
        let r = board.revision();
        board.set_selector_enabled(true);
        assert!(board.revision() > r);
    }
}
