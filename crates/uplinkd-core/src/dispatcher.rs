//! The dispatcher: turns scan snapshots into adopted connections.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info};

use uplinkd_netops::AccessPoint;

use crate::catalog::{Connection, ConnectionCatalog};
use crate::monitor::ConnectionMonitor;
use crate::pool::RadioPool;
use crate::status::StatusBoard;
use crate::strategy::{AttemptResult, Strategy};

pub struct Dispatcher {
    rx: Mutex<Option<Receiver<Vec<AccessPoint>>>>,
    strategies: Vec<Box<dyn Strategy>>,
    pool: Arc<RadioPool>,
    catalog: Arc<ConnectionCatalog>,
    monitor: Arc<ConnectionMonitor>,
    status: Arc<StatusBoard>,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        rx: Receiver<Vec<AccessPoint>>,
        strategies: Vec<Box<dyn Strategy>>,
        pool: Arc<RadioPool>,
        catalog: Arc<ConnectionCatalog>,
        monitor: Arc<ConnectionMonitor>,
        status: Arc<StatusBoard>,
    ) -> Arc<Dispatcher> {
        Arc::new(Dispatcher {
            rx: Mutex::new(Some(rx)),
            strategies,
            pool,
            catalog,
            monitor,
            status,
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(rx) = self.rx.lock().expect("dispatcher rx poisoned").take() else {
            // Already consumed by a previous start/stop cycle.
            return;
        };
        let dispatcher = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || dispatcher.run(rx))
            .expect("failed to spawn dispatcher thread");
        *self.handle.lock().expect("dispatcher handle poisoned") = Some(handle);
        info!("dispatcher started");
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self
            .handle
            .lock()
            .expect("dispatcher handle poisoned")
            .take()
        {
            let _ = handle.join();
        }
        info!("dispatcher stopped");
    }

    fn run(self: Arc<Self>, rx: Receiver<Vec<AccessPoint>>) {
        while self.running.load(Ordering::SeqCst) {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(snapshot) => self.handle_snapshot(snapshot),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Process one scan snapshot: offer every new AP to the strategies in
    /// order, stopping at the first success per AP.
    pub(crate) fn handle_snapshot(&self, snapshot: Vec<AccessPoint>) {
        self.refresh_status();

        for ap in snapshot {
            if self.catalog.is_connected_bssid(&ap.bssid) {
                debug!("'{}' ({}) already connected, skipping", ap.ssid, ap.bssid);
                continue;
            }

            for strategy in &self.strategies {
                if !strategy.eligible(&ap) {
                    continue;
                }
                debug!("offering '{}' to strategy {}", ap.ssid, strategy.tag());

                let result = self.attempt_guarded(strategy.as_ref(), &ap);
                if result.connected {
                    self.adopt(result);
                    break;
                }
                debug!("strategy {} could not connect '{}'", strategy.tag(), ap.ssid);
            }
        }

        self.refresh_status();
    }

    /// Final safety net: a panicking strategy becomes a failed attempt
    /// instead of unwinding past the worker loop.
    fn attempt_guarded(&self, strategy: &dyn Strategy, ap: &AccessPoint) -> AttemptResult {
        match catch_unwind(AssertUnwindSafe(|| strategy.attempt(ap))) {
            Ok(result) => result,
            Err(_) => {
                error!("strategy {} panicked on '{}'", strategy.tag(), ap.ssid);
                AttemptResult {
                    ap: ap.clone(),
                    radio: String::new(),
                    strategy: strategy.tag(),
                    download_mbps: 0.0,
                    upload_mbps: 0.0,
                    latency_ms: 0.0,
                    connected: false,
                }
            }
        }
    }

    fn adopt(&self, result: AttemptResult) {
        info!(
            "adopted '{}' via {} on {} ({:.1} Mbps down)",
            result.ap.ssid, result.strategy, result.radio, result.download_mbps
        );

        let radio_name = result.radio.clone();
        self.catalog.adopt(Connection {
            ap: result.ap,
            radio: result.radio,
            strategy: result.strategy.to_string(),
            download_mbps: result.download_mbps,
            upload_mbps: result.upload_mbps,
            latency_ms: result.latency_ms,
            connected: result.connected,
        });

        if let Some(radio) = self.pool.find(&radio_name) {
            self.monitor.watch(radio);
        }
    }

    fn refresh_status(&self) {
        let pool_status = self.pool.status();
        self.status.set_radios(pool_status.total, pool_status.in_use);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InterfacesConfig, MonitorConfig};
    use crate::registry::{RadioState, RoleRegistry};
    use crate::strategy::{build_strategies, StrategyContext};
    use crate::testutil::{ap_open, MockHostOps, MockMeasurer};
    use std::collections::HashMap;

    struct Fixture {
        ops: MockHostOps,
        registry: Arc<RoleRegistry>,
        pool: Arc<RadioPool>,
        catalog: Arc<ConnectionCatalog>,
        monitor: Arc<ConnectionMonitor>,
        dispatcher: Arc<Dispatcher>,
    }

    fn fixture(interfaces: &[&str]) -> Fixture {
        let ops = MockHostOps::new();
        for iface in interfaces {
            ops.add_interface(iface, true);
        }

        let registry = Arc::new(RoleRegistry::new(None));
        let pool = RadioPool::enumerate(
            &InterfacesConfig::default(),
            ops.shared(),
            Arc::clone(&registry),
        );
        let catalog = Arc::new(ConnectionCatalog::new());
        let status = Arc::new(StatusBoard::new());
        let monitor = ConnectionMonitor::new(&MonitorConfig::default(), Arc::clone(&status));

        let ctx = Arc::new(StrategyContext {
            pool: Arc::clone(&pool),
            registry: Arc::clone(&registry),
            measurer: MockMeasurer::ok(40.0, 10.0, 30.0),
            credentials: HashMap::new(),
            portal_patterns_path: None,
        });
        let strategies = build_strategies(ctx, Some(&["open".to_string()]));

        let (_tx, rx) = std::sync::mpsc::sync_channel(1);
        let dispatcher = Dispatcher::new(
            rx,
            strategies,
            Arc::clone(&pool),
            Arc::clone(&catalog),
            Arc::clone(&monitor),
            status,
        );

        Fixture {
            ops,
            registry,
            pool,
            catalog,
            monitor,
            dispatcher,
        }
    }

    #[test]
    fn happy_path_two_radios_one_open_ap() {
        let f = fixture(&["wlan0", "wlan1"]);
        let ap = ap_open("Cafe", "00:11:22:33:44:55", 90);

        f.dispatcher.handle_snapshot(vec![ap]);

        // The connection landed on the connection radio, never wlan0.
        let connections = f.catalog.snapshot();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].radio, "wlan1");
        assert!(connections[0].connected);
        assert_eq!(connections[0].strategy, "open");

        assert!(f.monitor.watched().contains(&"wlan1".to_string()));
        assert!(f
            .ops
            .associate_log()
            .iter()
            .all(|(iface, _)| iface != "wlan0"));
        assert_eq!(
            f.registry.get("wlan1").unwrap().state,
            RadioState::Connected
        );
    }

    #[test]
    fn scanning_radio_never_carries_a_connection() {
        let f = fixture(&["wlan0"]);
        let ap = ap_open("X", "aa:bb:cc:dd:ee:ff", 50);

        f.dispatcher.handle_snapshot(vec![ap]);

        assert!(f.catalog.is_empty());
        assert!(f.ops.associate_log().is_empty());
        assert!(f.monitor.watched().is_empty());
    }

    #[test]
    fn connected_bssids_are_not_reattempted() {
        let f = fixture(&["wlan0", "wlan1"]);
        let ap = ap_open("Cafe", "00:11:22:33:44:55", 90);

        f.dispatcher.handle_snapshot(vec![ap.clone()]);
        let attempts_before = f.ops.associate_log().len();

        f.dispatcher.handle_snapshot(vec![ap]);
        assert_eq!(f.ops.associate_log().len(), attempts_before);
        assert_eq!(f.catalog.len(), 1);
    }

    #[test]
    fn failed_attempts_do_not_enter_the_catalog() {
        let f = fixture(&["wlan0", "wlan1"]);
        f.ops.fail_associations_to("Hostile");
        let ap = ap_open("Hostile", "aa:bb:cc:dd:ee:ff", 40);

        f.dispatcher.handle_snapshot(vec![ap]);

        assert!(f.catalog.is_empty());
        assert!(f.monitor.watched().is_empty());
        // The radio is free again for the next snapshot.
        assert!(f.pool.lease(crate::pool::LeasePurpose::Connection).is_some());
    }

    #[test]
    fn second_open_ap_has_no_radio_left_but_first_stays_up() {
        let f = fixture(&["wlan0", "wlan1"]);
        let first = ap_open("Cafe", "00:11:22:33:44:55", 90);
        let second = ap_open("Bar", "66:77:88:99:aa:bb", 70);

        f.dispatcher.handle_snapshot(vec![first, second]);

        let connections = f.catalog.snapshot();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].ap.ssid, "Cafe");
    }
}
