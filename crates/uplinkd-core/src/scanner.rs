//! The scanner loop: periodic AP discovery on the scanning radio.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use uplinkd_netops::AccessPoint;

use crate::pool::{LeasePurpose, RadioPool};
use crate::registry::{RadioState, RoleRegistry};
use crate::status::StatusBoard;
use crate::worker::sleep_while_running;

/// Snapshots are replaceable, so the channel stays shallow and producers
/// drop on backpressure.
const SNAPSHOT_QUEUE_DEPTH: usize = 4;

pub struct Scanner {
    pool: Arc<RadioPool>,
    registry: Arc<RoleRegistry>,
    status: Arc<StatusBoard>,
    interval: Duration,
    latest: Mutex<Vec<AccessPoint>>,
    tx: SyncSender<Vec<AccessPoint>>,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scanner {
    pub fn new(
        pool: Arc<RadioPool>,
        registry: Arc<RoleRegistry>,
        status: Arc<StatusBoard>,
        interval: Duration,
    ) -> (Arc<Scanner>, Receiver<Vec<AccessPoint>>) {
        let (tx, rx) = sync_channel(SNAPSHOT_QUEUE_DEPTH);
        let scanner = Arc::new(Scanner {
            pool,
            registry,
            status,
            interval,
            latest: Mutex::new(Vec::new()),
            tx,
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        });
        (scanner, rx)
    }

    /// Start the loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.status.set_scanning_active(true);
        let scanner = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("scanner".to_string())
            .spawn(move || scanner.run())
            .expect("failed to spawn scanner thread");
        *self.handle.lock().expect("scanner handle poisoned") = Some(handle);
        info!("scanner started");
    }

    /// Stop the loop and join the worker. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.lock().expect("scanner handle poisoned").take() {
            let _ = handle.join();
        }
        self.status.set_scanning_active(false);
        info!("scanner stopped");
    }

    /// Most recent snapshot, possibly stale.
    pub fn latest(&self) -> Vec<AccessPoint> {
        self.latest.lock().expect("scanner snapshot poisoned").clone()
    }

    fn run(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            if self.scan_once() {
                sleep_while_running(&self.running, self.interval);
            } else {
                // No scanning radio right now; retry shortly.
                sleep_while_running(&self.running, Duration::from_secs(1));
            }
        }
    }

    /// One scan iteration. Returns false when no scanning radio was
    /// available. The leased radio is returned on every path.
    pub(crate) fn scan_once(&self) -> bool {
        let Some(lease) = self.pool.lease(LeasePurpose::Scanning) else {
            debug!("scanning radio unavailable");
            return false;
        };

        let name = lease.name().to_string();
        self.registry.set_state(&name, RadioState::Scanning);

        // A failed scan publishes an empty snapshot and the loop carries on.
        let networks = match lease.radio().scan() {
            Ok(networks) => networks,
            Err(e) => {
                warn!("scan on {} failed: {}", name, e);
                Vec::new()
            }
        };

        self.registry.set_state(&name, RadioState::Idle);
        drop(lease);

        debug!("scan on {} found {} networks", name, networks.len());
        *self.latest.lock().expect("scanner snapshot poisoned") = networks.clone();
        match self.tx.try_send(networks) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("snapshot queue full, dropping"),
            Err(TrySendError::Disconnected(_)) => debug!("snapshot consumer gone"),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterfacesConfig;
    use crate::testutil::MockHostOps;

    const ONE_AP: &str = r#"Cell 01 - Address: 00:11:22:33:44:55
                    Channel:6
                    Signal level=-55 dBm
                    Encryption key:off
                    ESSID:"Cafe"
"#;

    fn scanner_fixture(ops: &MockHostOps) -> (Arc<Scanner>, Receiver<Vec<AccessPoint>>) {
        let registry = Arc::new(RoleRegistry::new(None));
        let pool = RadioPool::enumerate(&InterfacesConfig::default(), ops.shared(), registry.clone());
        Scanner::new(
            pool,
            registry,
            Arc::new(StatusBoard::new()),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn scan_once_publishes_and_returns_the_radio() {
        let ops = MockHostOps::new();
        ops.add_interface("wlan0", true);
        ops.set_scan_output(ONE_AP);

        let (scanner, rx) = scanner_fixture(&ops);
        assert!(scanner.scan_once());

        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].ssid, "Cafe");
        assert_eq!(scanner.latest().len(), 1);

        // The scanning radio must be free again.
        assert!(scanner.pool.lease(LeasePurpose::Scanning).is_some());
    }

    #[test]
    fn scan_failure_publishes_empty_snapshot() {
        let ops = MockHostOps::new();
        ops.add_interface("wlan0", true);
        ops.fail_op("scan");

        let (scanner, rx) = scanner_fixture(&ops);
        assert!(scanner.scan_once());
        assert!(rx.try_recv().unwrap().is_empty());
        // The radio still came back.
        assert!(scanner.pool.lease(LeasePurpose::Scanning).is_some());
    }

    #[test]
    fn no_radio_means_no_snapshot() {
        let ops = MockHostOps::new();
        let (scanner, rx) = scanner_fixture(&ops);
        assert!(!scanner.scan_once());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn backpressure_drops_snapshots_without_blocking() {
        let ops = MockHostOps::new();
        ops.add_interface("wlan0", true);
        ops.set_scan_output(ONE_AP);

        let (scanner, rx) = scanner_fixture(&ops);
        for _ in 0..SNAPSHOT_QUEUE_DEPTH + 3 {
            assert!(scanner.scan_once());
        }
        // Queue capacity snapshots survive; the rest were dropped.
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SNAPSHOT_QUEUE_DEPTH);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let ops = MockHostOps::new();
        ops.add_interface("wlan0", true);
        ops.set_scan_output(ONE_AP);

        let (scanner, _rx) = scanner_fixture(&ops);
        scanner.start();
        scanner.start();
        std::thread::sleep(Duration::from_millis(30));
        scanner.stop();
        scanner.stop();
        assert!(!scanner.latest().is_empty());
    }
}
