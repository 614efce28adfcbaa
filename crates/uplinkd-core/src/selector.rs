//! The auto-selector: periodically re-homes the gateway onto the best
//! scoring connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use crate::catalog::ConnectionCatalog;
use crate::config::AutoSelectionConfig;
use crate::gateway::GatewayBridge;
use crate::status::StatusBoard;
use crate::worker::sleep_while_running;

pub struct AutoSelector {
    catalog: Arc<ConnectionCatalog>,
    gateway: Arc<GatewayBridge>,
    status: Arc<StatusBoard>,
    enabled: AtomicBool,
    initial_delay: Duration,
    evaluation_interval: Duration,
    min_improvement: f64,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AutoSelector {
    pub fn new(
        config: &AutoSelectionConfig,
        catalog: Arc<ConnectionCatalog>,
        gateway: Arc<GatewayBridge>,
        status: Arc<StatusBoard>,
    ) -> Arc<AutoSelector> {
        status.set_selector_enabled(config.enabled);
        Arc::new(AutoSelector {
            catalog,
            gateway,
            status,
            enabled: AtomicBool::new(config.enabled),
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            evaluation_interval: Duration::from_secs(config.evaluation_interval_secs),
            min_improvement: config.min_score_improvement,
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    /// Toggle auto-selection at runtime. The worker keeps ticking either
    /// way and simply no-ops while disabled, which keeps timing stable
    /// across toggles.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.status.set_selector_enabled(enabled);
        info!(
            "auto-selection {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.status.set_selector_active(true);
        let selector = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("selector".to_string())
            .spawn(move || {
                sleep_while_running(&selector.running, selector.initial_delay);
                while selector.running.load(Ordering::SeqCst) {
                    if selector.is_enabled() {
                        selector.evaluate();
                    }
                    sleep_while_running(&selector.running, selector.evaluation_interval);
                }
            })
            .expect("failed to spawn selector thread");
        *self.handle.lock().expect("selector handle poisoned") = Some(handle);
        info!("selector started");
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.lock().expect("selector handle poisoned").take() {
            let _ = handle.join();
        }
        self.status.set_selector_active(false);
        info!("selector stopped");
    }

    /// One evaluation pass. Binds when unbound; re-homes only when the best
    /// candidate improves on the current binding by at least the configured
    /// margin. Ties keep the current binding.
    pub(crate) fn evaluate(&self) {
        let Some(best) = self.catalog.best() else {
            return;
        };

        match self.gateway.binding() {
            None => {
                info!(
                    "no gateway bound, selecting '{}' (score {:.1})",
                    best.ap.ssid,
                    best.score()
                );
                if let Err(e) = self.gateway.bind(&best) {
                    warn!("auto-selection bind failed: {}", e);
                }
            }
            Some(binding) => {
                if best.radio == binding.wifi_interface && best.ap.ssid == binding.ssid {
                    return;
                }

                let current_score = self
                    .catalog
                    .snapshot()
                    .iter()
                    .find(|c| {
                        c.connected
                            && c.radio == binding.wifi_interface
                            && c.ap.ssid == binding.ssid
                    })
                    .map(|c| c.score());

                let should_switch = match current_score {
                    Some(current) => best.score() - current >= self.min_improvement,
                    // The bound connection vanished from the catalog.
                    None => true,
                };

                if should_switch {
                    info!(
                        "re-homing gateway to '{}' (score {:.1})",
                        best.ap.ssid,
                        best.score()
                    );
                    if let Err(e) = self.gateway.bind(&best) {
                        warn!("auto-selection rebind failed: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Connection;
    use crate::config::GatewayConfig;
    use crate::testutil::{ap_open, MockHostOps};

    fn connection(radio: &str, ssid: &str, bssid: &str, download: f64, signal: u8) -> Connection {
        Connection {
            ap: ap_open(ssid, bssid, signal),
            radio: radio.to_string(),
            strategy: "open".to_string(),
            download_mbps: download,
            upload_mbps: 0.0,
            latency_ms: 200.0,
            connected: true,
        }
    }

    struct Fixture {
        catalog: Arc<ConnectionCatalog>,
        gateway: Arc<GatewayBridge>,
        selector: Arc<AutoSelector>,
    }

    fn fixture() -> Fixture {
        let ops = MockHostOps::new();
        ops.add_interface("eth0", false);
        ops.add_interface("wlan1", true);
        ops.add_interface("wlan2", true);

        let status = Arc::new(StatusBoard::new());
        let catalog = Arc::new(ConnectionCatalog::new());
        let gateway = Arc::new(GatewayBridge::new(
            ops.shared(),
            GatewayConfig::default(),
            Arc::clone(&status),
        ));
        let selector = AutoSelector::new(
            &AutoSelectionConfig {
                enabled: true,
                ..Default::default()
            },
            Arc::clone(&catalog),
            Arc::clone(&gateway),
            status,
        );
        Fixture {
            catalog,
            gateway,
            selector,
        }
    }

    #[test]
    fn empty_catalog_is_a_no_op() {
        let f = fixture();
        f.selector.evaluate();
        assert!(f.gateway.binding().is_none());
    }

    #[test]
    fn unbound_gateway_gets_the_best_connection() {
        let f = fixture();
        // scores: 0.4*75 + 0.3*50 = 45 vs 0.4*100 + 0.3*50 = 55
        f.catalog.adopt(connection("wlan1", "A", "aa", 75.0, 50));
        f.catalog.adopt(connection("wlan2", "B", "bb", 100.0, 50));

        f.selector.evaluate();

        let binding = f.gateway.binding().unwrap();
        assert_eq!(binding.ssid, "B");
        assert_eq!(binding.wifi_interface, "wlan2");
    }

    #[test]
    fn sufficient_improvement_switches_the_binding() {
        let f = fixture();
        let a = connection("wlan1", "A", "aa", 75.0, 50); // score 45
        f.catalog.adopt(a.clone());
        f.gateway.bind(&a).unwrap();

        f.catalog.adopt(connection("wlan2", "B", "bb", 100.0, 50)); // score 55
        f.selector.evaluate();

        assert_eq!(f.gateway.binding().unwrap().ssid, "B");
    }

    #[test]
    fn insufficient_improvement_keeps_the_binding() {
        let f = fixture();
        let a = connection("wlan1", "A", "aa", 75.0, 50); // score 45
        f.catalog.adopt(a.clone());
        f.gateway.bind(&a).unwrap();

        f.catalog.adopt(connection("wlan2", "B", "bb", 87.5, 50)); // score 50
        f.selector.evaluate();

        assert_eq!(f.gateway.binding().unwrap().ssid, "A");
    }

    #[test]
    fn equal_scores_keep_the_current_binding() {
        let f = fixture();
        let a = connection("wlan1", "A", "aa", 75.0, 50);
        f.catalog.adopt(a.clone());
        f.gateway.bind(&a).unwrap();

        f.catalog.adopt(connection("wlan2", "B", "bb", 75.0, 50));
        f.selector.evaluate();

        assert_eq!(f.gateway.binding().unwrap().ssid, "A");
    }

    #[test]
    fn vanished_binding_is_replaced() {
        let f = fixture();
        let a = connection("wlan1", "A", "aa", 75.0, 50);
        f.catalog.adopt(a.clone());
        f.gateway.bind(&a).unwrap();

        f.catalog.remove_for_radio("wlan1");
        f.catalog.adopt(connection("wlan2", "B", "bb", 10.0, 20));
        f.selector.evaluate();

        assert_eq!(f.gateway.binding().unwrap().ssid, "B");
    }

    #[test]
    fn toggling_is_observable() {
        let f = fixture();
        assert!(f.selector.is_enabled());
        f.selector.set_enabled(false);
        assert!(!f.selector.is_enabled());
    }
}
