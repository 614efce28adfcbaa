//! The gateway bridge: NAT-shares one connection over the Ethernet port.
//!
//! There is never more than one binding. A failed bind rolls back every step
//! already taken, so the host's packet-filter state, forwarding setting and
//! Ethernet addressing return to their pre-call values.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use uplinkd_netops::{DhcpRange, HostOps};

use crate::catalog::Connection;
use crate::config::GatewayConfig;
use crate::error::{EngineError, Result};
use crate::status::StatusBoard;

/// Interface name prefixes recognisable as Ethernet.
const ETHERNET_PREFIXES: &[&str] = &["eth", "enp", "eno", "ens"];

/// The (wifi radio, ethernet interface, SSID) triple currently NAT-exposed.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayBinding {
    pub wifi_interface: String,
    pub ethernet_interface: String,
    pub ssid: String,
}

struct ActiveGateway {
    binding: GatewayBinding,
    saved_forwarding: bool,
}

pub struct GatewayBridge {
    ops: Arc<dyn HostOps>,
    config: GatewayConfig,
    status: Arc<StatusBoard>,
    state: Mutex<Option<ActiveGateway>>,
}

impl GatewayBridge {
    pub fn new(ops: Arc<dyn HostOps>, config: GatewayConfig, status: Arc<StatusBoard>) -> Self {
        Self {
            ops,
            config,
            status,
            state: Mutex::new(None),
        }
    }

    pub fn binding(&self) -> Option<GatewayBinding> {
        self.state
            .lock()
            .expect("gateway state poisoned")
            .as_ref()
            .map(|active| active.binding.clone())
    }

    /// Expose the given connection as the NAT gateway.
    ///
    /// Any existing binding is torn down first. On failure every step
    /// already taken is rolled back and the error reported.
    pub fn bind(&self, connection: &Connection) -> Result<()> {
        let mut state = self.state.lock().expect("gateway state poisoned");

        if state.is_some() {
            self.teardown(&mut state);
        }

        let ethernet = self.pick_ethernet()?;
        let wifi = connection.radio.clone();
        info!(
            "binding gateway: '{}' on {} shared via {}",
            connection.ap.ssid, wifi, ethernet
        );

        let saved_forwarding = self
            .ops
            .ip_forwarding()
            .map_err(|e| EngineError::GatewayBindFailed(e.to_string()))?;

        // Stepwise setup; each failure unwinds everything done so far.
        if let Err(e) = self.ops.set_ip_forwarding(true) {
            return Err(EngineError::GatewayBindFailed(e.to_string()));
        }

        if let Err(e) = self.install_nat(&ethernet, &wifi) {
            self.rollback(saved_forwarding, &ethernet, false);
            return Err(EngineError::GatewayBindFailed(e.to_string()));
        }

        if let Err(e) = self.configure_lan(&ethernet) {
            self.rollback(saved_forwarding, &ethernet, false);
            return Err(EngineError::GatewayBindFailed(e.to_string()));
        }

        if let Err(e) = self.start_dhcp(&ethernet) {
            self.rollback(saved_forwarding, &ethernet, true);
            return Err(EngineError::GatewayBindFailed(e.to_string()));
        }

        let binding = GatewayBinding {
            wifi_interface: wifi,
            ethernet_interface: ethernet,
            ssid: connection.ap.ssid.clone(),
        };
        self.status.set_gateway(Some(binding.clone()));
        *state = Some(ActiveGateway {
            binding,
            saved_forwarding,
        });
        Ok(())
    }

    /// Tear the active binding down, restoring the forwarding setting saved
    /// at bind time and leaving the Ethernet interface down.
    pub fn unbind(&self) -> Result<()> {
        let mut state = self.state.lock().expect("gateway state poisoned");
        if state.is_none() {
            return Ok(());
        }
        self.teardown(&mut state);
        Ok(())
    }

    fn teardown(&self, state: &mut Option<ActiveGateway>) {
        let Some(active) = state.take() else { return };
        let ethernet = &active.binding.ethernet_interface;
        info!(
            "unbinding gateway '{}' from {}",
            active.binding.ssid, ethernet
        );

        if let Err(e) = self.ops.stop_dhcp_server(ethernet) {
            warn!("stopping dhcp server failed: {}", e);
        }
        if let Err(e) = self.ops.flush_addresses(ethernet) {
            warn!("flushing {} addresses failed: {}", ethernet, e);
        }
        if let Err(e) = self.ops.bring_down(ethernet) {
            warn!("bringing {} down failed: {}", ethernet, e);
        }
        if let Err(e) = self.ops.flush_filter() {
            warn!("flushing packet filter failed: {}", e);
        }
        if let Err(e) = self.ops.set_ip_forwarding(active.saved_forwarding) {
            warn!("restoring ip forwarding failed: {}", e);
        }
        self.status.set_gateway(None);
    }

    fn pick_ethernet(&self) -> Result<String> {
        let interfaces = self
            .ops
            .list_interfaces()
            .map_err(|e| EngineError::GatewayBindFailed(e.to_string()))?;
        interfaces
            .into_iter()
            .find(|name| {
                ETHERNET_PREFIXES.iter().any(|p| name.starts_with(p))
                    && !self.ops.is_wireless(name)
            })
            .ok_or_else(|| {
                EngineError::GatewayBindFailed("no ethernet interface available".to_string())
            })
    }

    fn install_nat(&self, ethernet: &str, wifi: &str) -> std::result::Result<(), uplinkd_netops::HostError> {
        self.ops.flush_filter()?;
        self.ops.install_masquerade(wifi)?;
        self.ops.install_forward_rules(ethernet, wifi)?;
        Ok(())
    }

    fn configure_lan(&self, ethernet: &str) -> std::result::Result<(), uplinkd_netops::HostError> {
        self.ops.add_address(ethernet, &self.config.lan_address)?;
        self.ops.bring_up(ethernet)?;
        Ok(())
    }

    fn start_dhcp(&self, ethernet: &str) -> std::result::Result<(), uplinkd_netops::HostError> {
        let range = DhcpRange {
            start: self.config.dhcp_range_start,
            end: self.config.dhcp_range_end,
            netmask: self.config.dhcp_netmask,
        };
        self.ops.start_dhcp_server(ethernet, &range)
    }

    /// Best-effort unwind of a partial bind.
    fn rollback(&self, saved_forwarding: bool, ethernet: &str, lan_configured: bool) {
        warn!("rolling back partial gateway setup");
        if lan_configured {
            if let Err(e) = self.ops.flush_addresses(ethernet) {
                warn!("rollback: flushing {} addresses failed: {}", ethernet, e);
            }
            if let Err(e) = self.ops.bring_down(ethernet) {
                warn!("rollback: bringing {} down failed: {}", ethernet, e);
            }
        }
        if let Err(e) = self.ops.flush_filter() {
            warn!("rollback: flushing packet filter failed: {}", e);
        }
        if let Err(e) = self.ops.set_ip_forwarding(saved_forwarding) {
            warn!("rollback: restoring ip forwarding failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ap_open, MockHostOps};

    fn connection(radio: &str, ssid: &str) -> Connection {
        Connection {
            ap: ap_open(ssid, "00:11:22:33:44:55", 80),
            radio: radio.to_string(),
            strategy: "open".to_string(),
            download_mbps: 50.0,
            upload_mbps: 20.0,
            latency_ms: 15.0,
            connected: true,
        }
    }

    fn fixture() -> (MockHostOps, GatewayBridge, Arc<StatusBoard>) {
        let ops = MockHostOps::new();
        ops.add_interface("eth0", false);
        ops.add_interface("wlan1", true);
        let status = Arc::new(StatusBoard::new());
        let bridge = GatewayBridge::new(ops.shared(), GatewayConfig::default(), Arc::clone(&status));
        (ops, bridge, status)
    }

    #[test]
    fn bind_installs_nat_address_and_dhcp() {
        let (ops, bridge, status) = fixture();
        bridge.bind(&connection("wlan1", "Cafe")).unwrap();

        assert!(ops.forwarding());
        assert_eq!(
            ops.nat_rules(),
            vec!["POSTROUTING -o wlan1 -j MASQUERADE".to_string()]
        );
        assert_eq!(ops.filter_rules().len(), 2);
        assert_eq!(ops.addresses("eth0"), vec!["192.168.10.1/24".to_string()]);
        assert!(ops.dhcp_running("eth0"));
        assert!(ops.interface_up("eth0"));

        let binding = bridge.binding().unwrap();
        assert_eq!(binding.ssid, "Cafe");
        assert_eq!(binding.wifi_interface, "wlan1");
        assert_eq!(binding.ethernet_interface, "eth0");
        assert_eq!(status.snapshot().gateway.unwrap().ssid, "Cafe");
    }

    #[test]
    fn no_ethernet_interface_fails_cleanly() {
        let ops = MockHostOps::new();
        ops.add_interface("wlan1", true);
        let status = Arc::new(StatusBoard::new());
        let bridge = GatewayBridge::new(ops.shared(), GatewayConfig::default(), status);

        let err = bridge.bind(&connection("wlan1", "Cafe")).unwrap_err();
        assert!(matches!(err, EngineError::GatewayBindFailed(_)));
        assert!(!ops.forwarding());
    }

    #[test]
    fn dhcp_failure_rolls_everything_back() {
        let (ops, bridge, status) = fixture();
        ops.fail_op("start_dhcp_server");

        let err = bridge.bind(&connection("wlan1", "Cafe")).unwrap_err();
        assert!(matches!(err, EngineError::GatewayBindFailed(_)));

        // Pre-call state exactly: no rules, no addresses, forwarding off.
        assert!(!ops.forwarding());
        assert!(ops.filter_rules().is_empty());
        assert!(ops.nat_rules().is_empty());
        assert!(ops.addresses("eth0").is_empty());
        assert!(!ops.dhcp_running("eth0"));
        assert!(bridge.binding().is_none());
        assert!(status.snapshot().gateway.is_none());
    }

    #[test]
    fn saved_forwarding_value_is_restored_on_rollback() {
        let (ops, bridge, _status) = fixture();
        ops.set_forwarding(true);
        ops.fail_op("add_address");

        bridge.bind(&connection("wlan1", "Cafe")).unwrap_err();
        assert!(ops.forwarding());
    }

    #[test]
    fn rebinding_tears_the_previous_binding_down_first() {
        let (ops, bridge, _status) = fixture();
        bridge.bind(&connection("wlan1", "Cafe")).unwrap();
        bridge.bind(&connection("wlan1", "Bar")).unwrap();

        let binding = bridge.binding().unwrap();
        assert_eq!(binding.ssid, "Bar");
        // Only one masquerade rule alive.
        assert_eq!(ops.nat_rules().len(), 1);
        assert!(ops.dhcp_running("eth0"));
    }

    #[test]
    fn unbind_restores_forwarding_and_leaves_interface_down() {
        let (ops, bridge, status) = fixture();
        ops.set_forwarding(false);
        bridge.bind(&connection("wlan1", "Cafe")).unwrap();
        bridge.unbind().unwrap();

        assert!(!ops.forwarding());
        assert!(ops.filter_rules().is_empty());
        assert!(ops.nat_rules().is_empty());
        assert!(ops.addresses("eth0").is_empty());
        assert!(!ops.dhcp_running("eth0"));
        assert!(!ops.interface_up("eth0"));
        assert!(bridge.binding().is_none());
        assert!(status.snapshot().gateway.is_none());

        // Unbind with no binding is fine.
        bridge.unbind().unwrap();
    }
}
