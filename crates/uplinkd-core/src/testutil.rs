//! Shared test doubles: a scriptable `HostOps` and a canned `Measurer`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uplinkd_netops::{
    AccessPoint, Credential, DhcpRange, Encryption, HostError, HostOps, LinkStatus,
};

use crate::measure::{Measurement, Measurer};

pub(crate) fn ap_open(ssid: &str, bssid: &str, signal: u8) -> AccessPoint {
    AccessPoint {
        ssid: ssid.to_string(),
        bssid: bssid.to_string(),
        channel: 6,
        signal_strength: signal,
        encryption: Encryption::Open,
        open: true,
    }
}

pub(crate) fn ap_encrypted(
    ssid: &str,
    bssid: &str,
    signal: u8,
    encryption: Encryption,
) -> AccessPoint {
    AccessPoint {
        ssid: ssid.to_string(),
        bssid: bssid.to_string(),
        channel: 11,
        signal_strength: signal,
        encryption,
        open: false,
    }
}

#[derive(Default)]
struct MockState {
    interfaces: Vec<(String, bool)>,
    up: HashSet<String>,
    scan_output: String,
    fail_probe: HashSet<String>,
    fail_associate_ssids: HashSet<String>,
    fail_ops: HashSet<&'static str>,
    links: HashMap<String, (bool, String)>,
    associate_log: Vec<(String, String)>,
    association_attempts: HashMap<String, u32>,
    forwarding: bool,
    filter_rules: Vec<String>,
    nat_rules: Vec<String>,
    addresses: HashMap<String, Vec<String>>,
    dhcp_servers: HashSet<String>,
}

#[derive(Clone, Default)]
pub(crate) struct MockHostOps {
    state: Arc<Mutex<MockState>>,
}

impl MockHostOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> Arc<dyn HostOps> {
        Arc::new(self.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock poisoned")
    }

    pub fn add_interface(&self, name: &str, wireless: bool) {
        self.lock().interfaces.push((name.to_string(), wireless));
    }

    pub fn set_scan_output(&self, output: &str) {
        self.lock().scan_output = output.to_string();
    }

    pub fn fail_probe(&self, iface: &str) {
        self.lock().fail_probe.insert(iface.to_string());
    }

    pub fn fail_associations_to(&self, ssid: &str) {
        self.lock().fail_associate_ssids.insert(ssid.to_string());
    }

    pub fn fail_op(&self, op: &'static str) {
        self.lock().fail_ops.insert(op);
    }

    /// Simulate the AP dropping the association.
    pub fn drop_link(&self, iface: &str) {
        self.lock().links.remove(iface);
    }

    pub fn association_attempts(&self, iface: &str) -> u32 {
        self.lock()
            .association_attempts
            .get(iface)
            .copied()
            .unwrap_or(0)
    }

    pub fn associate_log(&self) -> Vec<(String, String)> {
        self.lock().associate_log.clone()
    }

    pub fn set_forwarding(&self, enabled: bool) {
        self.lock().forwarding = enabled;
    }

    pub fn forwarding(&self) -> bool {
        self.lock().forwarding
    }

    pub fn filter_rules(&self) -> Vec<String> {
        self.lock().filter_rules.clone()
    }

    pub fn nat_rules(&self) -> Vec<String> {
        self.lock().nat_rules.clone()
    }

    pub fn addresses(&self, iface: &str) -> Vec<String> {
        self.lock().addresses.get(iface).cloned().unwrap_or_default()
    }

    pub fn dhcp_running(&self, iface: &str) -> bool {
        self.lock().dhcp_servers.contains(iface)
    }

    pub fn interface_up(&self, iface: &str) -> bool {
        self.lock().up.contains(iface)
    }

    fn check(&self, op: &'static str, iface: &str) -> Result<(), HostError> {
        if self.lock().fail_ops.contains(op) {
            return Err(HostError::call(op, iface, "scripted failure"));
        }
        Ok(())
    }
}

impl HostOps for MockHostOps {
    fn list_interfaces(&self) -> Result<Vec<String>, HostError> {
        Ok(self.lock().interfaces.iter().map(|(n, _)| n.clone()).collect())
    }

    fn is_wireless(&self, iface: &str) -> bool {
        self.lock()
            .interfaces
            .iter()
            .any(|(n, wireless)| n == iface && *wireless)
    }

    fn probe_wireless(&self, iface: &str) -> Result<(), HostError> {
        let state = self.lock();
        let wireless = state
            .interfaces
            .iter()
            .any(|(n, wireless)| n == iface && *wireless);
        if !wireless || state.fail_probe.contains(iface) {
            return Err(HostError::NotWireless(iface.to_string()));
        }
        Ok(())
    }

    fn bring_up(&self, iface: &str) -> Result<(), HostError> {
        self.check("bring_up", iface)?;
        self.lock().up.insert(iface.to_string());
        Ok(())
    }

    fn bring_down(&self, iface: &str) -> Result<(), HostError> {
        self.check("bring_down", iface)?;
        self.lock().up.remove(iface);
        Ok(())
    }

    fn is_up(&self, iface: &str) -> Result<bool, HostError> {
        self.check("is_up", iface)?;
        Ok(self.lock().up.contains(iface))
    }

    fn scan_output(&self, iface: &str) -> Result<String, HostError> {
        self.check("scan", iface)?;
        Ok(self.lock().scan_output.clone())
    }

    fn associate(
        &self,
        iface: &str,
        ssid: &str,
        _bssid: &str,
        _credential: Option<&Credential>,
        _timeout: Duration,
    ) -> Result<(), HostError> {
        {
            let mut state = self.lock();
            state
                .associate_log
                .push((iface.to_string(), ssid.to_string()));
            *state
                .association_attempts
                .entry(iface.to_string())
                .or_insert(0) += 1;
        }
        self.check("associate", iface)?;
        let mut state = self.lock();
        if state.fail_associate_ssids.contains(ssid) {
            return Err(HostError::call("associate", iface, "association refused"));
        }
        state
            .links
            .insert(iface.to_string(), (true, ssid.to_string()));
        Ok(())
    }

    fn disassociate(&self, iface: &str) -> Result<(), HostError> {
        self.lock().links.remove(iface);
        Ok(())
    }

    fn link_status(&self, iface: &str) -> Result<LinkStatus, HostError> {
        self.check("link_status", iface)?;
        let state = self.lock();
        Ok(match state.links.get(iface) {
            Some((associated, ssid)) => LinkStatus {
                associated: *associated,
                ssid: Some(ssid.clone()),
            },
            None => LinkStatus::default(),
        })
    }

    fn acquire_dhcp(&self, iface: &str, _timeout: Duration) -> Result<(), HostError> {
        self.check("acquire_dhcp", iface)
    }

    fn release_dhcp(&self, iface: &str) -> Result<(), HostError> {
        self.check("release_dhcp", iface)
    }

    fn ip_forwarding(&self) -> Result<bool, HostError> {
        self.check("ip_forwarding", "")?;
        Ok(self.lock().forwarding)
    }

    fn set_ip_forwarding(&self, enabled: bool) -> Result<(), HostError> {
        self.check("set_ip_forwarding", "")?;
        self.lock().forwarding = enabled;
        Ok(())
    }

    fn flush_filter(&self) -> Result<(), HostError> {
        self.check("flush_filter", "")?;
        let mut state = self.lock();
        state.filter_rules.clear();
        state.nat_rules.clear();
        Ok(())
    }

    fn install_masquerade(&self, wifi_iface: &str) -> Result<(), HostError> {
        self.check("install_masquerade", wifi_iface)?;
        self.lock()
            .nat_rules
            .push(format!("POSTROUTING -o {wifi_iface} -j MASQUERADE"));
        Ok(())
    }

    fn install_forward_rules(&self, lan_iface: &str, wifi_iface: &str) -> Result<(), HostError> {
        self.check("install_forward_rules", lan_iface)?;
        let mut state = self.lock();
        state
            .filter_rules
            .push(format!("FORWARD -i {lan_iface} -o {wifi_iface} -j ACCEPT"));
        state.filter_rules.push(format!(
            "FORWARD -i {wifi_iface} -o {lan_iface} --state RELATED,ESTABLISHED -j ACCEPT"
        ));
        Ok(())
    }

    fn add_address(&self, iface: &str, cidr: &str) -> Result<(), HostError> {
        self.check("add_address", iface)?;
        self.lock()
            .addresses
            .entry(iface.to_string())
            .or_default()
            .push(cidr.to_string());
        Ok(())
    }

    fn flush_addresses(&self, iface: &str) -> Result<(), HostError> {
        self.check("flush_addresses", iface)?;
        self.lock().addresses.remove(iface);
        Ok(())
    }

    fn start_dhcp_server(&self, iface: &str, _range: &DhcpRange) -> Result<(), HostError> {
        self.check("start_dhcp_server", iface)?;
        self.lock().dhcp_servers.insert(iface.to_string());
        Ok(())
    }

    fn stop_dhcp_server(&self, iface: &str) -> Result<(), HostError> {
        self.check("stop_dhcp_server", iface)?;
        self.lock().dhcp_servers.remove(iface);
        Ok(())
    }
}

/// Canned measurer for strategy and dispatcher tests.
pub(crate) struct MockMeasurer {
    result: Mutex<Option<Measurement>>,
}

impl MockMeasurer {
    pub fn ok(download_mbps: f64, upload_mbps: f64, latency_ms: f64) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(Some(Measurement {
                download_mbps,
                upload_mbps,
                latency_ms,
            })),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(None),
        })
    }
}

impl Measurer for MockMeasurer {
    fn measure(&self, _iface: &str) -> crate::error::Result<Measurement> {
        match *self.result.lock().expect("mock measurer poisoned") {
            Some(m) => Ok(m),
            None => Err(crate::error::EngineError::MeasurementFailed(
                "scripted failure".to_string(),
            )),
        }
    }
}

