//! The host call-out seam.
//!
//! Every privileged operation the engine performs against the host network
//! stack goes through [`HostOps`]. The production implementation shells out
//! to the usual userspace utilities; tests substitute their own.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::Child;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{HostError, Result};
use crate::shell;

/// Secret material used to associate with a protected network.
#[derive(Clone)]
pub enum Credential {
    WpaPsk { passphrase: String },
    Sae { passphrase: String },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::WpaPsk { .. } => f.write_str("Credential::WpaPsk(..)"),
            Credential::Sae { .. } => f.write_str("Credential::Sae(..)"),
        }
    }
}

/// Read-only association state of a wireless interface.
#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    pub associated: bool,
    pub ssid: Option<String>,
}

/// Address range handed to the DHCP server on the LAN interface.
#[derive(Debug, Clone)]
pub struct DhcpRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// All host call-outs the engine relies on.
pub trait HostOps: Send + Sync {
    fn list_interfaces(&self) -> Result<Vec<String>>;
    fn is_wireless(&self, iface: &str) -> bool;
    /// Construction-time validation of a wireless interface.
    fn probe_wireless(&self, iface: &str) -> Result<()>;
    fn bring_up(&self, iface: &str) -> Result<()>;
    fn bring_down(&self, iface: &str) -> Result<()>;
    fn is_up(&self, iface: &str) -> Result<bool>;

    /// Trigger a scan and return the raw tool output for parsing.
    fn scan_output(&self, iface: &str) -> Result<String>;
    fn associate(
        &self,
        iface: &str,
        ssid: &str,
        bssid: &str,
        credential: Option<&Credential>,
        timeout: Duration,
    ) -> Result<()>;
    fn disassociate(&self, iface: &str) -> Result<()>;
    fn link_status(&self, iface: &str) -> Result<LinkStatus>;
    fn acquire_dhcp(&self, iface: &str, timeout: Duration) -> Result<()>;
    fn release_dhcp(&self, iface: &str) -> Result<()>;

    fn ip_forwarding(&self) -> Result<bool>;
    fn set_ip_forwarding(&self, enabled: bool) -> Result<()>;
    fn flush_filter(&self) -> Result<()>;
    fn install_masquerade(&self, wifi_iface: &str) -> Result<()>;
    fn install_forward_rules(&self, lan_iface: &str, wifi_iface: &str) -> Result<()>;
    fn add_address(&self, iface: &str, cidr: &str) -> Result<()>;
    fn flush_addresses(&self, iface: &str) -> Result<()>;
    fn start_dhcp_server(&self, iface: &str, range: &DhcpRange) -> Result<()>;
    fn stop_dhcp_server(&self, iface: &str) -> Result<()>;
}

/// Production implementation driving ip/iw/iwlist/wpa_supplicant/iptables/
/// dnsmasq/udhcpc.
pub struct RealHostOps {
    runtime_dir: PathBuf,
    dhcp_servers: Mutex<HashMap<String, Child>>,
}

impl RealHostOps {
    pub fn new() -> Self {
        Self::with_runtime_dir(PathBuf::from("/run/uplinkd"))
    }

    pub fn with_runtime_dir(runtime_dir: PathBuf) -> Self {
        Self {
            runtime_dir,
            dhcp_servers: Mutex::new(HashMap::new()),
        }
    }

    fn wpa_conf_path(&self, iface: &str) -> PathBuf {
        self.runtime_dir.join(format!("wpa-{iface}.conf"))
    }

    fn wpa_pid_path(&self, iface: &str) -> PathBuf {
        self.runtime_dir.join(format!("wpa-{iface}.pid"))
    }

    fn ensure_runtime_dir(&self, op: &'static str, iface: &str) -> Result<()> {
        fs::create_dir_all(&self.runtime_dir)
            .map_err(|e| HostError::call(op, iface, format!("create runtime dir: {e}")))
    }

    fn stop_wpa_supplicant(&self, iface: &str) {
        let pid_path = self.wpa_pid_path(iface);
        if let Ok(pid) = fs::read_to_string(&pid_path) {
            let pid = pid.trim();
            if !pid.is_empty() {
                let _ = shell::run_allow_failure("disassociate", iface, "kill", &[pid]);
            }
        }
        let _ = fs::remove_file(&pid_path);
        let _ = fs::remove_file(self.wpa_conf_path(iface));
    }

    fn start_wpa_supplicant(&self, iface: &str, ssid: &str, credential: &Credential) -> Result<()> {
        self.ensure_runtime_dir("associate", iface)?;

        let network = match credential {
            Credential::WpaPsk { passphrase } => format!(
                "network={{\n    ssid=\"{ssid}\"\n    psk=\"{passphrase}\"\n    key_mgmt=WPA-PSK\n}}\n"
            ),
            Credential::Sae { passphrase } => format!(
                "network={{\n    ssid=\"{ssid}\"\n    sae_password=\"{passphrase}\"\n    key_mgmt=SAE\n    ieee80211w=2\n}}\n"
            ),
        };
        let conf = format!("ctrl_interface=/run/wpa_supplicant\n\n{network}");
        let conf_path = self.wpa_conf_path(iface);
        fs::write(&conf_path, conf)
            .map_err(|e| HostError::call("associate", iface, format!("write supplicant config: {e}")))?;

        let pid_path = self.wpa_pid_path(iface);
        shell::run(
            "associate",
            iface,
            "wpa_supplicant",
            &[
                "-B",
                "-i",
                iface,
                "-c",
                conf_path.to_str().unwrap_or_default(),
                "-P",
                pid_path.to_str().unwrap_or_default(),
            ],
        )?;
        Ok(())
    }

    fn wait_for_association(&self, iface: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.link_status(iface)?.associated {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(HostError::Timeout {
                    op: "associate",
                    iface: iface.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
            std::thread::sleep(Duration::from_millis(500));
        }
    }
}

impl Default for RealHostOps {
    fn default() -> Self {
        Self::new()
    }
}

impl HostOps for RealHostOps {
    fn list_interfaces(&self) -> Result<Vec<String>> {
        let mut interfaces = Vec::new();
        let entries = fs::read_dir("/sys/class/net")
            .map_err(|e| HostError::call("list_interfaces", "", e.to_string()))?;
        for entry in entries.flatten() {
            if let Ok(name) = entry.file_name().into_string() {
                if name != "lo" {
                    interfaces.push(name);
                }
            }
        }
        interfaces.sort();
        Ok(interfaces)
    }

    fn is_wireless(&self, iface: &str) -> bool {
        PathBuf::from("/sys/class/net")
            .join(iface)
            .join("wireless")
            .exists()
    }

    fn probe_wireless(&self, iface: &str) -> Result<()> {
        shell::run("probe", iface, "iwconfig", &[iface])
            .map_err(|_| HostError::NotWireless(iface.to_string()))?;
        Ok(())
    }

    fn bring_up(&self, iface: &str) -> Result<()> {
        shell::run("bring_up", iface, "ip", &["link", "set", iface, "up"])?;
        Ok(())
    }

    fn bring_down(&self, iface: &str) -> Result<()> {
        shell::run("bring_down", iface, "ip", &["link", "set", iface, "down"])?;
        Ok(())
    }

    fn is_up(&self, iface: &str) -> Result<bool> {
        let path = format!("/sys/class/net/{iface}/operstate");
        let state = fs::read_to_string(path)
            .map_err(|e| HostError::call("is_up", iface, e.to_string()))?;
        Ok(state.trim() == "up")
    }

    fn scan_output(&self, iface: &str) -> Result<String> {
        self.bring_up(iface)?;
        let out = shell::run("scan", iface, "iwlist", &[iface, "scan"])?;
        Ok(shell::stdout_string(&out))
    }

    fn associate(
        &self,
        iface: &str,
        ssid: &str,
        bssid: &str,
        credential: Option<&Credential>,
        timeout: Duration,
    ) -> Result<()> {
        self.bring_up(iface)?;
        self.disassociate(iface)?;

        match credential {
            None => {
                let mut args = vec!["dev", iface, "connect", ssid];
                if !bssid.is_empty() {
                    args.push(bssid);
                }
                shell::run("associate", iface, "iw", &args)?;
            }
            Some(credential) => {
                self.start_wpa_supplicant(iface, ssid, credential)?;
            }
        }

        self.wait_for_association(iface, timeout)
    }

    fn disassociate(&self, iface: &str) -> Result<()> {
        self.stop_wpa_supplicant(iface);
        // The interface may not be associated; a failed disconnect is fine.
        let _ = shell::run_allow_failure("disassociate", iface, "iw", &["dev", iface, "disconnect"]);
        Ok(())
    }

    fn link_status(&self, iface: &str) -> Result<LinkStatus> {
        let out = shell::run_allow_failure("link_status", iface, "iw", &["dev", iface, "link"])?;
        let text = shell::stdout_string(&out);
        let mut status = LinkStatus::default();
        for line in text.lines() {
            let line = line.trim();
            if line.starts_with("Connected to ") {
                status.associated = true;
            } else if let Some(rest) = line.strip_prefix("SSID:") {
                status.ssid = Some(rest.trim().to_string());
            }
        }
        Ok(status)
    }

    fn acquire_dhcp(&self, iface: &str, timeout: Duration) -> Result<()> {
        let timeout_secs = timeout.as_secs().max(1).to_string();
        shell::run(
            "acquire_dhcp",
            iface,
            "udhcpc",
            &["-i", iface, "-n", "-q", "-T", "3", "-A", &timeout_secs],
        )?;
        Ok(())
    }

    fn release_dhcp(&self, iface: &str) -> Result<()> {
        self.flush_addresses(iface)
    }

    fn ip_forwarding(&self) -> Result<bool> {
        let value = fs::read_to_string("/proc/sys/net/ipv4/ip_forward")
            .map_err(|e| HostError::call("ip_forwarding", "", e.to_string()))?;
        Ok(value.trim() == "1")
    }

    fn set_ip_forwarding(&self, enabled: bool) -> Result<()> {
        let value = if enabled { "1" } else { "0" };
        fs::write("/proc/sys/net/ipv4/ip_forward", value)
            .map_err(|e| HostError::call("set_ip_forwarding", "", e.to_string()))?;
        debug!("ip_forward set to {}", value);
        Ok(())
    }

    fn flush_filter(&self) -> Result<()> {
        shell::run("flush_filter", "", "iptables", &["-F"])?;
        shell::run("flush_filter", "", "iptables", &["-t", "nat", "-F"])?;
        Ok(())
    }

    fn install_masquerade(&self, wifi_iface: &str) -> Result<()> {
        shell::run(
            "install_masquerade",
            wifi_iface,
            "iptables",
            &[
                "-t", "nat", "-A", "POSTROUTING", "-o", wifi_iface, "-j", "MASQUERADE",
            ],
        )?;
        Ok(())
    }

    fn install_forward_rules(&self, lan_iface: &str, wifi_iface: &str) -> Result<()> {
        shell::run(
            "install_forward_rules",
            lan_iface,
            "iptables",
            &[
                "-A", "FORWARD", "-i", lan_iface, "-o", wifi_iface, "-j", "ACCEPT",
            ],
        )?;
        shell::run(
            "install_forward_rules",
            wifi_iface,
            "iptables",
            &[
                "-A", "FORWARD", "-i", wifi_iface, "-o", lan_iface, "-m", "state",
                "--state", "RELATED,ESTABLISHED", "-j", "ACCEPT",
            ],
        )?;
        Ok(())
    }

    fn add_address(&self, iface: &str, cidr: &str) -> Result<()> {
        shell::run("add_address", iface, "ip", &["addr", "add", cidr, "dev", iface])?;
        Ok(())
    }

    fn flush_addresses(&self, iface: &str) -> Result<()> {
        shell::run("flush_addresses", iface, "ip", &["addr", "flush", "dev", iface])?;
        Ok(())
    }

    fn start_dhcp_server(&self, iface: &str, range: &DhcpRange) -> Result<()> {
        let mut servers = self
            .dhcp_servers
            .lock()
            .expect("dhcp server table poisoned");
        if servers.contains_key(iface) {
            return Ok(());
        }

        let dhcp_range = format!("{},{},{},12h", range.start, range.end, range.netmask);
        let child = shell::spawn_detached(
            "start_dhcp_server",
            iface,
            "dnsmasq",
            &[
                "--keep-in-foreground",
                "--port=0",
                "--bind-interfaces",
                &format!("--interface={iface}"),
                &format!("--dhcp-range={dhcp_range}"),
            ],
        )?;
        servers.insert(iface.to_string(), child);
        debug!("dhcp server started on {}", iface);
        Ok(())
    }

    fn stop_dhcp_server(&self, iface: &str) -> Result<()> {
        let mut servers = self
            .dhcp_servers
            .lock()
            .expect("dhcp server table poisoned");
        if let Some(mut child) = servers.remove(iface) {
            if let Err(e) = child.kill() {
                warn!("failed to kill dhcp server on {}: {}", iface, e);
            }
            let _ = child.wait();
        }
        Ok(())
    }
}
