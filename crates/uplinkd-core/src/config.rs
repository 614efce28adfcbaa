//! Daemon configuration.
//!
//! Loaded from a JSON file; every section and field has a default so an empty
//! or missing file yields a working configuration. A file that exists but
//! does not parse is a fatal startup error.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    pub interfaces: InterfacesConfig,
    /// Accepted under its historical name `modules` as well.
    #[serde(alias = "modules")]
    pub strategies: StrategiesConfig,
    pub scanner: ScannerConfig,
    pub monitor: MonitorConfig,
    pub auto_selection: AutoSelectionConfig,
    pub gateway: GatewayConfig,
    pub web: WebConfig,
    pub state_store: StateStoreConfig,
    pub measurement: MeasurementConfig,
    pub logging: LoggingConfig,
}

/// WiFi interface preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfacesConfig {
    /// Preferred interfaces, ordered by priority.
    pub preferred: Vec<String>,
    /// Interfaces never considered.
    pub excluded: Vec<String>,
    /// Pin the scanning role to this interface when present.
    pub scan_interface: Option<String>,
}

/// Connection strategy selection and credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategiesConfig {
    /// Strategy tags to instantiate. Absent means all built-ins.
    pub enabled: Option<Vec<String>>,
    /// SSID to passphrase map for protected networks.
    pub credentials: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    #[serde(alias = "scan_interval")]
    pub scan_interval_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    #[serde(alias = "check_interval")]
    pub check_interval_secs: u64,
    /// Consecutive failures before the monitor gives a binding up.
    pub max_attempts: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 10,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSelectionConfig {
    pub enabled: bool,
    #[serde(alias = "evaluation_interval")]
    pub evaluation_interval_secs: u64,
    pub min_score_improvement: f64,
    #[serde(alias = "initial_delay")]
    pub initial_delay_secs: u64,
}

impl Default for AutoSelectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            evaluation_interval_secs: 30,
            min_score_improvement: 10.0,
            initial_delay_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Static address assigned to the LAN interface, CIDR form.
    pub lan_address: String,
    pub dhcp_range_start: Ipv4Addr,
    pub dhcp_range_end: Ipv4Addr,
    pub dhcp_netmask: Ipv4Addr,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            lan_address: "192.168.10.1/24".to_string(),
            dhcp_range_start: Ipv4Addr::new(192, 168, 10, 50),
            dhcp_range_end: Ipv4Addr::new(192, 168, 10, 150),
            dhcp_netmask: Ipv4Addr::new(255, 255, 255, 0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Optional durable mirror for radio state and portal patterns. Advisory
/// only; its absence or failure never affects engine behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateStoreConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("/var/lib/uplinkd/state.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    pub latency_url: String,
    pub download_url: String,
    pub upload_url: String,
    pub timeout_secs: u64,
    /// Upper bound on the bytes fetched for the download measurement.
    pub download_cap_bytes: u64,
    pub upload_bytes: u64,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            latency_url: "http://connectivitycheck.gstatic.com/generate_204".to_string(),
            download_url: "http://speedtest.tele2.net/10MB.zip".to_string(),
            upload_url: "http://speedtest.tele2.net/upload.php".to_string(),
            timeout_secs: 20,
            download_cap_bytes: 4 * 1024 * 1024,
            upload_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl UplinkConfig {
    /// Load configuration.
    ///
    /// With an explicit path the file must exist and parse. Otherwise the
    /// default locations are searched and a missing file yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<UplinkConfig> {
        let config = match explicit {
            Some(path) => Self::load_file(path)?,
            None => {
                let candidates = [
                    PathBuf::from("uplinkd.json"),
                    PathBuf::from("/etc/uplinkd/config.json"),
                ];
                match candidates.iter().find(|p| p.exists()) {
                    Some(path) => Self::load_file(path)?,
                    None => {
                        info!("no configuration file found, using defaults");
                        UplinkConfig::default()
                    }
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<UplinkConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: UplinkConfig = serde_json::from_str(&content)
            .map_err(|e| EngineError::Config(format!("cannot parse {}: {e}", path.display())))?;
        info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(scan) = &self.interfaces.scan_interface {
            if self.interfaces.excluded.iter().any(|e| e == scan) {
                return Err(EngineError::Config(format!(
                    "scan_interface '{scan}' is also excluded"
                )));
            }
        }
        if self.scanner.scan_interval_secs == 0 {
            return Err(EngineError::Config(
                "scanner.scan_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.monitor.max_attempts == 0 {
            return Err(EngineError::Config(
                "monitor.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.auto_selection.min_score_improvement < 0.0 {
            return Err(EngineError::Config(
                "auto_selection.min_score_improvement must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = UplinkConfig::default();
        assert_eq!(config.scanner.scan_interval_secs, 5);
        assert_eq!(config.monitor.check_interval_secs, 10);
        assert_eq!(config.monitor.max_attempts, 5);
        assert!(!config.auto_selection.enabled);
        assert_eq!(config.auto_selection.evaluation_interval_secs, 30);
        assert_eq!(config.auto_selection.min_score_improvement, 10.0);
        assert_eq!(config.auto_selection.initial_delay_secs, 10);
        assert_eq!(config.web.port, 5000);
        assert!(!config.state_store.enabled);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"interfaces": {{"preferred": ["wlan1"], "excluded": ["wlan9"]}},
                "auto_selection": {{"enabled": true}}}}"#
        )
        .unwrap();

        let config = UplinkConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.interfaces.preferred, vec!["wlan1"]);
        assert_eq!(config.interfaces.excluded, vec!["wlan9"]);
        assert!(config.auto_selection.enabled);
        assert_eq!(config.auto_selection.evaluation_interval_secs, 30);
        assert_eq!(config.scanner.scan_interval_secs, 5);
    }

    #[test]
    fn malformed_file_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();

        let err = UplinkConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn excluded_scan_interface_is_contradictory() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"interfaces": {{"scan_interface": "wlan0", "excluded": ["wlan0"]}}}}"#
        )
        .unwrap();

        let err = UplinkConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
