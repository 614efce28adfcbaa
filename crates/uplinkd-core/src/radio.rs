//! One wireless interface and the operations the engine performs on it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use uplinkd_netops::{parse_scan_output, AccessPoint, Credential, HostOps};

use crate::error::{EngineError, Result};

/// Hard timeout for a single association attempt.
pub const ASSOCIATE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default retry policy for `associate`.
pub const ASSOCIATE_ATTEMPTS: u32 = 3;
pub const ASSOCIATE_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// The AP and credential behind the current association, kept so the monitor
/// can reconnect without the original request.
#[derive(Debug, Clone)]
pub struct LastAssociation {
    pub ap: AccessPoint,
    pub credential: Option<Credential>,
}

pub struct Radio {
    name: String,
    ops: Arc<dyn HostOps>,
    last: Mutex<Option<LastAssociation>>,
}

impl Radio {
    /// Construction-time validation: a radio that fails the wireless probe is
    /// never considered again.
    pub fn probe(name: &str, ops: Arc<dyn HostOps>) -> Result<Radio> {
        ops.probe_wireless(name)?;
        Ok(Radio {
            name: name.to_string(),
            ops,
            last: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bring the interface up, trigger a scan and parse the results.
    pub fn scan(&self) -> Result<Vec<AccessPoint>> {
        let output = self
            .ops
            .scan_output(&self.name)
            .map_err(|e| EngineError::ScanFailed(e.to_string()))?;
        Ok(parse_scan_output(&output))
    }

    /// Associate with the given AP, retrying with exponential backoff.
    /// Association failures do not poison the radio; the last successful
    /// association is cached for `reconnect`.
    pub fn associate(&self, ap: &AccessPoint, credential: Option<&Credential>) -> Result<()> {
        self.associate_with_policy(ap, credential, ASSOCIATE_ATTEMPTS, ASSOCIATE_BACKOFF_BASE)
    }

    pub fn associate_with_policy(
        &self,
        ap: &AccessPoint,
        credential: Option<&Credential>,
        attempts: u32,
        backoff_base: Duration,
    ) -> Result<()> {
        let mut last_error = String::new();
        for attempt in 1..=attempts.max(1) {
            match self
                .ops
                .associate(&self.name, &ap.ssid, &ap.bssid, credential, ASSOCIATE_TIMEOUT)
            {
                Ok(()) => {
                    *self.last.lock().expect("radio state poisoned") = Some(LastAssociation {
                        ap: ap.clone(),
                        credential: credential.cloned(),
                    });
                    debug!("{} associated with '{}'", self.name, ap.ssid);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "{} association attempt {}/{} with '{}' failed: {}",
                        self.name, attempt, attempts, ap.ssid, e
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        std::thread::sleep(backoff_base * 2u32.pow(attempt - 1));
                    }
                }
            }
        }
        Err(EngineError::AssociationFailed(last_error))
    }

    /// Re-associate using the cached AP and credential.
    pub fn reconnect(&self, attempts: u32, backoff_base: Duration) -> Result<()> {
        let last = self
            .last_association()
            .ok_or_else(|| EngineError::AssociationFailed("no cached association".to_string()))?;
        self.associate_with_policy(&last.ap, last.credential.as_ref(), attempts, backoff_base)
    }

    pub fn disassociate(&self) -> Result<()> {
        self.ops.disassociate(&self.name)?;
        Ok(())
    }

    /// Acquire a DHCP lease on this interface.
    pub fn acquire_dhcp(&self, timeout: Duration) -> Result<()> {
        self.ops
            .acquire_dhcp(&self.name, timeout)
            .map_err(|e| EngineError::AssociationFailed(format!("dhcp: {e}")))
    }

    pub fn last_association(&self) -> Option<LastAssociation> {
        self.last.lock().expect("radio state poisoned").clone()
    }

    pub fn clear_last_association(&self) {
        *self.last.lock().expect("radio state poisoned") = None;
    }

    // Read-only introspection. Any failure reads as "not".

    pub fn is_up(&self) -> bool {
        self.ops.is_up(&self.name).unwrap_or(false)
    }

    pub fn is_associated(&self) -> bool {
        self.ops
            .link_status(&self.name)
            .map(|s| s.associated)
            .unwrap_or(false)
    }

    pub fn associated_ssid(&self) -> Option<String> {
        self.ops
            .link_status(&self.name)
            .ok()
            .and_then(|s| s.ssid)
    }
}

impl std::fmt::Debug for Radio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Radio").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ap_open, MockHostOps};

    #[test]
    fn probe_rejects_non_wireless_interfaces() {
        let ops = MockHostOps::new();
        ops.add_interface("eth0", false);
        let err = Radio::probe("eth0", ops.shared()).unwrap_err();
        assert!(matches!(err, EngineError::Host(_)));
    }

    #[test]
    fn scan_parses_mocked_tool_output() {
        let ops = MockHostOps::new();
        ops.add_interface("wlan0", true);
        ops.set_scan_output(
            r#"Cell 01 - Address: 00:11:22:33:44:55
                    Channel:6
                    Signal level=-55 dBm
                    Encryption key:off
                    ESSID:"Cafe"
"#,
        );
        let radio = Radio::probe("wlan0", ops.shared()).unwrap();
        let aps = radio.scan().unwrap();
        assert_eq!(aps.len(), 1);
        assert_eq!(aps[0].ssid, "Cafe");
        assert_eq!(aps[0].signal_strength, 90);
    }

    #[test]
    fn associate_caches_last_association() {
        let ops = MockHostOps::new();
        ops.add_interface("wlan1", true);
        let radio = Radio::probe("wlan1", ops.shared()).unwrap();

        let ap = ap_open("Cafe", "00:11:22:33:44:55", 90);
        radio.associate(&ap, None).unwrap();

        let last = radio.last_association().unwrap();
        assert_eq!(last.ap.ssid, "Cafe");
        assert!(last.credential.is_none());
        assert!(radio.is_associated());
        assert_eq!(radio.associated_ssid().as_deref(), Some("Cafe"));
    }

    #[test]
    fn associate_retries_then_surfaces_failure() {
        let ops = MockHostOps::new();
        ops.add_interface("wlan1", true);
        ops.fail_associations_to("Hostile");
        let radio = Radio::probe("wlan1", ops.shared()).unwrap();

        let ap = ap_open("Hostile", "aa:bb:cc:dd:ee:ff", 40);
        let err = radio
            .associate_with_policy(&ap, None, 3, Duration::from_millis(1))
            .unwrap_err();
        assert!(matches!(err, EngineError::AssociationFailed(_)));
        assert_eq!(ops.association_attempts("wlan1"), 3);
        // A failed association never becomes the cached one.
        assert!(radio.last_association().is_none());
    }

    #[test]
    fn reconnect_reuses_cached_ap() {
        let ops = MockHostOps::new();
        ops.add_interface("wlan1", true);
        let radio = Radio::probe("wlan1", ops.shared()).unwrap();

        let ap = ap_open("Cafe", "00:11:22:33:44:55", 90);
        radio.associate(&ap, None).unwrap();
        ops.drop_link("wlan1");
        assert!(!radio.is_associated());

        radio.reconnect(2, Duration::from_millis(1)).unwrap();
        assert!(radio.is_associated());
    }

    #[test]
    fn introspection_reads_failures_as_not() {
        let ops = MockHostOps::new();
        ops.add_interface("wlan1", true);
        let radio = Radio::probe("wlan1", ops.shared()).unwrap();
        ops.fail_op("link_status");
        assert!(!radio.is_associated());
        assert!(radio.associated_ssid().is_none());
    }
}
