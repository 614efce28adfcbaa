//! Parsing of wireless scan output in the iwlist cell format.

use serde::{Deserialize, Serialize};

/// Encryption kind advertised by an access point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    Open,
    Wpa,
    Wpa2,
    Wpa3,
}

/// One access point observation from a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub ssid: String,
    pub bssid: String,
    pub channel: u16,
    /// Signal strength normalized to 0-100.
    pub signal_strength: u8,
    pub encryption: Encryption,
    pub open: bool,
}

/// Map a dBm signal level to a 0-100 percentage.
pub fn percent_from_dbm(dbm: i64) -> u8 {
    ((dbm + 100) * 2).clamp(0, 100) as u8
}

/// Map a Quality=x/N reading to a 0-100 percentage.
pub fn percent_from_quality(quality: u64, max: u64) -> u8 {
    if max == 0 {
        return 0;
    }
    let pct = (quality as f64 / max as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

#[derive(Default)]
struct CellBuilder {
    ssid: String,
    bssid: String,
    channel: u16,
    signal_strength: u8,
    encryption_on: bool,
    kind: Option<Encryption>,
}

impl CellBuilder {
    fn finish(self) -> Option<AccessPoint> {
        if self.bssid.is_empty() {
            return None;
        }
        let encryption = if !self.encryption_on {
            Encryption::Open
        } else {
            match self.kind {
                Some(kind) => kind,
                // Encrypted but no recognizable IE: fall back to the most
                // permissive WPA classification.
                None => Encryption::Wpa,
            }
        };
        Some(AccessPoint {
            ssid: self.ssid,
            bssid: self.bssid,
            channel: self.channel,
            signal_strength: self.signal_strength,
            encryption,
            open: !self.encryption_on,
        })
    }
}

/// Parse the output of an iwlist-style scan into access points.
///
/// Both `Quality=x/N` and `Signal level=-x dBm` strength forms are accepted.
/// Cells missing an address, and lines that do not parse, are skipped.
pub fn parse_scan_output(output: &str) -> Vec<AccessPoint> {
    let mut networks = Vec::new();
    let mut current: Option<CellBuilder> = None;

    for raw in output.lines() {
        let line = raw.trim();

        if line.starts_with("Cell ") && line.contains("Address:") {
            if let Some(cell) = current.take().and_then(CellBuilder::finish) {
                networks.push(cell);
            }
            let mut cell = CellBuilder::default();
            if let Some(addr) = line.split("Address:").nth(1) {
                cell.bssid = addr.trim().to_string();
            }
            current = Some(cell);
            continue;
        }

        let Some(cell) = current.as_mut() else {
            continue;
        };

        if let Some(rest) = line.strip_prefix("ESSID:") {
            cell.ssid = rest.trim_matches('"').to_string();
        } else if let Some(rest) = line.strip_prefix("Channel:") {
            cell.channel = rest.trim().parse().unwrap_or(0);
        } else if line.contains("Quality=") || line.contains("Signal level=") {
            if let Some(pct) = parse_strength(line) {
                cell.signal_strength = pct;
            }
        } else if let Some(rest) = line.strip_prefix("Encryption key:") {
            cell.encryption_on = !rest.trim().eq_ignore_ascii_case("off");
        } else if line.starts_with("IE: IEEE 802.11i/WPA2") {
            // May be upgraded to WPA3 by an SAE authentication suite below.
            if cell.kind != Some(Encryption::Wpa3) {
                cell.kind = Some(Encryption::Wpa2);
            }
        } else if line.starts_with("IE: WPA Version") {
            if cell.kind.is_none() {
                cell.kind = Some(Encryption::Wpa);
            }
        } else if line.contains("Authentication Suites") && line.contains("SAE") {
            cell.kind = Some(Encryption::Wpa3);
        }
    }

    if let Some(cell) = current.take().and_then(CellBuilder::finish) {
        networks.push(cell);
    }

    networks
}

fn parse_strength(line: &str) -> Option<u8> {
    if let Some(rest) = line.split("Quality=").nth(1) {
        let frac = rest.split_whitespace().next()?;
        if let Some((q, max)) = frac.split_once('/') {
            if let (Ok(q), Ok(max)) = (q.parse::<u64>(), max.parse::<u64>()) {
                return Some(percent_from_quality(q, max));
            }
        }
    }
    if let Some(rest) = line.split("Signal level=").nth(1) {
        let value = rest.split_whitespace().next()?;
        if let Ok(dbm) = value.parse::<i64>() {
            return Some(percent_from_dbm(dbm));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCAN_OUTPUT: &str = r#"wlan0     Scan completed :
          Cell 01 - Address: 00:11:22:33:44:55
                    Channel:6
                    Frequency:2.437 GHz (Channel 6)
                    Quality=56/70  Signal level=-54 dBm
                    Encryption key:off
                    ESSID:"Cafe"
          Cell 02 - Address: AA:BB:CC:DD:EE:FF
                    Channel:11
                    Signal level=-70 dBm
                    Encryption key:on
                    ESSID:"HomeNet"
                    IE: IEEE 802.11i/WPA2 Version 1
                        Group Cipher : CCMP
                        Pairwise Ciphers (1) : CCMP
                        Authentication Suites (1) : PSK
          Cell 03 - Address: 11:22:33:44:55:66
                    Channel:36
                    Quality=70/70  Signal level=-40 dBm
                    Encryption key:on
                    ESSID:"SecureNet"
                    IE: IEEE 802.11i/WPA2 Version 1
                        Group Cipher : CCMP
                        Pairwise Ciphers (1) : CCMP
                        Authentication Suites (1) : SAE
"#;

    #[test]
    fn parses_open_wpa2_and_wpa3_cells() {
        let aps = parse_scan_output(SCAN_OUTPUT);
        assert_eq!(aps.len(), 3);

        assert_eq!(aps[0].ssid, "Cafe");
        assert_eq!(aps[0].bssid, "00:11:22:33:44:55");
        assert_eq!(aps[0].channel, 6);
        assert!(aps[0].open);
        assert_eq!(aps[0].encryption, Encryption::Open);
        assert_eq!(aps[0].signal_strength, 80); // round(56/70 * 100)

        assert_eq!(aps[1].encryption, Encryption::Wpa2);
        assert!(!aps[1].open);
        assert_eq!(aps[1].signal_strength, 60); // (-70 + 100) * 2

        assert_eq!(aps[2].ssid, "SecureNet");
        assert_eq!(aps[2].encryption, Encryption::Wpa3);
        assert_eq!(aps[2].signal_strength, 100);
    }

    #[test]
    fn dbm_mapping_clamps_to_range() {
        assert_eq!(percent_from_dbm(-30), 100);
        assert_eq!(percent_from_dbm(-50), 100);
        assert_eq!(percent_from_dbm(-75), 50);
        assert_eq!(percent_from_dbm(-100), 0);
        assert_eq!(percent_from_dbm(-120), 0);
    }

    #[test]
    fn quality_mapping_rounds() {
        assert_eq!(percent_from_quality(51, 70), 73);
        assert_eq!(percent_from_quality(0, 70), 0);
        assert_eq!(percent_from_quality(70, 70), 100);
        assert_eq!(percent_from_quality(1, 0), 0);
    }

    #[test]
    fn unknown_ie_falls_back_to_wpa() {
        let output = r#"Cell 01 - Address: 00:11:22:33:44:55
                    Channel:1
                    Signal level=-60 dBm
                    Encryption key:on
                    ESSID:"Legacy"
                    IE: Unknown: DD180050F2020101
"#;
        let aps = parse_scan_output(output);
        assert_eq!(aps.len(), 1);
        assert_eq!(aps[0].encryption, Encryption::Wpa);
        assert!(!aps[0].open);
    }

    #[test]
    fn cell_without_address_is_skipped() {
        let output = r#"Cell 01 - Address: 00:11:22:33:44:55
                    ESSID:"Good"
                    Encryption key:off
          garbage line that means nothing
          Cell 02 - Address:
                    ESSID:"NoAddr"
"#;
        let aps = parse_scan_output(output);
        assert_eq!(aps.len(), 1);
        assert_eq!(aps[0].ssid, "Good");
    }

    #[test]
    fn empty_output_yields_no_networks() {
        assert!(parse_scan_output("").is_empty());
        assert!(parse_scan_output("wlan0   No scan results").is_empty());
    }
}
